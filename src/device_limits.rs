//! Capabilities the instrument reports through `SYST:LIM?`, and the capture
//! bounds derived from them.

use crate::acquisition_config::{BitDepth, ChannelMask, Mode};
use std::str::FromStr;

/// How many ADCs the firmware multiplexes across the four inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcTopology {
    Single,
    Dual,
    Quad,
}

impl AdcTopology {
    pub fn converters(&self) -> u8 {
        match self {
            AdcTopology::Single => 1,
            AdcTopology::Dual => 2,
            AdcTopology::Quad => 4,
        }
    }
}

impl TryFrom<u8> for AdcTopology {
    type Error = LimitsError;

    fn try_from(converters: u8) -> Result<Self, Self::Error> {
        match converters {
            1 => Ok(AdcTopology::Single),
            2 => Ok(AdcTopology::Dual),
            4 => Ok(AdcTopology::Quad),
            other => Err(LimitsError::InvalidField {
                field: "adc_topology",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitsError {
    #[error("Expected 6 limit fields, got {actual}: '{response}'")]
    FieldCount { actual: usize, response: String },

    #[error("Invalid {field} in limits: '{value}'")]
    InvalidField { field: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceLimits {
    /// Fastest single-channel ADC sample period, in seconds.
    pub adc_sample_period: f64,
    /// Sample memory in bytes.
    pub max_memory: u32,
    pub la_max_sample_rate: u32,
    pub adc_topology: AdcTopology,
    pub bit8_only: bool,
    pub has_dac: bool,
}

impl FromStr for DeviceLimits {
    type Err = LimitsError;

    /// Parse `adc_sample_period,mem_limit,la_max_fs,adc_topology,bit8_only,has_dac`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        let [period, memory, la_rate, topology, bit8, dac] = fields.as_slice() else {
            return Err(LimitsError::FieldCount {
                actual: fields.len(),
                response: s.to_string(),
            });
        };

        let adc_sample_period: f64 = parse_field("adc_sample_period", period)?;
        if !(adc_sample_period.is_finite() && adc_sample_period > 0.0) {
            return Err(invalid("adc_sample_period", period));
        }

        Ok(Self {
            adc_sample_period,
            max_memory: parse_field("mem_limit", memory)?,
            la_max_sample_rate: parse_field("la_max_fs", la_rate)?,
            adc_topology: AdcTopology::try_from(parse_field::<u8>("adc_topology", topology)?)?,
            bit8_only: parse_flag("bit8_only", bit8)?,
            has_dac: parse_flag("has_dac", dac)?,
        })
    }
}

impl DeviceLimits {
    /// Largest memory depth, in samples per channel, the device can hold.
    pub fn max_memory_depth(&self, mode: Mode, bits: Option<BitDepth>, channels: ChannelMask) -> u32 {
        let mut max = self.max_memory;
        if bits == Some(BitDepth::Twelve) {
            max /= 2;
        }
        if mode == Mode::Scope {
            max /= 2 * channels.count() as u32 + 1;
        }
        max
    }

    /// Highest sample rate in Hz for the given channel selection.
    pub fn max_sample_rate(&self, mode: Mode, channels: ChannelMask) -> u32 {
        if mode != Mode::Scope {
            return self.la_max_sample_rate;
        }

        let [ch1, ch2, ch3, ch4] = channels.as_array().map(u32::from);
        // ADC conversions per sampling round.
        let conversions = match self.adc_topology {
            AdcTopology::Single => ch1 + ch2 + ch3 + ch4 + 1,
            AdcTopology::Dual => (ch1 + ch2 + 1).max(ch3 + ch4),
            AdcTopology::Quad => {
                if ch1 == 1 {
                    2
                } else {
                    1
                }
            }
        };

        (1.0 / (self.adc_sample_period * f64::from(conversions))) as u32
    }

    /// Bit depths the setup flow may offer.
    pub fn selectable_bit_depths(&self) -> &'static [BitDepth] {
        if self.bit8_only {
            &[BitDepth::Twelve]
        } else {
            &[BitDepth::Eight, BitDepth::Twelve]
        }
    }
}

fn invalid(field: &'static str, value: &str) -> LimitsError {
    LimitsError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, LimitsError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, LimitsError> {
    match value {
        "True" | "true" | "1" => Ok(true),
        "False" | "false" | "0" => Ok(false),
        _ => Err(invalid(field, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(topology: AdcTopology) -> DeviceLimits {
        DeviceLimits {
            adc_sample_period: 1e-6,
            max_memory: 10_000,
            la_max_sample_rate: 2_000_000,
            adc_topology: topology,
            bit8_only: false,
            has_dac: false,
        }
    }

    fn mask(s: &str) -> ChannelMask {
        s.parse().unwrap()
    }

    fn assert_near(actual: u32, expected: u32) {
        assert!(
            actual.abs_diff(expected) <= 1,
            "expected about {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_parse_limits_response() {
        let limits: DeviceLimits = "0.000001,10000,2000000,1,True,False".parse().unwrap();

        assert_eq!(limits.adc_sample_period, 1e-6);
        assert_eq!(limits.max_memory, 10_000);
        assert_eq!(limits.la_max_sample_rate, 2_000_000);
        assert_eq!(limits.adc_topology, AdcTopology::Single);
        assert!(limits.bit8_only);
        assert!(!limits.has_dac);
    }

    #[test]
    fn test_parse_rejects_bad_responses() {
        assert_eq!(
            "0.000001,10000,2000000,1,True".parse::<DeviceLimits>(),
            Err(LimitsError::FieldCount {
                actual: 5,
                response: "0.000001,10000,2000000,1,True".to_string()
            })
        );
        assert!(matches!(
            "0.000001,10000,2000000,3,True,False".parse::<DeviceLimits>(),
            Err(LimitsError::InvalidField { field: "adc_topology", .. })
        ));
        assert!(matches!(
            "0.000001,10000,2000000,1,maybe,False".parse::<DeviceLimits>(),
            Err(LimitsError::InvalidField { field: "bit8_only", .. })
        ));
        assert!(matches!(
            "0,10000,2000000,1,1,0".parse::<DeviceLimits>(),
            Err(LimitsError::InvalidField { field: "adc_sample_period", .. })
        ));
    }

    #[test]
    fn test_max_memory_depth() {
        let limits = limits(AdcTopology::Single);

        assert_eq!(limits.max_memory_depth(Mode::Scope, Some(BitDepth::Twelve), mask("TFFF")), 1666);
        assert_eq!(limits.max_memory_depth(Mode::Scope, Some(BitDepth::Eight), mask("TTFF")), 2000);
        assert_eq!(limits.max_memory_depth(Mode::LogicAnalyzer, None, ChannelMask::all()), 10_000);
    }

    #[test]
    fn test_max_sample_rate_per_topology() {
        let single = limits(AdcTopology::Single);
        assert_near(single.max_sample_rate(Mode::Scope, mask("TFFF")), 500_000);
        assert_near(single.max_sample_rate(Mode::Scope, mask("TTTT")), 200_000);

        let dual = limits(AdcTopology::Dual);
        assert_near(dual.max_sample_rate(Mode::Scope, mask("TTFF")), 333_333);
        assert_near(dual.max_sample_rate(Mode::Scope, mask("FFTT")), 500_000);

        let quad = limits(AdcTopology::Quad);
        assert_near(quad.max_sample_rate(Mode::Scope, mask("TTTT")), 500_000);
        assert_near(quad.max_sample_rate(Mode::Scope, mask("FTTT")), 1_000_000);

        assert_eq!(quad.max_sample_rate(Mode::LogicAnalyzer, ChannelMask::all()), 2_000_000);
    }

    #[test]
    fn test_selectable_bit_depths() {
        let mut limits = limits(AdcTopology::Single);
        assert_eq!(limits.selectable_bit_depths(), &[BitDepth::Eight, BitDepth::Twelve]);
        limits.bit8_only = true;
        assert_eq!(limits.selectable_bit_depths(), &[BitDepth::Twelve]);
    }
}
