//! Parsers for what the instrument reports about itself: the active capture
//! settings (`SCOP:SET?`, `LA:SET?`), the PWM generator (`PWM:SET?`) and the
//! frequency counter (`CNTR:READ?`).

use crate::acquisition_config::{BitDepth, ChannelMask};
use crate::sample_decoder::DecodeError;
use crate::trigger_config::{TriggerEdge, TriggerMode};
use std::str::FromStr;

/// Trigger as echoed back by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerReport {
    pub channel: u8,
    /// Only reported by the oscilloscope.
    pub level_percent: Option<u8>,
    pub edge: TriggerEdge,
    pub mode: TriggerMode,
    pub pretrigger_percent: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeSettings {
    pub bits: BitDepth,
    pub memory_depth: u32,
    /// Rate the device actually runs at, which may differ from the request.
    pub sample_rate: f64,
    pub channels: ChannelMask,
    pub trigger: TriggerReport,
    /// Highest source impedance that still settles within one sample, in kOhm.
    pub max_source_impedance_kohm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicAnalyzerSettings {
    pub memory_depth: u32,
    pub sample_rate: f64,
    pub trigger: TriggerReport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceSettings {
    Scope(ScopeSettings),
    LogicAnalyzer(LogicAnalyzerSettings),
}

fn split_fields(line: &str, expected: usize) -> Result<Vec<&str>, DecodeError> {
    let fields: Vec<&str> = line.trim().trim_matches('"').split(',').map(str::trim).collect();
    if fields.len() != expected {
        return Err(DecodeError::FieldCount {
            expected,
            actual: fields.len(),
            line: line.to_string(),
        });
    }
    Ok(fields)
}

fn parse<T: FromStr>(field: &'static str, value: &str) -> Result<T, DecodeError> {
    value.parse().map_err(|_| DecodeError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn parse_with<T, E>(field: &'static str, value: &str, f: impl FnOnce(&str) -> Result<T, E>) -> Result<T, DecodeError> {
    f(value).map_err(|_| DecodeError::InvalidField {
        field,
        value: value.to_string(),
    })
}

impl FromStr for ScopeSettings {
    type Err = DecodeError;

    /// `bits,mem,fs,chmask,trig_ch,trig_val,edge,mode,pretrigger,max_z` where
    /// `max_z` carries a `kOhm` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 10)?;

        let impedance = fields[9];
        let max_source_impedance_kohm = parse(
            "max impedance",
            impedance.strip_suffix("kOhm").unwrap_or(impedance).trim(),
        )?;

        Ok(Self {
            bits: parse_with("bit depth", fields[0], |v| {
                v.parse::<u8>()
                    .map_err(|_| ())
                    .and_then(|bits| BitDepth::try_from(bits).map_err(|_| ()))
            })?,
            memory_depth: parse("memory depth", fields[1])?,
            sample_rate: parse("sample rate", fields[2])?,
            channels: parse_with("channel mask", fields[3], ChannelMask::from_str)?,
            trigger: TriggerReport {
                channel: parse("trigger channel", fields[4])?,
                level_percent: Some(parse("trigger level", fields[5])?),
                edge: parse_with("trigger edge", fields[6], TriggerEdge::from_str)?,
                mode: parse_with("trigger mode", fields[7], TriggerMode::from_str)?,
                pretrigger_percent: parse("pretrigger", fields[8])?,
            },
            max_source_impedance_kohm,
        })
    }
}

impl FromStr for LogicAnalyzerSettings {
    type Err = DecodeError;

    /// `mem,fs,trig_ch,edge,mode,pretrigger`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 6)?;

        Ok(Self {
            memory_depth: parse("memory depth", fields[0])?,
            sample_rate: parse("sample rate", fields[1])?,
            trigger: TriggerReport {
                channel: parse("trigger channel", fields[2])?,
                level_percent: None,
                edge: parse_with("trigger edge", fields[3], TriggerEdge::from_str)?,
                mode: parse_with("trigger mode", fields[4], TriggerMode::from_str)?,
                pretrigger_percent: parse("pretrigger", fields[5])?,
            },
        })
    }
}

/// PWM generator state as reported by `PWM:SET?`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmSettings {
    /// Achieved frequency, which the timer may round.
    pub frequency_hz: f64,
    pub ch1_duty_percent: f64,
    pub ch2_duty_percent: f64,
    pub ch2_offset_percent: u8,
    pub ch1_enabled: bool,
    pub ch2_enabled: bool,
}

impl FromStr for PwmSettings {
    type Err = DecodeError;

    /// `freq,duty1,duty2,offset2,en1,en2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 6)?;
        Ok(Self {
            frequency_hz: parse("pwm frequency", fields[0])?,
            ch1_duty_percent: parse("ch1 duty", fields[1])?,
            ch2_duty_percent: parse("ch2 duty", fields[2])?,
            ch2_offset_percent: parse("ch2 offset", fields[3])?,
            ch1_enabled: parse_enabled("ch1 enabled", fields[4])?,
            ch2_enabled: parse_enabled("ch2 enabled", fields[5])?,
        })
    }
}

fn parse_enabled(field: &'static str, value: &str) -> Result<bool, DecodeError> {
    match value {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(DecodeError::InvalidField {
            field,
            value: value.to_string(),
        }),
    }
}

/// Frequency counter result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterReading {
    pub frequency_hz: f64,
    pub period_s: f64,
}

impl FromStr for CounterReading {
    type Err = DecodeError;

    /// `"<f> Hz|kHz|MHz,<T> s|ms|us"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = split_fields(s, 2)?;
        Ok(Self {
            frequency_hz: parse_quantity("frequency", fields[0], &[("Hz", 1.0), ("kHz", 1e3), ("MHz", 1e6)])?,
            period_s: parse_quantity("period", fields[1], &[("s", 1.0), ("ms", 1e-3), ("us", 1e-6)])?,
        })
    }
}

fn parse_quantity(field: &'static str, value: &str, units: &[(&str, f64)]) -> Result<f64, DecodeError> {
    let invalid = || DecodeError::InvalidField {
        field,
        value: value.to_string(),
    };

    let mut parts = value.split_whitespace();
    let (Some(number), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let number: f64 = number.parse().map_err(|_| invalid())?;
    let factor = units
        .iter()
        .find(|(name, _)| *name == unit)
        .map(|&(_, factor)| factor)
        .ok_or_else(invalid)?;

    Ok(number * factor)
}
