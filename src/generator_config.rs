//! Signal outputs: the two-channel PWM generator and the DAC.

use crate::acquisition_config::ConfigError;

/// Largest raw value the 12-bit DAC accepts.
pub const DAC_MAX: u16 = 4095;

/// Both PWM channels share one timer, so they run at the same frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmConfig {
    pub frequency_hz: u32,
    pub ch1_duty_percent: u8,
    pub ch2_duty_percent: u8,
    /// Phase of channel 2 relative to channel 1, as a share of the period.
    pub ch2_offset_percent: u8,
    pub ch1_enabled: bool,
    pub ch2_enabled: bool,
}

impl Default for PwmConfig {
    /// What the firmware runs after power-on.
    fn default() -> Self {
        Self {
            frequency_hz: 1000,
            ch1_duty_percent: 25,
            ch2_duty_percent: 25,
            ch2_offset_percent: 50,
            ch1_enabled: true,
            ch2_enabled: true,
        }
    }
}

impl PwmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frequency_hz == 0 {
            return Err(ConfigError::PwmFrequencyOutOfRange(self.frequency_hz));
        }
        for (field, value) in [
            ("ch1 duty", self.ch1_duty_percent),
            ("ch2 duty", self.ch2_duty_percent),
            ("ch2 offset", self.ch2_offset_percent),
        ] {
            if value > 100 {
                return Err(ConfigError::PercentOutOfRange { field, value });
            }
        }
        Ok(())
    }

    /// `PWM:SET freq,duty1,duty2,offset2,en1,en2`.
    pub fn set_command(&self) -> String {
        format!(
            "PWM:SET {},{},{},{},{},{}",
            self.frequency_hz,
            self.ch1_duty_percent,
            self.ch2_duty_percent,
            self.ch2_offset_percent,
            u8::from(self.ch1_enabled),
            u8::from(self.ch2_enabled)
        )
    }
}

/// `SGEN:SET <value>` for a raw DAC value.
pub fn dac_command(value: u16) -> Result<String, ConfigError> {
    if value > DAC_MAX {
        return Err(ConfigError::DacValueOutOfRange(value));
    }
    Ok(format!("SGEN:SET {}", value))
}
