//! What the instrument is asked to capture.
//!
//! A configuration is chosen once per session and handed by reference to the
//! frame reader and the decoder; nothing downstream re-derives it from device
//! state.

use crate::device_limits::DeviceLimits;
use crate::trigger_config::{Trigger, TriggerMode, CHANNELS};
use std::fmt;
use std::str::FromStr;

/// Averaging range accepted by `VM:READ?`.
pub const VM_AVERAGING: std::ops::RangeInclusive<u32> = 1..=200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Unknown acquisition mode '{0}'")]
    UnknownMode(String),

    #[error("Channel mask must be four T/F characters, got '{0}'")]
    InvalidChannelMask(String),

    #[error("Invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("At least one channel must be enabled")]
    NoChannelsEnabled,

    #[error("{0}-bit sampling is not available on this device")]
    BitDepthUnavailable(u8),

    #[error("Memory depth {requested} out of range (1 - {max})")]
    MemoryDepthOutOfRange { requested: u32, max: u32 },

    #[error("Sample rate {requested} Hz out of range (1 - {max})")]
    SampleRateOutOfRange { requested: u32, max: u32 },

    #[error("{field} of {value}% out of range (0 - 100)")]
    PercentOutOfRange { field: &'static str, value: u8 },

    #[error("Trigger channel {0} out of range (1 - 4)")]
    TriggerChannelOutOfRange(u8),

    #[error("Averaging count {0} out of range (1 - 200)")]
    AveragingOutOfRange(u32),

    #[error("PWM frequency {0} Hz must be at least 1 Hz")]
    PwmFrequencyOutOfRange(u32),

    #[error("DAC value {0} out of range (0 - 4095)")]
    DacValueOutOfRange(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Scope,
    LogicAnalyzer,
    VoltMeter,
}

impl Mode {
    /// Name used by `SYST:MODE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Scope => "SCOPE",
            Mode::LogicAnalyzer => "LA",
            Mode::VoltMeter => "VM",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SCOPE" | "SCOP" => Ok(Mode::Scope),
            "LA" => Ok(Mode::LogicAnalyzer),
            "VM" => Ok(Mode::VoltMeter),
            _ => Err(ConfigError::UnknownMode(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Eight,
    Twelve,
}

impl BitDepth {
    pub fn bits(&self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Twelve => 12,
        }
    }

    /// Bytes one sample takes on the wire.
    pub fn sample_size(&self) -> usize {
        match self {
            BitDepth::Eight => 1,
            BitDepth::Twelve => 2,
        }
    }

    /// Divisor turning a raw sample into volts.
    pub fn scale(&self) -> f64 {
        match self {
            BitDepth::Eight => 100.0,
            BitDepth::Twelve => 10_000.0,
        }
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(BitDepth::Eight),
            12 => Ok(BitDepth::Twelve),
            other => Err(ConfigError::InvalidField {
                field: "bit depth",
                value: other.to_string(),
            }),
        }
    }
}

/// Which of the four analog inputs take part in a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask([bool; CHANNELS as usize]);

impl ChannelMask {
    pub const fn new(enabled: [bool; CHANNELS as usize]) -> Self {
        Self(enabled)
    }

    pub const fn all() -> Self {
        Self([true; CHANNELS as usize])
    }

    pub fn is_enabled(&self, index: usize) -> bool {
        self.0.get(index).copied().unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|&&on| on).count()
    }

    /// Zero-based indices of enabled channels, ascending.
    pub fn enabled(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().filter(|&(_, &on)| on).map(|(i, _)| i)
    }

    pub fn as_array(&self) -> [bool; CHANNELS as usize] {
        self.0
    }
}

impl fmt::Display for ChannelMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &on in &self.0 {
            f.write_str(if on { "T" } else { "F" })?;
        }
        Ok(())
    }
}

impl FromStr for ChannelMask {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut mask = [false; CHANNELS as usize];
        if s.chars().count() != mask.len() {
            return Err(ConfigError::InvalidChannelMask(s.to_string()));
        }
        for (slot, c) in mask.iter_mut().zip(s.chars()) {
            *slot = match c.to_ascii_uppercase() {
                'T' => true,
                'F' => false,
                _ => return Err(ConfigError::InvalidChannelMask(s.to_string())),
            };
        }
        Ok(Self(mask))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeConfig {
    pub bits: BitDepth,
    pub channels: ChannelMask,
    pub memory_depth: u32,
    pub sample_rate: u32,
    pub trigger: Trigger,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            bits: BitDepth::Twelve,
            channels: ChannelMask::new([true, false, false, false]),
            memory_depth: 500,
            sample_rate: 1000,
            trigger: Trigger::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicAnalyzerConfig {
    pub memory_depth: u32,
    pub sample_rate: u32,
    pub trigger: Trigger,
}

impl Default for LogicAnalyzerConfig {
    fn default() -> Self {
        Self {
            memory_depth: 500,
            sample_rate: 1000,
            trigger: Trigger::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoltmeterConfig {
    pub channels: ChannelMask,
    /// Samples the device averages per reading.
    pub averaging: u32,
    pub show_vcc: bool,
}

impl Default for VoltmeterConfig {
    fn default() -> Self {
        Self {
            channels: ChannelMask::new([true, true, false, false]),
            averaging: 1,
            show_vcc: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionConfig {
    Scope(ScopeConfig),
    LogicAnalyzer(LogicAnalyzerConfig),
    VoltMeter(VoltmeterConfig),
}

impl From<ScopeConfig> for AcquisitionConfig {
    fn from(config: ScopeConfig) -> Self {
        Self::Scope(config)
    }
}

impl From<LogicAnalyzerConfig> for AcquisitionConfig {
    fn from(config: LogicAnalyzerConfig) -> Self {
        Self::LogicAnalyzer(config)
    }
}

impl From<VoltmeterConfig> for AcquisitionConfig {
    fn from(config: VoltmeterConfig) -> Self {
        Self::VoltMeter(config)
    }
}

impl AcquisitionConfig {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Scope(_) => Mode::Scope,
            Self::LogicAnalyzer(_) => Mode::LogicAnalyzer,
            Self::VoltMeter(_) => Mode::VoltMeter,
        }
    }

    /// The logic analyzer always samples all four inputs.
    pub fn channels(&self) -> ChannelMask {
        match self {
            Self::Scope(scope) => scope.channels,
            Self::LogicAnalyzer(_) => ChannelMask::all(),
            Self::VoltMeter(vm) => vm.channels,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels().count()
    }

    pub fn bit_depth(&self) -> Option<BitDepth> {
        match self {
            Self::Scope(scope) => Some(scope.bits),
            _ => None,
        }
    }

    pub fn memory_depth(&self) -> Option<u32> {
        match self {
            Self::Scope(scope) => Some(scope.memory_depth),
            Self::LogicAnalyzer(la) => Some(la.memory_depth),
            Self::VoltMeter(_) => None,
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            Self::Scope(scope) => Some(scope.sample_rate),
            Self::LogicAnalyzer(la) => Some(la.sample_rate),
            Self::VoltMeter(_) => None,
        }
    }

    pub fn trigger(&self) -> Option<&Trigger> {
        match self {
            Self::Scope(scope) => Some(&scope.trigger),
            Self::LogicAnalyzer(la) => Some(&la.trigger),
            Self::VoltMeter(_) => None,
        }
    }

    /// Single-shot captures stop after one read until the mode is re-selected.
    pub fn needs_rearm(&self) -> bool {
        self.trigger()
            .is_some_and(|trigger| trigger.mode == TriggerMode::Single)
    }

    /// Command applying this configuration, if the mode has one.
    pub fn set_command(&self) -> Option<String> {
        match self {
            Self::Scope(scope) => Some(format!(
                "SCOP:SET {},{},{},{},{}",
                scope.bits.bits(),
                scope.memory_depth,
                scope.sample_rate,
                scope.channels,
                scope.trigger.scope_fields()
            )),
            Self::LogicAnalyzer(la) => Some(format!(
                "LA:SET {},{},{}",
                la.memory_depth,
                la.sample_rate,
                la.trigger.logic_analyzer_fields()
            )),
            Self::VoltMeter(_) => None,
        }
    }

    pub fn read_command(&self) -> String {
        match self {
            Self::Scope(_) => "SCOP:READ?".to_string(),
            Self::LogicAnalyzer(_) => "LA:READ?".to_string(),
            Self::VoltMeter(vm) => format!("VM:READ? {}", vm.averaging),
        }
    }

    /// Check every field against what the device reported it can do.
    pub fn validate(&self, limits: &DeviceLimits) -> Result<(), ConfigError> {
        match self {
            Self::Scope(scope) => {
                if scope.channels.count() == 0 {
                    return Err(ConfigError::NoChannelsEnabled);
                }
                if !limits.selectable_bit_depths().contains(&scope.bits) {
                    return Err(ConfigError::BitDepthUnavailable(scope.bits.bits()));
                }
                check_memory_depth(
                    scope.memory_depth,
                    limits.max_memory_depth(Mode::Scope, Some(scope.bits), scope.channels),
                )?;
                check_sample_rate(
                    scope.sample_rate,
                    limits.max_sample_rate(Mode::Scope, scope.channels),
                )?;
                scope.trigger.validate()
            }
            Self::LogicAnalyzer(la) => {
                let channels = ChannelMask::all();
                check_memory_depth(
                    la.memory_depth,
                    limits.max_memory_depth(Mode::LogicAnalyzer, None, channels),
                )?;
                check_sample_rate(
                    la.sample_rate,
                    limits.max_sample_rate(Mode::LogicAnalyzer, channels),
                )?;
                la.trigger.validate()
            }
            Self::VoltMeter(vm) => {
                if !VM_AVERAGING.contains(&vm.averaging) {
                    return Err(ConfigError::AveragingOutOfRange(vm.averaging));
                }
                Ok(())
            }
        }
    }
}

fn check_memory_depth(requested: u32, max: u32) -> Result<(), ConfigError> {
    if requested == 0 || requested > max {
        return Err(ConfigError::MemoryDepthOutOfRange { requested, max });
    }
    Ok(())
}

fn check_sample_rate(requested: u32, max: u32) -> Result<(), ConfigError> {
    if requested == 0 || requested > max {
        return Err(ConfigError::SampleRateOutOfRange { requested, max });
    }
    Ok(())
}
