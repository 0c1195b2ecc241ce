use crate::acquisition_config::ConfigError;
use std::str::FromStr;

pub const CHANNELS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEdge {
    Rising,
    Falling,
}

impl TriggerEdge {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEdge::Rising => "R",
            TriggerEdge::Falling => "F",
        }
    }
}

impl FromStr for TriggerEdge {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "R" | "r" => Ok(TriggerEdge::Rising),
            "F" | "f" => Ok(TriggerEdge::Falling),
            other => Err(ConfigError::InvalidField {
                field: "trigger edge",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Auto,
    Normal,
    /// Captures once, then waits to be re-armed.
    Single,
    Disabled,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Auto => "A",
            TriggerMode::Normal => "N",
            TriggerMode::Single => "S",
            TriggerMode::Disabled => "D",
        }
    }
}

impl FromStr for TriggerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(TriggerMode::Auto),
            "N" | "n" => Ok(TriggerMode::Normal),
            "S" | "s" => Ok(TriggerMode::Single),
            "D" | "d" => Ok(TriggerMode::Disabled),
            other => Err(ConfigError::InvalidField {
                field: "trigger mode",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug)]
pub struct TriggerBuilder {
    channel: u8,
    level_percent: u8,
    edge: TriggerEdge,
    pretrigger_percent: u8,
}

impl TriggerBuilder {
    pub fn new() -> Self {
        Self {
            channel: 1,
            level_percent: 50,
            edge: TriggerEdge::Rising,
            pretrigger_percent: 50,
        }
    }

    /// Channel to watch, 1 to 4.
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Trigger level as a percentage of full scale. Ignored by the logic analyzer.
    pub fn level_percent(mut self, percent: u8) -> Self {
        self.level_percent = percent;
        self
    }

    pub fn rising_edge(mut self) -> Self {
        self.edge = TriggerEdge::Rising;
        self
    }

    pub fn falling_edge(mut self) -> Self {
        self.edge = TriggerEdge::Falling;
        self
    }

    /// Share of the memory depth recorded before the trigger event.
    pub fn pretrigger_percent(mut self, percent: u8) -> Self {
        self.pretrigger_percent = percent;
        self
    }

    /// Fires on the edge, or on its own when no edge shows up.
    pub fn auto(self) -> Trigger {
        self.build(TriggerMode::Auto)
    }

    pub fn normal(self) -> Trigger {
        self.build(TriggerMode::Normal)
    }

    pub fn single(self) -> Trigger {
        self.build(TriggerMode::Single)
    }

    /// Free-running capture, the edge settings are kept but not used.
    pub fn disabled(self) -> Trigger {
        self.build(TriggerMode::Disabled)
    }

    fn build(self, mode: TriggerMode) -> Trigger {
        Trigger {
            channel: self.channel,
            level_percent: self.level_percent,
            edge: self.edge,
            mode,
            pretrigger_percent: self.pretrigger_percent,
        }
    }
}

impl Default for TriggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub channel: u8,
    pub level_percent: u8,
    pub edge: TriggerEdge,
    pub mode: TriggerMode,
    pub pretrigger_percent: u8,
}

impl Default for Trigger {
    fn default() -> Self {
        TriggerBuilder::new().normal()
    }
}

impl Trigger {
    pub fn start_capturing_when() -> TriggerBuilder {
        TriggerBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=CHANNELS).contains(&self.channel) {
            return Err(ConfigError::TriggerChannelOutOfRange(self.channel));
        }
        check_percent("trigger level", self.level_percent)?;
        check_percent("pretrigger", self.pretrigger_percent)?;
        Ok(())
    }

    /// `ch,level,edge,mode,pretrigger` as used by `SCOP:SET`.
    pub fn scope_fields(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.channel,
            self.level_percent,
            self.edge.as_str(),
            self.mode.as_str(),
            self.pretrigger_percent
        )
    }

    /// `ch,edge,mode,pretrigger` as used by `LA:SET`.
    pub fn logic_analyzer_fields(&self) -> String {
        format!(
            "{},{},{},{}",
            self.channel,
            self.edge.as_str(),
            self.mode.as_str(),
            self.pretrigger_percent
        )
    }
}

fn check_percent(field: &'static str, value: u8) -> Result<(), ConfigError> {
    if value > 100 {
        return Err(ConfigError::PercentOutOfRange { field, value });
    }
    Ok(())
}
