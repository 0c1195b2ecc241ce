use crate::acquisition_config::{AcquisitionConfig, ConfigError, Mode};
use crate::byte_source::{ByteSource, SerialSource};
use crate::device_limits::{DeviceLimits, LimitsError};
use crate::frame_reader::FrameError;
use crate::generator_config::{dac_command, PwmConfig};
use crate::pill_connector::{ConnectorError, PillConnector};
use crate::readback::{CounterReading, DeviceSettings, PwmSettings};
use crate::sample_decoder::{decode, decode_voltmeter_line, DecodeError, DecodedChannels, VoltmeterHistory};
use crate::serial_terminal::{LinkSettings, PillTerminal, TerminalError};
use polars::prelude::*;
use std::time::{Duration, Instant};

const TIME_COLUMN_NAME: &str = "time";
const SAMPLE_COLUMN_NAME: &str = "sample";
const VCC_COLUMN_NAME: &str = "vcc";

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Serial terminal error: {0}")]
    Terminal(#[from] TerminalError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Limits error: {0}")]
    Limits(#[from] LimitsError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Device rejected '{command}': '{reply}'")]
    Rejected { command: String, reply: String },

    #[error("No acquisition configured")]
    NotConfigured,

    #[error("{0} mode has no capture settings to read back")]
    NoCaptureSettings(Mode),

    #[error("This device has no DAC")]
    DacUnavailable,
}

/// One decoded capture together with the configuration that produced it.
#[derive(Debug, Clone)]
pub struct Acquisition {
    config: AcquisitionConfig,
    channels: DecodedChannels,
    raw_len: usize,
    elapsed: Duration,
}

impl Acquisition {
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn channels(&self) -> &DecodedChannels {
        &self.channels
    }

    pub fn into_channels(self) -> DecodedChannels {
        self.channels
    }

    /// Bytes received from the device for this capture.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Time since the previous successful read.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Seconds relative to the trigger event for each sample, or the sample
    /// index for voltmeter readings.
    pub fn time_axis(&self) -> Vec<f64> {
        let samples = self.channels.samples_per_channel();
        let (Some(depth), Some(rate), Some(trigger)) = (
            self.config.memory_depth(),
            self.config.sample_rate(),
            self.config.trigger(),
        ) else {
            return (0..samples).map(|i| i as f64).collect();
        };

        let span = f64::from(depth) / f64::from(rate);
        let pre = f64::from(trigger.pretrigger_percent) / 100.0;
        let start = -span * pre;
        let end = span * (1.0 - pre);
        linspace(start, end, samples)
    }

    /// Tabulate the capture: a time column followed by one column per channel.
    pub fn into_dataframe(self) -> PolarsResult<DataFrame> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("into_dataframe"), 0));

        let axis_name = match self.channels {
            DecodedChannels::VoltMeter { .. } => SAMPLE_COLUMN_NAME,
            _ => TIME_COLUMN_NAME,
        };
        let mut columns: Vec<Column> = vec![Series::new(axis_name.into(), self.time_axis()).into()];

        match self.channels {
            DecodedChannels::Scope(channels) => {
                for (index, samples) in channels.into_iter().enumerate() {
                    if let Some(samples) = samples {
                        columns.push(Series::new(channel_name(index).into(), samples).into());
                    }
                }
            }
            DecodedChannels::LogicAnalyzer(channels) => {
                for (index, levels) in channels.into_iter().enumerate() {
                    columns.push(Series::new(channel_name(index).into(), levels).into());
                }
            }
            DecodedChannels::VoltMeter { channels, vcc } => {
                for (index, samples) in channels.into_iter().enumerate() {
                    if let Some(samples) = samples {
                        columns.push(Series::new(channel_name(index).into(), samples).into());
                    }
                }
                if let Some(vcc) = vcc {
                    columns.push(Series::new(VCC_COLUMN_NAME.into(), vcc).into());
                }
            }
        }

        DataFrame::new(columns)
    }
}

fn channel_name(index: usize) -> String {
    format!("ch{}", index + 1)
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Send `command` and require an `OK` in the reply.
fn expect_ok<S: ByteSource>(
    terminal: &mut PillTerminal<S>,
    command: &str,
    timeout: Duration,
) -> Result<String, ScopeError> {
    let reply = terminal.send_command(command, timeout)?;
    check_ok(command, reply)
}

fn check_ok(command: &str, reply: String) -> Result<String, ScopeError> {
    if !reply.contains("OK") {
        log::warn!("'{}' rejected: '{}'", command, reply);
        return Err(ScopeError::Rejected {
            command: command.to_string(),
            reply,
        });
    }
    Ok(reply)
}

fn is_not_ready(reply: &str) -> bool {
    reply.contains("Not ready")
}

fn is_ready(reply: &str) -> bool {
    reply.contains("Ready") && !is_not_ready(reply)
}

/// A connected instrument with its limits fetched and, once configured, an
/// acquisition mode to read from.
pub struct PillScope<S: ByteSource = SerialSource> {
    terminal: PillTerminal<S>,
    settings: LinkSettings,
    identity: String,
    limits: DeviceLimits,
    mode: Mode,
    config: Option<AcquisitionConfig>,
    ready: bool,
    history: VoltmeterHistory,
    last_read: Instant,
}

impl PillScope<SerialSource> {
    /// Connect to the instrument on `port`, or the first one found.
    pub fn connect(port: Option<&str>, settings: LinkSettings) -> Result<Self, ScopeError> {
        let (terminal, identity) = PillConnector::connect(port, &settings)?;
        Self::with_identity(terminal, identity, settings)
    }
}

impl<S: ByteSource> PillScope<S> {
    /// Identify the device on an open terminal and bring it into a known state.
    pub fn new(mut terminal: PillTerminal<S>, settings: LinkSettings) -> Result<Self, ScopeError> {
        let identity = PillConnector::identify(&mut terminal, settings.command_timeout)?;
        Self::with_identity(terminal, identity, settings)
    }

    fn with_identity(
        mut terminal: PillTerminal<S>,
        identity: String,
        settings: LinkSettings,
    ) -> Result<Self, ScopeError> {
        let _span = tracing::debug_span!("session_start", identity = identity.as_str()).entered();
        let timeout = settings.command_timeout;

        expect_ok(&mut terminal, "*RST", timeout)?;
        let limits: DeviceLimits = terminal.send_command("SYST:LIM?", timeout)?.parse()?;
        let mode: Mode = terminal.send_command("SYST:MODE?", timeout)?.parse()?;
        log::debug!("Session started in {} mode with limits {:?}", mode, limits);

        Ok(Self {
            terminal,
            settings,
            identity,
            limits,
            mode,
            config: None,
            ready: false,
            history: VoltmeterHistory::new(),
            last_read: Instant::now(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> Option<&AcquisitionConfig> {
        self.config.as_ref()
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Rolling voltmeter window.
    pub fn history(&self) -> &VoltmeterHistory {
        &self.history
    }

    pub fn into_terminal(self) -> PillTerminal<S> {
        self.terminal
    }

    fn command(&mut self, command: &str) -> Result<String, ScopeError> {
        Ok(self
            .terminal
            .send_command(command, self.settings.command_timeout)?)
    }

    fn command_ok(&mut self, command: &str) -> Result<String, ScopeError> {
        expect_ok(&mut self.terminal, command, self.settings.command_timeout)
    }

    fn forget_acquisition(&mut self) {
        self.config = None;
        self.ready = false;
        self.history.clear();
    }

    /// Ask `*IDN?` again and cache the answer.
    pub fn identify(&mut self) -> Result<&str, ScopeError> {
        self.identity = PillConnector::identify(&mut self.terminal, self.settings.command_timeout)?;
        Ok(&self.identity)
    }

    /// Restore the device's power-on settings.
    pub fn reset(&mut self) -> Result<(), ScopeError> {
        self.command_ok("*RST")?;
        self.forget_acquisition();
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), ScopeError> {
        self.command_ok(&format!("SYST:MODE {}", mode))?;
        self.mode = mode;
        self.forget_acquisition();
        Ok(())
    }

    /// Mode the device reports, which also becomes the cached mode.
    pub fn query_mode(&mut self) -> Result<Mode, ScopeError> {
        self.mode = self.command("SYST:MODE?")?.parse()?;
        Ok(self.mode)
    }

    /// Fetch `SYST:LIM?` again and replace the cached limits.
    pub fn refresh_limits(&mut self) -> Result<&DeviceLimits, ScopeError> {
        let reply = self.command("SYST:LIM?")?;
        self.limits = reply.parse()?;
        Ok(&self.limits)
    }

    /// Validate `config` against the device limits and apply it, switching
    /// mode first if needed.
    pub fn configure(&mut self, config: AcquisitionConfig) -> Result<(), ScopeError> {
        let _span = tracing::debug_span!("configure", mode = config.mode().as_str()).entered();

        config.validate(&self.limits)?;
        if config.mode() != self.mode {
            self.set_mode(config.mode())?;
        }

        match self.terminal.receive(self.settings.command_timeout) {
            Ok(stale) => log::debug!("Discarding pending status '{}'", stale),
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e.into()),
        }

        self.forget_acquisition();
        if let Some(command) = config.set_command() {
            // `Ready` may follow the `OK` line within the same read.
            let (reply, trailing) = self
                .terminal
                .send_command_with_trailing(&command, self.settings.command_timeout)?;
            let reply = check_ok(&command, reply)?;
            self.ready = is_ready(&reply) || is_ready(&trailing);
        }

        log::debug!("Configured {:?}", config);
        self.config = Some(config);
        Ok(())
    }

    /// Read and decode one capture.
    ///
    /// `Ok(None)` means the device has nothing yet: the trigger has not fired
    /// or the device answered `Not ready`. Voltmeter reads accumulate in
    /// [`Self::history`] and return the whole window.
    pub fn read(&mut self) -> Result<Option<Acquisition>, ScopeError> {
        let config = self.config.clone().ok_or(ScopeError::NotConfigured)?;
        let command = config.read_command();

        let acquisition = match &config {
            AcquisitionConfig::VoltMeter(vm) => {
                let reply = self.command(&command)?;
                let sample = decode_voltmeter_line(&reply)?;
                self.history.push(sample);
                let channels = self.history.snapshot(vm);
                self.finish_read(config, channels, reply.len())
            }
            AcquisitionConfig::Scope(_) => {
                if !self.ready && !self.wait_ready()? {
                    return Ok(None);
                }
                self.ready = false;
                self.read_frame(&command, config)?
            }
            AcquisitionConfig::LogicAnalyzer(_) => self.read_frame(&command, config)?,
        };

        Ok(acquisition)
    }

    fn wait_ready(&mut self) -> Result<bool, ScopeError> {
        match self.terminal.receive(self.settings.ready_timeout) {
            Ok(status) if is_ready(&status) => {
                log::debug!("Device reports '{}'", status);
                Ok(true)
            }
            Ok(status) => {
                log::debug!("Waiting for trigger, device sent '{}'", status);
                Ok(false)
            }
            Err(e) if e.is_timeout() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn read_frame(
        &mut self,
        command: &str,
        config: AcquisitionConfig,
    ) -> Result<Option<Acquisition>, ScopeError> {
        match self.terminal.read_frame(command, self.settings.read_timeout) {
            Ok(frame) => {
                let channels = decode(frame.payload(), &config)?;
                Ok(self.finish_read(config, channels, frame.declared_length()))
            }
            Err(FrameError::Protocol(reply)) if is_not_ready(&reply) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn finish_read(
        &mut self,
        config: AcquisitionConfig,
        channels: DecodedChannels,
        raw_len: usize,
    ) -> Option<Acquisition> {
        let elapsed = self.last_read.elapsed();
        self.last_read = Instant::now();
        log::debug!(
            "{} capture: {:.1} KB, {:?} since last read",
            config.mode(),
            raw_len as f64 / 1024.0,
            elapsed
        );
        Some(Acquisition {
            config,
            channels,
            raw_len,
            elapsed,
        })
    }

    /// Arm a single-shot trigger again after its capture was read.
    pub fn rearm(&mut self) -> Result<(), ScopeError> {
        let config = self.config.as_ref().ok_or(ScopeError::NotConfigured)?;
        let command = format!("SYST:MODE {}", config.mode());
        self.command_ok(&command)?;
        self.ready = false;
        Ok(())
    }

    /// Settings the device is actually running with.
    pub fn query_settings(&mut self) -> Result<DeviceSettings, ScopeError> {
        match self.mode {
            Mode::Scope => Ok(DeviceSettings::Scope(self.command("SCOP:SET?")?.parse()?)),
            Mode::LogicAnalyzer => Ok(DeviceSettings::LogicAnalyzer(self.command("LA:SET?")?.parse()?)),
            Mode::VoltMeter => Err(ScopeError::NoCaptureSettings(self.mode)),
        }
    }

    pub fn read_counter(&mut self) -> Result<CounterReading, ScopeError> {
        Ok(self.command("CNTR:READ?")?.parse()?)
    }

    /// Drive the DAC output with a raw 12-bit value.
    pub fn set_dac(&mut self, value: u16) -> Result<(), ScopeError> {
        if !self.limits.has_dac {
            return Err(ScopeError::DacUnavailable);
        }
        let command = dac_command(value)?;
        self.command_ok(&command)?;
        Ok(())
    }

    pub fn set_pwm(&mut self, config: &PwmConfig) -> Result<(), ScopeError> {
        config.validate()?;
        self.command_ok(&config.set_command())?;
        log::debug!("PWM set to {:?}", config);
        Ok(())
    }

    pub fn query_pwm(&mut self) -> Result<PwmSettings, ScopeError> {
        Ok(self.command("PWM:SET?")?.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition_config::{LogicAnalyzerConfig, ScopeConfig, VoltmeterConfig};
    use crate::byte_source::scripted::ScriptedSource;
    use crate::readback::{ScopeSettings, TriggerReport};
    use crate::trigger_config::{Trigger, TriggerMode};

    const LIMITS: &[u8] = b"0.000001,10000,2000000,1,False,False\r\n";

    fn settings() -> LinkSettings {
        LinkSettings {
            command_timeout: Duration::from_millis(30),
            read_timeout: Duration::from_millis(200),
            ready_timeout: Duration::from_millis(30),
            ..LinkSettings::default()
        }
    }

    fn session_source() -> ScriptedSource {
        ScriptedSource::new()
            .expect("*IDN?", b"EMBO,BluePill,0.2.5\r\n")
            .expect("*RST", b"OK\r\n")
            .expect("SYST:LIM?", LIMITS)
            .expect("SYST:MODE?", b"VM\r\n")
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let length = payload.len().to_string();
        let mut bytes = format!("#{}{}", length.len(), length).into_bytes();
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    #[test]
    fn test_session_start() {
        let scope = PillScope::new(PillTerminal::new(session_source()), settings()).unwrap();

        assert_eq!(scope.identity(), "EMBO,BluePill,0.2.5");
        assert_eq!(scope.mode(), Mode::VoltMeter);
        assert_eq!(scope.limits().max_memory, 10_000);
        assert!(scope.config().is_none());
    }

    #[test]
    fn test_identify_and_mode_queries_refresh_cache() {
        let source = session_source()
            .expect("*IDN?", b"EMBO,BluePill,0.2.6\r\n")
            .expect("SYST:MODE?", b"LA\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();

        assert_eq!(scope.identify().unwrap(), "EMBO,BluePill,0.2.6");
        assert_eq!(scope.query_mode().unwrap(), Mode::LogicAnalyzer);
        assert_eq!(scope.mode(), Mode::LogicAnalyzer);
    }

    #[test]
    fn test_scope_read_after_ready() {
        let source = session_source()
            .expect("SYST:MODE SCOPE", b"OK\r\n")
            .expect("SCOP:SET 8,4,1000,TTFF,1,50,R,N,50", b"OK Ready\r\n")
            .expect("SCOP:READ?", &frame(&[10, 20, 30, 40]));
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();

        scope
            .configure(
                ScopeConfig {
                    bits: crate::acquisition_config::BitDepth::Eight,
                    channels: "TTFF".parse().unwrap(),
                    memory_depth: 4,
                    ..ScopeConfig::default()
                }
                .into(),
            )
            .unwrap();
        let acquisition = scope.read().unwrap().unwrap();

        assert_eq!(scope.mode(), Mode::Scope);
        assert_eq!(acquisition.raw_len(), 4);
        assert_eq!(acquisition.channels().analog(0).unwrap(), &[0.1, 0.2]);
        assert_eq!(acquisition.channels().analog(1).unwrap(), &[0.3, 0.4]);
    }

    #[test]
    fn test_ready_line_right_after_ok_arms_the_read() {
        let source = session_source()
            .expect("SYST:MODE SCOPE", b"OK\r\n")
            .expect("SCOP:SET 8,4,1000,TTFF,1,50,R,N,50", b"OK\r\nReady\r\n")
            .expect("SCOP:READ?", &frame(&[10, 20, 30, 40]));
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();

        scope
            .configure(
                ScopeConfig {
                    bits: crate::acquisition_config::BitDepth::Eight,
                    channels: "TTFF".parse().unwrap(),
                    memory_depth: 4,
                    ..ScopeConfig::default()
                }
                .into(),
            )
            .unwrap();
        let acquisition = scope.read().unwrap();

        assert!(acquisition.is_some());
        assert!(scope
            .terminal
            .source()
            .written()
            .iter()
            .any(|c| c == "SCOP:READ?"));
    }

    #[test]
    fn test_scope_read_waits_for_ready_notification() {
        let source = session_source()
            .expect("SYST:MODE SCOPE", b"OK\r\n")
            .expect("SCOP:SET 12,500,1000,TFFF,1,50,R,N,50", b"OK\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();
        scope.configure(ScopeConfig::default().into()).unwrap();

        assert!(scope.read().unwrap().is_none());
        assert!(!scope
            .terminal
            .source()
            .written()
            .iter()
            .any(|c| c == "SCOP:READ?"));
    }

    #[test]
    fn test_not_ready_reply_is_pending() {
        let source = session_source()
            .expect("SYST:MODE LA", b"OK\r\n")
            .expect("LA:SET 500,1000,1,R,N,50", b"OK\r\n")
            .expect("LA:READ?", b"\"Not ready\"\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();
        scope.configure(LogicAnalyzerConfig::default().into()).unwrap();

        assert!(scope.read().unwrap().is_none());
    }

    #[test]
    fn test_logic_analyzer_dataframe() {
        let source = session_source()
            .expect("SYST:MODE LA", b"OK\r\n")
            .expect("LA:SET 4,1000,1,R,N,50", b"OK\r\n")
            .expect("LA:READ?", &frame(&[0b0001, 0b0010, 0b0100, 0b1000]));
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();
        scope
            .configure(
                LogicAnalyzerConfig {
                    memory_depth: 4,
                    ..LogicAnalyzerConfig::default()
                }
                .into(),
            )
            .unwrap();

        let acquisition = scope.read().unwrap().unwrap();
        let time = acquisition.time_axis();
        assert_eq!(time.len(), 4);
        assert!((time[0] + 0.002).abs() < 1e-12);
        assert!((time[3] - 0.002).abs() < 1e-12);

        let df = acquisition.into_dataframe().unwrap();
        assert_eq!(df.height(), 4);
        assert_eq!(df.width(), 5);
        let ch3 = df.column("ch3").unwrap().bool().unwrap();
        let levels: Vec<bool> = ch3.into_no_null_iter().collect();
        assert_eq!(levels, [false, false, true, false]);
    }

    #[test]
    fn test_voltmeter_window_grows_per_read() {
        let source = session_source()
            .expect("VM:READ? 4", b"1.0,2.0,3.0,4.0,3.3\r\n")
            .expect("VM:READ? 4", b"1.5,2.5,3.5,4.5,3.2\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();
        scope
            .configure(
                VoltmeterConfig {
                    averaging: 4,
                    ..VoltmeterConfig::default()
                }
                .into(),
            )
            .unwrap();

        scope.read().unwrap();
        let acquisition = scope.read().unwrap().unwrap();

        assert_eq!(acquisition.channels().analog(0).unwrap(), &[1.0, 1.5]);
        assert_eq!(acquisition.channels().vcc().unwrap(), &[3.3, 3.2]);
        assert_eq!(scope.history().len(), 2);

        let df = acquisition.into_dataframe().unwrap();
        let names: Vec<&str> = df.get_columns().iter().map(|c| c.name().as_str()).collect();
        assert_eq!(names, ["sample", "ch1", "ch2", "vcc"]);
    }

    #[test]
    fn test_malformed_voltmeter_reply_is_a_decode_error() {
        let source = session_source().expect("VM:READ? 1", b"1.0,2.0\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();
        scope.configure(VoltmeterConfig::default().into()).unwrap();

        assert!(matches!(
            scope.read(),
            Err(ScopeError::Decode(DecodeError::FieldCount { .. }))
        ));
        assert!(scope.history().is_empty());
    }

    #[test]
    fn test_rejected_configuration() {
        let source = session_source()
            .expect("SYST:MODE SCOPE", b"OK\r\n")
            .expect("SCOP:SET 12,500,1000,TFFF,1,50,R,N,50", b"ERROR\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();

        let err = scope.configure(ScopeConfig::default().into()).unwrap_err();

        assert!(matches!(err, ScopeError::Rejected { ref reply, .. } if reply == "ERROR"));
        assert!(scope.config().is_none());
    }

    #[test]
    fn test_invalid_configuration_never_reaches_the_device() {
        let mut scope = PillScope::new(PillTerminal::new(session_source()), settings()).unwrap();

        let err = scope
            .configure(
                ScopeConfig {
                    memory_depth: 100_000,
                    ..ScopeConfig::default()
                }
                .into(),
            )
            .unwrap_err();

        assert!(matches!(err, ScopeError::Config(ConfigError::MemoryDepthOutOfRange { .. })));
        assert_eq!(scope.terminal.source().written().len(), 4);
    }

    #[test]
    fn test_voltmeter_has_no_settings_readback() {
        let mut scope = PillScope::new(PillTerminal::new(session_source()), settings()).unwrap();
        assert!(matches!(
            scope.query_settings(),
            Err(ScopeError::NoCaptureSettings(Mode::VoltMeter))
        ));
    }

    #[test]
    fn test_dac_requires_hardware_support() {
        let mut scope = PillScope::new(PillTerminal::new(session_source()), settings()).unwrap();

        assert!(matches!(scope.set_dac(2048), Err(ScopeError::DacUnavailable)));
        assert_eq!(scope.terminal.source().written().len(), 4);
    }

    #[test]
    fn test_dac_output() {
        let source = ScriptedSource::new()
            .expect("*IDN?", b"EMBO,F303,0.2.5\r\n")
            .expect("*RST", b"OK\r\n")
            .expect("SYST:LIM?", b"0.000001,10000,2000000,4,False,True\r\n")
            .expect("SYST:MODE?", b"VM\r\n")
            .expect("SGEN:SET 2048", b"OK\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();

        scope.set_dac(2048).unwrap();
        assert!(matches!(
            scope.set_dac(5000),
            Err(ScopeError::Config(ConfigError::DacValueOutOfRange(5000)))
        ));
    }

    #[test]
    fn test_pwm_set_and_readback() {
        let source = session_source()
            .expect("PWM:SET 2000,10,90,25,1,0", b"OK\r\n")
            .expect("PWM:SET?", b"\"2000.0000,10.0000,90.0000,25,1,0\"\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();

        scope
            .set_pwm(&PwmConfig {
                frequency_hz: 2000,
                ch1_duty_percent: 10,
                ch2_duty_percent: 90,
                ch2_offset_percent: 25,
                ch1_enabled: true,
                ch2_enabled: false,
            })
            .unwrap();
        let pwm = scope.query_pwm().unwrap();

        assert_eq!(pwm.frequency_hz, 2000.0);
        assert_eq!(pwm.ch2_duty_percent, 90.0);
        assert_eq!(pwm.ch2_offset_percent, 25);
        assert!(pwm.ch1_enabled && !pwm.ch2_enabled);
    }

    #[test]
    fn test_invalid_pwm_is_not_sent() {
        let mut scope = PillScope::new(PillTerminal::new(session_source()), settings()).unwrap();

        let err = scope
            .set_pwm(&PwmConfig {
                ch1_duty_percent: 150,
                ..PwmConfig::default()
            })
            .unwrap_err();

        assert!(matches!(err, ScopeError::Config(ConfigError::PercentOutOfRange { .. })));
        assert_eq!(scope.terminal.source().written().len(), 4);
    }

    #[test]
    fn test_read_without_configuration() {
        let mut scope = PillScope::new(PillTerminal::new(session_source()), settings()).unwrap();
        assert!(matches!(scope.read(), Err(ScopeError::NotConfigured)));
    }

    #[test]
    fn test_single_shot_rearm_and_settings_readback() {
        let source = session_source()
            .expect("SYST:MODE SCOPE", b"OK\r\n")
            .expect("SCOP:SET 12,500,1000,TFFF,1,50,R,S,50", b"OK\r\n")
            .expect("SYST:MODE SCOPE", b"OK\r\n")
            .expect("SCOP:SET?", b"\"12,500,1000.000,TFFF,1,50,R,S,50,9.1kOhm\"\r\n")
            .expect("CNTR:READ?", b"1.000 kHz,1.000 ms\r\n");
        let mut scope = PillScope::new(PillTerminal::new(source), settings()).unwrap();
        scope
            .configure(
                ScopeConfig {
                    trigger: Trigger::start_capturing_when().single(),
                    ..ScopeConfig::default()
                }
                .into(),
            )
            .unwrap();
        assert!(scope.config().unwrap().needs_rearm());

        scope.rearm().unwrap();
        let settings = scope.query_settings().unwrap();
        let counter = scope.read_counter().unwrap();

        assert!(matches!(
            settings,
            DeviceSettings::Scope(ScopeSettings {
                trigger: TriggerReport { mode: TriggerMode::Single, .. },
                max_source_impedance_kohm,
                ..
            }) if max_source_impedance_kohm == 9.1
        ));
        assert_eq!(counter.frequency_hz, 1000.0);
        assert_eq!(counter.period_s, 0.001);
    }
}
