//! # PillScope RS
//!
//! A Rust library for driving BluePill-class USB oscilloscopes, logic analyzers
//! and voltmeters over their SCPI-like serial protocol.
//!
//! ## Features
//!
//! - **Device discovery**: Uses `serialport` to find instruments on USB serial ports
//! - **Line transport**: CRLF framed command/reply exchange with explicit deadlines
//! - **Binary frames**: `#<N><length><payload>\r\n` acquisition blocks read incrementally
//! - **Sample decoding**: 8/12-bit analog, 4-channel logic and voltmeter readings
//! - **Limits checking**: Configurations validated against what the device reports
//! - **DataFrame output**: Captures convert to `polars` frames with a time column
//! - **Signal outputs**: PWM generator and DAC control
//!
//! ## Examples
//!
//! ### Oscilloscope Capture
//!
//! ```rust,no_run
//! use pillscope_rs::{LinkSettings, PillScope, ScopeConfig, Trigger};
//!
//! let mut scope = PillScope::connect(None, LinkSettings::default())?;
//! println!("Connected to {}", scope.identity());
//!
//! scope.configure(
//!     ScopeConfig {
//!         channels: "TTFF".parse()?,
//!         trigger: Trigger::start_capturing_when().falling_edge().level_percent(30).auto(),
//!         ..ScopeConfig::default()
//!     }
//!     .into(),
//! )?;
//!
//! if let Some(capture) = scope.read()? {
//!     let df = capture.into_dataframe()?;
//!     println!("Captured {} samples", df.height());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Trigger Configuration
//!
//! ```rust
//! use pillscope_rs::trigger_config::Trigger;
//!
//! let trigger = Trigger::start_capturing_when()
//!     .channel(2)
//!     .falling_edge()
//!     .pretrigger_percent(25)
//!     .single();
//!
//! assert_eq!(trigger.scope_fields(), "2,50,F,S,25");
//! assert_eq!(trigger.logic_analyzer_fields(), "2,F,S,25");
//! ```
//!
//! ### Decoding a Payload
//!
//! ```rust
//! use pillscope_rs::acquisition_config::BitDepth;
//! use pillscope_rs::sample_decoder::decode_scope;
//!
//! // Two 8-bit channels, one contiguous block each.
//! let decoded = decode_scope(&[100, 150, 200, 250], BitDepth::Eight, "TFTF".parse()?)?;
//! assert_eq!(decoded.analog(0), Some(&[1.0, 1.5][..]));
//! assert_eq!(decoded.analog(2), Some(&[2.0, 2.5][..]));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Device Discovery
//!
//! ```rust,no_run
//! use pillscope_rs::PillConnector;
//!
//! for device in PillConnector::get_available_devices()? {
//!     println!("{} ({:04x?}:{:04x?})", device.port, device.vid, device.pid);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod acquisition_config;
pub mod byte_source;
pub mod device_limits;
pub mod frame_reader;
pub mod generator_config;
pub mod pill_connector;
pub mod pill_scope;
pub mod readback;
pub mod sample_decoder;
pub mod serial_terminal;
pub mod trigger_config;

// Re-export the main types for convenience
pub use acquisition_config::{
    AcquisitionConfig, BitDepth, ChannelMask, ConfigError, LogicAnalyzerConfig, Mode, ScopeConfig,
    VoltmeterConfig,
};

pub use trigger_config::{Trigger, TriggerBuilder, TriggerEdge, TriggerMode};

pub use byte_source::{ByteSource, SerialSource};

pub use serial_terminal::{LinkSettings, PillTerminal, RemainderPolicy, TerminalError, TimeoutPolicy};

pub use frame_reader::{Frame, FrameError, FrameState};

pub use sample_decoder::{DecodeError, DecodedChannels, VoltmeterHistory};

pub use device_limits::{AdcTopology, DeviceLimits, LimitsError};

pub use generator_config::PwmConfig;

pub use readback::{CounterReading, DeviceSettings, PwmSettings};

pub use pill_connector::{ConnectorError, PillConnector, PillDevice};

pub use pill_scope::{Acquisition, PillScope, ScopeError};
