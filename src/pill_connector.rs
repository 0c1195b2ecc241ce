use crate::byte_source::{ByteSource, SerialSource};
use crate::serial_terminal::{LinkSettings, PillTerminal, TerminalError};
use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PillDevice {
    pub port: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PillDevice {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                (Some(usb.vid), Some(usb.pid), usb.manufacturer, usb.product)
            }
            _ => (None, None, None, None),
        };

        Self {
            port: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Serial terminal error: {0}")]
    SerialTerminal(#[from] TerminalError),

    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("Port {port} did not answer the identification query")]
    NotResponding { port: String },

    #[error("No instrument found. Please connect one or specify the port manually")]
    DeviceNotFound,
}

pub struct PillConnector;

impl PillConnector {
    /// Open `port`, or probe every USB serial port when `None`, and return
    /// the first terminal whose device answers `*IDN?` along with that answer.
    pub fn connect(
        port: Option<&str>,
        settings: &LinkSettings,
    ) -> Result<(PillTerminal<SerialSource>, String), ConnectorError> {
        if let Some(port) = port {
            log::debug!("Connecting to instrument on port {}", port);
            return Self::open_and_identify(port, settings);
        }

        for device in Self::get_available_devices()? {
            match Self::open_and_identify(&device.port, settings) {
                Ok(found) => return Ok(found),
                Err(e) => log::debug!("Skipping {}: {}", device.port, e),
            }
        }
        Err(ConnectorError::DeviceNotFound)
    }

    /// USB serial ports, sorted by name.
    pub fn get_available_devices() -> Result<Vec<PillDevice>, ConnectorError> {
        let mut devices: Vec<PillDevice> = serialport::available_ports()?
            .into_iter()
            .filter(|info| matches!(info.port_type, SerialPortType::UsbPort(_)))
            .map(PillDevice::from)
            .collect();
        devices.sort_by(|a, b| a.port.cmp(&b.port));
        log::debug!("Found {} USB serial port(s)", devices.len());
        Ok(devices)
    }

    fn open_and_identify(
        port: &str,
        settings: &LinkSettings,
    ) -> Result<(PillTerminal<SerialSource>, String), ConnectorError> {
        let mut terminal = PillTerminal::open(port, settings)?;
        match Self::identify(&mut terminal, settings.command_timeout) {
            Ok(identity) => Ok((terminal, identity)),
            Err(ConnectorError::SerialTerminal(TerminalError::Timeout { .. })) => {
                Err(ConnectorError::NotResponding {
                    port: port.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Drain stale status lines, then ask the device who it is.
    pub fn identify<S: ByteSource>(
        terminal: &mut PillTerminal<S>,
        timeout: Duration,
    ) -> Result<String, ConnectorError> {
        match terminal.receive(timeout) {
            Ok(stale) => log::debug!("Discarding pending line '{}'", stale),
            Err(e) if e.is_timeout() => {}
            Err(e) => return Err(e.into()),
        }

        let identity = terminal.send_command("*IDN?", timeout)?;
        if identity.is_empty() {
            return Err(ConnectorError::NotResponding {
                port: String::from("<unknown>"),
            });
        }
        log::debug!("Instrument identity: {}", identity);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_source::scripted::ScriptedSource;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn test_identify_discards_stale_status() {
        let mut source = ScriptedSource::new().expect("*IDN?", b"\"EMBO,BluePill,0.2.5\"\r\n");
        source.push_incoming(b"Ready\r\n");
        let mut terminal = PillTerminal::new(source);

        let identity = PillConnector::identify(&mut terminal, TIMEOUT).unwrap();

        assert_eq!(identity, "EMBO,BluePill,0.2.5");
    }

    #[test]
    fn test_identify_silent_device() {
        let mut terminal = PillTerminal::new(ScriptedSource::new());

        let err = PillConnector::identify(&mut terminal, TIMEOUT).unwrap_err();

        assert!(matches!(err, ConnectorError::SerialTerminal(TerminalError::Timeout { .. })));
    }

    #[test]
    fn test_get_available_devices() {
        // Depends on the host; only check what comes back is well formed.
        let result = PillConnector::get_available_devices();
        assert!(matches!(result, Ok(_) | Err(ConnectorError::SerialPort(_))));
        for device in result.into_iter().flatten() {
            assert!(!device.port.is_empty());
            assert!(device.vid.is_some());
        }
    }
}
