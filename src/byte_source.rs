//! Byte-level access to the instrument link.
//!
//! Everything above this module talks to a [`ByteSource`]: the serial port in
//! production, a scripted in-memory device in tests.

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Baud rate of the instrument's virtual COM port.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Non-blocking byte pipe to a single instrument.
pub trait ByteSource {
    /// Copy whatever is already buffered into `buf`, up to `buf.len()` bytes.
    ///
    /// Must not block waiting for data: `Ok(0)` means nothing is available yet.
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Drop anything sitting in the receive buffer.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// [`ByteSource`] backed by a `serialport` handle configured for 8N1.
pub struct SerialSource {
    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for SerialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSource")
            .field("port", &self.port.name())
            .finish()
    }
}

impl SerialSource {
    /// Open `port` at `baud_rate`, 8 data bits, no parity, one stop bit.
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        log::debug!("Opening {} at {} baud", port, baud_rate);
        let port = serialport::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(1))
            .open()?;

        Ok(Self { port })
    }

    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl ByteSource for SerialSource {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let waiting = self.port.bytes_to_read()? as usize;
        if waiting == 0 {
            return Ok(0);
        }

        let wanted = waiting.min(buf.len());
        match self.port.read(&mut buf[..wanted]) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, bytes)?;
        self.port.flush()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
