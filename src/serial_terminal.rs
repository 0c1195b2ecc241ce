use crate::byte_source::{ByteSource, SerialSource, DEFAULT_BAUD_RATE};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const READ_CHUNK: usize = 256;
pub(crate) const IDLE_BACKOFF: Duration = Duration::from_micros(200);

/// How a deadline reacts to bytes that arrive while waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    /// Wall-clock deadline measured from the start of the call.
    #[default]
    Absolute,
    /// Deadline restarts every time bytes arrive.
    Inactivity,
}

/// What happens to bytes that follow a line terminator in the same read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderPolicy {
    /// Every line read starts from an empty buffer; trailing bytes are dropped.
    #[default]
    Discard,
    /// Trailing bytes are kept and served first to the next read.
    Keep,
}

/// Link parameters for talking to the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Deadline for plain text commands.
    pub command_timeout: Duration,
    /// Deadline for binary frame reads.
    pub read_timeout: Duration,
    /// How long to wait for the asynchronous `Ready` notification.
    pub ready_timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
    pub remainder_policy: RemainderPolicy,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout: Duration::from_millis(100),
            read_timeout: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(1),
            timeout_policy: TimeoutPolicy::Absolute,
            remainder_policy: RemainderPolicy::Discard,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: no complete line after {waited:?}, got '{pending}'")]
    Timeout { waited: Duration, pending: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl TerminalError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub(crate) struct Deadline {
    timeout: Duration,
    policy: TimeoutPolicy,
    started: Instant,
    last_progress: Instant,
}

impl Deadline {
    pub(crate) fn start(timeout: Duration, policy: TimeoutPolicy) -> Self {
        let now = Instant::now();
        Self {
            timeout,
            policy,
            started: now,
            last_progress: now,
        }
    }

    pub(crate) fn progress(&mut self) {
        if self.policy == TimeoutPolicy::Inactivity {
            self.last_progress = Instant::now();
        }
    }

    pub(crate) fn expired(&self) -> bool {
        let reference = match self.policy {
            TimeoutPolicy::Absolute => self.started,
            TimeoutPolicy::Inactivity => self.last_progress,
        };
        reference.elapsed() > self.timeout
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Command/response channel to the instrument.
///
/// Owns the [`ByteSource`] exclusively: one exchange is in flight at a time,
/// enforced by every operation taking `&mut self`.
#[derive(Debug)]
pub struct PillTerminal<S = SerialSource> {
    source: S,
    timeout_policy: TimeoutPolicy,
    remainder_policy: RemainderPolicy,
    reply_timeout: Duration,
    carry: Vec<u8>,
}

impl PillTerminal<SerialSource> {
    /// Open the serial port and wrap it in a terminal.
    pub fn open(port: &str, settings: &LinkSettings) -> Result<Self, TerminalError> {
        let source = SerialSource::open(port, settings.baud_rate)?;
        let mut terminal = Self::with_settings(source, settings);
        terminal.discard_input()?;
        Ok(terminal)
    }
}

impl<S: ByteSource> PillTerminal<S> {
    pub fn new(source: S) -> Self {
        Self::with_settings(source, &LinkSettings::default())
    }

    pub fn with_settings(source: S, settings: &LinkSettings) -> Self {
        Self {
            source,
            timeout_policy: settings.timeout_policy,
            remainder_policy: settings.remainder_policy,
            reply_timeout: settings.command_timeout,
            carry: Vec::new(),
        }
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout_policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }

    /// Deadline used to collect a text reply that shows up where a frame was expected.
    pub(crate) fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Flush the receive side, including any carried-over bytes.
    pub fn discard_input(&mut self) -> Result<(), TerminalError> {
        self.carry.clear();
        self.source.discard_input()?;
        Ok(())
    }

    pub(crate) fn write_command(&mut self, command: &str) -> Result<(), TerminalError> {
        log::trace!("-> {}", command);
        let mut line = Vec::with_capacity(command.len() + CRLF.len());
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(CRLF);
        self.source.write_all(&line)?;
        Ok(())
    }

    /// Read into `buf`, serving carried-over bytes before touching the source.
    pub(crate) fn pull(&mut self, buf: &mut [u8]) -> Result<usize, TerminalError> {
        if self.carry.is_empty() {
            return Ok(self.source.read_available(buf)?);
        }
        let n = buf.len().min(self.carry.len());
        buf[..n].copy_from_slice(&self.carry[..n]);
        self.carry.drain(..n);
        Ok(n)
    }

    /// Send `command` and wait for the CRLF-terminated reply.
    pub fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, TerminalError> {
        self.write_command(command)?;
        self.receive(timeout)
    }

    /// Like [`Self::send_command`], but the text that arrived after the
    /// reply's terminator in the same read is handed back instead of going
    /// through the remainder policy.
    ///
    /// Some commands are answered by two lines at once, e.g. `OK` followed by
    /// an immediate `Ready`.
    pub fn send_command_with_trailing(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<(String, String), TerminalError> {
        self.write_command(command)?;
        let (line, trailing) = self.read_line(timeout)?;
        let trailing = String::from_utf8_lossy(&trailing).into_owned();
        if !trailing.is_empty() {
            log::debug!("'{}' answered '{}' followed by '{}'", command, line, trailing.trim());
        }
        Ok((line, trailing))
    }

    /// Wait for a line without sending anything first.
    ///
    /// Used for status notifications the device pushes on its own, such as
    /// `Ready` once a trigger fired. Enclosing double quotes are stripped.
    pub fn receive(&mut self, timeout: Duration) -> Result<String, TerminalError> {
        let (line, trailing) = self.read_line(timeout)?;
        self.handle_trailing(trailing);
        Ok(line)
    }

    /// One line plus whatever followed its terminator in the same read.
    fn read_line(&mut self, timeout: Duration) -> Result<(String, Vec<u8>), TerminalError> {
        let mut deadline = Deadline::start(timeout, self.timeout_policy);
        let mut accumulated = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = self.pull(&mut chunk)?;
            if n > 0 {
                deadline.progress();
                accumulated.extend_from_slice(&chunk[..n]);

                if let Some(end) = find_crlf(&accumulated) {
                    let trailing = accumulated.split_off(end + CRLF.len());
                    accumulated.truncate(end);

                    let line = String::from_utf8(accumulated)?;
                    let line = line.trim_matches('"').to_string();
                    log::trace!("<- {}", line);
                    return Ok((line, trailing));
                }
            }

            if deadline.expired() {
                let pending = String::from_utf8_lossy(&accumulated).into_owned();
                log::debug!("No line terminator within {:?}, pending '{}'", timeout, pending);
                return Err(TerminalError::Timeout {
                    waited: deadline.elapsed(),
                    pending,
                });
            }

            if n == 0 {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }

    fn handle_trailing(&mut self, trailing: Vec<u8>) {
        if trailing.is_empty() {
            return;
        }
        match self.remainder_policy {
            RemainderPolicy::Discard => {
                log::debug!("Dropping {} bytes received after the line terminator", trailing.len());
            }
            RemainderPolicy::Keep => {
                let mut carry = trailing;
                carry.append(&mut self.carry);
                self.carry = carry;
            }
        }
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(CRLF.len()).position(|w| w == CRLF)
}
