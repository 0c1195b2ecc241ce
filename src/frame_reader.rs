//! Length-prefixed binary frames: `#` + one digit `D` + `D` length digits +
//! payload + CRLF.

use crate::byte_source::ByteSource;
use crate::serial_terminal::{Deadline, PillTerminal, TerminalError, CRLF, IDLE_BACKOFF, READ_CHUNK};
use std::thread;
use std::time::Duration;

/// Upper bound on up-front payload allocation; larger frames grow as they arrive.
const MAX_PREALLOCATION: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Hash,
    Num,
    Count,
    Data,
    Crlf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    length_digit_count: u8,
    declared_length: usize,
    payload: Vec<u8>,
}

impl Frame {
    pub fn length_digit_count(&self) -> u8 {
        self.length_digit_count
    }

    pub fn declared_length(&self) -> usize {
        self.declared_length
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Terminal(#[from] TerminalError),

    #[error("Timeout in {state:?} state after {collected} payload bytes")]
    Timeout { state: FrameState, collected: usize },

    #[error("Device replied '{0}' where a frame was expected")]
    Protocol(String),

    #[error("Malformed frame in {state:?} state: {detail}")]
    Malformed { state: FrameState, detail: String },
}

impl FrameError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Text the device sent instead of a frame, if that is what happened.
    pub fn device_reply(&self) -> Option<&str> {
        match self {
            Self::Protocol(reply) => Some(reply),
            _ => None,
        }
    }
}

enum Step {
    NeedMore,
    Text(u8),
    Complete(Frame),
}

/// Framing state machine, fed with exactly the bytes it asks for.
#[derive(Debug)]
struct FrameAssembler {
    state: FrameState,
    length_digit_count: u8,
    declared_length: usize,
    field: Vec<u8>,
    payload: Vec<u8>,
}

impl FrameAssembler {
    fn new() -> Self {
        Self {
            state: FrameState::Hash,
            length_digit_count: 0,
            declared_length: 0,
            field: Vec::with_capacity(9),
            payload: Vec::new(),
        }
    }

    /// Bytes still missing to leave the current state. Never zero.
    fn wanted(&self) -> usize {
        match self.state {
            FrameState::Hash | FrameState::Num => 1,
            FrameState::Count => usize::from(self.length_digit_count) - self.field.len(),
            FrameState::Data => self.declared_length - self.payload.len(),
            FrameState::Crlf => CRLF.len() - self.field.len(),
        }
    }

    fn malformed(&self, detail: String) -> FrameError {
        FrameError::Malformed {
            state: self.state,
            detail,
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Result<Step, FrameError> {
        let Some(&first) = bytes.first() else {
            return Ok(Step::NeedMore);
        };

        match self.state {
            FrameState::Hash => {
                if first != b'#' {
                    return Ok(Step::Text(first));
                }
                self.state = FrameState::Num;
            }
            FrameState::Num => match char::from(first).to_digit(10) {
                Some(0) => {
                    return Err(self.malformed("indefinite-length blocks are not supported".into()))
                }
                Some(digits) => {
                    self.length_digit_count = digits as u8;
                    self.state = FrameState::Count;
                }
                None => {
                    return Err(self.malformed(format!(
                        "expected a length digit, got {:?}",
                        char::from(first)
                    )))
                }
            },
            FrameState::Count => {
                self.field.extend_from_slice(bytes);
                if self.field.len() == usize::from(self.length_digit_count) {
                    self.declared_length = self.parse_length()?;
                    self.field.clear();
                    self.payload = Vec::with_capacity(self.declared_length.min(MAX_PREALLOCATION));
                    self.state = if self.declared_length == 0 {
                        FrameState::Crlf
                    } else {
                        FrameState::Data
                    };
                }
            }
            FrameState::Data => {
                self.payload.extend_from_slice(bytes);
                if self.payload.len() == self.declared_length {
                    self.state = FrameState::Crlf;
                }
            }
            FrameState::Crlf => {
                self.field.extend_from_slice(bytes);
                if self.field.len() == CRLF.len() {
                    if self.field != CRLF {
                        return Err(self.malformed(format!(
                            "expected CRLF after payload, got {:?}",
                            String::from_utf8_lossy(&self.field)
                        )));
                    }
                    return Ok(Step::Complete(Frame {
                        length_digit_count: self.length_digit_count,
                        declared_length: self.declared_length,
                        payload: std::mem::take(&mut self.payload),
                    }));
                }
            }
        }

        Ok(Step::NeedMore)
    }

    fn parse_length(&self) -> Result<usize, FrameError> {
        let text = String::from_utf8_lossy(&self.field);
        if !self.field.iter().all(u8::is_ascii_digit) {
            return Err(self.malformed(format!("length field {:?} is not decimal", text)));
        }
        text.parse()
            .map_err(|e| self.malformed(format!("length field {:?}: {}", text, e)))
    }
}

impl<S: ByteSource> PillTerminal<S> {
    /// Send `command` and read the binary frame it answers with.
    ///
    /// The deadline covers the whole exchange; on expiry whatever was
    /// collected is thrown away. If the device answers with a text line
    /// instead (an error, `Not ready`, ...) that line comes back as
    /// [`FrameError::Protocol`].
    pub fn read_frame(&mut self, command: &str, timeout: Duration) -> Result<Frame, FrameError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("read_frame"), 0));
        let _span = tracing::debug_span!("read_frame", command).entered();

        self.write_command(command)?;

        let mut assembler = FrameAssembler::new();
        let mut deadline = Deadline::start(timeout, self.timeout_policy());
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let wanted = assembler.wanted().min(chunk.len());
            let n = self.pull(&mut chunk[..wanted])?;
            if n > 0 {
                deadline.progress();
                match assembler.feed(&chunk[..n])? {
                    Step::NeedMore => {}
                    Step::Complete(frame) => {
                        log::debug!(
                            "'{}' returned {} bytes in {:?}",
                            command,
                            frame.declared_length,
                            deadline.elapsed()
                        );
                        return Ok(frame);
                    }
                    Step::Text(first) => return Err(self.text_reply(first)),
                }
            }

            if deadline.expired() {
                log::debug!(
                    "'{}' timed out in {:?} state with {} payload bytes",
                    command,
                    assembler.state,
                    assembler.payload.len()
                );
                return Err(FrameError::Timeout {
                    state: assembler.state,
                    collected: assembler.payload.len(),
                });
            }

            if n == 0 {
                thread::sleep(IDLE_BACKOFF);
            }
        }
    }

    /// Finish reading a text line whose first byte was already consumed.
    fn text_reply(&mut self, first: u8) -> FrameError {
        let rest = match self.receive(self.reply_timeout()) {
            Ok(line) => line,
            Err(TerminalError::Timeout { pending, .. }) => pending,
            Err(e) => return e.into(),
        };

        let mut text = String::with_capacity(rest.len() + 1);
        text.push(char::from(first));
        text.push_str(&rest);
        let text = text.trim_matches(|c: char| c == '"' || c.is_whitespace()).to_string();
        log::debug!("Device answered with text: '{}'", text);
        FrameError::Protocol(text)
    }
}
