//! Incremental protocol framer
//!
//! Turns an arbitrarily chunked inbound byte stream into a sequence of
//! frames: one version handshake, then commands, with put bodies passed
//! through as borrowed slices of the input (never buffered).
//!
//! The framer keeps a small header buffer and a cursor. Each call to
//! [`Framer::feed`] fills the field currently expected, emits a frame when it
//! is complete and moves on, so decoding resumes correctly after any split,
//! including chunks of a single byte.

use crate::error::{CacheError, Result};
use crate::key::{FileType, VersionKey, ID_SIZE};

use super::codec::{
    decode_size, decode_version, leading_hex_digits, CMD_SIZE, MIN_VERSION_SIZE, SIZE_FIELD_SIZE,
    VERSION_SIZE,
};
use super::Command;

/// Largest fixed-width field the framer ever buffers
const HEADER_CAPACITY: usize = ID_SIZE;

/// One decoded unit of the inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    /// Protocol version announced by the client
    Version(u32),

    /// A complete command
    Command(Command),

    /// A piece of the current put body, in order
    Payload(&'a [u8]),
}

/// Field the framer is currently reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Version,
    Command,
    Size(FileType),
    Id(IdTarget),
    Body { remaining: u64 },
    Finished,
    Failed,
}

/// Command waiting for its 32-byte id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdTarget {
    Get(FileType),
    TransactionStart,
}

/// Outcome of reading a command token
enum Token {
    /// More fields follow
    Await(ReadState),
    /// The token alone is the whole command
    Complete(Command),
}

/// Resumable decoder for the client → server stream
#[derive(Debug)]
pub struct Framer {
    state: ReadState,
    header: [u8; HEADER_CAPACITY],
    filled: usize,
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: ReadState::Version,
            header: [0u8; HEADER_CAPACITY],
            filled: 0,
        }
    }

    /// Decode as much of `data` as possible, appending frames in order
    ///
    /// Frames decoded before an error are left in `frames`. After an error the
    /// framer refuses further input; after a quit it ignores it.
    pub fn feed<'a>(&mut self, data: &'a [u8], frames: &mut Vec<Frame<'a>>) -> Result<()> {
        let mut pos = 0;

        while pos < data.len() {
            match self.state {
                ReadState::Version => {
                    if self.fill(data, &mut pos, VERSION_SIZE) {
                        frames.push(Frame::Version(decode_version(&self.header[..VERSION_SIZE])));
                        self.advance(ReadState::Command);
                    }
                }
                ReadState::Command => {
                    // Quit is the only single-byte command
                    if self.filled == 0 && data[pos] == b'q' {
                        pos += 1;
                        frames.push(Frame::Command(Command::Quit));
                        self.advance(ReadState::Finished);
                        continue;
                    }
                    if self.fill(data, &mut pos, CMD_SIZE) {
                        let token = [self.header[0], self.header[1]];
                        match Self::parse_token(token) {
                            Ok(Token::Await(next)) => self.advance(next),
                            Ok(Token::Complete(command)) => {
                                frames.push(Frame::Command(command));
                                self.advance(ReadState::Command);
                            }
                            Err(e) => {
                                self.state = ReadState::Failed;
                                return Err(e);
                            }
                        }
                    }
                }
                ReadState::Size(file_type) => {
                    if self.fill(data, &mut pos, SIZE_FIELD_SIZE) {
                        let size = match decode_size(&self.header[..SIZE_FIELD_SIZE]) {
                            Ok(size) => size,
                            Err(e) => {
                                self.state = ReadState::Failed;
                                return Err(e);
                            }
                        };
                        frames.push(Frame::Command(Command::Put { file_type, size }));
                        if size > 0 {
                            self.advance(ReadState::Body { remaining: size });
                        } else {
                            self.advance(ReadState::Command);
                        }
                    }
                }
                ReadState::Id(target) => {
                    if self.fill(data, &mut pos, ID_SIZE) {
                        let mut id = [0u8; ID_SIZE];
                        id.copy_from_slice(&self.header[..ID_SIZE]);
                        let key = VersionKey::from_wire(&id);
                        let command = match target {
                            IdTarget::Get(file_type) => Command::Get { file_type, key },
                            IdTarget::TransactionStart => Command::TransactionStart { key },
                        };
                        frames.push(Frame::Command(command));
                        self.advance(ReadState::Command);
                    }
                }
                ReadState::Body { remaining } => {
                    let available = (data.len() - pos) as u64;
                    let take = remaining.min(available) as usize;
                    frames.push(Frame::Payload(&data[pos..pos + take]));
                    pos += take;

                    let remaining = remaining - take as u64;
                    if remaining == 0 {
                        self.advance(ReadState::Command);
                    } else {
                        self.state = ReadState::Body { remaining };
                    }
                }
                ReadState::Finished => return Ok(()),
                ReadState::Failed => {
                    return Err(CacheError::Protocol(
                        "stream already failed to decode".to_string(),
                    ))
                }
            }
        }

        Ok(())
    }

    /// Signal end of stream
    ///
    /// A client that hangs up before sending all 8 version digits still gets
    /// a handshake if at least two leading hex digits arrived.
    pub fn finish(&mut self) -> Option<Frame<'static>> {
        if self.state != ReadState::Version {
            return None;
        }
        let buffered = &self.header[..self.filled];
        if leading_hex_digits(buffered) < MIN_VERSION_SIZE {
            return None;
        }
        let version = decode_version(buffered);
        self.advance(ReadState::Finished);
        Some(Frame::Version(version))
    }

    /// True once a quit command has been decoded
    pub fn is_finished(&self) -> bool {
        self.state == ReadState::Finished
    }

    /// True while a put body is being passed through
    pub fn in_body(&self) -> bool {
        matches!(self.state, ReadState::Body { .. })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Copy bytes into the header buffer until `need` are buffered
    fn fill(&mut self, data: &[u8], pos: &mut usize, need: usize) -> bool {
        let take = (need - self.filled).min(data.len() - *pos);
        self.header[self.filled..self.filled + take].copy_from_slice(&data[*pos..*pos + take]);
        self.filled += take;
        *pos += take;
        self.filled == need
    }

    fn advance(&mut self, state: ReadState) {
        self.state = state;
        self.filled = 0;
    }

    /// Map a two-byte token to the next field to read
    fn parse_token(token: [u8; CMD_SIZE]) -> Result<Token> {
        let file_type = FileType::from_tag(token[1]);
        match (token[0], file_type) {
            (b'g', Some(file_type)) => Ok(Token::Await(ReadState::Id(IdTarget::Get(file_type)))),
            (b'p', Some(file_type)) => Ok(Token::Await(ReadState::Size(file_type))),
            _ => match &token {
                b"ts" => Ok(Token::Await(ReadState::Id(IdTarget::TransactionStart))),
                b"te" => Ok(Token::Complete(Command::TransactionEnd)),
                _ => Err(CacheError::Protocol(format!(
                    "unrecognized command {:?}",
                    String::from_utf8_lossy(&token)
                ))),
            },
        }
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}
