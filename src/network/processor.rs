//! Command Processor
//!
//! Per-connection state machine driven by framer output.
//!
//! ```text
//! AwaitingVersion ──version──► Dispatching ◄──body done── AwaitingPutBody
//!                                  │  └──────── pa/pi/pr ──────►┘
//!                                  └── q ──► Closed
//! ```
//!
//! Get commands are answered through the outbound queue, which the
//! [`Responder`](super::Responder) drains strictly in order.

use std::net::IpAddr;
use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::engine::Engine;
use crate::error::{CacheError, Result};
use crate::key::{FileType, VersionKey};
use crate::protocol::{Command, Frame, Framer, PROTOCOL_VERSION};
use crate::storage::{FileInfo, PutTransaction};

/// Work item for the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Handshake echo (0 when the version was rejected)
    Version(u32),

    /// Answer to one get command
    Get(GetJob),
}

/// A queued get command with the result of its lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetJob {
    pub file_type: FileType,
    pub key: VersionKey,
    /// `None` when the file was not found at lookup time
    pub info: Option<FileInfo>,
}

/// Where the processor is in the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    AwaitingVersion,
    Dispatching,
    AwaitingPutBody { file_type: FileType, remaining: u64 },
    Closed,
}

/// Whether the connection should keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Turns inbound bytes into engine calls and queued responses
pub struct CommandProcessor {
    engine: Arc<Engine>,
    client: Option<IpAddr>,
    framer: Framer,
    state: ProcessorState,
    transaction: Option<PutTransaction>,
    outbound: Sender<Outbound>,
}

impl CommandProcessor {
    pub fn new(engine: Arc<Engine>, client: Option<IpAddr>, outbound: Sender<Outbound>) -> Self {
        Self {
            engine,
            client,
            framer: Framer::new(),
            state: ProcessorState::AwaitingVersion,
            transaction: None,
            outbound,
        }
    }

    /// Handle one chunk of inbound bytes
    ///
    /// Frames decoded ahead of a malformed command are still handled before
    /// the error is returned.
    pub fn process(&mut self, data: &[u8]) -> Result<Flow> {
        if self.state == ProcessorState::Closed {
            return Ok(Flow::Quit);
        }

        let mut frames = Vec::new();
        let decoded = self.framer.feed(data, &mut frames);

        for frame in frames {
            if self.handle_frame(frame)? == Flow::Quit {
                self.state = ProcessorState::Closed;
                return Ok(Flow::Quit);
            }
        }

        decoded.map(|_| Flow::Continue)
    }

    /// Handle end of stream
    pub fn finish(&mut self) -> Result<()> {
        if let Some(frame) = self.framer.finish() {
            self.handle_frame(frame)?;
        }
        if let Some(trx) = self.transaction.take() {
            tracing::debug!("Dropping open transaction for {} at disconnect", trx.key());
        }
        self.state = ProcessorState::Closed;
        Ok(())
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// True while a put transaction is open
    pub fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn handle_frame(&mut self, frame: Frame<'_>) -> Result<Flow> {
        match (self.state, frame) {
            (ProcessorState::AwaitingVersion, Frame::Version(version)) => {
                self.handle_version(version)
            }
            (ProcessorState::Dispatching, Frame::Command(command)) => self.dispatch(command),
            (
                ProcessorState::AwaitingPutBody {
                    file_type,
                    remaining,
                },
                Frame::Payload(data),
            ) => self.handle_body(file_type, remaining, data),
            (state, frame) => Err(CacheError::Protocol(format!(
                "unexpected {} while {:?}",
                describe(&frame),
                state
            ))),
        }
    }

    fn handle_version(&mut self, version: u32) -> Result<Flow> {
        if version != PROTOCOL_VERSION {
            self.send(Outbound::Version(0))?;
            self.state = ProcessorState::Closed;
            return Err(CacheError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }

        self.send(Outbound::Version(version))?;
        self.state = ProcessorState::Dispatching;
        Ok(Flow::Continue)
    }

    fn dispatch(&mut self, command: Command) -> Result<Flow> {
        tracing::trace!("Command from {:?}: {:?}", self.client, command);

        match command {
            Command::Get { file_type, key } => {
                let info = match self.engine.get_file_info(file_type, &key) {
                    Ok(info) => info,
                    Err(e) => {
                        tracing::warn!("Lookup of {}-{} failed: {}", key, file_type, e);
                        None
                    }
                };
                self.send(Outbound::Get(GetJob {
                    file_type,
                    key,
                    info,
                }))?;
            }
            Command::TransactionStart { key } => {
                if let Some(previous) = self.transaction.take() {
                    tracing::debug!(
                        "Discarding unfinished transaction for {} (new one for {})",
                        previous.key(),
                        key
                    );
                }
                self.transaction = Some(self.engine.begin_transaction(key, self.client));
            }
            Command::Put { file_type, size } => {
                let trx = self.transaction.as_mut().ok_or_else(|| {
                    CacheError::Isolation("put without an open transaction".to_string())
                })?;

                if let Err(e) = trx.open_sink(file_type, size) {
                    if !e.is_transaction_scoped() {
                        return Err(e);
                    }
                    tracing::debug!(
                        "Discarding {} body of {} bytes for {}",
                        file_type,
                        size,
                        trx.key()
                    );
                    tracing::warn!("Rejecting upload of {}: {}", trx.key(), e);
                    trx.invalidate();
                    trx.open_sink(file_type, size)?;
                }

                if size > 0 {
                    self.state = ProcessorState::AwaitingPutBody {
                        file_type,
                        remaining: size,
                    };
                }
            }
            Command::TransactionEnd => {
                let trx = self.transaction.take().ok_or_else(|| {
                    CacheError::Isolation("transaction end without start".to_string())
                })?;

                match self.engine.end_transaction(trx) {
                    Ok(outcome) => {
                        tracing::debug!(
                            "Transaction for {} ended (committed: {})",
                            outcome.key,
                            outcome.committed
                        );
                    }
                    Err(e) if e.is_transaction_scoped() => {
                        tracing::warn!("Transaction failed: {}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
            Command::Quit => return Ok(Flow::Quit),
        }

        Ok(Flow::Continue)
    }

    fn handle_body(&mut self, file_type: FileType, remaining: u64, data: &[u8]) -> Result<Flow> {
        let trx = self.transaction.as_mut().ok_or_else(|| {
            CacheError::Isolation("put body without an open transaction".to_string())
        })?;
        trx.write(file_type, data)?;

        let remaining = remaining - data.len() as u64;
        self.state = if remaining == 0 {
            ProcessorState::Dispatching
        } else {
            ProcessorState::AwaitingPutBody {
                file_type,
                remaining,
            }
        };
        Ok(Flow::Continue)
    }

    fn send(&self, message: Outbound) -> Result<()> {
        self.outbound.send(message).map_err(|_| {
            CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "response queue closed",
            ))
        })
    }
}

fn describe(frame: &Frame<'_>) -> String {
    match frame {
        Frame::Version(v) => format!("version {}", v),
        Frame::Command(c) => format!("command {:?}", c),
        Frame::Payload(p) => format!("{} payload bytes", p.len()),
    }
}
