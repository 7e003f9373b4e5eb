//! Responder
//!
//! Owns the write half of a connection and answers queued requests one at a
//! time, in the order they were received. A file's header and every byte of
//! its payload are written before the next request is looked at; writes
//! block while the client is not reading, which paces the whole queue.

use std::io::Write;
use std::sync::Arc;

use crossbeam::channel::Receiver;

use crate::engine::Engine;
use crate::error::Result;
use crate::protocol::{encode_version, ResponseHeader};

use super::processor::{GetJob, Outbound};

/// Largest slice of a payload handed to the socket in one write
const WRITE_CHUNK_SIZE: usize = 64 * 1024;

/// Drains the outbound queue of one connection
pub struct Responder<W: Write> {
    engine: Arc<Engine>,
    writer: W,
}

impl<W: Write> Responder<W> {
    pub fn new(engine: Arc<Engine>, writer: W) -> Self {
        Self { engine, writer }
    }

    /// Serve queued messages until the queue is closed and empty
    pub fn run(mut self, queue: Receiver<Outbound>) -> Result<W> {
        while let Ok(message) = queue.recv() {
            match message {
                Outbound::Version(version) => self.writer.write_all(&encode_version(version))?,
                Outbound::Get(job) => self.send_file(job)?,
            }
            // Batch small responses while more are waiting
            if queue.is_empty() {
                self.writer.flush()?;
            }
        }
        self.writer.flush()?;
        Ok(self.writer)
    }

    fn send_file(&mut self, job: GetJob) -> Result<()> {
        let GetJob {
            file_type,
            key,
            info,
        } = job;

        // A file found at lookup time may be gone by now (evicted or
        // unreadable); answer not-found rather than fail the connection.
        let contents = match info {
            Some(_) => match self.engine.get_file(file_type, &key) {
                Ok(data) => Some(data),
                Err(e) => {
                    tracing::warn!("Read of {}-{} failed, sending miss: {}", key, file_type, e);
                    None
                }
            },
            None => None,
        };

        match contents {
            Some(data) => {
                let header = ResponseHeader::Found {
                    file_type,
                    size: data.len() as u64,
                    key,
                };
                self.writer.write_all(&header.encode())?;
                for chunk in data.chunks(WRITE_CHUNK_SIZE) {
                    self.writer.write_all(chunk)?;
                }
            }
            None => {
                let header = ResponseHeader::NotFound { file_type, key };
                self.writer.write_all(&header.encode())?;
            }
        }
        Ok(())
    }
}
