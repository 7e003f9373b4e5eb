//! Connection Handler
//!
//! Handles individual client connections.
//!
//! Each connection runs two threads: this one reads and drives the
//! [`CommandProcessor`]; a responder thread owns the write half and answers
//! queued requests in order.

use std::io::{BufWriter, ErrorKind, Read};
use std::net::{IpAddr, Shutdown, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel;

use crate::engine::Engine;
use crate::error::{CacheError, Result};

use super::processor::{CommandProcessor, Flow};
use super::responder::Responder;

/// Size of the inbound read buffer
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Gets queued ahead of the responder before the reader stops reading
const GET_QUEUE_DEPTH: usize = 64;

/// Handles a single client connection
pub struct Connection {
    /// TCP stream (cloned for the responder)
    stream: TcpStream,

    /// Reference to the cache engine
    engine: Arc<Engine>,

    /// Peer address for logging
    peer_addr: String,

    /// Peer IP for the write whitelist and reliability votes
    peer_ip: Option<IpAddr>,
}

impl Connection {
    /// Create a new connection handler
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        // Get peer address for logging
        let peer = stream.peer_addr().ok();
        let peer_addr = peer
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            engine,
            peer_addr,
            peer_ip: peer.map(|a| a.ip()),
        })
    }

    /// Configure connection timeouts
    ///
    /// An expired read timeout closes the connection as if the client quit.
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.stream
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.stream
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        let (tx, rx) = channel::bounded(GET_QUEUE_DEPTH);
        let writer = BufWriter::new(self.stream.try_clone()?);
        let engine = Arc::clone(&self.engine);
        let responder = thread::Builder::new()
            .name(format!("responder-{}", self.peer_addr))
            .spawn(move || Responder::new(engine, writer).run(rx).map(|_| ()))?;

        let mut processor = CommandProcessor::new(Arc::clone(&self.engine), self.peer_ip, tx);
        let result = self.read_loop(&mut processor);

        // Closing the queue lets the responder finish what is already queued
        drop(processor);
        let responded = responder
            .join()
            .unwrap_or_else(|_| Err(CacheError::Protocol("responder panicked".to_string())));

        let _ = self.stream.shutdown(Shutdown::Both);

        if let Err(e) = &responded {
            if is_disconnect(e) {
                tracing::debug!("Client {} went away during a response: {}", self.peer_addr, e);
            } else {
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
            }
        }

        match result {
            Ok(()) => {
                tracing::debug!("Client {} disconnected", self.peer_addr);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Closing connection from {}: {}", self.peer_addr, e);
                Err(e)
            }
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    fn read_loop(&mut self, processor: &mut CommandProcessor) -> Result<()> {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return processor.finish(),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    // Idle timeout (Windows uses TimedOut instead of WouldBlock)
                    tracing::debug!("Idle timeout for client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                    ) =>
                {
                    tracing::debug!("Connection reset by client {}", self.peer_addr);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if processor.process(&buf[..n])? == Flow::Quit {
                return Ok(());
            }
        }
    }
}

/// Errors that just mean the client hung up
fn is_disconnect(err: &CacheError) -> bool {
    match err {
        CacheError::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionAborted
                | ErrorKind::ConnectionReset
                | ErrorKind::BrokenPipe
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
        ),
        _ => false,
    }
}
