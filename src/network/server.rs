//! TCP Server
//!
//! Accepts connections and hands each one to its own thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{CacheError, Result};

use super::Connection;

/// How often the accept loop checks for shutdown
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cloneable handle that stops a running server
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decrements the live connection count when a connection thread ends
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// TCP server for the cache
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: Mutex<Option<TcpListener>>,
    shutdown: ShutdownSignal,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server with the given config and engine
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            listener: Mutex::new(None),
            shutdown: ShutdownSignal::default(),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the listen address (done by `run` if not called first)
    pub fn bind(&self) -> Result<SocketAddr> {
        let mut slot = self.listener.lock();
        if let Some(listener) = slot.as_ref() {
            return Ok(listener.local_addr()?);
        }
        let listener = TcpListener::bind(&self.config.listen_addr).map_err(|e| {
            CacheError::Config(format!("cannot listen on {}: {}", self.config.listen_addr, e))
        })?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        *slot = Some(listener);
        tracing::info!("Listening on {}", addr);
        Ok(addr)
    }

    /// Start the server (blocking until shutdown is signalled)
    pub fn run(&self) -> Result<()> {
        self.bind()?;
        let listener = self
            .listener
            .lock()
            .take()
            .ok_or_else(|| CacheError::Config("listener not bound".to_string()))?;

        while !self.shutdown.is_triggered() {
            match listener.accept() {
                Ok((stream, addr)) => self.spawn_connection(stream, addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => tracing::warn!("Accept failed: {}", e),
            }
        }

        tracing::info!("Server stopped accepting connections");
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Handle for stopping the server from another thread
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Number of live client connections
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        if self.active.load(Ordering::SeqCst) >= self.config.max_connections {
            tracing::warn!("Refusing {}: connection limit reached", addr);
            return;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard(Arc::clone(&self.active));
        let engine = Arc::clone(&self.engine);
        let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);

        let spawned = thread::Builder::new()
            .name(format!("client-{}", addr))
            .spawn(move || {
                let _guard = guard;
                let result = stream
                    .set_nonblocking(false)
                    .map_err(CacheError::from)
                    .and_then(|_| Connection::new(stream, engine))
                    .and_then(|mut conn| {
                        conn.set_timeouts(read_ms, write_ms)?;
                        conn.handle()
                    });
                if let Err(e) = result {
                    tracing::debug!("Connection {} ended with error: {}", addr, e);
                }
            });

        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn handler for {}: {}", addr, e);
        }
    }
}
