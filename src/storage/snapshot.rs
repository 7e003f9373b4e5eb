//! Snapshot files and the autosave worker
//!
//! ## File Format
//! ```text
//! ┌──────────┬───────────┬──────────────────────┬───────────┐
//! │Magic (4) │Version (2)│ bincode payload      │ CRC32 (4) │
//! └──────────┴───────────┴──────────────────────┴───────────┘
//! ```
//! The CRC covers the payload. Files are written to a temporary name and
//! renamed into place so a crash never leaves a torn snapshot behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

/// Magic bytes identifying a snapshot file
const MAGIC: &[u8; 4] = b"ACSN";

/// Current snapshot format version
const FORMAT_VERSION: u16 = 1;

/// Magic (4) + Version (2)
const HEADER_SIZE: usize = 6;

/// CRC32 (4)
const FOOTER_SIZE: usize = 4;

/// Atomically write `value` to `path`
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let crc = crc32fast::hash(&payload);

    let tmp_path = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&crc.to_le_bytes())?;
        let file = writer
            .into_inner()
            .map_err(|e| CacheError::Storage(format!("Failed to flush snapshot: {}", e)))?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read a snapshot written by [`write_snapshot`]; `None` if absent
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path)?;
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE || &bytes[..4] != MAGIC {
        return Err(CacheError::Storage(format!(
            "{} is not a snapshot file",
            path.display()
        )));
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(CacheError::Storage(format!(
            "{}: unsupported snapshot version {}",
            path.display(),
            version
        )));
    }

    let (payload, footer) = bytes[HEADER_SIZE..].split_at(bytes.len() - HEADER_SIZE - FOOTER_SIZE);
    let expected = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(CacheError::Storage(format!(
            "{}: checksum mismatch (expected {:08x}, got {:08x})",
            path.display(),
            expected,
            actual
        )));
    }

    Ok(Some(bincode::deserialize(payload)?))
}

// =============================================================================
// Autosave
// =============================================================================

/// Background thread running a save task on a fixed interval
pub struct Autosave {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Autosave {
    pub fn spawn<F>(name: &str, interval: Duration, mut task: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(ticker) -> _ => {
                        if let Err(e) = task() {
                            tracing::warn!("Autosave failed: {}", e);
                        }
                    }
                    recv(stop_rx) -> _ => break,
                }
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the worker and wait for it to exit
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the stop channel
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.stop();
    }
}
