//! Put Transactions
//!
//! A connection-scoped upload of up to three files for one version. Files
//! are buffered in per-type sinks while the client streams them; `finalize`
//! checks every sink is complete and computes digests for the consensus.

use std::collections::BTreeMap;
use std::net::IpAddr;

use bytes::{Bytes, BytesMut};
use sha2::{Digest as _, Sha256};

use crate::error::{CacheError, Result};
use crate::key::{FileType, VersionKey};

/// SHA-256 digest of a file or of a whole version
pub type Digest = [u8; 32];

/// Most bytes a sink reserves up front; the rest grows as the body arrives
const INITIAL_SINK_CAPACITY: u64 = 64 * 1024;

/// A completed file of a finalized transaction
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub key: VersionKey,
    pub file_type: FileType,
    pub size: u64,
    pub digest: Digest,
    pub data: Bytes,
}

/// Destination of one uploaded file
#[derive(Debug)]
enum FileSink {
    /// Bytes are kept for commit
    Buffer { declared: u64, buf: BytesMut },
    /// Bytes are counted and dropped (invalid transaction)
    Discard { declared: u64, written: u64 },
}

impl FileSink {
    fn new(declared: u64, keep: bool) -> Self {
        if !keep {
            return FileSink::Discard {
                declared,
                written: 0,
            };
        }
        // The declared size comes off the wire, so it never sizes an allocation
        let capacity = declared.min(INITIAL_SINK_CAPACITY) as usize;
        FileSink::Buffer {
            declared,
            buf: BytesMut::with_capacity(capacity),
        }
    }

    fn declared(&self) -> u64 {
        match self {
            FileSink::Buffer { declared, .. } | FileSink::Discard { declared, .. } => *declared,
        }
    }

    fn written(&self) -> u64 {
        match self {
            FileSink::Buffer { buf, .. } => buf.len() as u64,
            FileSink::Discard { written, .. } => *written,
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.written() + data.len() as u64 > self.declared() {
            return Err(CacheError::Validation(format!(
                "write of {} bytes overruns declared size {}",
                data.len(),
                self.declared()
            )));
        }
        match self {
            FileSink::Buffer { buf, .. } => buf.extend_from_slice(data),
            FileSink::Discard { written, .. } => *written += data.len() as u64,
        }
        Ok(())
    }
}

/// An open put transaction
#[derive(Debug)]
pub struct PutTransaction {
    key: VersionKey,
    client: Option<IpAddr>,
    sinks: BTreeMap<FileType, FileSink>,
    files: Vec<StoredFile>,
    fingerprint: Option<Digest>,
    valid: bool,
    /// Largest file the backend could ever store
    max_file_size: u64,
}

impl PutTransaction {
    pub fn new(key: VersionKey, client: Option<IpAddr>) -> Self {
        Self::with_size_limit(key, client, u64::MAX)
    }

    /// Open a transaction whose files may not exceed `max_file_size` bytes
    pub fn with_size_limit(key: VersionKey, client: Option<IpAddr>, max_file_size: u64) -> Self {
        Self {
            key,
            client,
            sinks: BTreeMap::new(),
            files: Vec::new(),
            fingerprint: None,
            valid: true,
            max_file_size,
        }
    }

    pub fn key(&self) -> &VersionKey {
        &self.key
    }

    /// Address of the client that opened the transaction
    pub fn client(&self) -> Option<IpAddr> {
        self.client
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the transaction so its files are never stored
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Open the sink for one file type
    ///
    /// On an invalid transaction the sink discards what it receives so the
    /// caller can keep consuming the wire. Opening a type twice replaces the
    /// earlier upload. A size above the transaction's limit is a validation
    /// error and opens nothing.
    pub fn open_sink(&mut self, file_type: FileType, size: u64) -> Result<()> {
        if self.valid && size > self.max_file_size {
            return Err(CacheError::Validation(format!(
                "file '{}' of {} bytes exceeds the storable maximum of {}",
                file_type, size, self.max_file_size
            )));
        }
        let sink = FileSink::new(size, self.valid);
        self.sinks.insert(file_type, sink);
        Ok(())
    }

    /// Append body bytes to an open sink
    pub fn write(&mut self, file_type: FileType, data: &[u8]) -> Result<()> {
        let sink = self.sinks.get_mut(&file_type).ok_or_else(|| {
            CacheError::Isolation(format!("no open write for file type '{}'", file_type))
        })?;
        sink.write(data)
    }

    /// Complete the transaction
    ///
    /// Every sink must have received exactly its declared size. Computes the
    /// per-file digests and the version fingerprint, which covers every file
    /// except the metadata file.
    pub fn finalize(&mut self) -> Result<()> {
        for (file_type, sink) in &self.sinks {
            if sink.written() != sink.declared() {
                return Err(CacheError::Validation(format!(
                    "file '{}' of {} is incomplete: {} of {} bytes",
                    file_type,
                    self.key,
                    sink.written(),
                    sink.declared()
                )));
            }
        }

        let mut fingerprint = Sha256::new();
        let mut files = Vec::with_capacity(self.sinks.len());

        for (file_type, sink) in std::mem::take(&mut self.sinks) {
            let FileSink::Buffer { buf, .. } = sink else {
                continue;
            };
            let data = buf.freeze();
            let digest: Digest = Sha256::digest(&data).into();

            if file_type != FileType::Metadata {
                fingerprint.update([file_type.tag()]);
                fingerprint.update(digest);
            }

            files.push(StoredFile {
                key: self.key,
                file_type,
                size: data.len() as u64,
                digest,
                data,
            });
        }

        self.files = files;
        self.fingerprint = Some(fingerprint.finalize().into());

        if self.key.has_zero_hash() {
            tracing::warn!("Invalidating transaction for {}: zero content hash", self.key);
            self.invalidate();
        }

        Ok(())
    }

    /// Files committed by `finalize`, ordered by type
    pub fn files(&self) -> &[StoredFile] {
        &self.files
    }

    /// File types committed by `finalize`
    pub fn manifest(&self) -> Vec<FileType> {
        self.files.iter().map(|f| f.file_type).collect()
    }

    /// Aggregate content fingerprint (available after `finalize`)
    pub fn fingerprint(&self) -> Option<Digest> {
        self.fingerprint
    }

    /// Consume the transaction, yielding its files
    pub fn into_files(self) -> Vec<StoredFile> {
        self.files
    }
}
