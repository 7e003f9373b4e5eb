//! Reliability Consensus
//!
//! Decides whether a freshly written version may be trusted by comparing
//! the fingerprints of independent uploads of the same version.
//!
//! ## State Machine
//! ```text
//!            match, factor < threshold
//!              ┌──────┐
//!              ▼      │
//!  (new) ──► Pending ─┴─ match, factor ≥ threshold ──► ReliableNew ──► Reliable
//!              │                                      (stored)        (immutable)
//!              └── mismatch ──► Unreliable (never stored)
//! ```
//!
//! Only the upload that moves a version into `ReliableNew` is stored. Once
//! the engine has committed it, [`ReliabilityManager::confirm`] moves the
//! version on to `Reliable`; every later upload is rejected.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ReliabilityConfig;
use crate::error::Result;
use crate::key::VersionKey;
use crate::storage::{read_snapshot, write_snapshot, Digest, PutTransaction};

/// Trust level of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReliabilityState {
    Pending,
    Unreliable,
    ReliableNew,
    Reliable,
}

/// Voting record of one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliabilityEntry {
    pub factor: u32,
    pub state: ReliabilityState,
    /// Fingerprint of the first upload; later uploads must match it
    pub version_digest: Digest,
    pub last_client: Option<IpAddr>,
}

/// Multi-writer consensus over version fingerprints
pub struct ReliabilityManager {
    config: ReliabilityConfig,
    db_path: PathBuf,
    quarantine_dir: PathBuf,
    entries: Mutex<HashMap<VersionKey, ReliabilityEntry>>,
}

impl ReliabilityManager {
    const DB_FILENAME: &'static str = "reliability.db";
    const QUARANTINE_DIR: &'static str = ".reliability";

    /// Open the manager, reloading entries saved under `data_dir`
    pub fn open(config: ReliabilityConfig, data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join(Self::DB_FILENAME);
        let entries: HashMap<VersionKey, ReliabilityEntry> =
            read_snapshot::<Vec<(VersionKey, ReliabilityEntry)>>(&db_path)?
                .map(|saved| saved.into_iter().collect())
                .unwrap_or_default();

        tracing::info!(
            "Reliability consensus ready: threshold {}, {} known versions",
            config.threshold,
            entries.len()
        );

        Ok(Self {
            config,
            db_path,
            quarantine_dir: data_dir.join(Self::QUARANTINE_DIR),
            entries: Mutex::new(entries),
        })
    }

    /// Cast the vote of a finalized transaction
    ///
    /// Invalidates the transaction unless this upload is the one that makes
    /// the version trusted. Returns the version's state after the vote.
    pub fn process_transaction(&self, trx: &mut PutTransaction) -> Result<ReliabilityState> {
        let key = *trx.key();
        let client = trx.client();
        let fingerprint = trx.fingerprint().unwrap_or_default();

        let (state, accept) = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&key) {
                None => {
                    let mut entry = ReliabilityEntry {
                        factor: 0,
                        state: ReliabilityState::Pending,
                        version_digest: fingerprint,
                        last_client: client,
                    };
                    self.vote(&mut entry, fingerprint, client, true);
                    let state = entry.state;
                    entries.insert(key, entry);
                    (state, state == ReliabilityState::ReliableNew)
                }
                Some(entry) => match entry.state {
                    ReliabilityState::Pending => {
                        self.vote(entry, fingerprint, client, false);
                        (entry.state, entry.state == ReliabilityState::ReliableNew)
                    }
                    // The trusted upload was never confirmed as stored; this
                    // one takes its place.
                    ReliabilityState::ReliableNew => {
                        entry.state = ReliabilityState::Reliable;
                        (entry.state, true)
                    }
                    ReliabilityState::Reliable | ReliabilityState::Unreliable => {
                        (entry.state, false)
                    }
                },
            }
        };

        if !accept {
            trx.invalidate();
        }

        if state == ReliabilityState::Unreliable && self.config.save_unreliable {
            if let Err(e) = self.quarantine(trx) {
                tracing::warn!("Failed to quarantine {}: {}", key, e);
            }
        }

        tracing::debug!("Reliability of {}: {:?} (accepted: {})", key, state, accept);
        Ok(state)
    }

    /// Mark a trusted version as committed to storage
    pub fn confirm(&self, key: &VersionKey) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            if entry.state == ReliabilityState::ReliableNew {
                entry.state = ReliabilityState::Reliable;
                tracing::info!("Version {} is now reliable", key);
            }
        }
    }

    pub fn get_entry(&self, key: &VersionKey) -> Option<ReliabilityEntry> {
        self.entries.lock().get(key).cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Directory rejected uploads are written to
    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    /// Write all entries to disk
    pub fn save(&self) -> Result<()> {
        let entries: Vec<(VersionKey, ReliabilityEntry)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, e)| (*k, e.clone()))
            .collect();
        write_snapshot(&self.db_path, &entries)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Apply one upload to a pending entry
    fn vote(
        &self,
        entry: &mut ReliabilityEntry,
        fingerprint: Digest,
        client: Option<IpAddr>,
        first: bool,
    ) {
        if !first && self.config.multi_client && entry.last_client == client {
            tracing::debug!("Ignoring repeat upload from {:?}", client);
            return;
        }

        if entry.version_digest == fingerprint {
            entry.factor += 1;
            if entry.factor >= self.config.threshold {
                entry.state = ReliabilityState::ReliableNew;
            }
        } else {
            entry.state = ReliabilityState::Unreliable;
            tracing::info!("Fingerprint mismatch, version marked unreliable");
        }
        entry.last_client = client;
    }

    /// Write the files of a rejected upload for later inspection
    fn quarantine(&self, trx: &PutTransaction) -> Result<()> {
        let key = trx.key();
        let fingerprint = hex::encode(trx.fingerprint().unwrap_or_default());
        let dir = self
            .quarantine_dir
            .join(key.to_string())
            .join(fingerprint);
        fs::create_dir_all(&dir)?;

        for file in trx.files() {
            let path = dir.join(format!("{}.{}", key, file.file_type.extension()));
            fs::write(path, &file.data)?;
        }
        tracing::info!("Quarantined upload of {} in {}", key, dir.display());
        Ok(())
    }
}
