//! Engine Module
//!
//! Coordinates the storage backend and the reliability consensus.
//!
//! ## Responsibilities
//! - Serve file lookups for get commands
//! - Open put transactions, applying the write whitelist
//! - End transactions: finalize → consensus → commit → confirm
//! - Run periodic snapshots and the final save on shutdown

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::{BackendKind, Config};
use crate::error::Result;
use crate::key::{FileType, VersionKey};
use crate::reliability::{ReliabilityManager, ReliabilityState};
use crate::storage::{Autosave, CacheBackend, FileInfo, PagedCache, PutTransaction};

/// Outcome of ending a put transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub key: VersionKey,
    /// True if the files were stored
    pub committed: bool,
    /// Reliability state after the vote, when the consensus is enabled and
    /// the transaction was eligible to vote
    pub reliability: Option<ReliabilityState>,
    pub manifest: Vec<FileType>,
}

/// The cache engine shared by all connections
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Where files live
    backend: Arc<dyn CacheBackend>,

    /// Multi-writer consensus (None when disabled)
    reliability: Option<Arc<ReliabilityManager>>,

    /// Periodic snapshot worker
    autosave: Mutex<Option<Autosave>>,
}

impl Engine {
    /// Open the engine with the backend named in `config`
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Reload the storage snapshot (if persistence is on)
    /// 3. Reload reliability entries (if the consensus is on)
    /// 4. Start the autosave worker
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let backend: Arc<dyn CacheBackend> = match config.backend {
            BackendKind::Paged => {
                Arc::new(PagedCache::open(config.storage.clone(), &config.data_dir)?)
            }
        };
        Self::with_backend(config, backend)
    }

    /// Open the engine over an existing backend
    pub fn with_backend(config: Config, backend: Arc<dyn CacheBackend>) -> Result<Self> {
        let reliability = if config.reliability.enabled {
            Some(Arc::new(ReliabilityManager::open(
                config.reliability.clone(),
                &config.data_dir,
            )?))
        } else {
            None
        };

        let autosave = if config.storage.persistence && config.storage.save_interval_ms > 0 {
            let backend = Arc::clone(&backend);
            let reliability = reliability.clone();
            Some(Autosave::spawn(
                "cache-autosave",
                Duration::from_millis(config.storage.save_interval_ms),
                move || {
                    backend.save()?;
                    if let Some(reliability) = &reliability {
                        reliability.save()?;
                    }
                    Ok(())
                },
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            backend,
            reliability,
            autosave: Mutex::new(autosave),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get_file_info(&self, file_type: FileType, key: &VersionKey) -> Result<Option<FileInfo>> {
        self.backend.get_file_info(file_type, key)
    }

    pub fn get_file(&self, file_type: FileType, key: &VersionKey) -> Result<Bytes> {
        self.backend.get_file(file_type, key)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Open a put transaction for `key` on behalf of `client`
    pub fn begin_transaction(&self, key: VersionKey, client: Option<IpAddr>) -> PutTransaction {
        let mut trx = self.backend.create_put_transaction(key, client);
        if !self.config.is_whitelisted(client) {
            tracing::debug!("Client {:?} is not whitelisted; discarding writes", client);
            trx.invalidate();
        }
        trx
    }

    /// Finalize a transaction and commit it if it is still valid
    ///
    /// Validation and storage exhaustion errors fail only this transaction.
    pub fn end_transaction(&self, mut trx: PutTransaction) -> Result<TransactionOutcome> {
        trx.finalize()?;

        let key = *trx.key();
        let manifest = trx.manifest();

        let reliability = match &self.reliability {
            Some(manager) if trx.is_valid() => Some(manager.process_transaction(&mut trx)?),
            _ => None,
        };

        let committed = trx.is_valid();
        self.backend.end_put_transaction(trx)?;

        if committed {
            if let Some(manager) = &self.reliability {
                manager.confirm(&key);
            }
            tracing::debug!("Committed {} ({} files)", key, manifest.len());
        }

        Ok(TransactionOutcome {
            key,
            committed,
            reliability,
            manifest,
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist everything now
    pub fn save(&self) -> Result<()> {
        self.backend.save()?;
        if let Some(reliability) = &self.reliability {
            reliability.save()?;
        }
        Ok(())
    }

    /// Stop the autosave worker and write a final snapshot
    pub fn shutdown(&self) -> Result<()> {
        if let Some(mut autosave) = self.autosave.lock().take() {
            autosave.stop();
        }
        self.backend.shutdown()?;
        if let Some(reliability) = &self.reliability {
            reliability.save()?;
        }
        tracing::info!("Engine shut down");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn reliability(&self) -> Option<&ReliabilityManager> {
        self.reliability.as_deref()
    }
}
