//! Configuration for the artifact cache
//!
//! Centralized configuration with sensible defaults.

use std::net::IpAddr;
use std::path::PathBuf;

/// Main configuration for a cache server instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all persisted state
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── cache.db         (block index snapshot)
    ///     ├── pages/           (raw page contents)
    ///     ├── reliability.db   (reliability entries)
    ///     └── .reliability/    (quarantined versions)
    pub data_dir: PathBuf,

    /// Which storage backend the engine opens
    pub backend: BackendKind,

    /// Paged storage engine settings
    pub storage: StorageConfig,

    // -------------------------------------------------------------------------
    // Reliability Configuration
    // -------------------------------------------------------------------------
    pub reliability: ReliabilityConfig,

    /// Client addresses allowed to write. Empty means everyone may write.
    pub put_whitelist: Vec<IpAddr>,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Idle timeout for client reads (milliseconds, 0 disables)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds, 0 disables)
    pub write_timeout_ms: u64,
}

/// Storage backends the engine knows how to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-memory pages with snapshot persistence
    #[default]
    Paged,
}

/// Paged storage engine settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Size of a freshly allocated page (bytes). Larger files get a page of
    /// their own size.
    pub page_size: u64,

    /// Maximum number of pages before eviction kicks in
    pub max_page_count: usize,

    /// Smallest remainder worth keeping as a free block after a split
    pub min_free_block_size: u64,

    /// Write snapshots to `data_dir` and reload them on startup
    pub persistence: bool,

    /// Interval between automatic snapshots (milliseconds)
    pub save_interval_ms: u64,
}

/// Multi-writer reliability settings
#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    /// Consult the reliability consensus before admitting a version
    pub enabled: bool,

    /// Number of agreeing writes needed before a version is trusted
    pub threshold: u32,

    /// Ignore repeated writes of a pending version from the same client
    pub multi_client: bool,

    /// Keep the files of rejected versions in the quarantine directory
    pub save_unreliable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./artifactcache_data"),
            backend: BackendKind::default(),
            storage: StorageConfig::default(),
            reliability: ReliabilityConfig::default(),
            put_whitelist: Vec::new(),
            listen_addr: "0.0.0.0:8126".to_string(),
            max_connections: 1024,
            read_timeout_ms: 0,
            write_timeout_ms: 30_000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: 100 * 1024 * 1024, // 100 MB
            max_page_count: 10,
            min_free_block_size: 1024,
            persistence: true,
            save_interval_ms: 10_000,
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 2,
            multi_client: false,
            save_unreliable: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Whether `addr` may write to the cache
    pub fn is_whitelisted(&self, addr: Option<IpAddr>) -> bool {
        if self.put_whitelist.is_empty() {
            return true;
        }
        match addr {
            Some(ip) => self.put_whitelist.contains(&ip),
            None => false,
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Select the storage backend
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: u64) -> Self {
        self.config.storage.page_size = size;
        self
    }

    /// Set the maximum page count
    pub fn max_page_count(mut self, count: usize) -> Self {
        self.config.storage.max_page_count = count;
        self
    }

    /// Set the minimum remainder kept when splitting a free block
    pub fn min_free_block_size(mut self, size: u64) -> Self {
        self.config.storage.min_free_block_size = size;
        self
    }

    /// Enable or disable snapshot persistence
    pub fn persistence(mut self, enabled: bool) -> Self {
        self.config.storage.persistence = enabled;
        self
    }

    /// Set the automatic snapshot interval (in milliseconds)
    pub fn save_interval_ms(mut self, ms: u64) -> Self {
        self.config.storage.save_interval_ms = ms;
        self
    }

    /// Enable the reliability consensus with the given threshold
    pub fn reliability_threshold(mut self, threshold: u32) -> Self {
        self.config.reliability.enabled = true;
        self.config.reliability.threshold = threshold;
        self
    }

    /// Suppress repeated votes from the same client
    pub fn multi_client(mut self, enabled: bool) -> Self {
        self.config.reliability.multi_client = enabled;
        self
    }

    /// Quarantine files of unreliable versions
    pub fn save_unreliable(mut self, enabled: bool) -> Self {
        self.config.reliability.save_unreliable = enabled;
        self
    }

    /// Restrict writes to the given client addresses
    pub fn put_whitelist(mut self, addrs: Vec<IpAddr>) -> Self {
        self.config.put_whitelist = addrs;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the idle read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
