//! # Artifact Cache
//!
//! A network cache for build artifacts shared by many build clients:
//! - Content-addressed versions of up to three files (asset, info, resource)
//! - Incremental binary protocol, tolerant of any packet fragmentation
//! - Paged in-memory storage with best-fit allocation and LRU eviction
//! - Multi-client reliability consensus before a version is trusted
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                             │
//! │             (one reader + responder per client)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ bytes
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │          Framer  →  Command Processor  →  Responder         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                               │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │ Reliability     │                │  Paged Cache    │
//!   │ Consensus       │                │  (RwLock)       │
//!   └─────────────────┘                └────────┬────────┘
//!                                               ▼
//!                                      ┌─────────────────┐
//!                                      │   Snapshots     │
//!                                      └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod key;

pub mod protocol;
pub mod storage;
pub mod reliability;
pub mod engine;
pub mod network;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use client::CacheClient;
pub use config::Config;
pub use engine::{Engine, TransactionOutcome};
pub use error::{CacheError, Result};
pub use key::{FileKey, FileType, VersionKey};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the cache server
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
