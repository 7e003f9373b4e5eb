//! Command definitions
//!
//! Represents commands from clients.

use crate::key::{FileType, VersionKey};

/// A parsed command
///
/// `Put` carries only the declared size; the body follows on the wire and is
/// surfaced separately by the framer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Fetch one file of a version
    Get { file_type: FileType, key: VersionKey },

    /// Upload one file of the open transaction
    Put { file_type: FileType, size: u64 },

    /// Open a put transaction for a version
    TransactionStart { key: VersionKey },

    /// Commit the open put transaction
    TransactionEnd,

    /// Close the connection
    Quit,
}
