//! Version keys and file types
//!
//! A version is identified by a 16-byte global id plus a 16-byte content
//! hash. On the wire both travel as raw bytes; in text (logs, file names,
//! the CLI) each byte is printed low nibble first, which is the byte order
//! the build client uses for its global identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Size of a global id or content hash (bytes)
pub const GUID_SIZE: usize = 16;

/// Size of a full version identifier on the wire (bytes)
pub const ID_SIZE: usize = 2 * GUID_SIZE;

// =============================================================================
// Textual id conversion
// =============================================================================

/// Render a 16-byte id in the nibble-swapped text form
pub fn guid_to_string(guid: &[u8; GUID_SIZE]) -> String {
    hex::encode(guid.map(|b| b.rotate_left(4)))
}

/// Parse the nibble-swapped text form back into 16 raw bytes
pub fn guid_from_str(text: &str) -> Result<[u8; GUID_SIZE]> {
    let mut guid = [0u8; GUID_SIZE];
    hex::decode_to_slice(text, &mut guid)
        .map_err(|e| CacheError::Protocol(format!("invalid id '{}': {}", text, e)))?;
    Ok(guid.map(|b| b.rotate_left(4)))
}

// =============================================================================
// VersionKey
// =============================================================================

/// One (global id, content hash) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionKey {
    pub guid: [u8; GUID_SIZE],
    pub hash: [u8; GUID_SIZE],
}

impl VersionKey {
    pub fn new(guid: [u8; GUID_SIZE], hash: [u8; GUID_SIZE]) -> Self {
        Self { guid, hash }
    }

    /// Build a key from its 32-byte wire form
    pub fn from_wire(bytes: &[u8; ID_SIZE]) -> Self {
        let mut guid = [0u8; GUID_SIZE];
        let mut hash = [0u8; GUID_SIZE];
        guid.copy_from_slice(&bytes[..GUID_SIZE]);
        hash.copy_from_slice(&bytes[GUID_SIZE..]);
        Self { guid, hash }
    }

    /// The 32-byte wire form (guid followed by hash)
    pub fn to_wire(&self) -> [u8; ID_SIZE] {
        let mut out = [0u8; ID_SIZE];
        out[..GUID_SIZE].copy_from_slice(&self.guid);
        out[GUID_SIZE..].copy_from_slice(&self.hash);
        out
    }

    /// An all-zero content hash marks a version that must never be stored
    pub fn has_zero_hash(&self) -> bool {
        self.hash.iter().all(|&b| b == 0)
    }

    pub fn guid_str(&self) -> String {
        guid_to_string(&self.guid)
    }

    pub fn hash_str(&self) -> String {
        guid_to_string(&self.hash)
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.guid_str(), self.hash_str())
    }
}

impl FromStr for VersionKey {
    type Err = CacheError;

    /// Parses `<guid>-<hash>`
    fn from_str(s: &str) -> Result<Self> {
        let (guid, hash) = s
            .split_once('-')
            .ok_or_else(|| CacheError::Protocol(format!("invalid version key '{}'", s)))?;
        Ok(Self {
            guid: guid_from_str(guid)?,
            hash: guid_from_str(hash)?,
        })
    }
}

// =============================================================================
// FileType
// =============================================================================

/// The three sub-files of a version
///
/// Ordering follows the wire tags, which is the order used when building a
/// version fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FileType {
    Asset,
    Metadata,
    Resource,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Asset, FileType::Metadata, FileType::Resource];

    /// Single-character wire tag
    pub fn tag(self) -> u8 {
        match self {
            FileType::Asset => b'a',
            FileType::Metadata => b'i',
            FileType::Resource => b'r',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'a' => Some(FileType::Asset),
            b'i' => Some(FileType::Metadata),
            b'r' => Some(FileType::Resource),
            _ => None,
        }
    }

    /// File extension used when a version is written out to disk
    pub fn extension(self) -> &'static str {
        match self {
            FileType::Asset => "bin",
            FileType::Metadata => "info",
            FileType::Resource => "resource",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

/// Index key for one stored file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKey {
    pub version: VersionKey,
    pub file_type: FileType,
}

impl FileKey {
    pub fn new(file_type: FileType, version: VersionKey) -> Self {
        Self { version, file_type }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.file_type)
    }
}
