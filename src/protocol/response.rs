//! Response definitions
//!
//! Headers sent in answer to get commands.

use std::io::Read;

use crate::error::{CacheError, Result};
use crate::key::{FileType, VersionKey, ID_SIZE};

use super::codec::{decode_size, encode_size, SIZE_FIELD_SIZE};

/// Header of a get response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseHeader {
    /// `+` type size id, followed by `size` payload bytes
    Found {
        file_type: FileType,
        size: u64,
        key: VersionKey,
    },

    /// `-` type id
    NotFound { file_type: FileType, key: VersionKey },
}

impl ResponseHeader {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ResponseHeader::Found {
                file_type,
                size,
                key,
            } => {
                let mut out = Vec::with_capacity(2 + SIZE_FIELD_SIZE + ID_SIZE);
                out.push(b'+');
                out.push(file_type.tag());
                out.extend_from_slice(&encode_size(*size));
                out.extend_from_slice(&key.to_wire());
                out
            }
            ResponseHeader::NotFound { file_type, key } => {
                let mut out = Vec::with_capacity(2 + ID_SIZE);
                out.push(b'-');
                out.push(file_type.tag());
                out.extend_from_slice(&key.to_wire());
                out
            }
        }
    }

    /// Read one header from a stream (the payload is left unread)
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut lead = [0u8; 2];
        reader.read_exact(&mut lead)?;

        let file_type = FileType::from_tag(lead[1]).ok_or_else(|| {
            CacheError::Protocol(format!("unknown file type tag 0x{:02x}", lead[1]))
        })?;

        match lead[0] {
            b'+' => {
                let mut size = [0u8; SIZE_FIELD_SIZE];
                reader.read_exact(&mut size)?;
                let size = decode_size(&size)?;
                let key = read_key(reader)?;
                Ok(ResponseHeader::Found {
                    file_type,
                    size,
                    key,
                })
            }
            b'-' => {
                let key = read_key(reader)?;
                Ok(ResponseHeader::NotFound { file_type, key })
            }
            other => Err(CacheError::Protocol(format!(
                "unknown response marker 0x{:02x}",
                other
            ))),
        }
    }
}

fn read_key<R: Read>(reader: &mut R) -> Result<VersionKey> {
    let mut id = [0u8; ID_SIZE];
    reader.read_exact(&mut id)?;
    Ok(VersionKey::from_wire(&id))
}
