//! Protocol codec
//!
//! Fixed-width hex fields and command encoding. Decoding of the inbound
//! stream lives in the framer; the helpers here are shared by the framer,
//! the server's responder and the client.

use std::io::Write;

use crate::error::{CacheError, Result};
use crate::key::ID_SIZE;

use super::Command;

/// Protocol version spoken by this server
pub const PROTOCOL_VERSION: u32 = 254;

/// Handshake field size: 8 hex digits
pub const VERSION_SIZE: usize = 8;

/// Fewest leading hex digits accepted as a handshake when the peer hangs up
pub const MIN_VERSION_SIZE: usize = 2;

/// Command token size
pub const CMD_SIZE: usize = 2;

/// Size field: 16 hex digits
pub const SIZE_FIELD_SIZE: usize = 16;

// =============================================================================
// Hex fields
// =============================================================================

/// Encode a protocol version as 8 lowercase hex digits
pub fn encode_version(version: u32) -> [u8; VERSION_SIZE] {
    let mut out = [0u8; VERSION_SIZE];
    out.copy_from_slice(format!("{:08x}", version).as_bytes());
    out
}

/// Decode a protocol version from its leading hex digits
///
/// Parsing stops at the first non-hex byte; a field without any leading hex
/// digit decodes to 0, which never matches a supported version.
pub fn decode_version(bytes: &[u8]) -> u32 {
    let digits = leading_hex_digits(bytes).min(VERSION_SIZE);
    if digits == 0 {
        return 0;
    }
    std::str::from_utf8(&bytes[..digits])
        .ok()
        .and_then(|s| u32::from_str_radix(s, 16).ok())
        .unwrap_or(0)
}

/// Number of leading ASCII hex digits in `bytes`
pub(crate) fn leading_hex_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_hexdigit()).count()
}

/// Encode a payload size as 16 lowercase hex digits
pub fn encode_size(size: u64) -> [u8; SIZE_FIELD_SIZE] {
    let mut out = [0u8; SIZE_FIELD_SIZE];
    out.copy_from_slice(format!("{:016x}", size).as_bytes());
    out
}

/// Decode a 16-digit hex size field
pub fn decode_size(bytes: &[u8]) -> Result<u64> {
    if bytes.len() != SIZE_FIELD_SIZE || leading_hex_digits(bytes) != SIZE_FIELD_SIZE {
        return Err(CacheError::Protocol(format!(
            "malformed size field: {:?}",
            String::from_utf8_lossy(bytes)
        )));
    }
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CacheError::Protocol(format!("malformed size field: {}", e)))?;
    u64::from_str_radix(text, 16)
        .map_err(|e| CacheError::Protocol(format!("malformed size field: {}", e)))
}

// =============================================================================
// Command encoding
// =============================================================================

/// Encode a command (without any put body)
pub fn encode_command(command: &Command) -> Vec<u8> {
    match command {
        Command::Quit => vec![b'q'],
        Command::TransactionEnd => b"te".to_vec(),
        Command::TransactionStart { key } => {
            let mut out = Vec::with_capacity(CMD_SIZE + ID_SIZE);
            out.extend_from_slice(b"ts");
            out.extend_from_slice(&key.to_wire());
            out
        }
        Command::Get { file_type, key } => {
            let mut out = Vec::with_capacity(CMD_SIZE + ID_SIZE);
            out.extend_from_slice(&[b'g', file_type.tag()]);
            out.extend_from_slice(&key.to_wire());
            out
        }
        Command::Put { file_type, size } => {
            let mut out = Vec::with_capacity(CMD_SIZE + SIZE_FIELD_SIZE);
            out.extend_from_slice(&[b'p', file_type.tag()]);
            out.extend_from_slice(&encode_size(*size));
            out
        }
    }
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command))?;
    Ok(())
}
