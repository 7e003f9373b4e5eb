//! Protocol Module
//!
//! Defines the wire protocol spoken between build clients and the cache.
//!
//! ## Handshake
//! ```text
//! client → server:  8 ASCII hex digits (protocol version, e.g. "000000fe")
//! server → client:  the same 8 digits, or "00000000" if unsupported
//! ```
//!
//! ### Commands
//! ```text
//! ┌──────────┬──────────────────────────┬─────────────────────────────┐
//! │ Cmd (2)  │ Field                    │ Payload                     │
//! ├──────────┼──────────────────────────┼─────────────────────────────┤
//! │ ga/gi/gr │ id (32, guid + hash)     │ -                           │
//! │ pa/pi/pr │ size (16 hex digits)     │ `size` raw bytes            │
//! │ ts       │ id (32, guid + hash)     │ -                           │
//! │ te       │ -                        │ -                           │
//! │ q        │ (single byte)            │ -                           │
//! └──────────┴──────────────────────────┴─────────────────────────────┘
//! ```
//!
//! ### Responses
//! ```text
//! found:     '+' type(1) size(16 hex) id(32) payload(size)
//! not found: '-' type(1) id(32)
//! ```

mod codec;
mod command;
mod framer;
mod response;

pub use codec::{
    decode_size, decode_version, encode_command, encode_size, encode_version, write_command,
    CMD_SIZE, MIN_VERSION_SIZE, PROTOCOL_VERSION, SIZE_FIELD_SIZE, VERSION_SIZE,
};
pub use command::Command;
pub use framer::{Frame, Framer};
pub use response::ResponseHeader;
