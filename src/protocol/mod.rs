//! Redis Serialization Protocol (RESP) implementation.
//!
//! Only the RESP2 subset needed by the command surface is implemented:
//! the server decodes client arrays and inline commands and encodes
//! simple strings, errors, integers, bulk strings and arrays.

mod frame;
mod parser;
pub mod responses;

pub use frame::Frame;
pub use parser::{parse_frame, RespParser};

/// CRLF terminator bytes.
pub const CRLF: &[u8] = b"\r\n";

/// Type markers for RESP.
pub mod markers {
    /// Simple string: +
    pub const SIMPLE_STRING: u8 = b'+';
    /// Error: -
    pub const ERROR: u8 = b'-';
    /// Integer: :
    pub const INTEGER: u8 = b':';
    /// Bulk string: $
    pub const BULK_STRING: u8 = b'$';
    /// Array: *
    pub const ARRAY: u8 = b'*';
}
