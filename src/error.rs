//! Error types for cachewire.
//!
//! Every failure that can reach a client is rendered into a RESP error line
//! by [`Error::to_resp_error`]. The connection is only closed on I/O errors;
//! everything else becomes a reply.

use std::io;
use std::net::AddrParseError;
use std::num::{ParseFloatError, ParseIntError};
use thiserror::Error;

/// Result type alias for cachewire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol parsing errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Command execution errors
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// Cache engine errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local transaction errors
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Resource limit exceeded
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),

    /// Address parsing error
    #[error("address parse error: {0}")]
    AddrParse(#[from] AddrParseError),
}

/// Protocol-level errors during RESP parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid RESP data type marker
    #[error("invalid type marker: {0:?}")]
    InvalidTypeMarker(u8),

    /// Invalid UTF-8 in simple string
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid bulk string length
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Line too long (exceeds inline limit)
    #[error("line too long: {len} bytes (max: {max})")]
    LineTooLong {
        /// Actual line length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Bulk string too large
    #[error("bulk string too large: {len} bytes (max: {max})")]
    BulkTooLarge {
        /// Actual bulk string length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Too many array elements
    #[error("too many array elements: {count} (max: {max})")]
    TooManyElements {
        /// Actual element count
        count: usize,
        /// Maximum allowed count
        max: usize,
    },

    /// Missing CRLF terminator
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// Incomplete frame - need more data
    #[error("incomplete frame, need more data")]
    Incomplete,
}

/// Command execution errors.
///
/// The display string of each variant is exactly what the client receives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Wrong number of arguments
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity {
        /// Command name that received wrong arity
        command: String,
    },

    /// Syntax error
    #[error("ERR syntax error")]
    SyntaxError,

    /// Not an integer
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// Increment would overflow
    #[error("ERR increment or decrement would overflow")]
    Overflow,

    /// Invalid expire time
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    /// Nested MULTI call
    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    /// EXEC without MULTI
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    /// DISCARD without MULTI
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    /// WATCH inside MULTI
    #[error("ERR WATCH inside MULTI is not allowed")]
    WatchInsideMulti,

    /// Command that cannot be queued
    #[error("ERR Command not allowed inside a transaction")]
    NotAllowedInMulti,

    /// Write through a read-only cache
    #[error("READONLY You can't write against a read only cache")]
    ReadOnly,
}

/// Cache engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Listener registry is full
    #[error("too many listeners registered (max: {max})")]
    TooManyListeners {
        /// Configured maximum
        max: usize,
    },

    /// Operation issued with a context that no longer has a live transaction
    #[error("transaction {0} is no longer active")]
    TransactionNotActive(u64),
}

/// Local transaction lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Enlisting a new transaction failed
    #[error("failed to start transaction: {0}")]
    Start(String),

    /// Commit failed; nothing from the transaction was applied
    #[error("failed to commit transaction {id}: {reason}")]
    Commit {
        /// Transaction id
        id: u64,
        /// Why the commit was refused
        reason: String,
    },

    /// The cache chain has no engine to bind to
    #[error("no cache implementation found in the delegation chain")]
    ImplementationNotFound,
}

impl Error {
    /// Returns true if this is a client error.
    #[inline]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Protocol(_) | Error::Command(_))
    }

    /// Returns true if this is a server error.
    #[inline]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Error::Storage(_) | Error::Transaction(_) | Error::Internal(_) | Error::Io(_)
        )
    }

    /// Converts the error to a RESP error line (without the leading `-`).
    #[must_use]
    pub fn to_resp_error(&self) -> String {
        match self {
            Error::Protocol(e) => format!("ERR Protocol error: {e}"),
            Error::Command(e) => e.to_string(),
            Error::Storage(e) => format!("ERR {e}"),
            Error::Transaction(e) => format!("ERR {e}"),
            Error::Io(e) => format!("ERR I/O error: {e}"),
            Error::Config(e) => format!("ERR configuration error: {e}"),
            Error::ResourceLimit(e) => format!("ERR {e}"),
            Error::Internal(e) => format!("ERR internal error: {e}"),
            Error::AddrParse(e) => format!("ERR address parse error: {e}"),
        }
    }
}

impl From<ParseIntError> for ProtocolError {
    fn from(e: ParseIntError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}

impl From<ParseFloatError> for ProtocolError {
    fn from(e: ParseFloatError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Command(CommandError::WrongArity {
            command: "GET".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "command error: ERR wrong number of arguments for 'GET' command"
        );
    }

    #[test]
    fn test_resp_error_rendering() {
        let err: Error = CommandError::NestedMulti.into();
        assert_eq!(err.to_resp_error(), "ERR MULTI calls can not be nested");

        let err: Error = TransactionError::ImplementationNotFound.into();
        assert_eq!(
            err.to_resp_error(),
            "ERR no cache implementation found in the delegation chain"
        );

        let err: Error = StorageError::TooManyListeners { max: 2 }.into();
        assert_eq!(
            err.to_resp_error(),
            "ERR too many listeners registered (max: 2)"
        );
    }

    #[test]
    fn test_error_classification() {
        let client_err = Error::Command(CommandError::SyntaxError);
        assert!(client_err.is_client_error());
        assert!(!client_err.is_server_error());

        let server_err = Error::Transaction(TransactionError::Start("full".into()));
        assert!(!server_err.is_client_error());
        assert!(server_err.is_server_error());
    }
}
