//! Client error types.
//!
//! Follows the error taxonomy a connection can produce: `Io`, `Tls`,
//! `Protocol`, `Auth`, `ServerError`/`ServerInfo`, `Invariant`, `Timeout`,
//! and `State`. `Io` wraps `std::io::Error` behind an `Arc` so `Error` stays
//! `Clone`; the other lower-crate error types (`TlsError`, `ProtocolError`,
//! `CodecError`, `AuthError`, `PoolError`, `TypeError`) are themselves not
//! `Clone`, so they convert into owned `String` payloads at this boundary
//! rather than being embedded directly.

use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// TCP read/write failure or timeout.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    /// TLS handshake failure or downgrade rejection.
    #[error("tls error: {0}")]
    Tls(String),

    /// Malformed packet, wrong packet id, or unexpected token.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Codec-level framing error (packet size, message boundary).
    #[error("codec error: {0}")]
    Codec(String),

    /// Type decode/encode error.
    #[error("type error: {0}")]
    Type(String),

    /// LOGIN7/FEDAUTH rejection or expired token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Pool acquisition or lifecycle failure.
    #[error("pool error: {0}")]
    Pool(String),

    /// ERROR token (0xAA) with non-zero severity.
    #[error("server error {number} (severity {class}): {message}")]
    ServerError {
        /// Error number.
        number: i32,
        /// Error class/severity (16-25 are batch-aborting or fatal).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where the error occurred.
        server: Option<String>,
        /// Stored procedure name, if applicable.
        procedure: Option<String>,
        /// Line number in the batch or procedure.
        line: u32,
    },

    /// INFO token (0xAB); non-fatal, surfaced only when explicitly
    /// collected by the caller.
    #[error("server info {number}: {message}")]
    ServerInfo {
        /// Info number.
        number: i32,
        /// Message text.
        message: String,
    },

    /// An internal invariant was violated, e.g. a second COLMETADATA
    /// arriving within a single scan, or a DONE_MORE token appearing
    /// mid-row.
    #[error("protocol invariant violated: {0}")]
    Invariant(String),

    /// A deadline passed: connection acquire, query execution, or
    /// cancellation drain.
    #[error("{0} timed out after {1:?}")]
    Timeout(TimeoutKind, std::time::Duration),

    /// Operation attempted while the connection was in the wrong state.
    #[error("invalid operation for connection state {0:?}")]
    State(crate::state::ConnectionState),

    /// Configuration is invalid or incomplete.
    #[error("configuration error: {0}")]
    Config(String),

    /// Identifier failed validation (would otherwise enable SQL injection).
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A DML batch was rejected before any SQL was sent, e.g. missing
    /// primary key or a SET clause touching a primary-key column.
    #[error("query builder error: {0}")]
    QueryBuilder(String),
}

/// Which deadline elapsed, for [`Error::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Waiting for a pooled connection.
    Acquire,
    /// Waiting for a batch to finish executing.
    Query,
    /// Waiting for an ATTENTION cancellation to drain.
    Drain,
    /// TCP connect.
    Connect,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Acquire => "connection acquire",
            Self::Query => "query execution",
            Self::Drain => "cancellation drain",
            Self::Connect => "connect",
        };
        f.write_str(s)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(Arc::new(e))
    }
}

impl From<mssql_tls::TlsError> for Error {
    fn from(e: mssql_tls::TlsError) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<tds_protocol::ProtocolError> for Error {
    fn from(e: tds_protocol::ProtocolError) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<mssql_codec::CodecError> for Error {
    fn from(e: mssql_codec::CodecError) -> Self {
        match e {
            // Preserve the io::ErrorKind (e.g. WouldBlock/TimedOut from a
            // socket read deadline) instead of flattening it into a string;
            // callers match on this to distinguish a timed-out read from
            // any other codec failure.
            mssql_codec::CodecError::Io(io_err) => Error::Io(Arc::new(io_err)),
            other => Error::Codec(other.to_string()),
        }
    }
}

impl From<mssql_types::TypeError> for Error {
    fn from(e: mssql_types::TypeError) -> Self {
        Error::Type(e.to_string())
    }
}

impl From<mssql_auth::AuthError> for Error {
    fn from(e: mssql_auth::AuthError) -> Self {
        Error::Auth(e.to_string())
    }
}

impl From<mssql_pool::PoolError> for Error {
    fn from(e: mssql_pool::PoolError) -> Self {
        match e {
            // Preserve the elapsed duration as a proper Timeout rather than
            // a stringified Pool error, so callers can match on it the same
            // way as a query/drain/connect timeout.
            mssql_pool::PoolError::AcquisitionTimeout(d) => Error::Timeout(TimeoutKind::Acquire, d),
            other => Error::Pool(other.to_string()),
        }
    }
}

impl Error {
    /// Whether this error destroys the underlying connection (`Io`, `Tls`,
    /// and `Protocol` are all fatal for the connection they occurred on).
    #[must_use]
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Tls(_) | Self::Protocol(_) | Self::Codec(_))
    }

    /// Whether this error may succeed if the whole operation (not just the
    /// connection) is retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) | Self::Timeout(..) => true,
            Self::ServerError { number, .. } => Self::is_transient_server_error(*number),
            _ => false,
        }
    }

    /// Whether a server error number is known to be transient.
    #[must_use]
    pub fn is_transient_server_error(number: i32) -> bool {
        matches!(
            number,
            1205 |  // deadlock victim
            -2 |    // timeout
            10928 | 10929 | // resource limit (Azure)
            40197 | // service error (Azure)
            40501 | // service busy (Azure)
            40613 | // database unavailable (Azure)
            49918 | 49919 | 49920 | // cannot process request (Azure)
            4060 |  // cannot open database
            18456 // login failed (may be transient during Azure failover)
        )
    }

    /// Whether a server error number is known to be terminal (will never
    /// succeed on retry).
    #[must_use]
    pub fn is_terminal_server_error(number: i32) -> bool {
        matches!(
            number,
            102 |  // syntax error
            207 |  // invalid column
            208 |  // invalid object
            547 |  // constraint violation
            2627 | // unique constraint violation
            2601 // duplicate key
        )
    }

    /// Error class/severity, if this is a [`Error::ServerError`].
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::ServerError { class, .. } => Some(*class),
            _ => None,
        }
    }

    /// Whether this is a [`Error::ServerError`] with the given number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::ServerError { number: n, .. } if *n == number)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_server_error(number: i32) -> Error {
        Error::ServerError {
            number,
            class: 16,
            state: 1,
            message: "test error".to_string(),
            server: None,
            procedure: None,
            line: 1,
        }
    }

    #[test]
    fn test_io_is_connection_fatal_and_transient() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::from(io_err);
        assert!(err.is_connection_fatal());
        assert!(err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient_not_fatal() {
        let err = Error::Timeout(TimeoutKind::Acquire, std::time::Duration::from_secs(5));
        assert!(err.is_transient());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn test_server_error_transient_classification() {
        assert!(make_server_error(1205).is_transient());
        assert!(make_server_error(40501).is_transient());
        assert!(!make_server_error(102).is_transient());
    }

    #[test]
    fn test_server_error_terminal_classification() {
        assert!(Error::is_terminal_server_error(102));
        assert!(Error::is_terminal_server_error(2627));
        assert!(!Error::is_terminal_server_error(1205));
    }

    #[test]
    fn test_class_and_is_server_error() {
        let err = make_server_error(547);
        assert_eq!(err.class(), Some(16));
        assert!(err.is_server_error(547));
        assert!(!err.is_server_error(102));
        assert_eq!(Error::Config("x".into()).class(), None);
    }

    #[test]
    fn test_state_error_is_not_fatal_or_transient() {
        let err = Error::State(crate::state::ConnectionState::Executing);
        assert!(!err.is_connection_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Error>();
    }
}
