//! Codec-level error types.

use thiserror::Error;

/// Errors that can occur while framing or transporting TDS packets.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A packet header failed validation (bad length or type).
    #[error("invalid packet header")]
    InvalidHeader,

    /// A packet exceeded the configured maximum size.
    #[error("packet too large: {size} bytes exceeds max {max}")]
    PacketTooLarge {
        /// Size that was rejected.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The connection was closed while a multi-packet message was incomplete.
    #[error("connection closed with an incomplete message")]
    ConnectionClosed,

    /// A protocol-level decode error surfaced while parsing a packet header.
    #[error("protocol error: {0}")]
    Protocol(#[from] tds_protocol::ProtocolError),

    /// The underlying transport returned an IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
