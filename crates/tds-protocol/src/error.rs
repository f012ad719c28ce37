//! Protocol-level error type.
//!
//! This crate is IO-agnostic, so these errors describe only malformed wire
//! data, never transport failures.

use crate::prelude::*;

/// Errors that can occur while encoding or decoding TDS wire structures.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum ProtocolError {
    /// Not enough bytes remained to decode a fixed-size structure.
    #[cfg_attr(
        feature = "std",
        error("incomplete data: expected {expected} bytes, got {actual}")
    )]
    IncompletePacket {
        /// Bytes required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// A field held a value outside its defined domain.
    #[cfg_attr(feature = "std", error("invalid field {field}: {value}"))]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Raw value that was rejected.
        value: u32,
    },

    /// A packet header carried an unrecognised packet type byte.
    #[cfg_attr(feature = "std", error("invalid packet type: 0x{0:02x}"))]
    InvalidPacketType(u8),

    /// A packet header carried an unrecognised status byte.
    #[cfg_attr(feature = "std", error("invalid packet status: 0x{0:02x}"))]
    InvalidPacketStatus(u8),

    /// A pre-login option list carried an unrecognised option type byte.
    #[cfg_attr(feature = "std", error("invalid pre-login option: 0x{0:02x}"))]
    InvalidPreloginOption(u8),

    /// A token stream carried an unrecognised token type byte.
    #[cfg_attr(feature = "std", error("invalid token type: 0x{0:02x}"))]
    InvalidTokenType(u8),

    /// Source bytes ran out mid-structure.
    #[cfg_attr(feature = "std", error("unexpected end of data"))]
    UnexpectedEof,

    /// A string field could not be decoded with its expected encoding.
    #[cfg_attr(feature = "std", error("string encoding error: {0}"))]
    StringEncoding(String),

    /// A COLMETADATA column carried a type byte this decoder doesn't know
    /// the TYPE_INFO layout for.
    #[cfg_attr(feature = "std", error("unsupported column type: 0x{0:02x}"))]
    UnsupportedColumnType(u8),

    /// A ROW/NBCROW token was encountered with no preceding COLMETADATA in
    /// this token stream.
    #[cfg_attr(feature = "std", error("row token with no preceding column metadata"))]
    MissingColumnMetadata,
}

#[cfg(not(feature = "std"))]
impl core::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::IncompletePacket { expected, actual } => {
                write!(f, "incomplete data: expected {expected} bytes, got {actual}")
            }
            Self::InvalidField { field, value } => write!(f, "invalid field {field}: {value}"),
            Self::InvalidPacketType(v) => write!(f, "invalid packet type: 0x{v:02x}"),
            Self::InvalidPacketStatus(v) => write!(f, "invalid packet status: 0x{v:02x}"),
            Self::InvalidPreloginOption(v) => write!(f, "invalid pre-login option: 0x{v:02x}"),
            Self::InvalidTokenType(v) => write!(f, "invalid token type: 0x{v:02x}"),
            Self::UnexpectedEof => write!(f, "unexpected end of data"),
            Self::StringEncoding(msg) => write!(f, "string encoding error: {msg}"),
            Self::UnsupportedColumnType(v) => write!(f, "unsupported column type: 0x{v:02x}"),
            Self::MissingColumnMetadata => {
                write!(f, "row token with no preceding column metadata")
            }
        }
    }
}
