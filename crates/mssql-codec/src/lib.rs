//! # mssql-codec
//!
//! Blocking framing layer for TDS packet handling.
//!
//! This crate transforms raw byte streams into high-level TDS packets,
//! handling packet reassembly across TCP segment boundaries and packet
//! continuation for large messages.
//!
//! ## Features
//!
//! - Packet reassembly across TCP segments
//! - Message reassembly from multiple packets
//! - Read/write splitting so Attention can be sent from another thread
//!
//! ## Architecture
//!
//! The codec layer sits between raw TCP streams and the higher-level client:
//!
//! ```text
//! TCP Stream → TdsCodec (packet framing) → MessageAssembler → Client
//! ```
//!
//! ### Cancellation
//!
//! The connection is constructed from separately-owned read and write
//! halves of the transport. This allows sending Attention packets for query
//! cancellation even while another thread is blocked reading a large result
//! set.
//!
//! ```rust,ignore
//! use mssql_codec::Connection;
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("localhost:1433")?;
//! let write_half = stream.try_clone()?;
//! let conn = Connection::new(stream, write_half);
//! let cancel = conn.cancel_handle();
//!
//! std::thread::spawn(move || {
//!     cancel.cancel()?;
//! });
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::{CancelHandle, Connection};
pub use error::CodecError;
pub use framed::{PacketReader, PacketStream, PacketWriter};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
