//! Framed packet stream for blocking I/O.
//!
//! This module provides both combined and split stream types:
//! - `PacketStream<T>` - Combined read/write stream for bidirectional I/O
//! - `PacketReader<T>` - Read-only stream for receiving packets
//! - `PacketWriter<T>` - Write-only sink for sending packets
//!
//! The split types let a connection hand its write half to another thread so
//! an ATTENTION signal can be sent while the main thread is blocked reading.

use std::io::{self, Read, Write};

use bytes::{Buf, BytesMut};

use crate::error::CodecError;
use crate::packet_codec::{Packet, TdsCodec};

/// Initial capacity of the internal read buffer.
const READ_BUF_CAPACITY: usize = 8 * 1024;

/// A framed packet stream over a blocking I/O transport.
///
/// This buffers raw bytes from `T` and hands back complete [`Packet`]s,
/// re-filling from the transport whenever the buffer doesn't yet hold one.
pub struct PacketStream<T> {
    transport: T,
    codec: TdsCodec,
    read_buf: BytesMut,
}

impl<T> PacketStream<T> {
    /// Create a new packet stream over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, TdsCodec::new())
    }

    /// Create a new packet stream with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            transport,
            codec,
            read_buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        &self.codec
    }

    /// Get a mutable reference to the codec.
    pub fn codec_mut(&mut self) -> &mut TdsCodec {
        &mut self.codec
    }

    /// Consume the stream and return the underlying transport.
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Get a reference to the read buffer.
    pub fn read_buffer(&self) -> &BytesMut {
        &self.read_buf
    }

    /// Get a mutable reference to the read buffer.
    pub fn read_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }
}

impl<T: Read> PacketStream<T> {
    /// Block until a complete TDS packet is available and return it.
    ///
    /// Returns `Ok(None)` on a clean EOF with no partial data buffered.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        read_packet(&mut self.transport, &mut self.read_buf, &mut self.codec)
    }
}

impl<T: Write> PacketStream<T> {
    /// Write a single TDS packet to the transport and flush it.
    pub fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        write_packet(&mut self.transport, packet, &mut self.codec)
    }
}

impl<T> std::fmt::Debug for PacketStream<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketStream")
            .field("transport", &self.transport)
            .finish()
    }
}

/// A read-only packet stream for receiving TDS packets.
///
/// This is used for the read half of a split connection.
pub struct PacketReader<T> {
    transport: T,
    codec: TdsCodec,
    read_buf: BytesMut,
}

impl<T> PacketReader<T> {
    /// Create a new packet reader over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, TdsCodec::new())
    }

    /// Create a new packet reader with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self {
            transport,
            codec,
            read_buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
        }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        &self.codec
    }

    /// Get a mutable reference to the codec.
    pub fn codec_mut(&mut self) -> &mut TdsCodec {
        &mut self.codec
    }

    /// Get a reference to the read buffer.
    pub fn read_buffer(&self) -> &BytesMut {
        &self.read_buf
    }

    /// Get a mutable reference to the read buffer.
    pub fn read_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }
}

impl<T: Read> PacketReader<T> {
    /// Block until a complete TDS packet is available and return it.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        read_packet(&mut self.transport, &mut self.read_buf, &mut self.codec)
    }
}

impl<T> std::fmt::Debug for PacketReader<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("transport", &self.transport)
            .finish()
    }
}

/// A write-only packet sink for sending TDS packets.
///
/// This is used for the write half of a split connection, so an ATTENTION
/// packet can be sent from a different thread than the one blocked reading.
pub struct PacketWriter<T> {
    transport: T,
    codec: TdsCodec,
}

impl<T> PacketWriter<T> {
    /// Create a new packet writer over the given transport.
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, TdsCodec::new())
    }

    /// Create a new packet writer with a custom codec.
    pub fn with_codec(transport: T, codec: TdsCodec) -> Self {
        Self { transport, codec }
    }

    /// Get a reference to the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Get a reference to the codec.
    pub fn codec(&self) -> &TdsCodec {
        &self.codec
    }

    /// Get a mutable reference to the codec.
    pub fn codec_mut(&mut self) -> &mut TdsCodec {
        &mut self.codec
    }
}

impl<T: Write> PacketWriter<T> {
    /// Write a single TDS packet to the transport and flush it.
    pub fn write_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        write_packet(&mut self.transport, packet, &mut self.codec)
    }
}

impl<T> std::fmt::Debug for PacketWriter<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketWriter")
            .field("transport", &self.transport)
            .finish()
    }
}

fn read_packet<T: Read>(
    transport: &mut T,
    read_buf: &mut BytesMut,
    codec: &mut TdsCodec,
) -> Result<Option<Packet>, CodecError> {
    loop {
        if let Some(packet) = codec.decode(read_buf)? {
            return Ok(Some(packet));
        }

        let mut chunk = [0u8; READ_BUF_CAPACITY];
        let n = match transport.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CodecError::Io(e)),
        };

        if n == 0 {
            if read_buf.is_empty() {
                return Ok(None);
            }
            return Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-packet",
            )));
        }

        read_buf.extend_from_slice(&chunk[..n]);
    }
}

fn write_packet<T: Write>(
    transport: &mut T,
    packet: Packet,
    codec: &mut TdsCodec,
) -> Result<(), CodecError> {
    let mut out = BytesMut::with_capacity(packet.total_size());
    codec.encode(packet, &mut out)?;
    transport.write_all(out.chunk()).map_err(CodecError::Io)?;
    transport.flush().map_err(CodecError::Io)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tds_protocol::packet::{PacketHeader, PacketStatus, PacketType};

    #[test]
    fn test_write_then_read_packet_roundtrip() {
        let mut stream = PacketStream::new(Cursor::new(Vec::new()));
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0);
        let payload = BytesMut::from(&b"select 1"[..]);
        stream.write_packet(Packet::new(header, payload)).unwrap();

        let bytes = stream.into_inner().into_inner();
        let mut reader = PacketStream::new(Cursor::new(bytes));
        let packet = reader.read_packet().unwrap().unwrap();
        assert_eq!(&packet.payload[..], b"select 1");
        assert!(packet.is_end_of_message());
    }

    #[test]
    fn test_read_packet_eof_with_empty_buffer() {
        let mut reader = PacketStream::new(Cursor::new(Vec::new()));
        let result = reader.read_packet().unwrap();
        assert!(result.is_none());
    }
}
