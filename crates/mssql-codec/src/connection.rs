//! Split I/O connection for cancellation safety.
//!
//! The transport is split into separate read and write halves so an
//! Attention packet can be sent from another thread while the connection's
//! owning thread is blocked reading a large result set.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::{Packet, TdsCodec};

/// A TDS connection with split I/O for cancellation safety.
///
/// The caller provides already-split read and write halves of the transport
/// (for a plain TCP socket this is `TcpStream::try_clone`; for a TLS stream
/// it is the two halves of a duplex wrapper the caller constructs). This
/// keeps this crate agnostic to how the transport is split.
///
/// # Cancellation
///
/// SQL Server uses out-of-band "Attention" packets to cancel running queries.
/// Without split I/O, the driver would be unable to send cancellation while
/// blocked awaiting a read (e.g., processing a large result set).
pub struct Connection<R, W> {
    /// Read half wrapped in a packet reader.
    reader: PacketReader<R>,
    /// Write half protected by mutex for concurrent cancel access.
    writer: Arc<Mutex<PacketWriter<W>>>,
    /// Message assembler for multi-packet messages.
    assembler: MessageAssembler,
    /// Notification for cancellation completion.
    cancel_notify: Arc<(Mutex<bool>, Condvar)>,
    /// Flag indicating cancellation is in progress.
    cancelling: Arc<AtomicBool>,
}

impl<R, W> Connection<R, W>
where
    R: Read,
    W: Write,
{
    /// Create a new connection from already-split read/write halves.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_codecs(reader, writer, TdsCodec::new(), TdsCodec::new())
    }

    /// Create a new connection with custom codecs.
    pub fn with_codecs(reader: R, writer: W, read_codec: TdsCodec, write_codec: TdsCodec) -> Self {
        Self {
            reader: PacketReader::with_codec(reader, read_codec),
            writer: Arc::new(Mutex::new(PacketWriter::with_codec(writer, write_codec))),
            assembler: MessageAssembler::new(),
            cancel_notify: Arc::new((Mutex::new(false), Condvar::new())),
            cancelling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle for cancelling queries on this connection.
    ///
    /// The handle can be cloned and sent to another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<W> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.cancel_notify),
            cancelling: Arc::clone(&self.cancelling),
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    /// Read the next complete message from the connection.
    ///
    /// This handles multi-packet message reassembly automatically, blocking
    /// until a full message is available.
    pub fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        loop {
            if self.is_cancelling() {
                return self.drain_after_cancel();
            }

            match self.reader.read_packet()? {
                Some(packet) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(Some(message));
                    }
                }
                None => {
                    if self.assembler.has_partial() {
                        return Err(CodecError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Read a single packet from the connection.
    ///
    /// This is lower-level than `read_message` and doesn't perform reassembly.
    pub fn read_packet(&mut self) -> Result<Option<Packet>, CodecError> {
        self.reader.read_packet()
    }

    /// Send a packet on the connection.
    pub fn send_packet(&mut self, packet: Packet) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.write_packet(packet)
    }

    /// Send a complete message, splitting into multiple packets if needed.
    ///
    /// If `reset_connection` is true, the RESETCONNECTION flag is set on the
    /// first packet. This causes SQL Server to reset connection state (temp
    /// tables, SET options, isolation level, etc.) before executing the command.
    /// Per TDS spec, this flag MUST only be set on the first packet of a message.
    pub fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        max_packet_size: usize,
    ) -> Result<(), CodecError> {
        self.send_message_with_reset(packet_type, payload, max_packet_size, false)
    }

    /// Send a complete message with optional connection reset.
    pub fn send_message_with_reset(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        max_packet_size: usize,
        reset_connection: bool,
    ) -> Result<(), CodecError> {
        let max_payload = max_packet_size - PACKET_HEADER_SIZE;
        let chunks: Vec<_> = payload.chunks(max_payload).collect();
        let total_chunks = chunks.len().max(1);

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        for (i, chunk) in chunks.into_iter().enumerate() {
            let is_first = i == 0;
            let is_last = i == total_chunks - 1;

            let mut status = if is_last {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };

            if is_first && reset_connection {
                status |= PacketStatus::RESET_CONNECTION;
            }

            let header = PacketHeader::new(packet_type, status, 0);
            let packet = Packet::new(header, BytesMut::from(chunk));

            writer.write_packet(packet)?;
        }

        Ok(())
    }

    /// Drain packets after cancellation until DONE with ATTENTION is received.
    fn drain_after_cancel(&mut self) -> Result<Option<Message>, CodecError> {
        tracing::debug!("draining packets after cancellation");

        self.assembler.clear();

        loop {
            match self.reader.read_packet() {
                Ok(Some(packet)) => {
                    if packet.header.packet_type == PacketType::TabularResult
                        && !packet.payload.is_empty()
                        && check_attention_done(&packet)
                    {
                        tracing::debug!("received DONE with ATTENTION, cancellation complete");
                        self.cancelling.store(false, Ordering::Release);
                        let (lock, cvar) = &*self.cancel_notify;
                        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
                        cvar.notify_all();
                        return Ok(None);
                    }
                }
                Ok(None) => {
                    self.cancelling.store(false, Ordering::Release);
                    return Ok(None);
                }
                Err(e) => {
                    self.cancelling.store(false, Ordering::Release);
                    return Err(e);
                }
            }
        }
    }

    /// Get a reference to the read half's transport.
    ///
    /// Used to reach socket-level knobs (e.g. a read timeout) that aren't
    /// part of this crate's `Read`/`Write` abstraction.
    pub fn transport_ref(&self) -> &R {
        self.reader.get_ref()
    }

    /// Get a reference to the read codec.
    pub fn read_codec(&self) -> &TdsCodec {
        self.reader.codec()
    }

    /// Get a mutable reference to the read codec.
    pub fn read_codec_mut(&mut self) -> &mut TdsCodec {
        self.reader.codec_mut()
    }
}

impl<R, W> std::fmt::Debug for Connection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancelling", &self.is_cancelling())
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

/// Check if a packet contains a DONE token with ATTENTION flag.
///
/// DONE token format: token_type(1) + status(2) + cur_cmd(2) + row_count(8).
fn check_attention_done(packet: &Packet) -> bool {
    let payload = &packet.payload;

    for i in 0..payload.len() {
        if payload[i] == 0xFD && i + 3 <= payload.len() {
            let status = u16::from_le_bytes([payload[i + 1], payload[i + 2]]);
            // DONE_ATTN = 0x0020
            if status & 0x0020 != 0 {
                return true;
            }
        }
    }

    false
}

/// Handle for cancelling queries on a connection.
///
/// This can be cloned and sent to another thread to enable cancellation
/// from a different thread than the one blocked reading.
pub struct CancelHandle<W> {
    writer: Arc<Mutex<PacketWriter<W>>>,
    notify: Arc<(Mutex<bool>, Condvar)>,
    cancelling: Arc<AtomicBool>,
}

impl<W: Write> CancelHandle<W> {
    /// Send an Attention packet to cancel the current query.
    ///
    /// This can be called from a different thread while the owning thread
    /// is blocked reading results.
    pub fn cancel(&self) -> Result<(), CodecError> {
        self.cancelling.store(true, Ordering::Release);

        tracing::debug!("sending Attention packet for query cancellation");

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let header = PacketHeader::new(
            PacketType::Attention,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );
        let packet = Packet::new(header, BytesMut::new());

        writer.write_packet(packet)?;

        Ok(())
    }

    /// Block until the cancellation completes.
    ///
    /// This waits until the server acknowledges the cancellation with a
    /// DONE token containing the ATTENTION flag.
    pub fn wait_cancelled(&self) {
        if self.cancelling.load(Ordering::Acquire) {
            let (lock, cvar) = &*self.notify;
            let mut done = lock.lock().unwrap_or_else(|e| e.into_inner());
            while !*done {
                done = cvar.wait(done).unwrap_or_else(|e| e.into_inner());
            }
        }
    }

    /// Check if a cancellation is currently in progress.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }
}

impl<W> Clone for CancelHandle<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            cancelling: Arc::clone(&self.cancelling),
        }
    }
}

impl<W> std::fmt::Debug for CancelHandle<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelling", &self.is_cancelling())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_attention_packet_header() {
        let header = PacketHeader::new(
            PacketType::Attention,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );

        assert_eq!(header.packet_type, PacketType::Attention);
        assert!(header.status.contains(PacketStatus::END_OF_MESSAGE));
        assert_eq!(header.length, PACKET_HEADER_SIZE as u16);
    }

    #[test]
    fn test_check_attention_done() {
        let header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 0);

        let payload_with_attn = BytesMut::from(
            &[
                0xFD, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ][..],
        );
        let packet_with_attn = Packet::new(header, payload_with_attn);

        let payload_no_attn = BytesMut::from(
            &[
                0xFD, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            ][..],
        );
        let packet_no_attn = Packet::new(header, payload_no_attn);

        assert!(check_attention_done(&packet_with_attn));
        assert!(!check_attention_done(&packet_no_attn));
    }
}
