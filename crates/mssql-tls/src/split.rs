//! Splitting a TLS stream into independently ownable read/write halves.
//!
//! `mssql-codec`'s `Connection<R, W>` wants separately owned reader/writer
//! types so an `ATTENTION` packet can be sent on the write half from another
//! thread while the connection's owning thread is blocked reading a large
//! result set on the read half. A plain `TcpStream` gets this for free via
//! `try_clone`; a TLS `StreamOwned` can't be split that way since both
//! directions share one cipher state. Both halves here wrap the same
//! `Arc<Mutex<TlsStream<S>>>` instead.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::connector::TlsStream;

/// A transport that can bound a single read with a wall-clock deadline.
///
/// Implemented for `TcpStream` directly; [`TlsReadHalf`] forwards through to
/// whatever transport it wraps.
pub trait SetReadTimeout {
    /// Set or clear the socket-level read timeout. `None` blocks indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl SetReadTimeout for std::net::TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::net::TcpStream::set_read_timeout(self, timeout)
    }
}

/// Split a TLS stream into a read half and a write half sharing the same
/// underlying connection.
pub fn split_tls_stream<S>(stream: TlsStream<S>) -> (TlsReadHalf<S>, TlsWriteHalf<S>) {
    let shared = Arc::new(Mutex::new(stream));
    (TlsReadHalf(Arc::clone(&shared)), TlsWriteHalf(shared))
}

/// Read half of a split [`TlsStream`].
pub struct TlsReadHalf<S>(Arc<Mutex<TlsStream<S>>>);

/// Write half of a split [`TlsStream`].
pub struct TlsWriteHalf<S>(Arc<Mutex<TlsStream<S>>>);

impl<S: Read + Write> Read for TlsReadHalf<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).read(buf)
    }
}

impl<S: Read + Write + SetReadTimeout> SetReadTimeout for TlsReadHalf<S> {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).sock.set_read_timeout(timeout)
    }
}

impl<S: Read + Write> Write for TlsWriteHalf<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).flush()
    }
}
