//! Query cancellation support.
//!
//! This module provides a type-erased [`CancelHandle`] that allows cancelling
//! the batch currently in flight on a connection from a different thread
//! than the one blocked reading results.
//!
//! ## How cancellation works
//!
//! SQL Server cancellation is an out-of-band `ATTENTION` packet sent on the
//! same TCP connection as the batch being cancelled. Because the driver is
//! blocking I/O (see the crate's `REDESIGN` notes), sending that packet
//! while another thread is blocked in `read` requires a cancel handle that
//! owns its own clone of the write half — `mssql_codec::connection::CancelHandle`
//! already provides exactly that, so this type is a thin, transport-erasing
//! wrapper around it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::thread;
//! use std::time::Duration;
//!
//! let cancel_handle = client.cancel_handle();
//! thread::spawn(move || {
//!     thread::sleep(Duration::from_secs(5));
//!     let _ = cancel_handle.cancel();
//! });
//!
//! let result = client.execute_batch("SELECT * FROM very_large_table");
//! ```
//!
//! Calling [`CancelHandle::cancel`] is idempotent; subsequent calls while a
//! cancellation is already in flight have no additional effect. After
//! cancellation completes, the connection returns to `Idle` and remains
//! usable for later batches.

use std::net::TcpStream;

use mssql_codec::connection::CancelHandle as CodecCancelHandle;
use mssql_tls::TlsWriteHalf;

use crate::error::{Error, Result};

type TlsCancelHandle = CodecCancelHandle<TlsWriteHalf<TcpStream>>;
type PlainCancelHandle = CodecCancelHandle<TcpStream>;

/// Handle for cancelling the batch currently executing on a connection.
///
/// Cloneable and `Send + Sync`; the clone shares the same underlying write
/// half and cancellation flag as the handle held by the connection.
#[derive(Clone)]
pub struct CancelHandle {
    inner: CancelHandleInner,
}

#[derive(Clone)]
enum CancelHandleInner {
    Tls(TlsCancelHandle),
    Plain(PlainCancelHandle),
}

impl CancelHandle {
    /// Wrap a codec-level cancel handle for a TLS-wrapped connection.
    pub(crate) fn from_tls(handle: TlsCancelHandle) -> Self {
        Self {
            inner: CancelHandleInner::Tls(handle),
        }
    }

    /// Wrap a codec-level cancel handle for a plain TCP connection.
    pub(crate) fn from_plain(handle: PlainCancelHandle) -> Self {
        Self {
            inner: CancelHandleInner::Plain(handle),
        }
    }

    /// Send an `ATTENTION` packet to interrupt the in-flight batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet cannot be written, typically due to a
    /// closed or broken connection.
    pub fn cancel(&self) -> Result<()> {
        match &self.inner {
            CancelHandleInner::Tls(h) => h.cancel().map_err(Error::from),
            CancelHandleInner::Plain(h) => h.cancel().map_err(Error::from),
        }
    }

    /// Block the calling thread until the server acknowledges the
    /// cancellation with `DONE_ATTN`.
    pub fn wait_cancelled(&self) {
        match &self.inner {
            CancelHandleInner::Tls(h) => h.wait_cancelled(),
            CancelHandleInner::Plain(h) => h.wait_cancelled(),
        }
    }

    /// Whether a cancellation has been requested but not yet acknowledged.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        match &self.inner {
            CancelHandleInner::Tls(h) => h.is_cancelling(),
            CancelHandleInner::Plain(h) => h.is_cancelling(),
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("is_cancelling", &self.is_cancelling())
            .finish()
    }
}
