//! Connection state tracking.
//!
//! State is tracked at runtime with an atomic, compare-and-swap-guarded enum
//! rather than at the type level. A connection moves through a small set of
//! states as it authenticates, executes batches, and is cancelled:
//!
//! ```text
//! Disconnected -> Authenticating -> Idle <-> Executing
//!                                     ^          |
//!                                     |          v
//!                                     +---- Cancelling
//! ```
//!
//! Every transition is a single `compare_exchange` on an `AtomicU8`, so
//! `ConnectionState` can be read from a cancelling thread (see
//! [`crate::cancel::CancelHandle`]) without taking a lock on the connection
//! itself.

use std::sync::atomic::{AtomicU8, Ordering};

/// Runtime state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// No TCP connection exists yet.
    Disconnected = 0,
    /// TCP (and optionally TLS) connection is open; LOGIN7/FEDAUTH exchange
    /// is in progress.
    Authenticating = 1,
    /// Connection is authenticated and not currently executing a batch.
    Idle = 2,
    /// A batch has been sent and the connection is reading the token
    /// stream for its response.
    Executing = 3,
    /// An `ATTENTION` signal has been sent to interrupt the in-flight
    /// batch; the connection is draining tokens until the server's
    /// `DONE` with `DONE_ATTN` arrives.
    Cancelling = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Authenticating,
            2 => Self::Idle,
            3 => Self::Executing,
            4 => Self::Cancelling,
            _ => unreachable!("invalid ConnectionState encoding: {value}"),
        }
    }

    /// Whether queries can be issued from this state.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Whether the connection is actively exchanging a batch with the
    /// server (executing or unwinding a cancellation).
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Executing | Self::Cancelling)
    }
}

/// Atomic holder for a [`ConnectionState`], shared between the connection
/// and any outstanding [`crate::cancel::CancelHandle`].
#[derive(Debug)]
pub struct ConnectionStateCell(AtomicU8);

impl ConnectionStateCell {
    /// Create a new cell in the given initial state.
    #[must_use]
    pub fn new(initial: ConnectionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    /// Load the current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally set the state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Attempt to move from `from` to `to`. Returns `true` if the swap
    /// succeeded, `false` if the current state was not `from`.
    #[must_use]
    pub fn compare_exchange(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}
