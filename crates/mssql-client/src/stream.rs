//! Result stream: the state machine that turns a connection's token stream
//! into a sequence of rows for one batch.
//!
//! A single `ResultStream` corresponds to one in-flight batch and holds its
//! connection (see [`TokenSource`]) exclusively until it reaches
//! [`StreamState::Complete`]. It enforces "one result set per batch": a
//! second `COLMETADATA` token moves the stream to `Error` and drains rather
//! than attempting to surface a second schema.
//!
//! ```text
//! Initializing --COLMETADATA--> Streaming --DONE (final)--> Complete
//!      |                             |
//!      | DONE (final, no metadata)   | second COLMETADATA / protocol error
//!      v                             v
//!  Complete                       Error --drain--> Complete
//! ```

use tds_protocol::token::Token;

use crate::error::Error;
use crate::row::{colmetadata_from_tds, decode_row, ColMetaData, Row};

/// Anything that can hand the result stream the next parsed token off a
/// connection's wire. Implemented by `Connection` once its token-reading
/// loop exists; kept as a trait here so this state machine can be built and
/// tested independently of the connection's own lifecycle.
pub trait TokenSource {
    /// Read and decode the next token, or `None` at end of message.
    fn next_token(&mut self) -> Result<Option<Token>, Error>;
}

/// Current phase of a [`ResultStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created after `execute_batch`; waiting for the first `COLMETADATA`
    /// or a metadata-less final `DONE`.
    Initializing,
    /// `COLMETADATA` seen; `ROW`/`NBCROW` tokens yield rows.
    Streaming,
    /// Cancelling or recovering from an error: tokens are consumed without
    /// row-value parsing until a final `DONE` or `DONE_ATTN`.
    Draining,
    /// A second `COLMETADATA` or a protocol violation was observed; drains
    /// like `Draining` and has already surfaced its error to the caller.
    Error,
    /// Terminal. The connection has been (or is about to be) released.
    Complete,
}

/// A streaming result set from one batch.
///
/// Blocking: calling [`next_row`](Self::next_row) reads directly off the
/// connection and returns once a row is decoded, an error occurs, or the
/// result set is exhausted.
pub struct ResultStream<'a, T: TokenSource> {
    source: &'a mut T,
    state: StreamState,
    columns: Option<std::sync::Arc<ColMetaData>>,
}

impl<'a, T: TokenSource> ResultStream<'a, T> {
    /// Start a new result stream immediately after a batch has been sent.
    pub(crate) fn new(source: &'a mut T) -> Self {
        Self {
            source,
            state: StreamState::Initializing,
            columns: None,
        }
    }

    /// Current state of the stream.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Column metadata for the active result set, if `COLMETADATA` has been
    /// seen yet.
    #[must_use]
    pub fn columns(&self) -> Option<&ColMetaData> {
        self.columns.as_deref()
    }

    /// Read the next row, if any.
    ///
    /// Returns `Ok(None)` once the stream reaches [`StreamState::Complete`].
    /// An `Err` moves the stream to [`StreamState::Error`] (already
    /// draining internally) before being returned to the caller.
    pub fn next_row(&mut self) -> Result<Option<Row>, Error> {
        loop {
            if self.state == StreamState::Complete {
                return Ok(None);
            }

            let Some(token) = self.source.next_token()? else {
                // Connection closed mid-stream with no final DONE: treat as
                // a protocol violation rather than silently stopping.
                self.state = StreamState::Complete;
                return Err(Error::Protocol(
                    "connection closed before a final DONE token was received".to_string(),
                ));
            };

            match token {
                Token::ColMetaData(meta) => {
                    if self.state == StreamState::Streaming {
                        self.state = StreamState::Draining;
                        return Err(Error::Invariant(
                            "batch produced more than one result set; split the statement \
                             into separate execute calls"
                                .to_string(),
                        ));
                    }
                    self.columns = Some(std::sync::Arc::new(colmetadata_from_tds(&meta)));
                    self.state = StreamState::Streaming;
                }
                Token::Row(raw) => match self.state {
                    StreamState::Streaming => {
                        let metadata = self.columns.clone().ok_or_else(|| {
                            Error::Invariant("ROW token with no preceding COLMETADATA".to_string())
                        })?;
                        let row = decode_row(&metadata, raw.data, None).map_err(Error::from)?;
                        return Ok(Some(row));
                    }
                    _ => continue, // Draining/Error: discard row bytes.
                },
                Token::NbcRow(nbc) => match self.state {
                    StreamState::Streaming => {
                        let metadata = self.columns.clone().ok_or_else(|| {
                            Error::Invariant("NBCROW token with no preceding COLMETADATA".to_string())
                        })?;
                        let row = decode_row(&metadata, nbc.data, Some(&nbc.null_bitmap))
                            .map_err(Error::from)?;
                        return Ok(Some(row));
                    }
                    _ => continue,
                },
                Token::Done(done) => {
                    if done.status.more {
                        // Intermediate statement in the batch; keep waiting.
                        continue;
                    }
                    if done.status.attn {
                        self.state = StreamState::Complete;
                        continue;
                    }
                    self.state = StreamState::Complete;
                    return Ok(None);
                }
                Token::DoneProc(done) | Token::DoneInProc(done) => {
                    if done.status.more {
                        continue;
                    }
                    self.state = StreamState::Complete;
                    return Ok(None);
                }
                Token::Error(server_error) => {
                    self.state = StreamState::Draining;
                    return Err(Error::ServerError {
                        number: server_error.number,
                        class: server_error.class,
                        state: server_error.state,
                        message: server_error.message,
                        server: (!server_error.server.is_empty()).then_some(server_error.server),
                        procedure: (!server_error.procedure.is_empty())
                            .then_some(server_error.procedure),
                        line: server_error.line.max(0) as u32,
                    });
                }
                Token::Info(info) => {
                    tracing::info!(number = info.number, message = %info.message, "server info");
                    continue;
                }
                // EnvChange/FeatureExtAck/Order are surfaced to the
                // connection directly, not through the row stream; if one
                // reaches here the token reader mis-routed it.
                other => {
                    self.state = StreamState::Error;
                    return Err(Error::Invariant(format!(
                        "unexpected token in result stream: {other:?}"
                    )));
                }
            }
        }
    }

    /// Discard the rest of the result set without decoding rows, e.g. after
    /// the caller stops iterating early but still wants to leave the
    /// connection `Idle`.
    pub fn drain(&mut self) -> Result<(), Error> {
        if self.state != StreamState::Draining && self.state != StreamState::Error {
            self.state = StreamState::Draining;
        }
        while self.next_row()?.is_some() {}
        Ok(())
    }
}

impl<T: TokenSource> Drop for ResultStream<'_, T> {
    /// Finish draining the connection if the stream is dropped before
    /// reaching [`StreamState::Complete`] — e.g. the caller stopped
    /// iterating early, or an error (a second `COLMETADATA`, a server
    /// error, an unexpected token) left the stream in `Draining`/`Error`.
    /// Without this the connection would stay stuck mid-result-set for
    /// whoever acquires it next. Errors encountered while draining are
    /// swallowed: there's no caller left to hand them to, and a genuinely
    /// broken connection will fail again on its next use.
    fn drop(&mut self) {
        while self.state != StreamState::Complete {
            match self.next_row() {
                Ok(Some(_)) | Err(_) => continue,
                Ok(None) => break,
            }
        }
    }
}

impl<T: TokenSource> Iterator for ResultStream<'_, T> {
    type Item = Result<Row, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Result of a non-query execution (`execute`/DML batch/BCP batch flush).
#[derive(Debug, Clone)]
pub struct ExecuteResult {
    /// Number of rows affected by the statement.
    pub rows_affected: u64,
}

impl ExecuteResult {
    /// Create a new execute result.
    #[must_use]
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}
