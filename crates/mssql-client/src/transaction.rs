//! Reactive transaction binding.
//!
//! Unlike a client-driven `begin_transaction()`/`commit()` API, a
//! [`TransactionBinding`] doesn't own an isolation level or issue savepoints
//! itself — it reacts to a host-driven transaction's begin/commit/rollback
//! hooks by pinning one pooled [`Client`] for the transaction's lifetime and
//! propagating its transaction descriptor onto every batch sent through it.

use std::sync::Arc;

use mssql_pool::{Pool, PooledConnection};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::stream::ResultStream;

/// Pins one pooled [`Client`] to a host-driven transaction.
///
/// The first call to [`TransactionBinding::execute_batch`] acquires a
/// connection from `pool` and issues `BEGIN TRANSACTION`; every batch after
/// that runs on the same connection, which carries the transaction
/// descriptor SQL Server returned. Dropping the binding without an explicit
/// [`TransactionBinding::commit`] or [`TransactionBinding::rollback`] rolls
/// back, mirroring what happens when a host transaction aborts.
pub struct TransactionBinding {
    pool: Arc<Pool<Client>>,
    connection: Option<PooledConnection<Client>>,
    finished: bool,
}

impl TransactionBinding {
    /// Create a binding over `pool`. No connection is acquired until the
    /// first batch is executed.
    #[must_use]
    pub fn new(pool: Arc<Pool<Client>>) -> Self {
        Self {
            pool,
            connection: None,
            finished: false,
        }
    }

    /// Whether a connection has been pinned to this transaction yet.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.connection.is_some()
    }

    fn ensure_pinned(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }
        let mut conn = self.pool.get().map_err(Error::from)?;
        exec_and_drain(&mut conn, "BEGIN TRANSACTION")?;
        if conn.transaction_descriptor() == 0 {
            return Err(Error::Protocol(
                "BEGIN TRANSACTION did not return a transaction descriptor".to_string(),
            ));
        }
        self.connection = Some(conn);
        Ok(())
    }

    /// Execute a batch on the pinned connection, acquiring one from the
    /// pool first if this is the first operation in the transaction.
    pub fn execute_batch(&mut self, sql: &str) -> Result<ResultStream<'_, Client>> {
        self.ensure_pinned()?;
        let conn = self.connection.as_mut().expect("just pinned above");
        conn.execute_batch(sql)
    }

    /// Commit the transaction and unpin the connection, returning it to the
    /// pool. A binding that never executed a batch commits trivially.
    pub fn commit(mut self) -> Result<()> {
        if let Some(mut conn) = self.connection.take() {
            exec_and_drain(&mut conn, "COMMIT TRANSACTION")?;
        }
        self.finished = true;
        Ok(())
    }

    /// Roll back the transaction and unpin the connection.
    pub fn rollback(mut self) -> Result<()> {
        if let Some(mut conn) = self.connection.take() {
            exec_and_drain(&mut conn, "ROLLBACK TRANSACTION")?;
        }
        self.finished = true;
        Ok(())
    }
}

impl Drop for TransactionBinding {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(mut conn) = self.connection.take() {
            if let Err(e) = exec_and_drain(&mut conn, "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION") {
                tracing::warn!(error = %e, "failed to roll back abandoned transaction binding");
            }
        }
    }
}

fn exec_and_drain(conn: &mut Client, sql: &str) -> Result<()> {
    let mut stream = conn.execute_batch(sql)?;
    while stream.next_row()?.is_some() {}
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_binding_is_send() {
        // Constructing a binding must not touch the pool until the first
        // batch, since autocommit callers never pay for a pool round trip.
        fn assert_send<T: Send>() {}
        assert_send::<TransactionBinding>();
    }
}
