//! Bounded connection pool implementation.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionMetadata};

/// Factory for creating new pooled connections.
///
/// Boxed so the pool doesn't need to be generic over the connection's own
/// construction parameters (host, credentials, TLS config, ...).
pub type ConnectionFactory<C> = Box<dyn Fn() -> Result<C, PoolError> + Send + Sync>;

struct IdleSlot<C> {
    conn: C,
    meta: ConnectionMetadata,
}

struct PoolState<C> {
    idle: Vec<IdleSlot<C>>,
    total: u32,
    closed: bool,
    next_id: u64,
}

/// A bounded connection pool for SQL Server.
///
/// The pool manages a set of database connections, providing automatic
/// connection reuse, health checking, and lifecycle management. Idle
/// connections are handed out LIFO (the most recently returned connection
/// is reused first), which keeps a warm subset of connections active under
/// light load instead of round-robining through every connection.
pub struct Pool<C: ConnectionLifecycle> {
    config: PoolConfig,
    factory: ConnectionFactory<C>,
    state: Mutex<PoolState<C>>,
    available: Condvar,
}

impl<C: ConnectionLifecycle> Pool<C> {
    /// Create a new pool with the given configuration and connection factory.
    pub fn new(config: PoolConfig, factory: ConnectionFactory<C>) -> Result<Arc<Self>, PoolError> {
        config.validate()?;

        let pool = Arc::new(Self {
            config,
            factory,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                closed: false,
                next_id: 1,
            }),
            available: Condvar::new(),
        });

        pool.prefill()?;
        Ok(pool)
    }

    /// Eagerly create `min_connections` connections.
    fn prefill(self: &Arc<Self>) -> Result<(), PoolError> {
        for _ in 0..self.config.min_connections {
            let conn = (self.factory)()?;
            let mut state = self.lock_state();
            let id = state.next_id;
            state.next_id += 1;
            state.total += 1;
            state.idle.push(IdleSlot {
                conn,
                meta: ConnectionMetadata::new(id),
            });
        }
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState<C>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a connection from the pool.
    ///
    /// This will either return an existing idle connection or create a new
    /// one if the pool is not at capacity. If all connections are in use and
    /// the pool is at capacity, this blocks until a connection becomes
    /// available or `connection_timeout` elapses.
    pub fn get(self: &Arc<Self>) -> Result<PooledConnection<C>, PoolError> {
        let deadline = Instant::now() + self.config.connection_timeout;
        tracing::trace!("acquiring connection from pool");

        loop {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }

            self.evict_expired_locked(&mut state);

            if let Some(mut slot) = state.idle.pop() {
                drop(state);
                slot.meta.mark_checkout();

                let due_for_check =
                    self.config.test_on_checkout && slot.meta.needs_health_check(self.config.health_check_interval);

                if due_for_check {
                    if self.check_health(&mut slot.conn) {
                        slot.meta.mark_health_check();
                    } else {
                        let mut state = self.lock_state();
                        state.total = state.total.saturating_sub(1);
                        drop(state);
                        self.available.notify_one();
                        continue;
                    }
                }

                return Ok(PooledConnection {
                    conn: Some(slot.conn),
                    meta: Some(slot.meta),
                    pool: Arc::clone(self),
                });
            }

            if state.total < self.config.max_connections {
                state.total += 1;
                let id = state.next_id;
                state.next_id += 1;
                drop(state);

                let conn = match (self.factory)() {
                    Ok(conn) => conn,
                    Err(e) => {
                        let mut state = self.lock_state();
                        state.total = state.total.saturating_sub(1);
                        drop(state);
                        self.available.notify_one();
                        return Err(e);
                    }
                };

                return Ok(PooledConnection {
                    conn: Some(conn),
                    meta: Some(ConnectionMetadata::new(id)),
                    pool: Arc::clone(self),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::AcquisitionTimeout(self.config.connection_timeout));
            }

            let (guard, timeout_result) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            drop(guard);

            if timeout_result.timed_out() {
                return Err(PoolError::AcquisitionTimeout(self.config.connection_timeout));
            }
        }
    }

    /// Drop any idle connections that have exceeded `idle_timeout` or `max_lifetime`.
    fn evict_expired_locked(&self, state: &mut PoolState<C>) {
        let idle_timeout = self.config.idle_timeout;
        let max_lifetime = self.config.max_lifetime;
        let before = state.idle.len();
        state
            .idle
            .retain(|slot| !slot.meta.is_idle_expired(idle_timeout) && !slot.meta.is_expired(max_lifetime));
        let evicted = before - state.idle.len();
        if evicted > 0 {
            state.total = state.total.saturating_sub(evicted as u32);
            tracing::debug!(evicted, "evicted expired idle connections");
        }
    }

    fn check_health(&self, conn: &mut C) -> bool {
        if !conn.is_valid() {
            return false;
        }
        match conn.health_check(&self.config.health_check_query) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "connection failed health check on checkout");
                false
            }
        }
    }

    /// Return a connection to the idle pool, or discard it if it's no longer usable.
    fn check_in(self: &Arc<Self>, mut conn: C, mut meta: ConnectionMetadata) {
        let mut state = self.lock_state();
        if state.closed {
            state.total = state.total.saturating_sub(1);
            drop(state);
            self.available.notify_one();
            return;
        }
        drop(state);

        let mut healthy = conn.is_valid();

        if healthy && self.config.sp_reset_connection {
            if let Err(e) = conn.reset() {
                tracing::debug!(error = %e, "sp_reset_connection failed on checkin");
                healthy = false;
            }
        }

        if healthy && self.config.test_on_checkin {
            healthy = self.check_health(&mut conn);
        }

        let mut state = self.lock_state();
        if !healthy || state.closed {
            state.total = state.total.saturating_sub(1);
        } else {
            meta.mark_checkin();
            state.idle.push(IdleSlot { conn, meta });
        }
        drop(state);
        self.available.notify_one();
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.lock_state();
        let idle = state.idle.len() as u32;
        PoolStatus {
            available: idle,
            in_use: state.total.saturating_sub(idle),
            total: state.total,
            max: self.config.max_connections,
        }
    }

    /// Close the pool, dropping all idle connections.
    ///
    /// Connections already checked out are dropped (not returned to the
    /// pool) when their `PooledConnection` handle is released.
    pub fn close(&self) {
        let mut state = self.lock_state();
        state.closed = true;
        let evicted = state.idle.len() as u32;
        state.idle.clear();
        state.total = state.total.saturating_sub(evicted);
        drop(state);
        self.available.notify_all();
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is automatically returned to the pool
/// (after `sp_reset_connection` and any configured checkin health check).
pub struct PooledConnection<C: ConnectionLifecycle> {
    conn: Option<C>,
    meta: Option<ConnectionMetadata>,
    pool: Arc<Pool<C>>,
}

impl<C: ConnectionLifecycle> PooledConnection<C> {
    /// Detach the connection from the pool.
    ///
    /// The connection will not be returned to the pool when dropped; the
    /// caller takes ownership and the pool's total count is decremented.
    pub fn detach(mut self) -> C {
        let conn = self.conn.take().expect("connection present until detach/drop");
        let mut state = self.pool.lock_state();
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.pool.available.notify_one();
        conn
    }
}

impl<C: ConnectionLifecycle> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn.as_ref().expect("connection present until detach/drop")
    }
}

impl<C: ConnectionLifecycle> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn.as_mut().expect("connection present until detach/drop")
    }
}

impl<C: ConnectionLifecycle> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let (Some(conn), Some(meta)) = (self.conn.take(), self.meta.take()) {
            tracing::trace!("returning connection to pool");
            self.pool.check_in(conn, meta);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    struct FakeConn {
        healthy: bool,
        reset_calls: u32,
    }

    impl ConnectionLifecycle for FakeConn {
        fn health_check(&mut self, _query: &str) -> Result<(), PoolError> {
            if self.healthy {
                Ok(())
            } else {
                Err(PoolError::UnhealthyConnection("fake failure".into()))
            }
        }

        fn reset(&mut self) -> Result<(), PoolError> {
            self.reset_calls += 1;
            Ok(())
        }

        fn is_valid(&self) -> bool {
            self.healthy
        }
    }

    fn counting_factory(created: Arc<AtomicU32>) -> ConnectionFactory<FakeConn> {
        Box::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                healthy: true,
                reset_calls: 0,
            })
        })
    }

    #[test]
    fn test_acquire_and_return_reuses_connection() {
        let created = Arc::new(AtomicU32::new(0));
        let config = PoolConfig::new().min_connections(0).max_connections(2);
        let pool = Pool::new(config, counting_factory(Arc::clone(&created))).unwrap();

        {
            let conn = pool.get().unwrap();
            assert_eq!(created.load(Ordering::SeqCst), 1);
            drop(conn);
        }

        let status = pool.status();
        assert_eq!(status.available, 1);

        let _conn = pool.get().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1, "idle connection should be reused");
    }

    #[test]
    fn test_acquisition_timeout_when_pool_exhausted() {
        let created = Arc::new(AtomicU32::new(0));
        let config = PoolConfig::new()
            .min_connections(0)
            .max_connections(1)
            .connection_timeout(StdDuration::from_millis(50));
        let pool = Pool::new(config, counting_factory(created)).unwrap();

        let _first = pool.get().unwrap();
        let result = pool.get();
        assert!(matches!(result, Err(PoolError::AcquisitionTimeout(_))));
    }

    #[test]
    fn test_closed_pool_rejects_acquisition() {
        let created = Arc::new(AtomicU32::new(0));
        let config = PoolConfig::new().min_connections(0).max_connections(2);
        let pool = Pool::new(config, counting_factory(created)).unwrap();

        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.get(), Err(PoolError::PoolClosed)));
    }

    #[test]
    fn test_detach_prevents_return_to_pool() {
        let created = Arc::new(AtomicU32::new(0));
        let config = PoolConfig::new().min_connections(0).max_connections(2);
        let pool = Pool::new(config, counting_factory(created)).unwrap();

        let conn = pool.get().unwrap();
        let _owned = conn.detach();

        let status = pool.status();
        assert_eq!(status.available, 0);
        assert_eq!(status.total, 0);
    }

    #[test]
    fn test_sp_reset_connection_runs_on_checkin() {
        let created = Arc::new(AtomicU32::new(0));
        let config = PoolConfig::new()
            .min_connections(0)
            .max_connections(1)
            .sp_reset_connection(true);
        let pool = Pool::new(config, counting_factory(created)).unwrap();

        {
            let _conn = pool.get().unwrap();
        }

        let conn = pool.get().unwrap();
        assert_eq!(conn.reset_calls, 1);
    }

    #[test]
    fn test_health_check_skipped_within_interval() {
        let checks = Arc::new(AtomicU32::new(0));
        struct CountingConn {
            checks: Arc<AtomicU32>,
        }
        impl ConnectionLifecycle for CountingConn {
            fn health_check(&mut self, _query: &str) -> Result<(), PoolError> {
                self.checks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn reset(&mut self) -> Result<(), PoolError> {
                Ok(())
            }
            fn is_valid(&self) -> bool {
                true
            }
        }

        let checks_clone = Arc::clone(&checks);
        let config = PoolConfig::new()
            .min_connections(0)
            .max_connections(1)
            .test_on_checkout(true)
            .health_check_interval(StdDuration::from_secs(300));
        let pool = Pool::new(
            config,
            Box::new(move || {
                Ok(CountingConn {
                    checks: Arc::clone(&checks_clone),
                })
            }),
        )
        .unwrap();

        // First checkout has never been checked, so it runs the probe.
        drop(pool.get().unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 1);

        // Second checkout is within `health_check_interval`, so it's skipped.
        drop(pool.get().unwrap());
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }
}
