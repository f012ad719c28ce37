//! Context-keyed pool registry.
//!
//! A host engine typically talks to more than one database (or the same
//! database under more than one set of credentials/options) and wants one
//! bounded [`Pool`] per such "context" rather than juggling `Arc<Pool<C>>`
//! handles by hand. [`PoolRegistry`] is that lookup: `get_or_create` builds a
//! pool the first time a context name is seen and hands back the same pool
//! on every later call, and `remove` closes and forgets one.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionLifecycle;
use crate::pool::{ConnectionFactory, Pool};

/// A named registry of pools, one per context.
///
/// "Context" is caller-defined — typically a database name, or a
/// host/database/credential triple serialized to a string. The registry
/// itself is agnostic to what the name means; it only guarantees at most
/// one live [`Pool`] per name at a time.
pub struct PoolRegistry<C: ConnectionLifecycle> {
    pools: Mutex<HashMap<String, Arc<Pool<C>>>>,
}

impl<C: ConnectionLifecycle> PoolRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Look up the pool for `context_name`, creating it with `config` and
    /// `factory` if it doesn't already exist.
    ///
    /// An existing pool is never replaced or reconfigured: if a pool is
    /// already registered under this name, `config` and `factory` are
    /// ignored and the existing pool is returned as-is.
    pub fn get_or_create(
        &self,
        context_name: impl Into<String>,
        config: PoolConfig,
        factory: ConnectionFactory<C>,
    ) -> Result<Arc<Pool<C>>, PoolError> {
        let context_name = context_name.into();
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(pool) = pools.get(&context_name) {
            return Ok(Arc::clone(pool));
        }

        let pool = Pool::new(config, factory)?;
        pools.insert(context_name, Arc::clone(&pool));
        Ok(pool)
    }

    /// Look up an already-registered pool without creating one.
    #[must_use]
    pub fn get(&self, context_name: &str) -> Option<Arc<Pool<C>>> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner()).get(context_name).cloned()
    }

    /// Close and forget the pool registered under `context_name`, if any.
    ///
    /// Closing discards idle connections immediately; connections already
    /// checked out are closed when their `PooledConnection` is eventually
    /// dropped (`Pool::close`'s usual behavior). Returns the removed pool,
    /// in case the caller wants to wait on anything still outstanding.
    pub fn remove(&self, context_name: &str) -> Option<Arc<Pool<C>>> {
        let removed = self.pools.lock().unwrap_or_else(|e| e.into_inner()).remove(context_name);
        if let Some(pool) = &removed {
            pool.close();
            tracing::info!(context = context_name, "removed pool from registry");
        }
        removed
    }

    /// Names of every currently-registered context.
    #[must_use]
    pub fn context_names(&self) -> Vec<String> {
        self.pools.lock().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect()
    }
}

impl<C: ConnectionLifecycle> Default for PoolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
