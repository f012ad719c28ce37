//! # mssql-client
//!
//! Blocking SQL Server client: connection state machine, bounded pool
//! integration, reactive transaction binding, and a BCP bulk-load writer.
//!
//! This is the primary public API surface for the driver. Every operation
//! here is synchronous — a [`Client`] owns a TCP (or TLS) socket directly
//! and blocks the calling thread for the duration of a request. Concurrency
//! comes from running multiple connections (via `mssql-pool`), not from an
//! async runtime.
//!
//! ## Connection state
//!
//! A connection's phase is tracked at runtime, not in the type system: see
//! [`state::ConnectionState`] for the five states
//! (`Disconnected`/`Authenticating`/`Idle`/`Executing`/`Cancelling`) and the
//! transitions between them.
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_client::{Client, Config};
//!
//! fn main() -> Result<(), mssql_client::Error> {
//!     let config = Config::from_connection_string(
//!         "Server=localhost;Database=test;User Id=sa;Password=Password123;"
//!     )?;
//!
//!     let mut client = Client::connect(config)?;
//!
//!     let mut stream = client.execute_batch("SELECT * FROM users WHERE id = 1")?;
//!     while let Some(row) = stream.next_row()? {
//!         let name: String = row.get(0)?;
//!         println!("User: {}", name);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bulk;
pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod query;
pub mod row;
pub mod state;
pub mod stream;
pub mod transaction;

// Re-export commonly used types
pub use bulk::{BcpSession, BulkColumn, BulkInsert, BulkInsertBuilder, BulkInsertResult, BulkOptions};
pub use cancel::CancelHandle;
pub use client::Client;
pub use config::{Config, RedirectConfig, RetryPolicy, TimeoutConfig};
pub use error::Error;
pub use mssql_auth::Credentials;
pub use mssql_pool::{Pool, PoolConfig, PoolError, PooledConnection};
pub use tds_protocol::version::TdsVersion;

// Secure credential types (with zeroize feature)
#[cfg(feature = "zeroize")]
pub use mssql_auth::{SecretString, SecureCredentials};
pub use mssql_types::{FromSql, SqlValue, ToSql};
pub use query::{BatchResult, DeleteBatcher, InsertBatcher, RowId, SqlExecutor, TableRef, UpdateBatcher, UpdateRow};
pub use row::{Column, Row};
pub use state::{ConnectionState, ConnectionStateCell};
pub use stream::{ExecuteResult, ResultStream, StreamState, TokenSource};
pub use transaction::TransactionBinding;
