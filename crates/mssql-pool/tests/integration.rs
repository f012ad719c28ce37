//! Connection pool integration tests.
//!
//! These tests require a running SQL Server instance. They are ignored by default
//! and can be run with:
//!
//! ```bash
//! # Set connection details via environment variables
//! export MSSQL_HOST=localhost
//! export MSSQL_USER=sa
//! export MSSQL_PASSWORD=YourPassword
//! export MSSQL_ENCRYPT=false  # For development servers without TLS
//!
//! # Run integration tests
//! cargo test -p mssql-pool --test integration -- --ignored
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mssql_client::{Client, Config};
use mssql_pool::{Pool, PoolConfig, PoolError};

/// Helper to get test configuration from environment variables.
fn get_test_config() -> Option<Config> {
    let host = std::env::var("MSSQL_HOST").ok()?;
    let user = std::env::var("MSSQL_USER").unwrap_or_else(|_| "sa".into());
    let password = std::env::var("MSSQL_PASSWORD").unwrap_or_else(|_| "MyStrongPassw0rd".into());
    let database = std::env::var("MSSQL_DATABASE").unwrap_or_else(|_| "master".into());
    let encrypt = std::env::var("MSSQL_ENCRYPT").unwrap_or_else(|_| "false".into());

    let conn_str = format!(
        "Server={host};Database={database};User Id={user};Password={password};TrustServerCertificate=true;Encrypt={encrypt}",
    );

    Config::from_connection_string(&conn_str).ok()
}

fn build_pool(max_connections: u32) -> Arc<Pool<Client>> {
    build_pool_with(PoolConfig::new().min_connections(0).max_connections(max_connections))
}

fn build_pool_with(config: PoolConfig) -> Arc<Pool<Client>> {
    let client_config = get_test_config().expect("SQL Server config required");
    Pool::new(
        config,
        Box::new(move || {
            Client::connect(client_config.clone())
                .map_err(|e| PoolError::ConnectionCreation(e.to_string()))
        }),
    )
    .expect("Failed to create pool")
}

/// Run a scalar query and return the single int column from the single row.
fn query_scalar_int(client: &mut Client, sql: &str) -> i32 {
    let mut stream = client.execute_batch(sql).expect("query failed");
    let row = stream
        .next_row()
        .expect("no protocol error")
        .expect("expected a row");
    row.get(0).expect("expected int column")
}

// =============================================================================
// Basic Pool Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_create_and_close() {
    let pool = build_pool(5);

    assert!(!pool.is_closed());

    let status = pool.status();
    assert_eq!(status.max, 5);
    assert_eq!(status.in_use, 0);

    pool.close();
    assert!(pool.is_closed());
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_get_connection() {
    let pool = build_pool(5);

    // Get a connection
    let mut conn = pool.get().expect("Failed to get connection");

    // Verify pool status
    let status = pool.status();
    assert_eq!(status.in_use, 1);

    // Execute a query to verify connection works
    let value = query_scalar_int(&mut conn, "SELECT 1 AS value");
    assert_eq!(value, 1);

    // Drop connection - should return to pool
    drop(conn);

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);

    pool.close();
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_connection_reuse() {
    let pool = build_pool(2);

    // Get first connection
    let conn1 = pool.get().expect("Failed to get connection 1");
    drop(conn1);

    // Get another connection - should reuse the same one (total stays at 1)
    let _conn2 = pool.get().expect("Failed to get connection 2");

    let status = pool.status();
    assert_eq!(status.total, 1, "Should reuse the same connection rather than create a new one");

    pool.close();
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_status_tracking() {
    let pool = build_pool(5);

    // Initial status
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 0);
    assert_eq!(status.total, 0);

    // Get a connection
    let conn1 = pool.get().expect("Failed to get connection");
    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.total, 1);

    // Get another connection
    let conn2 = pool.get().expect("Failed to get connection");
    let status = pool.status();
    assert_eq!(status.in_use, 2);

    // Return first connection
    drop(conn1);
    let status = pool.status();
    assert_eq!(status.in_use, 1);
    assert_eq!(status.available, 1);

    // Return second connection
    drop(conn2);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 2);

    pool.close();
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_concurrent_access() {
    let pool = build_pool(5);

    let success_count = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    // Spawn 10 concurrent threads
    for i in 0..10 {
        let pool = Arc::clone(&pool);
        let success_count = Arc::clone(&success_count);

        handles.push(std::thread::spawn(move || {
            let mut conn = pool.get().expect("Failed to get connection");

            let value = query_scalar_int(&mut conn, &format!("SELECT {i} AS task_id"));
            assert_eq!(value, i);
            success_count.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    assert_eq!(success_count.load(Ordering::Relaxed), 10);

    pool.close();
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_concurrent_stress_test() {
    let pool = build_pool_with(
        PoolConfig::new().min_connections(0).max_connections(10).connection_timeout(Duration::from_secs(30)),
    );

    let success_count = Arc::new(AtomicU32::new(0));
    let error_count = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    // Spawn 50 concurrent threads with 10 connections
    for i in 0..50 {
        let pool = Arc::clone(&pool);
        let success_count = Arc::clone(&success_count);
        let error_count = Arc::clone(&error_count);

        handles.push(std::thread::spawn(move || {
            match pool.get() {
                Ok(mut conn) => {
                    // Execute multiple queries per connection
                    for j in 0..3 {
                        let sql = format!("SELECT {i} + {j} AS sum");
                        match conn.execute_batch(&sql).and_then(|mut s| {
                            let row = s.next_row()?.expect("expected row");
                            row.get::<i32>(0).map_err(Into::into)
                        }) {
                            Ok(value) => {
                                assert_eq!(value, i + j);
                                success_count.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                eprintln!("Query {i} failed: {e:?}");
                                error_count.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Failed to get connection {i}: {e:?}");
                    error_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let successes = success_count.load(Ordering::Relaxed);
    let errors = error_count.load(Ordering::Relaxed);

    println!("Stress test results: {successes} successes, {errors} errors");

    // We expect all 150 queries (50 threads * 3 queries each) to succeed
    assert_eq!(successes, 150, "All queries should succeed");
    assert_eq!(errors, 0, "No errors should occur");

    pool.close();
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_connection_churn() {
    let pool = build_pool(5);

    let success_count = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();

    // Rapid connection checkout/checkin pattern
    for i in 0..100 {
        let pool = Arc::clone(&pool);
        let success_count = Arc::clone(&success_count);

        handles.push(std::thread::spawn(move || {
            if let Ok(mut conn) = pool.get() {
                let sql = format!("SELECT {i} AS iteration");
                if conn.execute_batch(&sql).and_then(|mut s| {
                    while s.next_row()?.is_some() {}
                    Ok(())
                }).is_ok() {
                    success_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let successes = success_count.load(Ordering::Relaxed);
    assert_eq!(successes, 100, "All 100 iterations should succeed");

    // Should have reused connections heavily (not created 100 connections)
    let status = pool.status();
    assert!(
        status.total <= 5,
        "Should reuse connections, not create 100. Total: {}",
        status.total
    );

    pool.close();
}

// =============================================================================
// Timeout and Error Handling Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_connection_timeout() {
    let pool = build_pool_with(
        PoolConfig::new()
            .min_connections(0)
            .max_connections(1)
            .connection_timeout(Duration::from_millis(100)),
    );

    // Hold the only connection
    let _conn = pool.get().expect("Failed to get connection");

    // Try to get another connection - should time out
    let result = pool.get();
    assert!(
        matches!(result, Err(PoolError::AcquisitionTimeout(_))),
        "Should time out waiting for connection"
    );

    pool.close();
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_closed_error() {
    let pool = build_pool(5);

    // Close the pool
    pool.close();

    // Try to get a connection - should fail
    let result = pool.get();
    assert!(matches!(result, Err(PoolError::PoolClosed)), "Should error when pool is closed");
}

// =============================================================================
// Load/Stress Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_high_throughput() {
    let pool = build_pool_with(
        PoolConfig::new().min_connections(0).max_connections(10).connection_timeout(Duration::from_secs(30)),
    );

    let query_count = Arc::new(AtomicU32::new(0));
    let start = std::time::Instant::now();

    // Run for 5 seconds with as many queries as possible
    let runtime = Duration::from_secs(5);
    let mut handles = Vec::new();

    for _ in 0..20 {
        let pool = Arc::clone(&pool);
        let query_count = Arc::clone(&query_count);

        handles.push(std::thread::spawn(move || {
            while start.elapsed() < runtime {
                if let Ok(mut conn) = pool.get() {
                    if conn.execute_batch("SELECT 1").and_then(|mut s| {
                        while s.next_row()?.is_some() {}
                        Ok(())
                    }).is_ok() {
                        query_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.join();
    }

    let total_queries = query_count.load(Ordering::Relaxed);
    let elapsed = start.elapsed();
    let qps = total_queries as f64 / elapsed.as_secs_f64();

    println!("High throughput test: {total_queries} queries in {elapsed:?} ({qps:.2} queries/second)");

    // Should be able to handle at least 100 queries per second (conservative)
    assert!(qps >= 100.0, "Should achieve at least 100 queries/second, got {qps}");

    pool.close();
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_sustained_load() {
    let pool = build_pool_with(
        PoolConfig::new().min_connections(0).max_connections(8).connection_timeout(Duration::from_secs(30)),
    );

    let success_count = Arc::new(AtomicU32::new(0));
    let error_count = Arc::new(AtomicU32::new(0));

    // Run sustained load: 16 concurrent workers, each doing 50 queries
    let mut handles = Vec::new();

    for worker_id in 0..16 {
        let pool = Arc::clone(&pool);
        let success_count = Arc::clone(&success_count);
        let error_count = Arc::clone(&error_count);

        handles.push(std::thread::spawn(move || {
            for query_id in 0..50 {
                match pool.get() {
                    Ok(mut conn) => {
                        let sql = format!("SELECT {worker_id} * 100 + {query_id} AS id");
                        match conn.execute_batch(&sql).and_then(|mut s| {
                            let row = s.next_row()?.expect("expected row");
                            row.get::<i32>(0).map_err(Into::into)
                        }) {
                            Ok(value) => {
                                let expected = worker_id * 100 + query_id;
                                if value == expected {
                                    success_count.fetch_add(1, Ordering::Relaxed);
                                } else {
                                    error_count.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Err(_) => {
                                error_count.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    Err(_) => {
                        error_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Worker panicked");
    }

    let successes = success_count.load(Ordering::Relaxed);
    let errors = error_count.load(Ordering::Relaxed);

    println!("Sustained load test: {successes} successes, {errors} errors (total: {})", successes + errors);

    // All 800 queries (16 workers * 50 queries) should succeed
    assert_eq!(successes, 800, "All 800 queries should succeed");
    assert_eq!(errors, 0, "No errors should occur");

    pool.close();
}

// =============================================================================
// Connection Detach Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_pool_detach_connection() {
    let pool = build_pool(2);

    // Get and detach a connection
    let conn = pool.get().expect("Failed to get connection");
    let mut client = conn.detach();

    // Connection should not be in pool anymore
    let status = pool.status();
    assert_eq!(status.in_use, 0, "Detached connection should not count as in_use");

    // But the client should still work
    let value = query_scalar_int(&mut client, "SELECT 999 AS detached");
    assert_eq!(value, 999);

    // The detached client just drops when done - no explicit close.
    drop(client);

    pool.close();
}
