//! Stress and Performance Tests
//!
//! These tests exercise the driver under heavy load to verify stability,
//! check for memory leaks, and validate performance under stress. The
//! config/error/type-conversion tests run unconditionally (useful under
//! Valgrind/DHAT for allocation-pattern checks); the live-database tests
//! are `#[ignore]`d and need a real SQL Server instance.
//!
//! Run with:
//! ```bash
//! MSSQL_HOST=localhost MSSQL_USER=sa MSSQL_PASSWORD='YourStrong@Passw0rd' \
//!     cargo test -p mssql-client --test stress -- --ignored --nocapture
//! ```

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::expect_fun_call,
    clippy::panic
)]

use mssql_client::{Client, Config};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Helper to get test configuration from environment variables.
fn get_test_config() -> Option<Config> {
    let host = std::env::var("MSSQL_HOST").ok()?;
    let user = std::env::var("MSSQL_USER").unwrap_or_else(|_| "sa".into());
    let password = std::env::var("MSSQL_PASSWORD").unwrap_or_else(|_| "YourStrong@Passw0rd".into());
    let database = std::env::var("MSSQL_DATABASE").unwrap_or_else(|_| "master".into());
    let encrypt = std::env::var("MSSQL_ENCRYPT").unwrap_or_else(|_| "false".into());

    let conn_str = format!(
        "Server={host};Database={database};User Id={user};Password={password};TrustServerCertificate=true;Encrypt={encrypt}",
    );

    Config::from_connection_string(&conn_str).ok()
}

fn exec(client: &mut Client, sql: &str) {
    let mut stream = client.execute_batch(sql).expect("batch should start");
    while stream.next_row().expect("no protocol error").is_some() {}
}

// =============================================================================
// Allocation/Parsing Stress Tests (No SQL Server Required)
// =============================================================================

#[test]
fn stress_config_parsing_repeated() {
    let conn_str = "Server=localhost,1433;Database=test;User Id=sa;Password=secret;\
                    Encrypt=true;TrustServerCertificate=true;Connect Timeout=30;\
                    Application Name=StressTest;Command Timeout=60";

    for _ in 0..10_000 {
        let config = Config::from_connection_string(conn_str);
        assert!(config.is_ok());
        drop(config);
    }
}

#[test]
fn stress_config_builder_repeated() {
    for i in 0..10_000 {
        let conn_str = format!(
            "Server=localhost,1433;Database=db_{i};User Id=sa;Password=password;\
             Application Name=app_{i};Connect Timeout=30;TrustServerCertificate=true",
        );
        let config = Config::from_connection_string(&conn_str);
        assert!(config.is_ok());
        drop(config);
    }
}

#[test]
fn stress_error_creation() {
    use mssql_client::Error;

    for i in 0i32..10_000 {
        let errors: Vec<Error> = vec![
            Error::Io(Arc::new(std::io::Error::other(format!("io error {i}")))),
            Error::Tls(format!("tls error {i}")),
            Error::Protocol(format!("protocol error {i}")),
            Error::Codec(format!("codec error {i}")),
            Error::ServerError {
                number: i,
                class: 16,
                state: 1,
                message: format!("server error {i}"),
                server: Some("testserver".into()),
                procedure: Some("sp_test".into()),
                line: i as u32,
            },
            Error::Config(format!("config error {i}")),
            Error::Timeout(mssql_client::error::TimeoutKind::Query, Duration::from_secs(1)),
        ];

        for err in &errors {
            let _ = err.to_string();
            let _ = err.is_transient();
            let _ = err.is_connection_fatal();
        }

        drop(errors);
    }
}

#[test]
fn stress_type_conversions() {
    use mssql_types::{FromSql, SqlValue};

    for i in 0..10_000 {
        let values = vec![
            SqlValue::Int(i),
            SqlValue::BigInt(i as i64 * 1_000_000),
            SqlValue::String(format!("string value number {i}")),
            SqlValue::Double(i as f64 / 1000.0),
            SqlValue::Bool(i % 2 == 0),
            SqlValue::Null,
        ];

        for value in &values {
            match value {
                SqlValue::Int(_) => {
                    let _: Option<i32> = Option::<i32>::from_sql(value).ok().flatten();
                }
                SqlValue::BigInt(_) => {
                    let _: Option<i64> = Option::<i64>::from_sql(value).ok().flatten();
                }
                SqlValue::String(_) => {
                    let _: Option<String> = Option::<String>::from_sql(value).ok().flatten();
                }
                SqlValue::Double(_) => {
                    let _: Option<f64> = Option::<f64>::from_sql(value).ok().flatten();
                }
                SqlValue::Bool(_) => {
                    let _: Option<bool> = Option::<bool>::from_sql(value).ok().flatten();
                }
                SqlValue::Null => {
                    let _: Option<i32> = Option::<i32>::from_sql(value).ok().flatten();
                }
                _ => {}
            }
        }

        drop(values);
    }
}

#[test]
fn stress_arc_bytes_clone() {
    use bytes::Bytes;

    // Simulates the Arc<Bytes> pattern used for row data.
    let data: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
    let arc_bytes: Arc<Bytes> = Arc::new(Bytes::from(data));

    let mut clones = Vec::with_capacity(1000);
    for _ in 0..1000 {
        clones.push(Arc::clone(&arc_bytes));
    }

    for (i, clone) in clones.iter().enumerate() {
        let start = i % 9000;
        let end = start + 100;
        let _slice = &clone[start..end];
    }

    drop(clones);
    drop(arc_bytes);
}

#[test]
fn stress_arc_bytes_varying_sizes() {
    use bytes::Bytes;

    for size_exp in 0..15 {
        let size = 1 << size_exp; // 1, 2, 4, ..., 16384
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let arc: Arc<Bytes> = Arc::new(Bytes::from(data));

        for _ in 0..100 {
            let clone = Arc::clone(&arc);
            let _len = clone.len();
            drop(clone);
        }

        drop(arc);
    }
}

#[test]
fn stress_pool_config_creation() {
    use mssql_client::PoolConfig;

    for i in 0..10_000 {
        let config = PoolConfig::new()
            .min_connections((i % 10) as u32)
            .max_connections(((i % 90) + 10) as u32)
            .connection_timeout(Duration::from_millis((i % 30000).max(1) as u64))
            .idle_timeout(Duration::from_secs((i % 3600) as u64))
            .max_lifetime(Duration::from_secs((i % 7200) as u64));

        drop(config);
    }
}

// =============================================================================
// Query Load Tests (Require SQL Server)
// =============================================================================

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_sequential_queries() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let query_count = 1000;
    let start = Instant::now();

    for i in 0..query_count {
        let mut stream = client
            .execute_batch(&format!("SELECT {i} AS result"))
            .expect("Query should succeed");

        let mut found = false;
        while let Some(row) = stream.next_row().expect("Row should be valid") {
            let val: i32 = row.get(0).expect("Should get int");
            assert_eq!(val, i);
            found = true;
        }
        assert!(found);
    }

    let elapsed = start.elapsed();
    println!(
        "Executed {} sequential queries in {:?} ({:.2} queries/sec)",
        query_count,
        elapsed,
        query_count as f64 / elapsed.as_secs_f64()
    );
}

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_concurrent_queries() {
    let config = get_test_config().expect("SQL Server config required");

    let concurrency = 10;
    let queries_per_connection = 100;
    let total_queries = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();

    for conn_id in 0..concurrency {
        let config = config.clone();
        let total = Arc::clone(&total_queries);

        handles.push(std::thread::spawn(move || {
            let mut client =
                Client::connect(config).expect(&format!("Connection {conn_id} failed"));

            for query_id in 0..queries_per_connection {
                let expected = conn_id * 1000 + query_id;
                let mut stream = client
                    .execute_batch(&format!("SELECT {expected} AS result"))
                    .expect("Query should succeed");

                let mut found = false;
                while let Some(row) = stream.next_row().expect("Row should be valid") {
                    let val: i32 = row.get(0).expect("Should get int");
                    assert_eq!(val, expected as i32);
                    found = true;
                }
                assert!(found);

                total.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("Task should complete");
    }

    let elapsed = start.elapsed();
    let total = total_queries.load(Ordering::SeqCst);

    println!(
        "Executed {} concurrent queries ({} connections x {} queries) in {:?} ({:.2} queries/sec)",
        total,
        concurrency,
        queries_per_connection,
        elapsed,
        total as f64 / elapsed.as_secs_f64()
    );
}

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_connection_cycling() {
    let config = get_test_config().expect("SQL Server config required");

    let cycles = 50;
    let start = Instant::now();

    for i in 0..cycles {
        let _client =
            Client::connect(config.clone()).expect(&format!("Connection {i} failed"));
    }

    let elapsed = start.elapsed();
    println!(
        "Completed {} connection cycles in {:?} ({:.2} connections/sec)",
        cycles,
        elapsed,
        cycles as f64 / elapsed.as_secs_f64()
    );
}

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_concurrent_connections() {
    let config = get_test_config().expect("SQL Server config required");

    let concurrency = 20;
    let start = Instant::now();

    let mut handles = Vec::new();

    for i in 0..concurrency {
        let config = config.clone();
        handles.push(std::thread::spawn(move || {
            let mut client = Client::connect(config).expect(&format!("Connection {i} failed"));

            let mut stream = client.execute_batch("SELECT 1").expect("Query should succeed");
            let count = std::iter::from_fn(|| stream.next_row().ok().flatten()).count();
            assert_eq!(count, 1);
        }));
    }

    for handle in handles {
        handle.join().expect("Task should complete");
    }

    let elapsed = start.elapsed();
    println!(
        "Established and closed {concurrency} concurrent connections in {elapsed:?}",
    );
}

// =============================================================================
// Data Volume Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_many_rows() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let row_count = 10_000;

    exec(&mut client, "CREATE TABLE #StressRows (id INT, value NVARCHAR(100))");

    let batch_size = 100;
    let insert_start = Instant::now();

    for batch in 0..(row_count / batch_size) {
        let mut values = Vec::new();
        for i in 0..batch_size {
            let id = batch * batch_size + i;
            values.push(format!("({id}, 'Value {id}')"));
        }
        let sql = format!("INSERT INTO #StressRows VALUES {}", values.join(","));
        exec(&mut client, &sql);
    }

    let insert_elapsed = insert_start.elapsed();
    println!(
        "Inserted {} rows in {:?} ({:.2} rows/sec)",
        row_count,
        insert_elapsed,
        row_count as f64 / insert_elapsed.as_secs_f64()
    );

    let query_start = Instant::now();
    let mut stream = client
        .execute_batch("SELECT id, value FROM #StressRows ORDER BY id")
        .expect("Query should succeed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let _id: i32 = row.get(0).expect("Should get id");
        let _value: String = row.get(1).expect("Should get value");
        count += 1;
    }

    let query_elapsed = query_start.elapsed();
    assert_eq!(count, row_count, "Should retrieve all rows");

    println!(
        "Retrieved {} rows in {:?} ({:.2} rows/sec)",
        count,
        query_elapsed,
        count as f64 / query_elapsed.as_secs_f64()
    );
}

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_large_values() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    exec(&mut client, "CREATE TABLE #LargeValues (id INT, big_text NVARCHAR(MAX))");

    let sizes = [100, 1_000, 10_000, 50_000, 100_000];

    for (i, &size) in sizes.iter().enumerate() {
        let sql = format!("INSERT INTO #LargeValues VALUES ({i}, REPLICATE('A', {size}))");
        exec(&mut client, &sql);
    }

    println!("Inserted values of sizes: {sizes:?}");

    let mut stream = client
        .execute_batch("SELECT id, LEN(big_text) AS len FROM #LargeValues ORDER BY id")
        .expect("Query should succeed");

    let mut idx = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let len: i64 = row.get(1).expect("Should get len"); // LEN() returns BIGINT
        assert_eq!(len, sizes[idx] as i64, "Length should match");
        idx += 1;
    }

    assert_eq!(idx, sizes.len());
}

// =============================================================================
// Transaction Stress Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_sequential_transactions() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    exec(&mut client, "CREATE TABLE #TxStress (id INT PRIMARY KEY, value INT)");

    let tx_count = 100;
    let start = Instant::now();

    for i in 0..tx_count {
        exec(&mut client, "BEGIN TRANSACTION");
        exec(&mut client, &format!("INSERT INTO #TxStress VALUES ({i}, {})", i * 10));
        exec(&mut client, "COMMIT TRANSACTION");
    }

    let elapsed = start.elapsed();

    let mut stream = client
        .execute_batch("SELECT COUNT(*) FROM #TxStress")
        .expect("Count query should succeed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        count = row.get::<i32>(0).expect("Should get count");
    }

    assert_eq!(count, tx_count, "All transactions should have committed");

    println!(
        "Committed {} transactions in {:?} ({:.2} tx/sec)",
        tx_count,
        elapsed,
        tx_count as f64 / elapsed.as_secs_f64()
    );
}

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_mixed_transactions() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    exec(&mut client, "CREATE TABLE #MixedTx (id INT PRIMARY KEY)");

    let tx_count = 100;
    let mut committed = 0;
    let start = Instant::now();

    for i in 0..tx_count {
        exec(&mut client, "BEGIN TRANSACTION");
        exec(&mut client, &format!("INSERT INTO #MixedTx VALUES ({i})"));

        if i % 2 == 0 {
            exec(&mut client, "COMMIT TRANSACTION");
            committed += 1;
        } else {
            exec(&mut client, "ROLLBACK TRANSACTION");
        }
    }

    let elapsed = start.elapsed();

    let mut stream = client
        .execute_batch("SELECT COUNT(*) FROM #MixedTx")
        .expect("Count query should succeed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        count = row.get::<i32>(0).expect("Should get count");
    }

    assert_eq!(count, committed, "Only committed transactions should exist");

    println!(
        "Processed {} transactions ({} committed, {} rolled back) in {:?}",
        tx_count,
        committed,
        tx_count - committed,
        elapsed
    );
}

// =============================================================================
// Stability Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_long_lived_connection() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let duration = Duration::from_secs(10);
    let interval = Duration::from_millis(100);
    let start = Instant::now();
    let mut query_count = 0;

    while start.elapsed() < duration {
        let mut stream = client.execute_batch("SELECT GETDATE()").expect("Query should succeed");
        let count = std::iter::from_fn(|| stream.next_row().ok().flatten()).count();
        assert_eq!(count, 1);
        query_count += 1;

        std::thread::sleep(interval);
    }

    let elapsed = start.elapsed();
    println!("Maintained connection for {elapsed:?} with {query_count} queries");
}

#[test]
#[ignore = "Requires SQL Server - stress test"]
fn test_stress_error_recovery() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let iterations = 100;
    let mut errors = 0;
    let mut successes = 0;

    for i in 0..iterations {
        if i % 2 == 0 {
            if let Ok(mut stream) = client.execute_batch("SELECT 1") {
                if stream.next_row().is_ok() {
                    successes += 1;
                }
            }
        } else {
            let result = client.execute_batch("SELEKT 1").and_then(|mut s| {
                while s.next_row()?.is_some() {}
                Ok(())
            });
            if result.is_err() {
                errors += 1;
            }
        }
    }

    assert_eq!(successes, iterations / 2, "All valid queries should succeed");
    assert_eq!(errors, iterations / 2, "All invalid queries should fail");

    let mut stream = client
        .execute_batch("SELECT 'still alive'")
        .expect("Final query should succeed");
    let count = std::iter::from_fn(|| stream.next_row().ok().flatten()).count();
    assert_eq!(count, 1);

    println!(
        "Completed {iterations} iterations ({successes} successes, {errors} errors), connection still viable",
    );
}
