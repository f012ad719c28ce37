//! TDS Protocol Conformance Tests
//!
//! These tests validate TDS protocol behavior against a real SQL Server instance.
//! They verify that the driver correctly implements the TDS protocol as specified
//! in MS-TDS.
//!
//! Run with:
//! ```bash
//! MSSQL_HOST=localhost MSSQL_USER=sa MSSQL_PASSWORD='YourStrong@Passw0rd' \
//!     cargo test -p mssql-client --test protocol_conformance -- --ignored
//! ```

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::expect_fun_call,
    clippy::approx_constant
)]

use chrono::Datelike;
use chrono::Timelike;
use mssql_client::{Client, Config};
use uuid::Uuid;

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

// =============================================================================
// TDS Version and Server Information Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_server_version_info() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            "SELECT @@VERSION AS full_version, @@SERVERNAME AS server_name, @@SPID AS session_id",
        )
        .expect("Version query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let full_version: String = row.get(0).expect("Failed to get full_version");
        let server_name: String = row.get(1).expect("Failed to get server_name");
        let session_id: i16 = row.get(2).expect("Failed to get session_id");

        println!("Server: {server_name}");
        println!("Session ID: {session_id}");
        println!("Version: {}", &full_version[..full_version.len().min(80)]);

        assert!(full_version.contains("Microsoft SQL Server"));
        assert!(!server_name.is_empty());
        assert!(session_id > 0, "Session ID should be positive");
        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_database_context() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch("SELECT DB_NAME() AS current_db")
        .expect("Query failed");

    let mut found = false;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let db_name: String = row.get(0).expect("Failed to get db_name");
        println!("Connected to database: {db_name}");
        assert!(!db_name.is_empty());
        found = true;
    }
    assert!(found);
}

// =============================================================================
// Data Type Conformance Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_all_integer_types() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    // TINYINT in SQL Server is unsigned (0-255), so we only test max/min of that range.
    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                CAST(255 AS TINYINT) AS tinyint_max,
                CAST(0 AS TINYINT) AS tinyint_min,
                CAST(32767 AS SMALLINT) AS smallint_max,
                CAST(-32768 AS SMALLINT) AS smallint_min,
                CAST(2147483647 AS INT) AS int_max,
                CAST(-2147483648 AS INT) AS int_min,
                CAST(9223372036854775807 AS BIGINT) AS bigint_max,
                CAST(-9223372036854775808 AS BIGINT) AS bigint_min
            "#,
        )
        .expect("Integer query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let tinyint_max: u8 = row.get(0).expect("Failed to get tinyint max");
        let tinyint_min: u8 = row.get(1).expect("Failed to get tinyint min");
        let smallint_max: i16 = row.get(2).expect("Failed to get smallint max");
        let smallint_min: i16 = row.get(3).expect("Failed to get smallint min");
        let int_max: i32 = row.get(4).expect("Failed to get int max");
        let int_min: i32 = row.get(5).expect("Failed to get int min");
        let bigint_max: i64 = row.get(6).expect("Failed to get bigint max");
        let bigint_min: i64 = row.get(7).expect("Failed to get bigint min");

        assert_eq!(tinyint_max, 255);
        assert_eq!(tinyint_min, 0);
        assert_eq!(smallint_max, 32767);
        assert_eq!(smallint_min, -32768);
        assert_eq!(int_max, 2147483647);
        assert_eq!(int_min, -2147483648);
        assert_eq!(bigint_max, 9223372036854775807);
        assert_eq!(bigint_min, -9223372036854775808);

        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_floating_point_types() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                CAST(3.14159265358979 AS FLOAT) AS float_val,
                CAST(2.71828 AS REAL) AS real_val,
                CAST(123456.789 AS DECIMAL(18,3)) AS decimal_val,
                CAST(999999999999.99 AS NUMERIC(18,2)) AS numeric_val,
                CAST(12345.67 AS MONEY) AS money_val,
                CAST(214748.3647 AS SMALLMONEY) AS smallmoney_val
            "#,
        )
        .expect("Float query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let float_val: f64 = row.get(0).expect("Failed to get float");
        let real_val: f32 = row.get(1).expect("Failed to get real");

        assert!((float_val - 3.14159265358979).abs() < 1e-10);
        assert!((real_val - 2.71828).abs() < 1e-4);

        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_string_types() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                CAST('Hello' AS CHAR(10)) AS char_val,
                CAST('World' AS VARCHAR(50)) AS varchar_val,
                CAST(N'こんにちは' AS NCHAR(10)) AS nchar_val,
                CAST(N'世界' AS NVARCHAR(50)) AS nvarchar_val
            "#,
        )
        .expect("String query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let char_val: String = row.get(0).expect("Failed to get char");
        let varchar_val: String = row.get(1).expect("Failed to get varchar");
        let nchar_val: String = row.get(2).expect("Failed to get nchar");
        let nvarchar_val: String = row.get(3).expect("Failed to get nvarchar");

        assert!(char_val.starts_with("Hello"));
        assert_eq!(varchar_val, "World");
        assert!(nchar_val.starts_with("こんにちは"));
        assert_eq!(nvarchar_val, "世界");

        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_datetime_types() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                CAST('2024-12-17 14:30:00' AS DATETIME) AS datetime_val,
                CAST('2024-12-17 14:30:00' AS SMALLDATETIME) AS smalldatetime_val,
                GETDATE() AS current_datetime
            "#,
        )
        .expect("Datetime query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let datetime_val: chrono::NaiveDateTime = row.get(0).expect("Failed to get datetime");
        let smalldatetime_val: chrono::NaiveDateTime =
            row.get(1).expect("Failed to get smalldatetime");
        let current: chrono::NaiveDateTime = row.get(2).expect("Failed to get current datetime");

        assert_eq!(datetime_val.year(), 2024);
        assert_eq!(datetime_val.month(), 12);
        assert_eq!(datetime_val.day(), 17);
        assert_eq!(datetime_val.hour(), 14);
        assert_eq!(datetime_val.minute(), 30);

        assert_eq!(smalldatetime_val.year(), 2024);
        assert_eq!(smalldatetime_val.month(), 12);
        assert_eq!(smalldatetime_val.day(), 17);

        assert!(
            current.year() >= 2024 && current.year() <= 2100,
            "Current year should be recent"
        );

        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_binary_types() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                CAST(0xDEADBEEF AS BINARY(4)) AS binary_val,
                CAST(0xCAFEBABE AS VARBINARY(10)) AS varbinary_val,
                CAST(0x0102030405060708 AS VARBINARY(100)) AS varbinary_long
            "#,
        )
        .expect("Binary query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let binary_val: Vec<u8> = row.get(0).expect("Failed to get binary");
        let varbinary_val: Vec<u8> = row.get(1).expect("Failed to get varbinary");

        assert_eq!(binary_val, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(varbinary_val, vec![0xCA, 0xFE, 0xBA, 0xBE]);

        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_guid_type() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client.execute_batch("SELECT NEWID() AS guid_val").expect("GUID query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let guid_val: Uuid = row.get(0).expect("Failed to get guid");

        assert!(!guid_val.is_nil(), "UUID should not be nil");

        let guid_str = guid_val.to_string();
        assert_eq!(guid_str.len(), 36, "GUID string should be 36 chars");
        assert!(
            guid_str.chars().filter(|c| *c == '-').count() == 4,
            "GUID should have 4 dashes"
        );

        count += 1;
    }
    assert_eq!(count, 1);
}

// =============================================================================
// NULL Handling Conformance Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_null_handling() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                CAST(NULL AS INT) AS null_int,
                CAST(NULL AS VARCHAR(50)) AS null_varchar,
                CAST(NULL AS DATETIME) AS null_datetime,
                CAST(NULL AS VARBINARY(50)) AS null_binary,
                CAST(NULL AS UNIQUEIDENTIFIER) AS null_guid
            "#,
        )
        .expect("NULL query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let null_int: Option<i32> = row.get(0).expect("Failed to get null_int");
        let null_varchar: Option<String> = row.get(1).expect("Failed to get null_varchar");

        assert!(null_int.is_none(), "Expected NULL for int");
        assert!(null_varchar.is_none(), "Expected NULL for varchar");

        count += 1;
    }
    assert_eq!(count, 1);
}

// =============================================================================
// Result Set Protocol Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_rejects_multiple_result_sets_in_one_batch() {
    // A batch that yields more than one COLMETADATA is a protocol error for
    // this driver: one result stream corresponds to exactly one result set,
    // so a multi-SELECT batch must be split into separate execute calls.
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch("SELECT 1 AS first_result; SELECT 2 AS second_result;")
        .expect("batch should start");

    let first = stream.next_row().expect("first result set should decode");
    assert!(first.is_some());

    let second = stream.next_row();
    assert!(
        second.is_err(),
        "a second result set should surface a protocol error"
    );
}

// =============================================================================
// Error Handling Conformance Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_sql_error_severity_levels() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    // Informational message (severity < 10) should not surface as an error.
    let mut stream = client
        .execute_batch("PRINT 'This is an informational message'")
        .expect("PRINT should not cause an error");
    while stream.next_row().expect("no protocol error").is_some() {}

    // Error (severity >= 16).
    let result = client.execute_batch("RAISERROR('Test error message', 16, 1)");
    let result = result.and_then(|mut s| {
        while s.next_row()?.is_some() {}
        Ok(())
    });
    assert!(
        result.is_err(),
        "RAISERROR with severity 16 should cause an error"
    );
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_constraint_violation_error() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut create = client
        .execute_batch("CREATE TABLE #ConstraintTest (id INT PRIMARY KEY, value INT CHECK (value > 0))")
        .expect("Failed to create table");
    while create.next_row().expect("no protocol error").is_some() {}

    let mut first_insert = client
        .execute_batch("INSERT INTO #ConstraintTest VALUES (1, 10)")
        .expect("First insert should succeed");
    while first_insert.next_row().expect("no protocol error").is_some() {}

    let dup_key = client.execute_batch("INSERT INTO #ConstraintTest VALUES (1, 20)").and_then(|mut s| {
        while s.next_row()?.is_some() {}
        Ok(())
    });
    assert!(dup_key.is_err(), "Duplicate key should cause an error");

    let check_violation = client
        .execute_batch("INSERT INTO #ConstraintTest VALUES (2, -5)")
        .and_then(|mut s| {
            while s.next_row()?.is_some() {}
            Ok(())
        });
    assert!(
        check_violation.is_err(),
        "Check constraint violation should cause an error"
    );
}

// =============================================================================
// Transaction Protocol Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_transaction_commit() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut create = client
        .execute_batch("CREATE TABLE #TxCommitTest (id INT, value NVARCHAR(50))")
        .expect("Failed to create table");
    while create.next_row().expect("no protocol error").is_some() {}

    let mut begin = client.execute_batch("BEGIN TRANSACTION").expect("Failed to begin transaction");
    while begin.next_row().expect("no protocol error").is_some() {}

    let mut insert = client
        .execute_batch("INSERT INTO #TxCommitTest VALUES (1, 'committed')")
        .expect("Failed to insert");
    while insert.next_row().expect("no protocol error").is_some() {}

    let mut commit = client.execute_batch("COMMIT TRANSACTION").expect("Failed to commit");
    while commit.next_row().expect("no protocol error").is_some() {}

    let mut stream = client
        .execute_batch("SELECT value FROM #TxCommitTest WHERE id = 1")
        .expect("Query failed");

    let mut found = false;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let value: String = row.get(0).expect("Failed to get value");
        assert_eq!(value, "committed");
        found = true;
    }
    assert!(found, "Committed data should be visible");
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_transaction_rollback() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut create = client
        .execute_batch("CREATE TABLE #TxRollbackTest (id INT, value NVARCHAR(50))")
        .expect("Failed to create table");
    while create.next_row().expect("no protocol error").is_some() {}

    let mut seed = client
        .execute_batch("INSERT INTO #TxRollbackTest VALUES (1, 'original')")
        .expect("Failed to insert initial data");
    while seed.next_row().expect("no protocol error").is_some() {}

    let mut begin = client.execute_batch("BEGIN TRANSACTION").expect("Failed to begin transaction");
    while begin.next_row().expect("no protocol error").is_some() {}

    let mut update = client
        .execute_batch("UPDATE #TxRollbackTest SET value = 'modified' WHERE id = 1")
        .expect("Failed to update");
    while update.next_row().expect("no protocol error").is_some() {}

    let mut rollback = client.execute_batch("ROLLBACK TRANSACTION").expect("Failed to rollback");
    while rollback.next_row().expect("no protocol error").is_some() {}

    let mut stream = client
        .execute_batch("SELECT value FROM #TxRollbackTest WHERE id = 1")
        .expect("Query failed");

    let mut found = false;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let value: String = row.get(0).expect("Failed to get value");
        assert_eq!(value, "original", "Rollback should preserve original data");
        found = true;
    }
    assert!(found);
}

// =============================================================================
// Large Data Tests
// =============================================================================

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_large_varchar() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut create = client
        .execute_batch("CREATE TABLE #LargeVarcharTest (id INT, data VARCHAR(8000))")
        .expect("Failed to create table");
    while create.next_row().expect("no protocol error").is_some() {}

    let mut insert = client
        .execute_batch("INSERT INTO #LargeVarcharTest VALUES (1, REPLICATE('A', 7999))")
        .expect("Failed to insert large string");
    while insert.next_row().expect("no protocol error").is_some() {}

    let mut stream = client
        .execute_batch("SELECT data FROM #LargeVarcharTest WHERE id = 1")
        .expect("Query failed");

    let mut found = false;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        let data: String = row.get(0).expect("Failed to get data");
        assert_eq!(data.len(), 7999);
        assert!(data.chars().all(|c| c == 'A'));
        found = true;
    }
    assert!(found);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_many_columns() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            SELECT
                1 AS c1, 2 AS c2, 3 AS c3, 4 AS c4, 5 AS c5,
                6 AS c6, 7 AS c7, 8 AS c8, 9 AS c9, 10 AS c10,
                11 AS c11, 12 AS c12, 13 AS c13, 14 AS c14, 15 AS c15,
                16 AS c16, 17 AS c17, 18 AS c18, 19 AS c19, 20 AS c20
            "#,
        )
        .expect("Many-column query failed");

    let mut count = 0;
    while let Some(row) = stream.next_row().expect("Row should be valid") {
        for i in 0..20 {
            let val: i32 = row.get(i).expect(&format!("Failed to get column {i}"));
            assert_eq!(val, (i + 1) as i32);
        }
        count += 1;
    }
    assert_eq!(count, 1);
}

#[test]
#[ignore = "Requires SQL Server"]
fn test_protocol_many_rows() {
    let config = get_test_config().expect("SQL Server config required");
    let mut client = Client::connect(config).expect("Failed to connect");

    let mut stream = client
        .execute_batch(
            r#"
            WITH Numbers AS (
                SELECT 1 AS n
                UNION ALL
                SELECT n + 1 FROM Numbers WHERE n < 1000
            )
            SELECT n FROM Numbers OPTION (MAXRECURSION 1000)
            "#,
        )
        .expect("Many-row query failed");

    let mut count = 0;
    while stream.next_row().expect("Row should be valid").is_some() {
        count += 1;
    }
    assert_eq!(count, 1000, "Should receive exactly 1000 rows");
}
