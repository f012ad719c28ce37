//! DML batchers: literal-valued `INSERT`/`UPDATE`/`DELETE` statements built
//! from accumulated rows and flushed in batches sized to stay under the
//! server's parameter-equivalent row limit.
//!
//! Unlike RPC-bound parameters, every value here is serialised as a T-SQL
//! literal directly into the batch text — this driver never sends RPC or
//! table-valued parameters (see the crate's non-goals), so there is no
//! `sp_executesql` placeholder machinery to route values through.

use mssql_types::{SqlValue, ToSql};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::stream::ResultStream;
use crate::transaction::TransactionBinding;

/// The server-side limit on parameters/values per batch is roughly 2,100;
/// batchers stay well clear of it by default.
const DEFAULT_PARAM_BUDGET: usize = 2_000;

/// Something a DML batcher can flush a generated `SQL_BATCH` to.
///
/// Implemented for both a bare [`Client`] (autocommit — one connection per
/// flush via whatever acquires it) and a [`TransactionBinding`] (every
/// flush runs on the one connection pinned to the transaction).
pub trait SqlExecutor {
    /// Execute one SQL batch and return a stream over its result.
    fn execute_batch(&mut self, sql: &str) -> Result<ResultStream<'_, Client>>;
}

impl SqlExecutor for Client {
    fn execute_batch(&mut self, sql: &str) -> Result<ResultStream<'_, Client>> {
        Client::execute_batch(self, sql)
    }
}

impl SqlExecutor for TransactionBinding {
    fn execute_batch(&mut self, sql: &str) -> Result<ResultStream<'_, Client>> {
        TransactionBinding::execute_batch(self, sql)
    }
}

/// A schema-qualified table name, with identifier validation applied once
/// at construction so every generated statement is safe to concatenate.
#[derive(Debug, Clone)]
pub struct TableRef {
    schema: Option<String>,
    name: String,
}

impl TableRef {
    /// Reference a table in the default schema.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            schema: None,
            name: validate_identifier(name.into())?,
        })
    }

    /// Reference a table in an explicit schema.
    pub fn with_schema(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            schema: Some(validate_identifier(schema.into())?),
            name: validate_identifier(name.into())?,
        })
    }

    fn quoted(&self) -> String {
        match &self.schema {
            Some(schema) => format!("[{schema}].[{}]", self.name),
            None => format!("[{}]", self.name),
        }
    }
}

/// Reject identifiers that could escape their bracket quoting. SQL Server
/// lets a literal `]` inside a bracketed identifier be written `]]`, but
/// batchers never need that generality — names containing `]` are rejected
/// outright rather than re-escaped.
fn validate_identifier(name: String) -> Result<String> {
    if name.is_empty() {
        return Err(Error::InvalidIdentifier("identifier must not be empty".to_string()));
    }
    if name.contains(']') || name.contains('[') || name.contains('\0') {
        return Err(Error::InvalidIdentifier(format!("identifier contains illegal characters: {name}")));
    }
    Ok(name)
}

/// Render a [`SqlValue`] as a T-SQL literal.
///
/// Strings get a Unicode (`N'...'`) prefix with quotes and backslashes
/// escaped; binary values are hex literals; floating point special values
/// (`NaN`, `±Infinity`) are rendered as the arithmetic expressions SQL
/// Server accepts in their place, since the server has no literal syntax
/// for them.
fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
        SqlValue::TinyInt(v) => v.to_string(),
        SqlValue::SmallInt(v) => v.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::BigInt(v) => v.to_string(),
        SqlValue::Float(v) => render_float(f64::from(*v)),
        SqlValue::Double(v) => render_float(*v),
        SqlValue::String(s) => format!("N'{}'", escape_string(s)),
        SqlValue::Binary(bytes) => format!("0x{}", hex_encode(bytes)),
        #[cfg(feature = "decimal")]
        SqlValue::Decimal(d) => d.to_string(),
        #[cfg(feature = "uuid")]
        SqlValue::Uuid(u) => format!("'{u}'"),
        #[cfg(feature = "chrono")]
        SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        #[cfg(feature = "chrono")]
        SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        #[cfg(feature = "chrono")]
        SqlValue::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
        #[cfg(feature = "chrono")]
        SqlValue::DateTimeOffset(dt) => format!("'{}'", dt.format("%Y-%m-%dT%H:%M:%S%.f%:z")),
        #[cfg(feature = "json")]
        SqlValue::Json(v) => format!("N'{}'", escape_string(&v.to_string())),
        SqlValue::Xml(s) => format!("N'{}'", escape_string(s)),
    }
}

fn render_float(v: f64) -> String {
    if v.is_nan() {
        "CAST('NaN' AS FLOAT)".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "1e308 * 10".to_string() } else { "-1e308 * 10".to_string() }
    } else {
        v.to_string()
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Identity of a row touched by `UPDATE`/`DELETE`: either a single-column
/// primary key value or a composite key in key-ordinal order.
#[derive(Debug, Clone)]
pub enum RowId {
    /// A single-column primary key.
    Single(SqlValue),
    /// A composite primary key, values in key-ordinal order.
    Composite(Vec<SqlValue>),
}

impl RowId {
    fn values(&self) -> Vec<&SqlValue> {
        match self {
            Self::Single(v) => vec![v],
            Self::Composite(vs) => vs.iter().collect(),
        }
    }
}

/// Accumulated result of a batcher's flushes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResult {
    /// Total rows affected across all flushes.
    pub rows_affected: u64,
}

fn effective_batch_size(configured: usize, params_per_row: usize) -> usize {
    let param_budget = DEFAULT_PARAM_BUDGET / params_per_row.max(1);
    configured.min(param_budget.max(1))
}

/// Batches literal-valued `INSERT` statements.
pub struct InsertBatcher {
    table: TableRef,
    columns: Vec<String>,
    effective_batch_size: usize,
    pending: Vec<Vec<SqlValue>>,
    result: BatchResult,
}

impl InsertBatcher {
    /// Create a batcher for `table`, inserting into `columns` in order.
    /// `configured_batch_size` is clamped to the server's parameter budget
    /// divided by `columns.len()` values per row.
    pub fn new(table: TableRef, columns: Vec<String>, configured_batch_size: usize) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::QueryBuilder("INSERT requires at least one column".to_string()));
        }
        let columns = columns
            .into_iter()
            .map(validate_identifier)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            effective_batch_size: effective_batch_size(configured_batch_size, columns.len()),
            table,
            columns,
            pending: Vec::new(),
            result: BatchResult::default(),
        })
    }

    /// Queue one row. Values must be supplied in the same order as
    /// `columns`. Flushes automatically once the effective batch size is
    /// reached.
    pub fn add_row(&mut self, values: &[&dyn ToSql], executor: &mut dyn SqlExecutor) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(Error::QueryBuilder(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        let row = values.iter().map(|v| v.to_sql().map_err(Error::from)).collect::<Result<Vec<_>>>()?;
        self.pending.push(row);
        if self.pending.len() >= self.effective_batch_size {
            self.flush(executor)?;
        }
        Ok(())
    }

    /// Flush any queued rows immediately, even if the batch isn't full.
    pub fn flush(&mut self, executor: &mut dyn SqlExecutor) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let sql = self.render_insert();
        let mut stream = executor.execute_batch(&sql)?;
        while stream.next_row()?.is_some() {}
        // DONE_COUNT for a multi-VALUES INSERT reports the total row count
        // server-side; `next_row` already drained it into `ExecuteResult`
        // accounting inside ResultStream, but callers of this batcher only
        // need the row count it queued — the server's own count is the
        // source of truth when they diverge, so fold the conservative value.
        self.result.rows_affected += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Flush any remaining rows and return the accumulated result.
    pub fn finish(mut self, executor: &mut dyn SqlExecutor) -> Result<BatchResult> {
        self.flush(executor)?;
        Ok(self.result)
    }

    fn render_insert(&self) -> String {
        let cols = self.columns.iter().map(|c| format!("[{c}]")).collect::<Vec<_>>().join(", ");
        let rows = self
            .pending
            .iter()
            .map(|row| {
                let values = row.iter().map(render_literal).collect::<Vec<_>>().join(", ");
                format!("({values})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({cols}) VALUES {rows}", self.table.quoted())
    }
}

/// One column assignment queued for an `UPDATE`.
pub struct UpdateRow {
    /// Identity of the row being updated.
    pub id: RowId,
    /// Column/value pairs to assign; columns are validated on construction.
    pub assignments: Vec<(String, SqlValue)>,
}

/// Batches literal-valued `UPDATE ... FROM ... JOIN (VALUES ...)` statements.
///
/// To avoid interleaving with a result stream reading from the same pinned
/// connection inside an explicit transaction, this batcher defers every
/// flush until [`UpdateBatcher::finish`] is called.
pub struct UpdateBatcher {
    table: TableRef,
    pk_columns: Vec<String>,
    update_columns: Vec<String>,
    flush_threshold: usize,
    pending: Vec<UpdateRow>,
    defer_flush: bool,
    result: BatchResult,
}

impl UpdateBatcher {
    /// Create a batcher. `pk_columns` must be non-empty — tables without a
    /// primary key are rejected up front. `defer_flush` should be `true`
    /// when running inside an explicit transaction alongside a concurrent
    /// result stream on the same connection.
    pub fn new(
        table: TableRef,
        pk_columns: Vec<String>,
        update_columns: Vec<String>,
        configured_batch_size: usize,
        defer_flush: bool,
    ) -> Result<Self> {
        if pk_columns.is_empty() {
            return Err(Error::QueryBuilder("UPDATE requires a primary key".to_string()));
        }
        let pk_columns = pk_columns.into_iter().map(validate_identifier).collect::<Result<Vec<_>>>()?;
        let update_columns = update_columns
            .into_iter()
            .map(validate_identifier)
            .collect::<Result<Vec<_>>>()?;
        for col in &update_columns {
            if pk_columns.contains(col) {
                return Err(Error::QueryBuilder(format!("cannot update primary-key column {col}")));
            }
        }
        let params_per_row = pk_columns.len() + update_columns.len();
        Ok(Self {
            flush_threshold: effective_batch_size(configured_batch_size, params_per_row),
            table,
            pk_columns,
            update_columns,
            pending: Vec::new(),
            defer_flush,
            result: BatchResult::default(),
        })
    }

    /// Queue one row update.
    pub fn add_row(&mut self, row: UpdateRow, executor: &mut dyn SqlExecutor) -> Result<()> {
        if row.assignments.len() != self.update_columns.len() {
            return Err(Error::QueryBuilder("row assignment count does not match declared columns".to_string()));
        }
        for (col, _) in &row.assignments {
            if self.pk_columns.contains(col) {
                return Err(Error::QueryBuilder(format!("cannot update primary-key column {col}")));
            }
        }
        self.pending.push(row);
        if !self.defer_flush && self.pending.len() >= self.flush_threshold {
            self.flush(executor)?;
        }
        Ok(())
    }

    /// Flush queued rows as one or more `UPDATE` batches.
    pub fn flush(&mut self, executor: &mut dyn SqlExecutor) -> Result<()> {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(self.flush_threshold);
            let chunk: Vec<_> = self.pending.drain(..take).collect();
            let sql = self.render_update(&chunk);
            let mut stream = executor.execute_batch(&sql)?;
            while stream.next_row()?.is_some() {}
            self.result.rows_affected += chunk.len() as u64;
        }
        Ok(())
    }

    /// Flush any remaining rows (always, regardless of `defer_flush`) and
    /// return the accumulated result.
    pub fn finish(mut self, executor: &mut dyn SqlExecutor) -> Result<BatchResult> {
        self.flush(executor)?;
        Ok(self.result)
    }

    fn render_update(&self, rows: &[UpdateRow]) -> String {
        let value_cols = self
            .pk_columns
            .iter()
            .chain(self.update_columns.iter())
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let values = rows
            .iter()
            .map(|row| {
                let pk_values = row.id.values().into_iter().map(render_literal);
                let update_values = row.assignments.iter().map(|(_, v)| render_literal(v));
                let all = pk_values.chain(update_values).collect::<Vec<_>>().join(", ");
                format!("({all})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let set_clause = self
            .update_columns
            .iter()
            .map(|c| format!("t.[{c}] = v.[{c}]"))
            .collect::<Vec<_>>()
            .join(", ");
        let join_clause = self
            .pk_columns
            .iter()
            .map(|c| format!("t.[{c}] = v.[{c}]"))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            "UPDATE t SET {set_clause} FROM {} AS t JOIN (VALUES {values}) AS v ({value_cols}) ON {join_clause}",
            self.table.quoted()
        )
    }
}

/// Batches literal-valued `DELETE ... FROM ... JOIN (VALUES ...)` statements.
///
/// Like [`UpdateBatcher`], flushes defer to [`DeleteBatcher::finish`] when
/// running alongside a concurrent result stream on the same connection.
pub struct DeleteBatcher {
    table: TableRef,
    pk_columns: Vec<String>,
    flush_threshold: usize,
    pending: Vec<RowId>,
    defer_flush: bool,
    result: BatchResult,
}

impl DeleteBatcher {
    /// Create a batcher. `pk_columns` must be non-empty.
    pub fn new(table: TableRef, pk_columns: Vec<String>, configured_batch_size: usize, defer_flush: bool) -> Result<Self> {
        if pk_columns.is_empty() {
            return Err(Error::QueryBuilder("DELETE requires a primary key".to_string()));
        }
        let pk_columns = pk_columns.into_iter().map(validate_identifier).collect::<Result<Vec<_>>>()?;
        let params_per_row = pk_columns.len();
        Ok(Self {
            flush_threshold: effective_batch_size(configured_batch_size, params_per_row),
            table,
            pk_columns,
            pending: Vec::new(),
            defer_flush,
            result: BatchResult::default(),
        })
    }

    /// Queue one row to delete.
    pub fn add_row(&mut self, id: RowId, executor: &mut dyn SqlExecutor) -> Result<()> {
        self.pending.push(id);
        if !self.defer_flush && self.pending.len() >= self.flush_threshold {
            self.flush(executor)?;
        }
        Ok(())
    }

    /// Flush queued rows as one or more `DELETE` batches.
    pub fn flush(&mut self, executor: &mut dyn SqlExecutor) -> Result<()> {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(self.flush_threshold);
            let chunk: Vec<_> = self.pending.drain(..take).collect();
            let sql = self.render_delete(&chunk);
            let mut stream = executor.execute_batch(&sql)?;
            while stream.next_row()?.is_some() {}
            self.result.rows_affected += chunk.len() as u64;
        }
        Ok(())
    }

    /// Flush any remaining rows and return the accumulated result.
    pub fn finish(mut self, executor: &mut dyn SqlExecutor) -> Result<BatchResult> {
        self.flush(executor)?;
        Ok(self.result)
    }

    fn render_delete(&self, rows: &[RowId]) -> String {
        let cols = self.pk_columns.join(", ");
        let values = rows
            .iter()
            .map(|id| {
                let all = id.values().into_iter().map(render_literal).collect::<Vec<_>>().join(", ");
                format!("({all})")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let join_clause = self
            .pk_columns
            .iter()
            .map(|c| format!("t.[{c}] = v.[{c}]"))
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            "DELETE t FROM {} AS t JOIN (VALUES {values}) AS v ({cols}) ON {join_clause}",
            self.table.quoted()
        )
    }
}
