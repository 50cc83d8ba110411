//! Relational source reader
//!
//! Table names are checked against an allow-list before any network call and
//! are then quoted into the statement; the row limit is bound as a parameter.
//! Reads are bounded by the command timeout and are never retried.

use crate::config::{ConfigError, SourceConfig};
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, info};

/// Largest row limit a caller may request
pub const MAX_ROW_LIMIT: u32 = 100_000;

/// Accept only `[A-Za-z0-9_]+`
pub fn is_valid_table_identifier(table: &str) -> bool {
    !table.is_empty()
        && table
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

pub fn validate_table_identifier(table: &str) -> Result<()> {
    if !is_valid_table_identifier(table) {
        return Err(PipelineError::invalid_argument(format!(
            "table name '{}' is not allowed: only letters, digits and underscore",
            table
        )));
    }
    Ok(())
}

pub fn validate_limit(limit: Option<u32>) -> Result<()> {
    match limit {
        Some(n) if n == 0 || n > MAX_ROW_LIMIT => Err(PipelineError::invalid_argument(format!(
            "limit {} not in 1..={}",
            n, MAX_ROW_LIMIT
        ))),
        _ => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Row model
// ═══════════════════════════════════════════════════════════════════════════

/// A single column value, projected to a JSON-friendly shape
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Serialized as base64 text
    Binary(Vec<u8>),
}

impl Serialize for ColumnValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ColumnValue::Null => serializer.serialize_unit(),
            ColumnValue::Bool(v) => serializer.serialize_bool(*v),
            ColumnValue::Int(v) => serializer.serialize_i64(*v),
            ColumnValue::Float(v) => serializer.serialize_f64(*v),
            ColumnValue::Text(v) => serializer.serialize_str(v),
            ColumnValue::Binary(v) => serializer.serialize_str(&BASE64.encode(v)),
        }
    }
}

/// One row as ordered (column, value) pairs, in the query's column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMapping {
    columns: Vec<(String, ColumnValue)>,
}

impl RowMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            columns: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, column: impl Into<String>, value: ColumnValue) {
        self.columns.push((column.into(), value));
    }

    /// Builder-style `push`
    pub fn with(mut self, column: impl Into<String>, value: ColumnValue) -> Self {
        self.push(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for RowMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: SourceReader
// ═══════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Read up to `limit` rows of `table`
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a disallowed identifier, before any I/O
    /// - `DependencyUnavailable("source")` on timeout or connection failure
    /// - `SourceData` when a returned value cannot be decoded
    async fn read_table(&self, table: &str, limit: Option<u32>) -> Result<Vec<RowMapping>>;

    /// Cheap round trip for health probes
    async fn ping(&self) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════
// MySQL implementation
// ═══════════════════════════════════════════════════════════════════════════

pub struct SqlSourceReader {
    pool: MySqlPool,
    command_timeout: Duration,
}

impl SqlSourceReader {
    /// Pool that connects on first use
    pub fn connect_lazy(url: &str, max_connections: u32, command_timeout: Duration) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(command_timeout)
            .connect_lazy(url)
            .map_err(|e| ConfigError::Validation(format!("source.mysql_url: {}", e)))?;

        Ok(Self {
            pool,
            command_timeout,
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        Self::connect_lazy(
            &config.mysql_url,
            config.max_connections,
            config.command_timeout(),
        )
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SourceReader for SqlSourceReader {
    async fn read_table(&self, table: &str, limit: Option<u32>) -> Result<Vec<RowMapping>> {
        validate_table_identifier(table)?;
        validate_limit(limit)?;

        let sql = match limit {
            Some(_) => format!("SELECT * FROM `{}` LIMIT ?", table),
            None => format!("SELECT * FROM `{}`", table),
        };
        let mut query = sqlx::query(&sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = tokio::time::timeout(self.command_timeout, query.fetch_all(&self.pool))
            .await
            .map_err(|_| {
                PipelineError::unavailable(
                    "source",
                    format!("read of '{}' exceeded {:?}", table, self.command_timeout),
                )
            })?
            .map_err(|e| PipelineError::unavailable("source", format!("read of '{}' failed: {}", table, e)))?;

        let mappings = rows
            .iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| decode_failed(table, e))?;

        info!(table, row_count = mappings.len(), "read source table");
        Ok(mappings)
    }

    async fn ping(&self) -> Result<()> {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        tokio::time::timeout(self.command_timeout, probe)
            .await
            .map_err(|_| PipelineError::unavailable("source", "ping timed out"))?
            .map_err(|e| PipelineError::unavailable("source", e))?;
        Ok(())
    }
}

/// A value the server returned but we could not project; retrying will not help
fn decode_failed(table: &str, error: sqlx::Error) -> PipelineError {
    PipelineError::SourceData {
        table: table.to_string(),
        message: error.to_string(),
    }
}

fn decode_row(row: &MySqlRow) -> std::result::Result<RowMapping, sqlx::Error> {
    let mut mapping = RowMapping::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_info().name())?;
        mapping.push(column.name(), value);
    }
    Ok(mapping)
}

/// Map by the server-reported type name; anything unrecognised is read as text
fn decode_column(
    row: &MySqlRow,
    idx: usize,
    type_name: &str,
) -> std::result::Result<ColumnValue, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(ColumnValue::Null);
    }

    let value = match type_name {
        "BOOLEAN" => ColumnValue::Bool(row.try_get_unchecked::<bool, _>(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            ColumnValue::Int(row.try_get_unchecked::<i64, _>(idx)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => {
            let v = row.try_get_unchecked::<u64, _>(idx)?;
            i64::try_from(v)
                .map(ColumnValue::Int)
                .unwrap_or_else(|_| ColumnValue::Text(v.to_string()))
        }
        "FLOAT" => ColumnValue::Float(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => ColumnValue::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "DATE" => ColumnValue::Text(
            row.try_get_unchecked::<chrono::NaiveDate, _>(idx)?
                .to_string(),
        ),
        "TIME" => ColumnValue::Text(
            row.try_get_unchecked::<chrono::NaiveTime, _>(idx)?
                .to_string(),
        ),
        "DATETIME" => ColumnValue::Text(
            row.try_get_unchecked::<chrono::NaiveDateTime, _>(idx)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "TIMESTAMP" => ColumnValue::Text(
            row.try_get_unchecked::<chrono::DateTime<chrono::Utc>, _>(idx)?
                .to_rfc3339(),
        ),
        "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BINARY" | "VARBINARY" | "BIT"
        | "GEOMETRY" => ColumnValue::Binary(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        _ => ColumnValue::Text(row.try_get_unchecked::<String, _>(idx)?),
    };
    Ok(value)
}

// ═══════════════════════════════════════════════════════════════════════════
// Postgres reachability probe
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct PostgresProbe {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresProbe {
    pub fn connect_lazy(url: &str, timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(timeout)
            .connect_lazy(url)
            .map_err(|e| ConfigError::Validation(format!("source.postgres_url: {}", e)))?;
        Ok(Self { pool, timeout })
    }

    /// Probe for `source.postgres_url`, if configured
    pub fn from_config(config: &SourceConfig) -> Result<Option<Self>> {
        config
            .postgres_url
            .as_deref()
            .map(|url| Self::connect_lazy(url, config.command_timeout()))
            .transpose()
    }

    pub async fn ping(&self) -> Result<()> {
        let probe = sqlx::query("SELECT 1").execute(&self.pool);
        tokio::time::timeout(self.timeout, probe)
            .await
            .map_err(|_| PipelineError::unavailable("postgres", "ping timed out"))?
            .map_err(|e| PipelineError::unavailable("postgres", e))?;
        debug!("postgres ping ok");
        Ok(())
    }
}
