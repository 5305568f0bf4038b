use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::error::StorageError;
use crate::postgres_store::PostgresStore;
use crate::sqlite_store::SqliteStore;

pub const MATCHES_TABLE: &str = "matches";
pub const PLAYER_STATS_TABLE: &str = "player_stats";
pub const PROVENANCE_TABLE: &str = "provenance";
pub const INGEST_RUNS_TABLE: &str = "ingest_runs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Text,
    Integer,
    Real,
    Date,
    DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub affinity: Affinity,
}

impl Column {
    pub const fn new(name: &'static str, affinity: Affinity) -> Self {
        Self { name, affinity }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }
}

/// A single cell on its way into or out of a store.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        SqlValue::DateTime(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

pub type Row = Vec<SqlValue>;

/// The narrow contract the pipeline needs from a persisted store. Every
/// `insert_batch` call is committed as one unit.
pub trait Storage {
    fn create_table(&mut self, schema: &TableSchema) -> Result<(), StorageError>;

    fn drop_tables(&mut self, names: &[&str]) -> Result<(), StorageError>;

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError>;

    /// Inserts `rows` into `table`; each row lists values in `columns` order.
    /// Returns the number of rows written.
    fn insert_batch(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: &[Row],
    ) -> Result<usize, StorageError>;

    fn persisted_match_ids(&mut self) -> Result<HashSet<String>, StorageError> {
        let rows = self.query(&format!("SELECT DISTINCT match_id FROM {MATCHES_TABLE}"))?;
        Ok(first_text_column(rows).into_iter().collect())
    }

    /// Persisted matches with no player stats yet, in insertion order.
    fn match_ids_missing_stats(&mut self) -> Result<Vec<String>, StorageError> {
        let rows = self.query(&format!(
            "SELECT match_id FROM {MATCHES_TABLE} \
             WHERE match_id NOT IN (SELECT match_id FROM {PLAYER_STATS_TABLE} WHERE match_id IS NOT NULL) \
             ORDER BY id"
        ))?;
        Ok(first_text_column(rows))
    }

    fn match_ids_with_stats(&mut self) -> Result<HashSet<String>, StorageError> {
        let rows = self.query(&format!(
            "SELECT DISTINCT match_id FROM {PLAYER_STATS_TABLE}"
        ))?;
        Ok(first_text_column(rows).into_iter().collect())
    }
}

fn first_text_column(rows: Vec<Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| match row.into_iter().next() {
            Some(SqlValue::Text(s)) => Some(s),
            _ => None,
        })
        .collect()
}

/// Every table the pipeline writes to, in creation order.
pub fn all_schemas() -> Vec<TableSchema> {
    vec![
        crate::records::match_schema(),
        crate::records::player_stats_schema(),
        crate::provenance::provenance_schema(),
        crate::pipeline::ingest_runs_schema(),
    ]
}

/// Creates any missing tables; with `recreate`, drops them first.
pub fn prepare(store: &mut dyn Storage, recreate: bool) -> Result<(), StorageError> {
    let schemas = all_schemas();
    if recreate {
        let names = schemas.iter().map(|s| s.name).collect::<Vec<_>>();
        store.drop_tables(&names)?;
        info!(tables = ?names, "tables dropped for recreate");
    }
    for schema in &schemas {
        store.create_table(schema)?;
    }
    Ok(())
}

pub fn check_row_width(table: &str, columns: &[Column], rows: &[Row]) -> Result<(), StorageError> {
    if columns.is_empty() {
        return Err(StorageError::Schema(format!("insert into {table} without columns")));
    }
    if let Some(bad) = rows.iter().find(|row| row.len() != columns.len()) {
        return Err(StorageError::Schema(format!(
            "row for {table} has {} values, expected {}",
            bad.len(),
            columns.len()
        )));
    }
    Ok(())
}

/// Picks the engine from the connection string: `postgres://` and
/// `postgresql://` select the networked store, anything else is a SQLite path.
pub fn open_storage(url: &str) -> Result<Box<dyn Storage>, StorageError> {
    let trimmed = url.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        info!("using postgres storage");
        return Ok(Box::new(PostgresStore::connect(trimmed)?));
    }
    let path = trimmed.strip_prefix("sqlite://").unwrap_or(trimmed);
    info!(path, "using sqlite storage");
    Ok(Box::new(SqliteStore::open(std::path::Path::new(path))?))
}
