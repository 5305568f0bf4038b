use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ToSql, params_from_iter};
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{Affinity, Column, Row, SqlValue, Storage, TableSchema, check_row_width};

/// Embedded engine: one file, one connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn sqlite_type(affinity: Affinity) -> &'static str {
    match affinity {
        Affinity::Text => "TEXT",
        Affinity::Integer => "INTEGER",
        Affinity::Real => "REAL",
        Affinity::Date => "DATE",
        Affinity::DateTime => "DATETIME",
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Integer(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Date(d) => ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string())),
            SqlValue::DateTime(t) => ToSqlOutput::Owned(Value::Text(t.to_rfc3339())),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(n) => SqlValue::Integer(n),
        ValueRef::Real(f) => SqlValue::Real(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl Storage for SqliteStore {
    fn create_table(&mut self, schema: &TableSchema) -> Result<(), StorageError> {
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, sqlite_type(c.affinity)))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, {columns});",
            schema.name
        ))?;
        Ok(())
    }

    fn drop_tables(&mut self, names: &[&str]) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for name in names {
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let rows = stmt.query_map([], |row| {
            (0..width)
                .map(|idx| row.get_ref(idx).map(value_from_ref))
                .collect::<rusqlite::Result<Row>>()
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn insert_batch(
        &mut self,
        table: &str,
        columns: &[Column],
        rows: &[Row],
    ) -> Result<usize, StorageError> {
        check_row_width(table, columns, rows)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let names = columns.iter().map(|c| c.name).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("INSERT INTO {table} ({names}) VALUES ({placeholders})");

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        debug!(table, rows = rows.len(), "sqlite batch committed");
        Ok(rows.len())
    }
}
