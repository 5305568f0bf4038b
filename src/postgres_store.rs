use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column as _, Postgres, Row as _, TypeInfo as _};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::error::StorageError;
use crate::storage::{Affinity, Column, Row, SqlValue, Storage, TableSchema, check_row_width};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Networked engine. The pipeline is synchronous, so the pool is driven on a
/// private current-thread runtime with a single connection.
pub struct PostgresStore {
    runtime: Runtime,
    pool: PgPool,
}

impl PostgresStore {
    pub fn connect(url: &str) -> Result<Self, StorageError> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let pool = runtime.block_on(PgPoolOptions::new().max_connections(1).connect(url))?;
        Ok(Self { runtime, pool })
    }
}

fn postgres_type(affinity: Affinity) -> &'static str {
    match affinity {
        Affinity::Text => "TEXT",
        Affinity::Integer => "BIGINT",
        Affinity::Real => "DOUBLE PRECISION",
        Affinity::Date => "DATE",
        Affinity::DateTime => "TIMESTAMPTZ",
    }
}

/// Nulls are bound with the column's type so the server does not have to
/// guess one.
fn bind_value<'q>(query: PgQuery<'q>, value: &'q SqlValue, affinity: Affinity) -> PgQuery<'q> {
    match (value, affinity) {
        (SqlValue::Null, Affinity::Text) => query.bind(None::<String>),
        (SqlValue::Null, Affinity::Integer) => query.bind(None::<i64>),
        (SqlValue::Null, Affinity::Real) => query.bind(None::<f64>),
        (SqlValue::Null, Affinity::Date) => query.bind(None::<NaiveDate>),
        (SqlValue::Null, Affinity::DateTime) => query.bind(None::<DateTime<Utc>>),
        (SqlValue::Text(s), _) => query.bind(s.as_str()),
        (SqlValue::Integer(n), _) => query.bind(*n),
        (SqlValue::Real(f), _) => query.bind(*f),
        (SqlValue::Date(d), _) => query.bind(*d),
        (SqlValue::DateTime(t), _) => query.bind(*t),
    }
}

fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Vec::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)?
                .map(|v| SqlValue::Integer(v.into())),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)?
                .map(|v| SqlValue::Integer(v.into())),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(SqlValue::Integer),
            "BOOL" => row
                .try_get::<Option<bool>, _>(idx)?
                .map(|v| SqlValue::Integer(i64::from(v))),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)?
                .map(|v| SqlValue::Real(v.into())),
            "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(SqlValue::Real),
            "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.map(SqlValue::Date),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(SqlValue::DateTime),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|v| SqlValue::DateTime(v.and_utc())),
            _ => row.try_get::<Option<String>, _>(idx)?.map(SqlValue::Text),
        };
        out.push(value.unwrap_or(SqlValue::Null));
    }
    Ok(out)
}

impl Storage for PostgresStore {
    fn create_table(&mut self, schema: &TableSchema) -> Result<(), StorageError> {
        let columns = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, postgres_type(c.affinity)))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id BIGSERIAL PRIMARY KEY, {columns})",
            schema.name
        );
        self.runtime
            .block_on(sqlx::query(&sql).execute(&self.pool))?;
        Ok(())
    }

    fn drop_tables(&mut self, names: &[&str]) -> Result<(), StorageError> {
        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            for name in names {
                sqlx::query(&format!("DROP TABLE IF EXISTS {name}"))
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        })?;
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, StorageError> {
        let rows = self
            .runtime
            .block_on(sqlx::query(sql).fetch_all(&self.pool))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(decode_row(row)?);
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
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("INSERT INTO {table} ({names}) VALUES ({placeholders})");

        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await?;
            for row in rows {
                let mut query = sqlx::query(&sql);
                for (value, column) in row.iter().zip(columns) {
                    query = bind_value(query, value, column.affinity);
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await
        })?;
        debug!(table, rows = rows.len(), "postgres batch committed");
        Ok(rows.len())
    }
}
