use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::time::Duration;
use tracing::debug;

use super::{Cell, SnapshotStore, TableSpec};
use crate::config::PipelineConfig;

/// [`SnapshotStore`] backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool sized from the config.
    pub async fn connect(database_url: &str, config: &PipelineConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .context("connecting to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn ensure_table(&self, table: &TableSpec) -> Result<()> {
        sqlx::query(table.ddl)
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating table {}", table.name))?;
        Ok(())
    }

    async fn truncate(&self, table: &TableSpec) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", table.name);
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("truncating table {}", table.name))?;
        Ok(())
    }

    async fn insert_batch(&self, table: &TableSpec, rows: Vec<Vec<Cell>>) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let row_count = rows.len();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            table.name,
            table.insert_columns().join(", ")
        ));
        builder.push_values(rows, |mut b, row| {
            for cell in row {
                match cell {
                    Cell::Text(v) => {
                        b.push_bind(v);
                    }
                    Cell::OptText(v) => {
                        b.push_bind(v);
                    }
                    Cell::Int(v) => {
                        b.push_bind(v);
                    }
                    Cell::BigInt(v) => {
                        b.push_bind(v);
                    }
                    Cell::OptBigInt(v) => {
                        b.push_bind(v);
                    }
                    Cell::Float(v) => {
                        b.push_bind(v);
                    }
                    Cell::OptFloat(v) => {
                        b.push_bind(v);
                    }
                    Cell::Bool(v) => {
                        b.push_bind(v);
                    }
                    Cell::Date(v) => {
                        b.push_bind(v);
                    }
                    Cell::Timestamp(v) => {
                        b.push_bind(v);
                    }
                }
            }
        });

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .with_context(|| format!("inserting {row_count} rows into {}", table.name))?;
        debug!(table = table.name, rows = result.rows_affected(), "Batch inserted");
        Ok(result.rows_affected())
    }
}
