//! Target-table storage used by the snapshot writer.
//!
//! [`SnapshotStore`] is the async seam between job logic and the database.
//! [`PgStore`] implements it on a PostGIS-enabled PostgreSQL pool;
//! [`MemoryStore`] keeps tables in process for dry runs and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

/// Layout of one derived table owned by exactly one job.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    /// `CREATE TABLE IF NOT EXISTS` statement.
    pub ddl: &'static str,
    /// Data columns in the order [`SnapshotRow::cells`] produces them.
    pub columns: &'static [&'static str],
    /// Column stamped with the write time, appended after `columns`.
    pub stamp_column: Option<&'static str>,
}

impl TableSpec {
    /// All columns an insert names, stamp column last.
    pub fn insert_columns(&self) -> Vec<&'static str> {
        let mut columns = self.columns.to_vec();
        columns.extend(self.stamp_column);
        columns
    }
}

/// A typed SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    OptText(Option<String>),
    Int(i32),
    BigInt(i64),
    OptBigInt(Option<i64>),
    Float(f64),
    OptFloat(Option<f64>),
    Bool(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

/// A strongly-typed output record of a job.
pub trait SnapshotRow {
    fn cells(&self) -> Vec<Cell>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Creates the table if it does not exist.
    async fn ensure_table(&self, table: &TableSpec) -> Result<()>;

    /// Removes every row from the table.
    async fn truncate(&self, table: &TableSpec) -> Result<()>;

    /// Appends rows whose cells follow [`TableSpec::insert_columns`].
    async fn insert_batch(&self, table: &TableSpec, rows: Vec<Vec<Cell>>) -> Result<u64>;

    /// Rows of `table` held in process, stamp cell included. `None` when the
    /// table lives in the database, or was never created here.
    async fn held_rows(&self, _table: &TableSpec) -> Result<Option<Vec<Vec<Cell>>>> {
        Ok(None)
    }
}
