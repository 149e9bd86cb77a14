use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Cell, SnapshotStore, TableSpec};

/// In-process tables keyed by table name.
///
/// Tables must be ensured before they can be truncated or written, the same
/// as in the database.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<&'static str, Vec<Vec<Cell>>>>,
    /// When set, the n-th `insert_batch` call (0-based) fails.
    fail_on_batch: Option<usize>,
    batches: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `n`-th batch insert returns an error.
    pub fn failing_on_batch(n: usize) -> Self {
        Self {
            fail_on_batch: Some(n),
            ..Self::default()
        }
    }

    /// Snapshot of a table's rows, `None` if it was never created.
    pub fn rows(&self, table: &str) -> Option<Vec<Vec<Cell>>> {
        self.tables.lock().ok()?.get(table).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.rows(table).is_some()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn ensure_table(&self, table: &TableSpec) -> Result<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        tables.entry(table.name).or_default();
        Ok(())
    }

    async fn truncate(&self, table: &TableSpec) -> Result<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        match tables.get_mut(table.name) {
            Some(rows) => rows.clear(),
            None => bail!("relation \"{}\" does not exist", table.name),
        }
        Ok(())
    }

    async fn insert_batch(&self, table: &TableSpec, rows: Vec<Vec<Cell>>) -> Result<u64> {
        {
            let mut batches = self
                .batches
                .lock()
                .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
            let n = *batches;
            *batches += 1;
            if self.fail_on_batch == Some(n) {
                bail!("injected failure on batch {n}");
            }
        }

        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        let Some(target) = tables.get_mut(table.name) else {
            bail!("relation \"{}\" does not exist", table.name);
        };
        let width = table.insert_columns().len();
        if let Some(bad) = rows.iter().find(|row| row.len() != width) {
            bail!("expected {width} values per row, got {}", bad.len());
        }
        let count = rows.len() as u64;
        target.extend(rows);
        Ok(count)
    }

    async fn held_rows(&self, table: &TableSpec) -> Result<Option<Vec<Vec<Cell>>>> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        Ok(tables.get(table.name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: TableSpec = TableSpec {
        name: "t_memory",
        ddl: "",
        columns: &["a", "b"],
        stamp_column: None,
    };

    #[tokio::test]
    async fn test_missing_table_is_an_error() {
        let store = MemoryStore::new();
        assert!(store.truncate(&TABLE).await.is_err());
        assert!(
            store
                .insert_batch(&TABLE, vec![vec![Cell::Int(1), Cell::Int(2)]])
                .await
                .is_err()
        );
        assert!(!store.has_table("t_memory"));
    }

    #[tokio::test]
    async fn test_rejects_rows_of_wrong_width() {
        let store = MemoryStore::new();
        store.ensure_table(&TABLE).await.unwrap();
        let err = store
            .insert_batch(&TABLE, vec![vec![Cell::Int(1)]])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 2 values"));
        assert_eq!(store.row_count("t_memory"), 0);
    }

    #[tokio::test]
    async fn test_ensure_keeps_existing_rows() {
        let store = MemoryStore::new();
        store.ensure_table(&TABLE).await.unwrap();
        store
            .insert_batch(&TABLE, vec![vec![Cell::Int(1), Cell::Int(2)]])
            .await
            .unwrap();
        store.ensure_table(&TABLE).await.unwrap();
        assert_eq!(store.row_count("t_memory"), 1);
    }
}
