//! Lifecycle of one job run: ensure table, truncate, compute, write.

use serde::Serialize;
use std::future::Future;
use std::time::Instant;
use tracing::{error, info};

use crate::error::JobError;
use crate::store::{SnapshotRow, SnapshotStore, TableSpec};
use crate::writer::write_snapshot;

/// Outcome of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub table: &'static str,
    pub rows: usize,
    pub batches: usize,
    pub compute_ms: u128,
    pub elapsed_ms: u128,
}

/// Replaces the contents of `table` with the rows produced by `compute`.
///
/// The table is truncated before `compute` runs, so a failing computation
/// leaves it empty rather than holding the previous snapshot. A failing write
/// leaves whatever batches were already appended; the next successful run
/// replaces them.
#[tracing::instrument(skip_all, fields(job = name, table = table.name))]
pub async fn run_job<S, F, Fut, R>(
    store: &S,
    name: &'static str,
    table: &TableSpec,
    batch_size: usize,
    compute: F,
) -> Result<JobReport, JobError>
where
    S: SnapshotStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<R>>>,
    R: SnapshotRow,
{
    let started = Instant::now();
    info!("Job started");

    store
        .ensure_table(table)
        .await
        .map_err(|source| JobError::Schema {
            table: table.name,
            source,
        })?;
    store
        .truncate(table)
        .await
        .map_err(|source| JobError::Schema {
            table: table.name,
            source,
        })?;

    let compute_started = Instant::now();
    let rows = compute().await.map_err(|source| JobError::Compute {
        table: table.name,
        source,
    })?;
    let compute_ms = compute_started.elapsed().as_millis();
    info!(rows = rows.len(), compute_ms, "Aggregates computed");

    let summary = match write_snapshot(store, table, &rows, batch_size).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Snapshot write failed");
            return Err(e);
        }
    };

    let report = JobReport {
        job: name,
        table: table.name,
        rows: summary.rows,
        batches: summary.batches,
        compute_ms,
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        rows = report.rows,
        batches = report.batches,
        elapsed_ms = report.elapsed_ms,
        "Job finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Cell, MemoryStore};
    use async_trait::async_trait;
    use std::time::Duration;

    const TABLE: TableSpec = TableSpec {
        name: "t_runner",
        ddl: "",
        columns: &["n"],
        stamp_column: None,
    };

    struct N(i64);

    impl SnapshotRow for N {
        fn cells(&self) -> Vec<Cell> {
            vec![Cell::BigInt(self.0)]
        }
    }

    #[tokio::test]
    async fn test_creates_table_and_writes_rows() {
        let store = MemoryStore::new();
        let report = run_job(&store, "t", &TABLE, 2, || async {
            Ok(vec![N(1), N(2), N(3)])
        })
        .await
        .unwrap();

        assert_eq!(report.rows, 3);
        assert_eq!(report.batches, 2);
        assert_eq!(report.table, "t_runner");
        assert_eq!(store.row_count("t_runner"), 3);
    }

    #[tokio::test]
    async fn test_rerun_replaces_instead_of_appending() {
        let store = MemoryStore::new();
        for _ in 0..2 {
            run_job(&store, "t", &TABLE, 10, || async { Ok(vec![N(1), N(2)]) })
                .await
                .unwrap();
        }
        assert_eq!(
            store.rows("t_runner").unwrap(),
            vec![vec![Cell::BigInt(1)], vec![Cell::BigInt(2)]]
        );
    }

    #[tokio::test]
    async fn test_compute_failure_leaves_table_empty() {
        let store = MemoryStore::new();
        run_job(&store, "t", &TABLE, 10, || async { Ok(vec![N(1)]) })
            .await
            .unwrap();

        let err = run_job(&store, "t", &TABLE, 10, || async {
            Err::<Vec<N>, _>(anyhow::anyhow!("relation does not exist"))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, JobError::Compute { .. }));
        assert!(store.has_table("t_runner"));
        assert_eq!(store.row_count("t_runner"), 0);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let store = MemoryStore::new();
        let report = run_job(&store, "t", &TABLE, 10, || async { Ok(Vec::<N>::new()) })
            .await
            .unwrap();
        assert_eq!(report.rows, 0);
        assert_eq!(report.batches, 0);
    }

    /// Memory store whose schema steps take a fixed time.
    struct SlowSchema {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl SnapshotStore for SlowSchema {
        async fn ensure_table(&self, table: &TableSpec) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.ensure_table(table).await
        }

        async fn truncate(&self, table: &TableSpec) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.truncate(table).await
        }

        async fn insert_batch(&self, table: &TableSpec, rows: Vec<Vec<Cell>>) -> anyhow::Result<u64> {
            self.inner.insert_batch(table, rows).await
        }
    }

    #[tokio::test]
    async fn test_compute_time_excludes_schema_steps() {
        let store = SlowSchema {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(60),
        };
        let report = run_job(&store, "t", &TABLE, 10, || async { Ok(vec![N(1)]) })
            .await
            .unwrap();

        assert!(report.elapsed_ms >= 120, "elapsed {}", report.elapsed_ms);
        assert!(report.compute_ms < 60, "compute {}", report.compute_ms);
    }
}
