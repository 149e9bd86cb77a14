//! Batched append of computed rows onto an already-truncated table.

use chrono::Local;
use tracing::debug;

use crate::error::JobError;
use crate::store::{Cell, SnapshotRow, SnapshotStore, TableSpec};

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

/// Rows actually sent per statement: the requested size, capped so that
/// `rows * width` stays within [`MAX_BIND_PARAMS`].
pub fn effective_batch_size(requested: usize, width: usize) -> usize {
    let cap = (MAX_BIND_PARAMS / width.max(1)).max(1);
    requested.clamp(1, cap)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub rows: usize,
    pub batches: usize,
}

/// Appends `rows` to `table` in fixed-size batches.
///
/// Never upserts. Each batch is stamped with the wall-clock time it is sent
/// when the table has a stamp column. On failure the error reports how many
/// rows earlier batches already persisted.
pub async fn write_snapshot<S, R>(
    store: &S,
    table: &TableSpec,
    rows: &[R],
    batch_size: usize,
) -> Result<WriteSummary, JobError>
where
    S: SnapshotStore + ?Sized,
    R: SnapshotRow,
{
    let width = table.insert_columns().len();
    let batch_size = effective_batch_size(batch_size, width);
    let mut summary = WriteSummary::default();

    for chunk in rows.chunks(batch_size) {
        let stamped_at = Local::now().naive_local();
        let mut batch = Vec::with_capacity(chunk.len());
        for row in chunk {
            let mut cells = row.cells();
            if cells.len() != table.columns.len() {
                return Err(JobError::RowShape {
                    table: table.name,
                    expected: table.columns.len(),
                    got: cells.len(),
                });
            }
            if table.stamp_column.is_some() {
                cells.push(Cell::Timestamp(stamped_at));
            }
            batch.push(cells);
        }

        let inserted = store
            .insert_batch(table, batch)
            .await
            .map_err(|source| JobError::Write {
                table: table.name,
                written: summary.rows,
                source,
            })?;
        if inserted != chunk.len() as u64 {
            return Err(JobError::Write {
                table: table.name,
                written: summary.rows,
                source: anyhow::anyhow!(
                    "store reported {inserted} rows for a batch of {}",
                    chunk.len()
                ),
            });
        }

        summary.rows += chunk.len();
        summary.batches += 1;
        debug!(table = table.name, written = summary.rows, "Batch written");
    }

    Ok(summary)
}
