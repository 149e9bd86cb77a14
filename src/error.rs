//! Failure taxonomy for a single job run.

use thiserror::Error;

/// Why a job stopped before its target table held a complete snapshot.
///
/// The variant names the stage that failed; the table is left in whatever
/// state that stage reached (empty after a failed compute, partially filled
/// after a failed write) until the next successful run replaces it.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("schema step failed for table '{table}'")]
    Schema {
        table: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("aggregation failed for table '{table}'")]
    Compute {
        table: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("batch insert into '{table}' failed after {written} rows")]
    Write {
        table: &'static str,
        written: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("row for '{table}' has {got} cells, table layout expects {expected}")]
    RowShape {
        table: &'static str,
        expected: usize,
        got: usize,
    },
}

impl JobError {
    pub fn table(&self) -> &'static str {
        match self {
            JobError::Schema { table, .. }
            | JobError::Compute { table, .. }
            | JobError::Write { table, .. }
            | JobError::RowShape { table, .. } => table,
        }
    }
}
