//! Heat level of every grid cell relative to the whole grid statistic table.

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use super::JobContext;
use super::pickup_grid::{self, GridStat};
use crate::error::JobError;
use crate::quantile::{HeatLevel, HeatThresholds};
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};
use crate::temporal::is_workday;

pub const NAME: &str = "hot_grids";

pub const TABLE: TableSpec = TableSpec {
    name: "tdm_hot_grids",
    ddl: "CREATE TABLE IF NOT EXISTS tdm_hot_grids (
        grid_id TEXT,
        heat_level TEXT,
        pickup_count BIGINT,
        lon_center DOUBLE PRECISION,
        lat_center DOUBLE PRECISION,
        stat_hour INT,
        is_workday BOOLEAN,
        last_updated TIMESTAMP,
        PRIMARY KEY (grid_id, stat_hour, is_workday)
    )",
    columns: &[
        "grid_id",
        "heat_level",
        "pickup_count",
        "lon_center",
        "lat_center",
        "stat_hour",
        "is_workday",
    ],
    stamp_column: Some("last_updated"),
};

#[derive(Debug, Clone, PartialEq)]
pub struct HotGrid {
    pub grid_id: String,
    pub heat_level: HeatLevel,
    pub pickup_count: i64,
    pub lon_center: f64,
    pub lat_center: f64,
    pub stat_hour: i32,
    pub is_workday: bool,
}

impl SnapshotRow for HotGrid {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.grid_id.clone()),
            Cell::Text(self.heat_level.to_string()),
            Cell::BigInt(self.pickup_count),
            Cell::Float(self.lon_center),
            Cell::Float(self.lat_center),
            Cell::Int(self.stat_hour),
            Cell::Bool(self.is_workday),
        ]
    }
}

/// Reads the grid statistic table as written by the summary layer.
pub async fn fetch_grid_stats(pool: &PgPool) -> anyhow::Result<Vec<GridStat>> {
    let sql = format!(
        "SELECT grid_id,
                lon_center::float8 AS lon_center,
                lat_center::float8 AS lat_center,
                pickup_count::bigint AS pickup_count,
                stat_hour::int AS stat_hour,
                stat_date
         FROM {}
         WHERE grid_id IS NOT NULL",
        pickup_grid::TABLE.name
    );
    sqlx::query_as::<_, GridStat>(&sql)
        .fetch_all(pool)
        .await
        .context("reading grid statistics")
}

/// Grid statistics written this round when the summary table is held in
/// process (dry runs), otherwise the stored table.
pub async fn load_grid_stats(ctx: &JobContext) -> anyhow::Result<Vec<GridStat>> {
    match ctx.store.held_rows(&pickup_grid::TABLE).await? {
        Some(rows) => rows.iter().map(|cells| GridStat::from_cells(cells)).collect(),
        None => fetch_grid_stats(&ctx.pool).await,
    }
}

/// Labels each grid against the 50th/75th continuous percentiles of all
/// grids' counts. Returns the thresholds used, or `None` with no rows for an
/// empty table.
pub fn label_hot_grids(stats: Vec<GridStat>) -> (Option<HeatThresholds>, Vec<HotGrid>) {
    let counts: Vec<i64> = stats.iter().map(|s| s.pickup_count).collect();
    let Some(thresholds) = HeatThresholds::from_counts(&counts) else {
        return (None, Vec::new());
    };

    let rows = stats
        .into_iter()
        .map(|s| HotGrid {
            heat_level: thresholds.level(s.pickup_count),
            is_workday: is_workday(s.stat_date),
            grid_id: s.grid_id,
            pickup_count: s.pickup_count,
            lon_center: s.lon_center,
            lat_center: s.lat_center,
            stat_hour: s.stat_hour,
        })
        .collect();
    (Some(thresholds), rows)
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || async {
            let stats = load_grid_stats(ctx).await?;
            let (thresholds, rows) = label_hot_grids(stats);
            if let Some(t) = thresholds {
                info!(p50 = t.p50, p75 = t.p75, "Heat thresholds");
            }
            Ok::<_, anyhow::Error>(rows)
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stat(id: &str, count: i64, date: NaiveDate) -> GridStat {
        GridStat {
            grid_id: id.to_string(),
            lon_center: 126.6775,
            lat_center: 45.7585,
            pickup_count: count,
            stat_hour: 8,
            stat_date: date,
        }
    }

    #[test]
    fn test_levels_and_workday_flag() {
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let (thresholds, rows) = label_hot_grids(vec![
            stat("a", 4, tuesday),
            stat("b", 3, tuesday),
            stat("c", 2, saturday),
            stat("d", 1, saturday),
        ]);

        let thresholds = thresholds.unwrap();
        assert_eq!((thresholds.p50, thresholds.p75), (2.5, 3.25));

        let summary: Vec<_> = rows
            .iter()
            .map(|r| (r.grid_id.as_str(), r.heat_level, r.is_workday))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", HeatLevel::High, true),
                ("b", HeatLevel::Medium, true),
                ("c", HeatLevel::Low, false),
                ("d", HeatLevel::Low, false),
            ]
        );
    }

    #[test]
    fn test_empty_table_yields_no_rows() {
        let (thresholds, rows) = label_hot_grids(Vec::new());
        assert!(thresholds.is_none());
        assert!(rows.is_empty());
    }
}
