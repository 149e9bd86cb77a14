//! Pickup counts per 0.001° grid cell, local date and hour.

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::grid::{GRID_STEP, GridCell};
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};

pub const NAME: &str = "pickup_grid";

pub const TABLE: TableSpec = TableSpec {
    name: "dws_pickup_grid_stat",
    ddl: "CREATE TABLE IF NOT EXISTS dws_pickup_grid_stat (
        grid_id TEXT PRIMARY KEY,
        lon_center DOUBLE PRECISION,
        lat_center DOUBLE PRECISION,
        pickup_count BIGINT,
        stat_hour INT,
        stat_date DATE,
        last_updated TIMESTAMP
    )",
    columns: &[
        "grid_id",
        "lon_center",
        "lat_center",
        "pickup_count",
        "stat_hour",
        "stat_date",
    ],
    stamp_column: Some("last_updated"),
};

/// Pickups sharing floored coordinate indices, local date and hour.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CellCount {
    pub cell_x: i64,
    pub cell_y: i64,
    pub stat_date: NaiveDate,
    pub stat_hour: i32,
    pub pickup_count: i64,
}

/// A row of the grid statistic table. Also read back by the hot grid job.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct GridStat {
    pub grid_id: String,
    pub lon_center: f64,
    pub lat_center: f64,
    pub pickup_count: i64,
    pub stat_hour: i32,
    pub stat_date: NaiveDate,
}

impl GridStat {
    /// Rebuilds a row from cells in [`TABLE`] column order. Trailing cells,
    /// such as the write stamp, are ignored.
    pub fn from_cells(cells: &[Cell]) -> anyhow::Result<Self> {
        match cells {
            [
                Cell::Text(grid_id),
                Cell::Float(lon_center),
                Cell::Float(lat_center),
                Cell::BigInt(pickup_count),
                Cell::Int(stat_hour),
                Cell::Date(stat_date),
                ..,
            ] => Ok(Self {
                grid_id: grid_id.clone(),
                lon_center: *lon_center,
                lat_center: *lat_center,
                pickup_count: *pickup_count,
                stat_hour: *stat_hour,
                stat_date: *stat_date,
            }),
            other => anyhow::bail!("not a {} row: {other:?}", TABLE.name),
        }
    }
}

impl SnapshotRow for GridStat {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.grid_id.clone()),
            Cell::Float(self.lon_center),
            Cell::Float(self.lat_center),
            Cell::BigInt(self.pickup_count),
            Cell::Int(self.stat_hour),
            Cell::Date(self.stat_date),
        ]
    }
}

pub async fn fetch_cell_counts(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Vec<CellCount>> {
    let sql = format!(
        "WITH located AS (
            SELECT floor(p.lon / $2)::bigint AS cell_x,
                   floor(p.lat / $2)::bigint AS cell_y,
                   to_timestamp(p.tms) AT TIME ZONE $1 AS local_ts
            FROM {points} p
            WHERE p.lon IS NOT NULL AND p.lat IS NOT NULL AND p.tms IS NOT NULL
        )
        SELECT cell_x,
               cell_y,
               local_ts::date AS stat_date,
               EXTRACT(HOUR FROM local_ts)::int AS stat_hour,
               COUNT(*)::bigint AS pickup_count
        FROM located
        GROUP BY cell_x, cell_y, stat_date, stat_hour",
        points = config.sources.pickup_points,
    );

    sqlx::query_as::<_, CellCount>(&sql)
        .bind(&config.timezone)
        .bind(GRID_STEP)
        .fetch_all(pool)
        .await
        .context("aggregating pickups per grid cell")
}

/// Attaches the grid id and centroid to each counted cell.
pub fn grid_stats(cells: Vec<CellCount>) -> Vec<GridStat> {
    cells
        .into_iter()
        .map(|c| {
            let cell = GridCell::from_indices(c.cell_x, c.cell_y, c.stat_date, c.stat_hour as u32);
            let (lon_center, lat_center) = cell.centroid();
            GridStat {
                grid_id: cell.id(),
                lon_center,
                lat_center,
                pickup_count: c.pickup_count,
                stat_hour: c.stat_hour,
                stat_date: c.stat_date,
            }
        })
        .collect()
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || async {
            let cells = fetch_cell_counts(&ctx.pool, &ctx.config).await?;
            Ok::<_, anyhow::Error>(grid_stats(cells))
        },
    )
    .await
}
