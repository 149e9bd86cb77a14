//! Trip duration profile per device.

use anyhow::Context;
use sqlx::{FromRow, PgPool};

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};

pub const NAME: &str = "driver_profile";

pub const TABLE: TableSpec = TableSpec {
    name: "tdm_driver_trip_profile",
    ddl: "CREATE TABLE IF NOT EXISTS tdm_driver_trip_profile (
        devid TEXT PRIMARY KEY,
        trip_count BIGINT,
        avg_travel_time DOUBLE PRECISION,
        max_travel_time BIGINT,
        min_travel_time BIGINT,
        total_travel_time BIGINT
    )",
    columns: &[
        "devid",
        "trip_count",
        "avg_travel_time",
        "max_travel_time",
        "min_travel_time",
        "total_travel_time",
    ],
    stamp_column: None,
};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DriverTripProfile {
    pub devid: String,
    pub trip_count: i64,
    pub avg_travel_time: Option<f64>,
    pub max_travel_time: Option<i64>,
    pub min_travel_time: Option<i64>,
    pub total_travel_time: Option<i64>,
}

impl SnapshotRow for DriverTripProfile {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.devid.clone()),
            Cell::BigInt(self.trip_count),
            Cell::OptFloat(self.avg_travel_time),
            Cell::OptBigInt(self.max_travel_time),
            Cell::OptBigInt(self.min_travel_time),
            Cell::OptBigInt(self.total_travel_time),
        ]
    }
}

pub async fn fetch_profiles(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Vec<DriverTripProfile>> {
    let sql = format!(
        "SELECT devid::text AS devid,
                COUNT(*)::bigint AS trip_count,
                AVG(travel_time)::float8 AS avg_travel_time,
                MAX(travel_time)::bigint AS max_travel_time,
                MIN(travel_time)::bigint AS min_travel_time,
                SUM(travel_time)::bigint AS total_travel_time
         FROM {trip_info}
         WHERE devid IS NOT NULL
         GROUP BY devid::text",
        trip_info = config.sources.trip_info,
    );
    sqlx::query_as::<_, DriverTripProfile>(&sql)
        .fetch_all(pool)
        .await
        .context("profiling trips per device")
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || fetch_profiles(&ctx.pool, &ctx.config),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untimed_device_keeps_null_durations() {
        let row = DriverTripProfile {
            devid: "D17".to_string(),
            trip_count: 2,
            avg_travel_time: None,
            max_travel_time: None,
            min_travel_time: None,
            total_travel_time: None,
        };
        let cells = row.cells();
        assert_eq!(cells.len(), TABLE.columns.len());
        assert_eq!(cells[1], Cell::BigInt(2));
        assert_eq!(cells[2], Cell::OptFloat(None));
    }
}
