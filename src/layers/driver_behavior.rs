//! Per-driver trip totals, duration statistics and day-part activity.

use anyhow::Context;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};
use crate::temporal::{DayPart, DayPartCounts};

pub const NAME: &str = "driver_behavior";

pub const TABLE: TableSpec = TableSpec {
    name: "tdm_driver_behavior_analysis",
    ddl: "CREATE TABLE IF NOT EXISTS tdm_driver_behavior_analysis (
        driver_id TEXT PRIMARY KEY,
        total_trips BIGINT,
        avg_trip_duration BIGINT,
        max_trip_duration BIGINT,
        min_trip_duration BIGINT,
        total_driving_time BIGINT,
        morning_trips BIGINT,
        afternoon_trips BIGINT,
        evening_trips BIGINT,
        night_trips BIGINT,
        last_updated TIMESTAMP
    )",
    columns: &[
        "driver_id",
        "total_trips",
        "avg_trip_duration",
        "max_trip_duration",
        "min_trip_duration",
        "total_driving_time",
        "morning_trips",
        "afternoon_trips",
        "evening_trips",
        "night_trips",
    ],
    stamp_column: Some("last_updated"),
};

/// Trips of one driver starting in one local hour.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DriverHour {
    pub driver_id: String,
    pub start_hour: i32,
    pub trips: i64,
    /// Trips with a recorded travel time; the duration columns cover only these.
    pub timed_trips: i64,
    pub total_time: Option<i64>,
    pub max_time: Option<i64>,
    pub min_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverBehavior {
    pub driver_id: String,
    pub total_trips: i64,
    pub avg_trip_duration: Option<i64>,
    pub max_trip_duration: Option<i64>,
    pub min_trip_duration: Option<i64>,
    pub total_driving_time: Option<i64>,
    pub day_parts: DayPartCounts,
}

impl SnapshotRow for DriverBehavior {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.driver_id.clone()),
            Cell::BigInt(self.total_trips),
            Cell::OptBigInt(self.avg_trip_duration),
            Cell::OptBigInt(self.max_trip_duration),
            Cell::OptBigInt(self.min_trip_duration),
            Cell::OptBigInt(self.total_driving_time),
            Cell::BigInt(self.day_parts.morning),
            Cell::BigInt(self.day_parts.afternoon),
            Cell::BigInt(self.day_parts.evening),
            Cell::BigInt(self.day_parts.night),
        ]
    }
}

pub async fn fetch_driver_hours(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Vec<DriverHour>> {
    let sql = format!(
        "SELECT devid::text AS driver_id,
                EXTRACT(HOUR FROM to_timestamp(begin_time) AT TIME ZONE $1)::int AS start_hour,
                COUNT(*)::bigint AS trips,
                COUNT(travel_time)::bigint AS timed_trips,
                SUM(travel_time)::bigint AS total_time,
                MAX(travel_time)::bigint AS max_time,
                MIN(travel_time)::bigint AS min_time
         FROM {trip_info}
         WHERE devid IS NOT NULL AND begin_time IS NOT NULL
         GROUP BY 1, 2",
        trip_info = config.sources.trip_info,
    );
    sqlx::query_as::<_, DriverHour>(&sql)
        .bind(&config.timezone)
        .fetch_all(pool)
        .await
        .context("grouping trips by driver and start hour")
}

/// Folds hourly groups into one row per driver, ordered by driver id.
///
/// The average is the total over timed trips, truncated toward zero.
pub fn summarize(hours: Vec<DriverHour>) -> Vec<DriverBehavior> {
    #[derive(Default)]
    struct Acc {
        trips: i64,
        timed: i64,
        total: Option<i64>,
        max: Option<i64>,
        min: Option<i64>,
        parts: DayPartCounts,
    }

    let mut drivers: BTreeMap<String, Acc> = BTreeMap::new();
    for h in hours {
        let acc = drivers.entry(h.driver_id).or_default();
        acc.trips += h.trips;
        acc.timed += h.timed_trips;
        acc.total = merge(acc.total, h.total_time, |a, b| a + b);
        acc.max = merge(acc.max, h.max_time, i64::max);
        acc.min = merge(acc.min, h.min_time, i64::min);
        if let Some(part) = u32::try_from(h.start_hour).ok().and_then(DayPart::from_hour) {
            acc.parts.add(part, h.trips);
        }
    }

    drivers
        .into_iter()
        .map(|(driver_id, acc)| DriverBehavior {
            driver_id,
            total_trips: acc.trips,
            avg_trip_duration: acc.total.filter(|_| acc.timed > 0).map(|t| t / acc.timed),
            max_trip_duration: acc.max,
            min_trip_duration: acc.min,
            total_driving_time: acc.total,
            day_parts: acc.parts,
        })
        .collect()
}

fn merge(a: Option<i64>, b: Option<i64>, f: impl Fn(i64, i64) -> i64) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || async {
            let hours = fetch_driver_hours(&ctx.pool, &ctx.config).await?;
            Ok::<_, anyhow::Error>(summarize(hours))
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(driver: &str, start_hour: i32, trips: i64, times: &[i64]) -> DriverHour {
        DriverHour {
            driver_id: driver.to_string(),
            start_hour,
            trips,
            timed_trips: times.len() as i64,
            total_time: (!times.is_empty()).then(|| times.iter().sum()),
            max_time: times.iter().copied().max(),
            min_time: times.iter().copied().min(),
        }
    }

    #[test]
    fn test_summarize_folds_hours_per_driver() {
        let rows = summarize(vec![
            hour("d1", 8, 2, &[600, 900]),
            hour("d1", 23, 1, &[301]),
            hour("d1", 2, 1, &[1200]),
            hour("d0", 14, 1, &[60]),
        ]);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].driver_id, "d0");
        assert_eq!(rows[0].day_parts.afternoon, 1);

        let d1 = &rows[1];
        assert_eq!(d1.total_trips, 4);
        assert_eq!(d1.total_driving_time, Some(3001));
        assert_eq!(d1.avg_trip_duration, Some(750));
        assert_eq!(d1.max_trip_duration, Some(1200));
        assert_eq!(d1.min_trip_duration, Some(301));
        assert_eq!(
            d1.day_parts,
            DayPartCounts {
                morning: 2,
                afternoon: 0,
                evening: 0,
                night: 2,
            }
        );
    }

    #[test]
    fn test_untimed_trips_count_but_have_no_duration() {
        let rows = summarize(vec![hour("d2", 19, 3, &[])]);
        assert_eq!(rows[0].total_trips, 3);
        assert_eq!(rows[0].day_parts.evening, 3);
        assert_eq!(rows[0].avg_trip_duration, None);
        assert_eq!(rows[0].total_driving_time, None);
    }

    #[test]
    fn test_day_parts_sum_to_total_trips() {
        let rows = summarize((0..24).map(|h| hour("d3", h, 2, &[10])).collect());
        assert_eq!(rows[0].day_parts.total(), rows[0].total_trips);
    }
}
