//! Pickup counts per nearest named road, district, workday flag and hour.
//!
//! A point contributes only when a district polygon contains it and a road
//! carrying a non-empty `name` tag lies within [`MATCH_RADIUS_DEG`]; the
//! closest such road wins.

use anyhow::Context;
use sqlx::{FromRow, PgPool};

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};

pub const NAME: &str = "recommend_ways";

/// Road search radius in degrees, about 50m.
pub const MATCH_RADIUS_DEG: f64 = 0.0005;

pub const TABLE: TableSpec = TableSpec {
    name: "ads_recommend_pickup_ways",
    ddl: "CREATE TABLE IF NOT EXISTS ads_recommend_pickup_ways (
        is_workday BOOLEAN,
        stat_hour INT,
        way_name TEXT,
        district_name TEXT,
        pickup_count BIGINT,
        last_updated TIMESTAMP,
        PRIMARY KEY (is_workday, stat_hour, way_name, district_name)
    )",
    columns: &[
        "is_workday",
        "stat_hour",
        "way_name",
        "district_name",
        "pickup_count",
    ],
    stamp_column: Some("last_updated"),
};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PickupWay {
    pub is_workday: bool,
    pub stat_hour: i32,
    pub way_name: String,
    pub district_name: String,
    pub pickup_count: i64,
}

impl SnapshotRow for PickupWay {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Bool(self.is_workday),
            Cell::Int(self.stat_hour),
            Cell::Text(self.way_name.clone()),
            Cell::Text(self.district_name.clone()),
            Cell::BigInt(self.pickup_count),
        ]
    }
}

pub async fn fetch_pickup_ways(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Vec<PickupWay>> {
    let sql = format!(
        "WITH pts AS (
            SELECT ST_SetSRID(ST_Point(p.lon, p.lat), 4326) AS geom,
                   to_timestamp(p.tms) AT TIME ZONE $1 AS local_ts
            FROM {points} p
            WHERE p.lon IS NOT NULL AND p.lat IS NOT NULL AND p.tms IS NOT NULL
        )
        SELECT EXTRACT(ISODOW FROM pts.local_ts) BETWEEN 1 AND 5 AS is_workday,
               EXTRACT(HOUR FROM pts.local_ts)::int AS stat_hour,
               r.way_name,
               d.name::text AS district_name,
               COUNT(*)::bigint AS pickup_count
        FROM pts
        JOIN {districts} d
          ON ST_Within(pts.geom, d.geometry)
        JOIN LATERAL (
            SELECT rd.tags::jsonb ->> 'name' AS way_name
            FROM {roads} rd
            WHERE NULLIF(rd.tags::jsonb ->> 'name', '') IS NOT NULL
              AND ST_DWithin(pts.geom, rd.geom, $2)
            ORDER BY ST_Distance(pts.geom, rd.geom)
            LIMIT 1
        ) r ON true
        WHERE d.name IS NOT NULL
        GROUP BY 1, 2, 3, 4
        ORDER BY pickup_count DESC",
        points = config.sources.pickup_points,
        districts = config.sources.districts,
        roads = config.sources.roads,
    );

    sqlx::query_as::<_, PickupWay>(&sql)
        .bind(&config.timezone)
        .bind(MATCH_RADIUS_DEG)
        .fetch_all(pool)
        .await
        .context("matching pickups to nearest named road")
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || fetch_pickup_ways(&ctx.pool, &ctx.config),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_matches_layout() {
        let row = PickupWay {
            is_workday: true,
            stat_hour: 8,
            way_name: "Zhongshan Rd".to_string(),
            district_name: "Nangang".to_string(),
            pickup_count: 14,
        };
        let cells = row.cells();
        assert_eq!(cells.len(), TABLE.columns.len());
        assert_eq!(cells[0], Cell::Bool(true));
        assert_eq!(cells[4], Cell::BigInt(14));
    }
}
