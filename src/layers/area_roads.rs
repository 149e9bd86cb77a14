//! One row per pickup with its containing district and recorded road.

use anyhow::Context;
use sqlx::{FromRow, PgPool};

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};

pub const NAME: &str = "area_roads";

pub const TABLE: TableSpec = TableSpec {
    name: "tdm_areas_roads",
    ddl: "CREATE TABLE IF NOT EXISTS tdm_areas_roads (
        node_id BIGINT PRIMARY KEY,
        devid TEXT,
        lon DOUBLE PRECISION,
        lat DOUBLE PRECISION,
        district_code TEXT,
        district_name TEXT,
        way_id BIGINT
    )",
    columns: &[
        "node_id",
        "devid",
        "lon",
        "lat",
        "district_code",
        "district_name",
        "way_id",
    ],
    stamp_column: None,
};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AreaRoad {
    pub node_id: i64,
    pub devid: Option<String>,
    pub lon: f64,
    pub lat: f64,
    pub district_code: Option<String>,
    pub district_name: Option<String>,
    pub way_id: Option<i64>,
}

impl SnapshotRow for AreaRoad {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::BigInt(self.node_id),
            Cell::OptText(self.devid.clone()),
            Cell::Float(self.lon),
            Cell::Float(self.lat),
            Cell::OptText(self.district_code.clone()),
            Cell::OptText(self.district_name.clone()),
            Cell::OptBigInt(self.way_id),
        ]
    }
}

/// Pickups inside some district. A point on overlapping polygons keeps the
/// lowest district code.
pub async fn fetch_area_roads(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Vec<AreaRoad>> {
    let sql = format!(
        "SELECT DISTINCT ON (p.traj_id)
                p.traj_id::bigint AS node_id,
                p.devid::text AS devid,
                p.lon::float8 AS lon,
                p.lat::float8 AS lat,
                d.pac::text AS district_code,
                d.name::text AS district_name,
                p.way_id::bigint AS way_id
         FROM {points} p
         JOIN {districts} d
           ON ST_Within(ST_SetSRID(ST_Point(p.lon, p.lat), 4326), d.geometry)
         WHERE p.traj_id IS NOT NULL
         ORDER BY p.traj_id, d.pac::text",
        points = config.sources.pickup_points,
        districts = config.sources.districts,
    );
    sqlx::query_as::<_, AreaRoad>(&sql)
        .fetch_all(pool)
        .await
        .context("joining pickups to districts")
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || fetch_area_roads(&ctx.pool, &ctx.config),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_matches_layout() {
        let row = AreaRoad {
            node_id: 9001,
            devid: Some("D3".to_string()),
            lon: 126.63,
            lat: 45.75,
            district_code: Some("230102".to_string()),
            district_name: None,
            way_id: None,
        };
        let cells = row.cells();
        assert_eq!(cells.len(), TABLE.columns.len());
        assert_eq!(cells[0], Cell::BigInt(9001));
        assert_eq!(cells[6], Cell::OptBigInt(None));
    }
}
