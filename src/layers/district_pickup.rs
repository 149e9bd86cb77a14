//! Pickup counts per administrative district by point-in-polygon containment.
//!
//! Points that no polygon contains are left out of every district's count and
//! only reported as a diagnostic, together with a comparison of the point
//! extent against the district extent.

use anyhow::Context;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};

pub const NAME: &str = "district_pickup";

pub const TABLE: TableSpec = TableSpec {
    name: "tdm_district_pickup_analysis",
    ddl: "CREATE TABLE IF NOT EXISTS tdm_district_pickup_analysis (
        pac TEXT PRIMARY KEY,
        district_name TEXT,
        city TEXT,
        province TEXT,
        pickup_count BIGINT
    )",
    columns: &["pac", "district_name", "city", "province", "pickup_count"],
    stamp_column: None,
};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DistrictPickup {
    pub pac: String,
    pub district_name: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub pickup_count: i64,
}

impl SnapshotRow for DistrictPickup {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.pac.clone()),
            Cell::OptText(self.district_name.clone()),
            Cell::OptText(self.city.clone()),
            Cell::OptText(self.province.clone()),
            Cell::BigInt(self.pickup_count),
        ]
    }
}

/// Axis-aligned bounds; all `None` for an empty table.
#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct Extent {
    pub min_lon: Option<f64>,
    pub max_lon: Option<f64>,
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
}

impl Extent {
    /// True when `other` lies entirely inside `self`. An empty `other` is
    /// always contained; an empty `self` contains nothing else.
    pub fn contains(&self, other: &Extent) -> bool {
        let (Some(o_min_lon), Some(o_max_lon), Some(o_min_lat), Some(o_max_lat)) =
            (other.min_lon, other.max_lon, other.min_lat, other.max_lat)
        else {
            return true;
        };
        let (Some(min_lon), Some(max_lon), Some(min_lat), Some(max_lat)) =
            (self.min_lon, self.max_lon, self.min_lat, self.max_lat)
        else {
            return false;
        };
        min_lon <= o_min_lon && o_max_lon <= max_lon && min_lat <= o_min_lat && o_max_lat <= max_lat
    }
}

pub async fn fetch_district_pickups(
    pool: &PgPool,
    config: &PipelineConfig,
) -> anyhow::Result<Vec<DistrictPickup>> {
    let sql = format!(
        "SELECT d.pac::text AS pac,
                MIN(d.name::text) AS district_name,
                MIN(d.city::text) AS city,
                MIN(d.province::text) AS province,
                COUNT(p.geom)::bigint AS pickup_count
         FROM {districts} d
         LEFT JOIN (
             SELECT ST_SetSRID(ST_Point(lon, lat), 4326) AS geom
             FROM {points}
             WHERE lon IS NOT NULL AND lat IS NOT NULL
         ) p ON ST_Within(p.geom, d.geometry)
         WHERE d.pac IS NOT NULL
         GROUP BY d.pac::text
         ORDER BY pickup_count DESC",
        districts = config.sources.districts,
        points = config.sources.pickup_points,
    );
    sqlx::query_as::<_, DistrictPickup>(&sql)
        .fetch_all(pool)
        .await
        .context("counting pickups per district")
}

/// Points with a position that no district polygon contains.
pub async fn count_unmatched(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<i64> {
    let sql = format!(
        "SELECT COUNT(*)::bigint
         FROM {points} p
         WHERE p.lon IS NOT NULL AND p.lat IS NOT NULL
           AND NOT EXISTS (
               SELECT 1 FROM {districts} d
               WHERE ST_Within(ST_SetSRID(ST_Point(p.lon, p.lat), 4326), d.geometry)
           )",
        points = config.sources.pickup_points,
        districts = config.sources.districts,
    );
    sqlx::query_scalar::<_, i64>(&sql)
        .fetch_one(pool)
        .await
        .context("counting pickups outside every district")
}

pub async fn fetch_point_extent(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Extent> {
    let sql = format!(
        "SELECT MIN(lon)::float8 AS min_lon, MAX(lon)::float8 AS max_lon,
                MIN(lat)::float8 AS min_lat, MAX(lat)::float8 AS max_lat
         FROM {points}",
        points = config.sources.pickup_points,
    );
    sqlx::query_as::<_, Extent>(&sql)
        .fetch_one(pool)
        .await
        .context("reading pickup extent")
}

pub async fn fetch_district_extent(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<Extent> {
    let sql = format!(
        "SELECT ST_XMin(e.ext)::float8 AS min_lon, ST_XMax(e.ext)::float8 AS max_lon,
                ST_YMin(e.ext)::float8 AS min_lat, ST_YMax(e.ext)::float8 AS max_lat
         FROM (SELECT ST_Extent(geometry) AS ext FROM {districts}) e",
        districts = config.sources.districts,
    );
    sqlx::query_as::<_, Extent>(&sql)
        .fetch_one(pool)
        .await
        .context("reading district extent")
}

async fn log_diagnostics(pool: &PgPool, config: &PipelineConfig) -> anyhow::Result<()> {
    let points = fetch_point_extent(pool, config).await?;
    let districts = fetch_district_extent(pool, config).await?;
    if !districts.contains(&points) {
        warn!(?points, ?districts, "Pickup extent exceeds district extent");
    }
    let unmatched = count_unmatched(pool, config).await?;
    info!(unmatched, "Pickups outside every district");
    Ok(())
}

pub async fn run(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAME,
        &TABLE,
        ctx.config.batch_size,
        || async {
            log_diagnostics(&ctx.pool, &ctx.config).await?;
            fetch_district_pickups(&ctx.pool, &ctx.config).await
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Extent {
        Extent {
            min_lon: Some(min_lon),
            max_lon: Some(max_lon),
            min_lat: Some(min_lat),
            max_lat: Some(max_lat),
        }
    }

    const EMPTY: Extent = Extent {
        min_lon: None,
        max_lon: None,
        min_lat: None,
        max_lat: None,
    };

    #[test]
    fn test_extent_containment() {
        let districts = extent(125.7, 127.0, 45.3, 46.1);
        assert!(districts.contains(&extent(126.5, 126.8, 45.6, 45.9)));
        assert!(!districts.contains(&extent(126.5, 127.2, 45.6, 45.9)));
        assert!(districts.contains(&EMPTY));
        assert!(!EMPTY.contains(&districts));
    }

    #[test]
    fn test_row_matches_layout() {
        let row = DistrictPickup {
            pac: "230103".to_string(),
            district_name: Some("Nangang".to_string()),
            city: None,
            province: None,
            pickup_count: 2,
        };
        assert_eq!(row.cells().len(), TABLE.columns.len());
    }
}
