//! Read API over the derived tables.
//!
//! Every read is a filter-and-sort over a table the pipeline may be replacing
//! at the same moment; a (workday, hour) with no rows yields an empty list.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::coords::wgs84_to_gcj02;
use crate::layers::{hot_grids, recommend_ways, road_popularity};

/// Grid centroid in GCJ-02 with its pickup count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatPoint {
    pub lon: f64,
    pub lat: f64,
    pub intensity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PickupRecommendation {
    pub way_name: String,
    pub district_name: String,
    pub pickup_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PopularRoad {
    pub road_name: String,
    pub frequency: i64,
    pub popularity_tag: String,
}

#[derive(FromRow)]
struct StoredCentroid {
    lon: f64,
    lat: f64,
    intensity: i64,
}

impl From<StoredCentroid> for HeatPoint {
    fn from(row: StoredCentroid) -> Self {
        let (lon, lat) = wgs84_to_gcj02(row.lon, row.lat);
        HeatPoint {
            lon,
            lat,
            intensity: row.intensity,
        }
    }
}

pub async fn hotspots(pool: &PgPool, workday: bool, hour: i32) -> Result<Vec<HeatPoint>> {
    let sql = format!(
        "SELECT lon_center AS lon, lat_center AS lat, pickup_count AS intensity
         FROM {table}
         WHERE is_workday = $1 AND stat_hour = $2",
        table = hot_grids::TABLE.name,
    );
    let rows = sqlx::query_as::<_, StoredCentroid>(&sql)
        .bind(workday)
        .bind(hour)
        .fetch_all(pool)
        .await
        .context("reading hot grids")?;
    debug!(workday, hour, rows = rows.len(), "Hotspots read");
    Ok(rows.into_iter().map(HeatPoint::from).collect())
}

pub async fn recommendations(
    pool: &PgPool,
    workday: bool,
    hour: i32,
    limit: i64,
) -> Result<Vec<PickupRecommendation>> {
    let sql = format!(
        "SELECT way_name, district_name, pickup_count
         FROM {table}
         WHERE is_workday = $1 AND stat_hour = $2
         ORDER BY pickup_count DESC
         LIMIT $3",
        table = recommend_ways::TABLE.name,
    );
    sqlx::query_as::<_, PickupRecommendation>(&sql)
        .bind(workday)
        .bind(hour)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("reading pickup recommendations")
}

pub async fn popular_roads(pool: &PgPool, limit: i64) -> Result<Vec<PopularRoad>> {
    let sql = format!(
        "SELECT road_name, frequency, popularity_tag
         FROM {table}
         ORDER BY frequency DESC
         LIMIT $1",
        table = road_popularity::NAMED_TABLE.name,
    );
    sqlx::query_as::<_, PopularRoad>(&sql)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("reading popular roads")
}

/// Writes roads as CSV with a UTF-8 byte-order mark, so spreadsheet tools
/// pick the right encoding for non-ASCII road names. Overwrites `path`.
pub fn export_popular_roads_csv(path: impl AsRef<Path>, roads: &[PopularRoad]) -> Result<()> {
    let path = path.as_ref();
    let mut file =
        File::create(path).with_context(|| format!("creating '{}'", path.display()))?;
    file.write_all(b"\xEF\xBB\xBF")?;

    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for road in roads {
        writer.serialize(road)?;
    }
    // serialize() only emits the header with the first record
    if roads.is_empty() {
        writer.write_record(["road_name", "frequency", "popularity_tag"])?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = roads.len(), "Popular roads exported");
    Ok(())
}
