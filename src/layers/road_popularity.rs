//! Road traversal frequency with quartile popularity tags.
//!
//! Every appearance of a road id in a trip's road sequence counts once. Tags
//! are cut from the whole batch of traversed roads; the named variant then
//! keeps only roads whose `name` tag is set, without re-cutting.

use anyhow::Context;
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;

use super::JobContext;
use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::quantile::{PopularityTag, tag_by_rank};
use crate::runner::{JobReport, run_job};
use crate::store::{Cell, SnapshotRow, TableSpec};

pub const NAME: &str = "road_popularity";
pub const NAMED_NAME: &str = "road_popularity_named";

/// Keyed by road id; unnamed roads included.
pub const TABLE: TableSpec = TableSpec {
    name: "tdm_road_popularity",
    ddl: "CREATE TABLE IF NOT EXISTS tdm_road_popularity (
        way_id BIGINT PRIMARY KEY,
        frequency BIGINT,
        popularity_tag VARCHAR(20)
    )",
    columns: &["way_id", "frequency", "popularity_tag"],
    stamp_column: None,
};

/// Denormalised by road name for the reporting endpoints. Several road ids
/// can share one name, so there is no key.
pub const NAMED_TABLE: TableSpec = TableSpec {
    name: "ads_road_popularity_statistics",
    ddl: "CREATE TABLE IF NOT EXISTS ads_road_popularity_statistics (
        road_name VARCHAR(255),
        frequency BIGINT,
        popularity_tag VARCHAR(20)
    )",
    columns: &["road_name", "frequency", "popularity_tag"],
    stamp_column: None,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct WayFrequency {
    pub way_id: i64,
    pub frequency: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadPopularity {
    pub way_id: i64,
    pub frequency: i64,
    pub tag: PopularityTag,
}

impl SnapshotRow for RoadPopularity {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::BigInt(self.way_id),
            Cell::BigInt(self.frequency),
            Cell::Text(self.tag.to_string()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRoadPopularity {
    pub road_name: String,
    pub frequency: i64,
    pub tag: PopularityTag,
}

impl SnapshotRow for NamedRoadPopularity {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::Text(self.road_name.clone()),
            Cell::BigInt(self.frequency),
            Cell::Text(self.tag.to_string()),
        ]
    }
}

pub async fn fetch_way_frequencies(
    pool: &PgPool,
    config: &PipelineConfig,
) -> anyhow::Result<Vec<WayFrequency>> {
    let sql = format!(
        "SELECT way_id, COUNT(*)::bigint AS frequency
         FROM (
             SELECT UNNEST(road_list)::bigint AS way_id
             FROM {trip_roads}
         ) t
         WHERE way_id IS NOT NULL
         GROUP BY way_id",
        trip_roads = config.sources.trip_roads,
    );
    sqlx::query_as::<_, WayFrequency>(&sql)
        .fetch_all(pool)
        .await
        .context("counting road traversals")
}

/// Road id to display name, for roads with a non-empty `name` tag.
pub async fn fetch_road_names(
    pool: &PgPool,
    config: &PipelineConfig,
) -> anyhow::Result<HashMap<i64, String>> {
    let sql = format!(
        "SELECT gid::bigint AS way_id, tags::jsonb ->> 'name' AS road_name
         FROM {roads}
         WHERE NULLIF(tags::jsonb ->> 'name', '') IS NOT NULL",
        roads = config.sources.roads,
    );
    let rows: Vec<(i64, String)> = sqlx::query_as(&sql)
        .fetch_all(pool)
        .await
        .context("reading road names")?;
    Ok(rows.into_iter().collect())
}

/// Tags every traversed road against quartile cuts of this batch.
pub fn tag_ways(frequencies: Vec<WayFrequency>) -> Vec<RoadPopularity> {
    tag_by_rank(
        frequencies
            .into_iter()
            .map(|w| (w.way_id, w.frequency))
            .collect(),
    )
    .into_iter()
    .map(|(way_id, frequency, tag)| RoadPopularity {
        way_id,
        frequency,
        tag,
    })
    .collect()
}

/// Swaps road ids for names, dropping roads without one. Tags are kept as cut
/// over the full batch.
pub fn name_roads(tagged: Vec<RoadPopularity>, names: &HashMap<i64, String>) -> Vec<NamedRoadPopularity> {
    tagged
        .into_iter()
        .filter_map(|road| {
            let road_name = names.get(&road.way_id)?;
            Some(NamedRoadPopularity {
                road_name: road_name.clone(),
                frequency: road.frequency,
                tag: road.tag,
            })
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
            let frequencies = fetch_way_frequencies(&ctx.pool, &ctx.config).await?;
            Ok::<_, anyhow::Error>(tag_ways(frequencies))
        },
    )
    .await
}

pub async fn run_named(ctx: &JobContext) -> Result<JobReport, JobError> {
    run_job(
        ctx.store.as_ref(),
        NAMED_NAME,
        &NAMED_TABLE,
        ctx.config.batch_size,
        || async {
            let frequencies = fetch_way_frequencies(&ctx.pool, &ctx.config).await?;
            let names = fetch_road_names(&ctx.pool, &ctx.config).await?;
            let tagged = tag_ways(frequencies);
            let traversed = tagged.len();
            let named = name_roads(tagged, &names);
            tracing::info!(traversed, named = named.len(), "Unnamed roads dropped");
            Ok::<_, anyhow::Error>(named)
        },
    )
    .await
}
