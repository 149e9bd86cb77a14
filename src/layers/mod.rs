//! Derived-table jobs.
//!
//! Each job owns exactly one target table and rebuilds it from the upstream
//! point, trip, road and district tables (or, for later layers, from tables
//! produced by earlier layers). Geometric predicates are left to PostGIS;
//! grid hashing, band assignment and quantile tagging happen here on typed
//! rows.

pub mod area_roads;
pub mod district_pickup;
pub mod driver_behavior;
pub mod driver_profile;
pub mod hot_grids;
pub mod pickup_grid;
pub mod recommend_ways;
pub mod road_popularity;

use serde::Serialize;
use sqlx::PgPool;
use std::fmt;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::JobError;
use crate::runner::JobReport;
use crate::store::{SnapshotStore, TableSpec};

/// Position of a table in the derivation chain. Jobs of a later layer may read
/// tables written by an earlier one, never the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Layer {
    Summary,
    Application,
    Analytical,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Layer::Summary => "summary",
            Layer::Application => "application",
            Layer::Analytical => "analytical",
        })
    }
}

/// Everything a job needs for one run. Cheap to clone.
#[derive(Clone)]
pub struct JobContext {
    /// Source of the raw tables.
    pub pool: PgPool,
    /// Destination of the derived table.
    pub store: Arc<dyn SnapshotStore>,
    pub config: Arc<PipelineConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    PickupGrid,
    RecommendWays,
    RoadPopularityNamed,
    HotGrids,
    RoadPopularity,
    DistrictPickup,
    DriverBehavior,
    DriverProfile,
    AreaRoads,
}

impl JobKind {
    pub const ALL: [JobKind; 9] = [
        JobKind::PickupGrid,
        JobKind::RecommendWays,
        JobKind::RoadPopularityNamed,
        JobKind::HotGrids,
        JobKind::RoadPopularity,
        JobKind::DistrictPickup,
        JobKind::DriverBehavior,
        JobKind::DriverProfile,
        JobKind::AreaRoads,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::PickupGrid => pickup_grid::NAME,
            JobKind::RecommendWays => recommend_ways::NAME,
            JobKind::RoadPopularityNamed => road_popularity::NAMED_NAME,
            JobKind::HotGrids => hot_grids::NAME,
            JobKind::RoadPopularity => road_popularity::NAME,
            JobKind::DistrictPickup => district_pickup::NAME,
            JobKind::DriverBehavior => driver_behavior::NAME,
            JobKind::DriverProfile => driver_profile::NAME,
            JobKind::AreaRoads => area_roads::NAME,
        }
    }

    pub fn table(&self) -> &'static TableSpec {
        match self {
            JobKind::PickupGrid => &pickup_grid::TABLE,
            JobKind::RecommendWays => &recommend_ways::TABLE,
            JobKind::RoadPopularityNamed => &road_popularity::NAMED_TABLE,
            JobKind::HotGrids => &hot_grids::TABLE,
            JobKind::RoadPopularity => &road_popularity::TABLE,
            JobKind::DistrictPickup => &district_pickup::TABLE,
            JobKind::DriverBehavior => &driver_behavior::TABLE,
            JobKind::DriverProfile => &driver_profile::TABLE,
            JobKind::AreaRoads => &area_roads::TABLE,
        }
    }

    pub fn layer(&self) -> Layer {
        match self {
            JobKind::PickupGrid => Layer::Summary,
            JobKind::RecommendWays | JobKind::RoadPopularityNamed => Layer::Application,
            _ => Layer::Analytical,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub async fn run(&self, ctx: &JobContext) -> Result<JobReport, JobError> {
        match self {
            JobKind::PickupGrid => pickup_grid::run(ctx).await,
            JobKind::RecommendWays => recommend_ways::run(ctx).await,
            JobKind::RoadPopularityNamed => road_popularity::run_named(ctx).await,
            JobKind::HotGrids => hot_grids::run(ctx).await,
            JobKind::RoadPopularity => road_popularity::run(ctx).await,
            JobKind::DistrictPickup => district_pickup::run(ctx).await,
            JobKind::DriverBehavior => driver_behavior::run(ctx).await,
            JobKind::DriverProfile => driver_profile::run(ctx).await,
            JobKind::AreaRoads => area_roads::run(ctx).await,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
