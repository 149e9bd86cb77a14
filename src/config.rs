//! Pipeline configuration.
//!
//! Stored as an optional JSON object on disk; every field has a default so an
//! empty object (or no file at all) is a valid configuration:
//! ```json
//! {
//!   "batch_size": 2000,
//!   "timezone": "Asia/Shanghai",
//!   "sources": { "districts": "public.harbin_districts" }
//! }
//! ```
//! The connection string never lives in the file; it comes from `DATABASE_URL`.

use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_connections: u32,
    pub batch_size: usize,
    /// IANA zone used to derive local date, hour and weekday from epoch seconds.
    pub timezone: String,
    pub sources: SourceTables,
}

/// Names of the upstream tables the jobs read from. Never written to.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceTables {
    pub pickup_points: String,
    pub trip_info: String,
    pub trip_roads: String,
    pub roads: String,
    pub districts: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            batch_size: 1000,
            timezone: "Asia/Shanghai".to_string(),
            sources: SourceTables::default(),
        }
    }
}

impl Default for SourceTables {
    fn default() -> Self {
        Self {
            pickup_points: "dwd_pickup_points".to_string(),
            trip_info: "dwd_trip_info".to_string(),
            trip_roads: "dwd_trip_roads".to_string(),
            roads: "dwd_roads".to_string(),
            districts: "admin_districts".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config '{path}'"))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: PipelineConfig =
            serde_json::from_str(content).context("parsing pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be greater than zero");
        }
        if self.max_connections == 0 {
            bail!("max_connections must be greater than zero");
        }
        if self.timezone.parse::<Tz>().is_err() {
            bail!("timezone is not a known IANA zone: '{}'", self.timezone);
        }
        for (field, name) in self.sources.iter() {
            if !is_table_identifier(name) {
                bail!("sources.{field} is not a plain table name: '{name}'");
            }
        }
        Ok(())
    }
}

impl SourceTables {
    /// Iterates over all `(field, table)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("pickup_points", self.pickup_points.as_str()),
            ("trip_info", self.trip_info.as_str()),
            ("trip_roads", self.trip_roads.as_str()),
            ("roads", self.roads.as_str()),
            ("districts", self.districts.as_str()),
        ]
        .into_iter()
    }
}

/// Table names are spliced into SQL text, so only `[schema.]name` made of
/// ASCII letters, digits and underscores is accepted.
fn is_table_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
