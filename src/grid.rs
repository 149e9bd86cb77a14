//! Fixed-step spatial grid used to coarsen pickup points for density maps.
//!
//! A cell is identified by its floored coordinate indices together with the
//! local date and hour of the pickups it holds, so the same square of ground
//! gets a different id for every hour it is observed.

use chrono::NaiveDate;

/// Cell edge length in degrees, roughly 100m at mid latitudes.
pub const GRID_STEP: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GridCell {
    pub x: i64,
    pub y: i64,
    pub date: NaiveDate,
    pub hour: u32,
}

impl GridCell {
    /// Buckets a position observed at `date`/`hour` into its cell.
    pub fn locate(lon: f64, lat: f64, date: NaiveDate, hour: u32) -> Self {
        Self {
            x: cell_index(lon),
            y: cell_index(lat),
            date,
            hour,
        }
    }

    /// Builds a cell from indices already floored by the store
    /// (`floor(lon / GRID_STEP)`).
    pub fn from_indices(x: i64, y: i64, date: NaiveDate, hour: u32) -> Self {
        Self { x, y, date, hour }
    }

    /// Hex md5 digest of `"{x}_{y}_{date}_{hour}"`.
    pub fn id(&self) -> String {
        let key = format!(
            "{}_{}_{}_{}",
            self.x,
            self.y,
            self.date.format("%Y-%m-%d"),
            self.hour
        );
        let mut context = md5::Context::new();
        context.consume(key.as_bytes());
        format!("{:x}", context.compute())
    }

    /// Centre of the cell as `(lon, lat)`.
    pub fn centroid(&self) -> (f64, f64) {
        (cell_center(self.x), cell_center(self.y))
    }
}

/// Convenience wrapper returning the id of the cell containing the position.
pub fn grid_id(lon: f64, lat: f64, date: NaiveDate, hour: u32) -> String {
    GridCell::locate(lon, lat, date, hour).id()
}

fn cell_index(coord: f64) -> i64 {
    (coord / GRID_STEP).floor() as i64
}

fn cell_center(index: i64) -> f64 {
    index as f64 * GRID_STEP + GRID_STEP / 2.0
}
