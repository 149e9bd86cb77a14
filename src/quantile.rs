//! Relative frequency classification.
//!
//! Two strategies live here and are deliberately kept apart:
//!
//! * [`tag_by_rank`] sorts the current batch and cuts it at the 25/50/75%
//!   positions, giving a four-band [`PopularityTag`].
//! * [`HeatThresholds`] interpolates continuous 50th/75th percentiles over a
//!   whole stored table and compares each count against them, giving a
//!   three-band [`HeatLevel`].
//!
//! Both are run-local: the same raw count may land in another band next run
//! if the distribution shifts.

use std::fmt;

/// Four-band road popularity label, hottest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PopularityTag {
    VeryHot,
    Hot,
    Normal,
    Cold,
}

impl PopularityTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            PopularityTag::VeryHot => "very_hot",
            PopularityTag::Hot => "hot",
            PopularityTag::Normal => "normal",
            PopularityTag::Cold => "cold",
        }
    }
}

impl fmt::Display for PopularityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-band grid heat label, hottest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeatLevel {
    High,
    Medium,
    Low,
}

impl HeatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeatLevel::High => "high",
            HeatLevel::Medium => "medium",
            HeatLevel::Low => "low",
        }
    }
}

impl fmt::Display for HeatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frequencies found at the 25%, 50% and 75% positions of the
/// descending-sorted batch (index `len * p / 4`, no interpolation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankCuts {
    pub q1: i64,
    pub q2: i64,
    pub q3: i64,
}

impl RankCuts {
    /// Returns `None` for an empty batch.
    pub fn from_frequencies(frequencies: &[i64]) -> Option<Self> {
        if frequencies.is_empty() {
            return None;
        }
        let mut sorted = frequencies.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));

        let len = sorted.len();
        Some(Self {
            q1: sorted[len / 4],
            q2: sorted[len / 2],
            q3: sorted[len * 3 / 4],
        })
    }

    /// | Frequency    | Tag       |
    /// |--------------|-----------|
    /// | >= q1        | VeryHot   |
    /// | >= q2        | Hot       |
    /// | >= q3        | Normal    |
    /// | < q3         | Cold      |
    pub fn tag(&self, frequency: i64) -> PopularityTag {
        match frequency {
            f if f >= self.q1 => PopularityTag::VeryHot,
            f if f >= self.q2 => PopularityTag::Hot,
            f if f >= self.q3 => PopularityTag::Normal,
            _ => PopularityTag::Cold,
        }
    }
}

/// Tags every `(key, frequency)` pair against cuts taken from the same batch.
///
/// Output is ordered by descending frequency; ties keep their input order.
/// An empty batch yields no rows.
pub fn tag_by_rank<K>(entries: Vec<(K, i64)>) -> Vec<(K, i64, PopularityTag)> {
    let frequencies: Vec<i64> = entries.iter().map(|(_, f)| *f).collect();
    let Some(cuts) = RankCuts::from_frequencies(&frequencies) else {
        return Vec::new();
    };

    let mut entries = entries;
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    entries
        .into_iter()
        .map(|(key, frequency)| (key, frequency, cuts.tag(frequency)))
        .collect()
}

/// Continuous 50th and 75th percentiles of a stored count distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatThresholds {
    pub p50: f64,
    pub p75: f64,
}

impl HeatThresholds {
    /// Returns `None` when there is nothing to take percentiles of.
    pub fn from_counts(counts: &[i64]) -> Option<Self> {
        let mut sorted: Vec<f64> = counts.iter().map(|c| *c as f64).collect();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            p50: percentile_cont(&sorted, 0.5)?,
            p75: percentile_cont(&sorted, 0.75)?,
        })
    }

    /// | Count        | Level  |
    /// |--------------|--------|
    /// | >= p75       | High   |
    /// | >= p50       | Medium |
    /// | < p50        | Low    |
    pub fn level(&self, count: i64) -> HeatLevel {
        let c = count as f64;
        match c {
            c if c >= self.p75 => HeatLevel::High,
            c if c >= self.p50 => HeatLevel::Medium,
            _ => HeatLevel::Low,
        }
    }
}

/// Linearly interpolated percentile of an ascending-sorted slice, matching
/// the `percentile_cont` ordered-set aggregate. `p` is clamped to `[0, 1]`.
pub fn percentile_cont(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let pos = p * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}
