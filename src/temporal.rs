//! Calendar bucketing of local pickup and trip times.

use chrono::{Datelike, NaiveDate, Weekday};

/// Monday through Friday.
pub fn is_workday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Four fixed bands of the local hour-of-day used for driver activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DayPart {
    /// 05:00 to 11:59
    Morning,
    /// 12:00 to 17:59
    Afternoon,
    /// 18:00 to 21:59
    Evening,
    /// 22:00 to 04:59
    Night,
}

impl DayPart {
    /// Returns `None` for hours outside `0..24`.
    pub fn from_hour(hour: u32) -> Option<Self> {
        match hour {
            5..=11 => Some(DayPart::Morning),
            12..=17 => Some(DayPart::Afternoon),
            18..=21 => Some(DayPart::Evening),
            22..=23 | 0..=4 => Some(DayPart::Night),
            _ => None,
        }
    }
}

/// Per-band counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayPartCounts {
    pub morning: i64,
    pub afternoon: i64,
    pub evening: i64,
    pub night: i64,
}

impl DayPartCounts {
    pub fn add(&mut self, part: DayPart, n: i64) {
        match part {
            DayPart::Morning => self.morning += n,
            DayPart::Afternoon => self.afternoon += n,
            DayPart::Evening => self.evening += n,
            DayPart::Night => self.night += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.morning + self.afternoon + self.evening + self.night
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workday_split() {
        // 2024-03-04 is a Monday
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let days: Vec<bool> = monday.iter_days().take(7).map(is_workday).collect();
        assert_eq!(days, vec![true, true, true, true, true, false, false]);
    }

    #[test]
    fn test_day_part_boundaries() {
        assert_eq!(DayPart::from_hour(4), Some(DayPart::Night));
        assert_eq!(DayPart::from_hour(5), Some(DayPart::Morning));
        assert_eq!(DayPart::from_hour(11), Some(DayPart::Morning));
        assert_eq!(DayPart::from_hour(12), Some(DayPart::Afternoon));
        assert_eq!(DayPart::from_hour(17), Some(DayPart::Afternoon));
        assert_eq!(DayPart::from_hour(18), Some(DayPart::Evening));
        assert_eq!(DayPart::from_hour(21), Some(DayPart::Evening));
        assert_eq!(DayPart::from_hour(22), Some(DayPart::Night));
        assert_eq!(DayPart::from_hour(0), Some(DayPart::Night));
        assert_eq!(DayPart::from_hour(24), None);
    }

    #[test]
    fn test_every_hour_has_exactly_one_band() {
        let mut counts = DayPartCounts::default();
        for hour in 0..24 {
            counts.add(DayPart::from_hour(hour).unwrap(), 1);
        }
        assert_eq!(counts.total(), 24);
        assert_eq!(
            counts,
            DayPartCounts {
                morning: 7,
                afternoon: 6,
                evening: 4,
                night: 7,
            }
        );
    }
}
