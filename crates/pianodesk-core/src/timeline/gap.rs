//! Free-time gap detection inside one working day.
//!
//! Bookings are clipped to the working window; whatever is left between
//! them (plus the head and tail of the day) is a gap.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Daily working window and weekend policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    start_hour: u32,
    end_hour: u32,
    include_weekends: bool,
}

impl WorkingHours {
    /// `start_hour < end_hour <= 24`.
    pub fn new(
        start_hour: u32,
        end_hour: u32,
        include_weekends: bool,
    ) -> Result<Self, ValidationError> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(ValidationError::InvalidWorkingHours {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
            include_weekends,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn include_weekends(&self) -> bool {
        self.include_weekends
    }

    /// Whether bookings may be placed on this date at all.
    pub fn admits(&self, date: NaiveDate) -> bool {
        self.include_weekends || !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// Working window of `date` as `[start, end)`.
    pub fn window(&self, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
        let midnight = date.and_time(NaiveTime::MIN);
        (
            midnight + Duration::hours(self.start_hour as i64),
            midnight + Duration::hours(self.end_hour as i64),
        )
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
            include_weekends: false,
        }
    }
}

/// An occupied interval in the technician's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Booking {
    pub fn new(start: NaiveDateTime, duration_minutes: i64) -> Self {
        Self {
            start,
            end: start + Duration::minutes(duration_minutes),
        }
    }

    pub fn overlaps(&self, start: NaiveDateTime, end: NaiveDateTime) -> bool {
        intervals_overlap(self.start, self.end, start, end)
    }
}

/// Half-open interval intersection.
pub fn intervals_overlap(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// A free interval inside a working window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeGap {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Check if this gap can fit work of the given duration
    pub fn can_fit(&self, minutes: i64) -> bool {
        self.duration_minutes() >= minutes
    }
}

/// Find the free gaps of `[day_start, day_end)` around `bookings`.
///
/// Bookings may be in any order and may overlap each other or spill
/// outside the window. Returned gaps are sorted and non-empty.
pub fn find_gaps(
    bookings: &[Booking],
    day_start: NaiveDateTime,
    day_end: NaiveDateTime,
) -> Vec<TimeGap> {
    let mut gaps = Vec::new();

    let mut sorted: Vec<_> = bookings
        .iter()
        .filter(|b| b.overlaps(day_start, day_end))
        .copied()
        .collect();
    sorted.sort_by_key(|b| b.start);

    let mut cursor = day_start;

    for booking in &sorted {
        if booking.end <= cursor {
            continue;
        }

        if booking.start > cursor {
            gaps.push(TimeGap {
                start: cursor,
                end: booking.start.min(day_end),
            });
        }

        cursor = booking.end.min(day_end);
        if cursor >= day_end {
            break;
        }
    }

    if cursor < day_end {
        gaps.push(TimeGap {
            start: cursor,
            end: day_end,
        });
    }

    gaps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn rejects_inverted_hours() {
        assert!(WorkingHours::new(18, 9, false).is_err());
        assert!(WorkingHours::new(9, 25, false).is_err());
        assert!(WorkingHours::new(0, 24, true).is_ok());
    }

    #[test]
    fn weekend_admission() {
        let saturday = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        assert!(!WorkingHours::default().admits(saturday));
        assert!(WorkingHours::new(9, 18, true).unwrap().admits(saturday));
    }

    #[test]
    fn window_can_end_at_midnight() {
        let hours = WorkingHours::new(20, 24, false).unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let (_, end) = hours.window(date);
        assert_eq!(end, NaiveDate::from_ymd_opt(2026, 3, 3).unwrap().and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn empty_day_is_one_gap() {
        let gaps = find_gaps(&[], at(9, 0), at(18, 0));
        assert_eq!(gaps, vec![TimeGap { start: at(9, 0), end: at(18, 0) }]);
    }

    #[test]
    fn head_middle_and_tail_gaps() {
        let bookings = [
            Booking::new(at(13, 0), 60),
            Booking::new(at(10, 0), 60),
        ];
        let gaps = find_gaps(&bookings, at(9, 0), at(18, 0));
        assert_eq!(gaps.len(), 3);
        assert_eq!(gaps[0].duration_minutes(), 60);
        assert_eq!(gaps[1], TimeGap { start: at(11, 0), end: at(13, 0) });
        assert_eq!(gaps[2], TimeGap { start: at(14, 0), end: at(18, 0) });
    }

    #[test]
    fn overlapping_and_spilling_bookings_merge() {
        let bookings = [
            Booking::new(at(8, 0), 90),   // starts before the window
            Booking::new(at(11, 0), 120),
            Booking::new(at(12, 0), 30),  // inside the previous one
            Booking::new(at(17, 30), 90), // ends after the window
        ];
        let gaps = find_gaps(&bookings, at(9, 0), at(18, 0));
        assert_eq!(
            gaps,
            vec![
                TimeGap { start: at(9, 30), end: at(11, 0) },
                TimeGap { start: at(13, 0), end: at(17, 30) },
            ]
        );
    }

    #[test]
    fn fully_booked_day_has_no_gaps() {
        let bookings = [Booking::new(at(9, 0), 9 * 60)];
        assert!(find_gaps(&bookings, at(9, 0), at(18, 0)).is_empty());
    }
}
