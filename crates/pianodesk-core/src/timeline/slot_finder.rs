//! Next-free-slot search across a range of days.
//!
//! Pure computation: callers pass the bookings and `today`; nothing here
//! reads a clock or touches storage.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::gap::{find_gaps, Booking, WorkingHours};

/// A concrete free window that fits the requested duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn start_time(&self) -> NaiveTime {
        self.start.time()
    }

    /// End as wall-clock time. A slot ending at midnight reads `00:00`.
    pub fn end_time(&self) -> NaiveTime {
        self.end.time()
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Day range and duration for one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSearch {
    pub duration_minutes: i64,
    /// First day offset from `today` (inclusive).
    pub earliest_day_offset: i64,
    /// Last day offset from `today` (inclusive).
    pub latest_day_offset: i64,
}

/// Finds free slots under a working-hours policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotFinder {
    hours: WorkingHours,
}

impl SlotFinder {
    pub fn new(hours: WorkingHours) -> Self {
        Self { hours }
    }

    pub fn working_hours(&self) -> WorkingHours {
        self.hours
    }

    /// Earliest slot in the search range, or `None` once the range is
    /// exhausted. Non-positive durations never fit.
    pub fn find_next(
        &self,
        bookings: &[Booking],
        search: &SlotSearch,
        today: NaiveDate,
    ) -> Option<Slot> {
        if search.duration_minutes <= 0 {
            return None;
        }

        let mut offset = search.earliest_day_offset;
        while offset <= search.latest_day_offset {
            let Some(date) = day_after(today, offset) else {
                break;
            };
            offset += 1;

            if !self.hours.admits(date) {
                continue;
            }

            if let Some(slot) = self.find_in_day(bookings, date, search.duration_minutes) {
                tracing::debug!(%date, start = %slot.start, "slot found");
                return Some(slot);
            }
        }

        None
    }

    /// First gap of `date` that fits, ignoring the weekend policy.
    pub fn find_in_day(
        &self,
        bookings: &[Booking],
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Option<Slot> {
        let (day_start, day_end) = self.hours.window(date);
        find_gaps(bookings, day_start, day_end)
            .into_iter()
            .find(|gap| gap.can_fit(duration_minutes))
            .map(|gap| Slot {
                date,
                start: gap.start,
                end: gap.start + Duration::minutes(duration_minutes),
            })
    }
}

/// `today + offset` days, `None` past the calendar's range.
pub fn day_after(today: NaiveDate, offset: i64) -> Option<NaiveDate> {
    Duration::try_days(offset).and_then(|days| today.checked_add_signed(days))
}

/// Whether `[start, start + duration)` is clear of every booking.
pub fn is_interval_free(bookings: &[Booking], start: NaiveDateTime, duration_minutes: i64) -> bool {
    let end = start + Duration::minutes(duration_minutes);
    !bookings.iter().any(|b| b.overlaps(start, end))
}
