//! Free-time computation over a technician's bookings.

pub mod gap;
pub mod slot_finder;

pub use gap::{find_gaps, intervals_overlap, Booking, TimeGap, WorkingHours};
pub use slot_finder::{day_after, is_interval_free, Slot, SlotFinder, SlotSearch};
