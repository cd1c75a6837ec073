//! Calendar sync: mapping state, outbound push, inbound pull.

pub mod engine;
pub mod event_codec;
pub mod notifications;
mod types;

pub use engine::{overlaps_window, PushOutcome, SyncEngine, SyncOptions};
pub use event_codec::appointment_payload;
pub use notifications::{GoogleNotification, MicrosoftNotification, NotificationOutcome};
pub use types::{
    CalendarConnection, FullSyncReport, LogStatus, NewConnection, NewSyncLog, SyncAction,
    SyncDirection, SyncEvent, SyncLog, SyncResult, SyncStatus,
};
