//! # PianoDesk Core Library
//!
//! Appointment scheduling and external calendar sync for piano technicians.
//! Everything is reachable through the `pianodesk` CLI; request layers embed
//! the same library.
//!
//! ## Architecture
//!
//! - **Timeline**: gap search over a day's bookings and the slot finder that
//!   walks days under working-hours rules
//! - **Scheduler**: turns maintenance alerts into date suggestions and,
//!   transactionally, into appointments and services
//! - **Calendar**: one adapter per external provider (Google, Microsoft)
//!   behind [`CalendarProvider`]
//! - **Sync**: the mapping between local appointments and external events,
//!   with an append-only audit log
//! - **Storage**: SQLite persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`SlotFinder`]: next free window for a duration
//! - [`AutoScheduler`]: alert -> appointment/service -> acknowledgment
//! - [`SyncEngine`]: outbound push, inbound pull, conflict detection
//! - [`Database`]: persistence shared by both services
//! - [`Config`]: application configuration management

pub mod calendar;
pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod sync;
pub mod timeline;

pub use calendar::{
    CalendarProvider, EventPayload, ExternalEvent, GoogleCalendar, MicrosoftCalendar,
    ProviderKind, ProviderRegistry,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{
    ConfigError, CoreError, DatabaseError, OAuthError, ProviderError, Result, ValidationError,
};
pub use rate_limit::RateLimiter;
pub use schedule::{Alert, AlertPriority, AlertStatus, Appointment, Service, ServiceType};
pub use scheduler::{
    AutoScheduleOptions, AutoScheduleResult, AutoScheduleStatistics, AutoScheduler,
    DateSuggestion, SuggestionEngine, SuggestionOptions,
};
pub use storage::{Config, Database};
pub use sync::{
    CalendarConnection, FullSyncReport, SyncEngine, SyncEvent, SyncLog, SyncOptions, SyncResult,
};
pub use timeline::{Booking, Slot, SlotFinder, SlotSearch, WorkingHours};
