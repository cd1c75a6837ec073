//! Core error types for pianodesk-core.
//!
//! One umbrella error (`CoreError`) wraps the storage, configuration,
//! provider, OAuth and validation families. Workflow entry points fold
//! these into `success: false` result structs rather than returning them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Core error type for pianodesk-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persistence is unreachable or a statement failed.
    #[error("Storage unavailable: {0}")]
    Database(#[from] DatabaseError),

    /// `config.toml` could not be read, written or validated.
    #[error("Bad configuration: {0}")]
    Config(#[from] ConfigError),

    /// A calendar provider call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Token handling failed: {0}")]
    OAuth(#[from] OAuthError),

    /// Caller input rejected before touching storage.
    #[error("Rejected input: {0}")]
    Validation(#[from] ValidationError),

    /// Entity missing, or not owned by the caller.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Alert was already acknowledged or dismissed.
    #[error("Alert {alert_id} is no longer active (status: {status})")]
    NotActive { alert_id: i64, status: String },

    /// The search exhausted its date range without a fit.
    #[error("No available slot in the requested date range")]
    NoAvailableSlot,

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Failures of the SQLite store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Cannot open {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A statement was rejected by SQLite.
    #[error("Statement rejected: {0}")]
    QueryFailed(String),

    #[error("Schema upgrade failed: {0}")]
    MigrationFailed(String),

    /// Another writer holds the file (`SQLITE_BUSY` / `SQLITE_LOCKED`).
    #[error("Store busy, another writer holds the lock")]
    Locked,

    /// A thread panicked while holding the connection.
    #[error("Database connection poisoned")]
    Poisoned,

    /// The transactional overlap check found a competing booking.
    #[error("Slot {start}..{end} on {date} was taken by appointment {conflicting_id}")]
    SlotTaken {
        date: chrono::NaiveDate,
        start: chrono::NaiveTime,
        end: chrono::NaiveTime,
        conflicting_id: i64,
    },

    /// The alert changed state between load and commit.
    #[error("Alert {0} changed state before it could be acknowledged")]
    AlertNoLongerActive(i64),
}

/// Problems with `config.toml` and dotted-key access to it.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Cannot write {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Value does not fit the field at `key`.
    #[error("{key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("No such setting: {0}")]
    UnknownKey(String),

    /// TOML syntax or shape mismatch.
    #[error("Unreadable settings file: {0}")]
    ParseFailed(String),
}

/// Errors raised by calendar provider adapters.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Non-success HTTP status from the provider API.
    #[error("{provider} API returned {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("Transport failure: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication required for {0}")]
    AuthenticationRequired(&'static str),

    #[error("Rate limited by {0}")]
    RateLimited(&'static str),

    /// The provider answered with a body we cannot interpret.
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    #[error("No adapter registered for provider '{0}'")]
    Unsupported(String),

    #[error("Sync cursor expired")]
    CursorExpired,
}

/// Access-token refresh and keyring problems.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// The token endpoint refused the refresh grant.
    #[error("Refresh rejected: {0}")]
    TokenRefreshFailed(String),

    #[error("Access token is stale and the connection has no refresh token")]
    TokenExpired,

    /// No client id/secret in the keyring for this provider.
    #[error("{service} client credentials missing, run `pianodesk-cli auth login {service}`")]
    CredentialsNotConfigured { service: String },

    #[error("Keyring unavailable: {0}")]
    Keyring(String),
}

/// Input that fails a precondition.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Window ends ({end}) before it starts ({start})")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid working hours: start {start}h must be before end {end}h (max 24)")]
    InvalidWorkingHours { start: u32, end: u32 },

    #[error("{field} rejected: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(source: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode::{DatabaseBusy, DatabaseLocked};
        match source.sqlite_error_code() {
            Some(DatabaseBusy | DatabaseLocked) => DatabaseError::Locked,
            _ => DatabaseError::QueryFailed(source.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Database(source.into())
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
