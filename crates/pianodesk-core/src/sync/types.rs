//! Records owned by the sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::ProviderKind;

/// Stored credentials and cursor for one external calendar account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConnection {
    pub id: i64,
    pub user_id: String,
    pub provider: ProviderKind,
    /// Provider calendar id; `None` means the account's default calendar.
    pub calendar_id: Option<String>,
    pub sync_enabled: bool,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Google sync token or Microsoft delta link.
    pub sync_cursor: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Push channel (Google) or subscription (Microsoft) id.
    pub webhook_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConnection {
    pub user_id: String,
    pub provider: ProviderKind,
    pub calendar_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Discovered inbound, waiting for a local appointment.
    Pending,
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            _ => None,
        }
    }
}

/// Mapping between a local appointment and one external event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: String,
    pub connection_id: i64,
    /// `None` while the event waits for an inbound materializer.
    pub appointment_id: Option<i64>,
    pub external_event_id: String,
    pub provider: ProviderKind,
    pub sync_status: SyncStatus,
    pub last_synced_at: DateTime<Utc>,
    pub error_message: Option<String>,
    /// Raw external event for pending rows.
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
    Fetch,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
            SyncAction::Fetch => "fetch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SyncAction::Create),
            "update" => Some(SyncAction::Update),
            "delete" => Some(SyncAction::Delete),
            "fetch" => Some(SyncAction::Fetch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    ToExternal,
    FromExternal,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::ToExternal => "to_external",
            SyncDirection::FromExternal => "from_external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "to_external" => Some(SyncDirection::ToExternal),
            "from_external" => Some(SyncDirection::FromExternal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(LogStatus::Success),
            "error" => Some(LogStatus::Error),
            _ => None,
        }
    }
}

/// Append-only audit row, one per sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: i64,
    pub connection_id: i64,
    pub sync_event_id: Option<String>,
    pub appointment_id: Option<i64>,
    pub external_event_id: Option<String>,
    pub action: SyncAction,
    pub direction: SyncDirection,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit row before insertion.
#[derive(Debug, Clone)]
pub struct NewSyncLog {
    pub connection_id: i64,
    pub sync_event_id: Option<String>,
    pub appointment_id: Option<i64>,
    pub external_event_id: Option<String>,
    pub action: SyncAction,
    pub direction: SyncDirection,
    pub status: LogStatus,
    pub error_message: Option<String>,
}

/// Outcome of one sync operation. Failures are data, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    pub fn ok(external_event_id: Option<String>) -> Self {
        Self {
            success: true,
            external_event_id,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            external_event_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Tally of one incremental pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSyncReport {
    pub success: bool,
    pub synced: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
