//! External calendar providers.
//!
//! Each provider is one [`CalendarProvider`] implementation. The sync
//! engine picks the adapter by `connection.provider` through a
//! [`ProviderRegistry`], so adding a provider never touches call sites.

pub mod google;
pub mod microsoft;
pub mod oauth;

pub use google::GoogleCalendar;
pub use microsoft::MicrosoftCalendar;
pub use oauth::{keyring_store, OAuthClient, RefreshedTokens};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, ProviderError};
use crate::sync::CalendarConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Google,
    Microsoft,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Google => "google",
            ProviderKind::Microsoft => "microsoft",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "google" => Some(ProviderKind::Google),
            "microsoft" => Some(ProviderKind::Microsoft),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point in time as providers exchange it: local wall time plus zone.
///
/// `date_time` may be RFC 3339 with an offset, a naive
/// `YYYY-MM-DDTHH:MM:SS[.fff]` read in `time_zone`, or a bare date for
/// all-day events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    pub fn new(date_time: impl Into<String>, time_zone: Option<String>) -> Self {
        Self {
            date_time: date_time.into(),
            time_zone,
        }
    }

    /// Resolve to an instant. `None` when the text or zone is unparseable.
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&self.date_time) {
            return Some(dt.with_timezone(&Utc));
        }

        let tz: Tz = match self.time_zone.as_deref() {
            None => chrono_tz::UTC,
            Some(name) => name.parse().ok()?,
        };
        let naive = NaiveDateTime::parse_from_str(&self.date_time, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(&self.date_time, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Provider-agnostic event body for create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: EventDateTime,
    pub end: EventDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    /// Unknown values read as confirmed.
    pub fn parse(s: &str) -> Self {
        match s {
            "cancelled" => EventStatus::Cancelled,
            "tentative" => EventStatus::Tentative,
            _ => EventStatus::Confirmed,
        }
    }
}

/// An event as read back from a provider.
///
/// Cancelled events in incremental feeds often carry only an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventDateTime>,
    pub end: Option<EventDateTime>,
    pub status: EventStatus,
    pub updated: Option<DateTime<Utc>>,
}

impl ExternalEvent {
    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// Start and end instants, when both resolve.
    pub fn window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.start.as_ref()?.to_utc()?;
        let end = self.end.as_ref()?.to_utc()?;
        Some((start, end))
    }
}

/// One page-complete incremental fetch.
#[derive(Debug, Clone, Default)]
pub struct IncrementalChanges {
    pub events: Vec<ExternalEvent>,
    /// Cursor to persist for the next fetch.
    pub next_cursor: String,
}

/// Capability interface every calendar provider implements.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Create an event and return its provider id.
    async fn create_event(
        &self,
        connection: &CalendarConnection,
        event: &EventPayload,
    ) -> Result<String, ProviderError>;

    async fn update_event(
        &self,
        connection: &CalendarConnection,
        external_id: &str,
        event: &EventPayload,
    ) -> Result<(), ProviderError>;

    /// Delete an event. An event that is already gone counts as deleted.
    async fn delete_event(
        &self,
        connection: &CalendarConnection,
        external_id: &str,
    ) -> Result<(), ProviderError>;

    async fn list_events(
        &self,
        connection: &CalendarConnection,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, ProviderError>;

    /// Changes since `connection.sync_cursor`, or since `window_start`
    /// when the connection has never synced.
    async fn incremental_changes(
        &self,
        connection: &CalendarConnection,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementalChanges, ProviderError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh_token(
        &self,
        _refresh_token: &str,
        _now: DateTime<Utc>,
    ) -> Result<RefreshedTokens, OAuthError> {
        Err(OAuthError::CredentialsNotConfigured {
            service: self.kind().to_string(),
        })
    }
}

/// Adapters keyed by provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn CalendarProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn CalendarProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn CalendarProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn CalendarProvider>, ProviderError> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::Unsupported(kind.to_string()))
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Bearer token of a connection, or `AuthenticationRequired`.
pub(crate) fn bearer<'a>(
    provider: &'static str,
    connection: &'a CalendarConnection,
) -> Result<&'a str, ProviderError> {
    connection
        .access_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or(ProviderError::AuthenticationRequired(provider))
}

/// Map a non-success response to a `ProviderError`.
pub(crate) async fn check_status(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status.as_u16() {
        401 | 403 => Err(ProviderError::AuthenticationRequired(provider)),
        429 => Err(ProviderError::RateLimited(provider)),
        code => {
            let message = resp.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                provider,
                status: code,
                message,
            })
        }
    }
}

/// Decode a JSON body, reporting shape mismatches as `InvalidResponse`.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    provider: &'static str,
    resp: reqwest::Response,
) -> Result<T, ProviderError> {
    let text = resp.text().await?;
    serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
        provider,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_ignores_zone_field() {
        let dt = EventDateTime::new("2026-03-03T09:00:00+01:00", Some("Asia/Tokyo".into()));
        assert_eq!(
            dt.to_utc(),
            Some(Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn naive_time_resolves_in_zone() {
        let dt = EventDateTime::new("2026-07-01T10:00:00.0000000", Some("Europe/Madrid".into()));
        assert_eq!(
            dt.to_utc(),
            Some(Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap())
        );

        let utc = EventDateTime::new("2026-07-01T10:00:00", None);
        assert_eq!(
            utc.to_utc(),
            Some(Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn all_day_date_is_midnight() {
        let dt = EventDateTime::new("2026-07-01", Some("UTC".into()));
        assert_eq!(
            dt.to_utc(),
            Some(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn garbage_does_not_resolve() {
        assert!(EventDateTime::new("soon", None).to_utc().is_none());
        assert!(EventDateTime::new("2026-07-01T10:00:00", Some("Mars/Base".into()))
            .to_utc()
            .is_none());
    }

    #[test]
    fn provider_kind_round_trips_names() {
        for kind in [ProviderKind::Google, ProviderKind::Microsoft] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("caldav"), None);
    }

    #[test]
    fn registry_reports_missing_adapter() {
        let registry = ProviderRegistry::new().with(Arc::new(GoogleCalendar::new()));
        assert!(registry.get(ProviderKind::Google).is_ok());
        assert!(matches!(
            registry.get(ProviderKind::Microsoft),
            Err(ProviderError::Unsupported(name)) if name == "microsoft"
        ));
    }
}
