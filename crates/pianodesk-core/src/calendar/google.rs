//! Google Calendar v3 adapter.
//!
//! Incremental sync uses `syncToken`. The first run (and any run after
//! Google expires the token with 410 Gone) starts from `timeMin`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::oauth::{OAuthClient, RefreshedTokens};
use super::{
    bearer, check_status, read_json, CalendarProvider, EventDateTime, EventPayload, EventStatus,
    ExternalEvent, IncrementalChanges, ProviderKind,
};
use crate::error::{OAuthError, ProviderError};
use crate::sync::CalendarConnection;

pub const GOOGLE_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const NAME: &str = "google";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTime {
    date_time: Option<String>,
    date: Option<String>,
    time_zone: Option<String>,
}

impl GoogleTime {
    fn into_event_time(self) -> Option<EventDateTime> {
        let value = self.date_time.or(self.date)?;
        Some(EventDateTime::new(value, self.time_zone))
    }
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start: Option<GoogleTime>,
    end: Option<GoogleTime>,
    status: Option<String>,
    updated: Option<String>,
}

impl From<GoogleEvent> for ExternalEvent {
    fn from(ev: GoogleEvent) -> Self {
        ExternalEvent {
            id: ev.id,
            summary: ev.summary,
            description: ev.description,
            location: ev.location,
            start: ev.start.and_then(GoogleTime::into_event_time),
            end: ev.end.and_then(GoogleTime::into_event_time),
            status: ev
                .status
                .as_deref()
                .map(EventStatus::parse)
                .unwrap_or_default(),
            updated: ev
                .updated
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
    next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

/// Google Calendar REST client.
#[derive(Debug, Clone)]
pub struct GoogleCalendar {
    http: Client,
    base_url: String,
    oauth: Option<OAuthClient>,
}

impl Default for GoogleCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl GoogleCalendar {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: GOOGLE_API_BASE.to_string(),
            oauth: None,
        }
    }

    /// Point the adapter at another API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Enable token refresh with these client credentials.
    pub fn with_oauth(mut self, oauth: OAuthClient) -> Self {
        self.oauth = Some(oauth);
        self
    }

    fn events_url(&self, connection: &CalendarConnection) -> String {
        let calendar = connection.calendar_id.as_deref().unwrap_or("primary");
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar)
        )
    }

    fn event_url(&self, connection: &CalendarConnection, external_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(connection),
            urlencoding::encode(external_id)
        )
    }

    /// Follow `nextPageToken` until the last page.
    async fn fetch_pages(
        &self,
        connection: &CalendarConnection,
        query: &[(&str, String)],
    ) -> Result<(Vec<ExternalEvent>, Option<String>), ProviderError> {
        let token = bearer(NAME, connection)?;
        let url = self.events_url(connection);
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(token).query(query);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }
            let resp = request.send().await?;
            if resp.status() == StatusCode::GONE {
                return Err(ProviderError::CursorExpired);
            }
            let page: EventList = read_json(NAME, check_status(NAME, resp).await?).await?;
            events.extend(page.items.into_iter().map(ExternalEvent::from));

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => return Ok((events, page.next_sync_token)),
            }
        }
    }

    async fn fetch_changes(
        &self,
        connection: &CalendarConnection,
        sync_token: Option<&str>,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementalChanges, ProviderError> {
        let query = match sync_token {
            Some(token) => vec![("syncToken", token.to_string())],
            None => vec![("timeMin", window_start.to_rfc3339())],
        };
        let (events, next) = self.fetch_pages(connection, &query).await?;
        let next_cursor = next.ok_or_else(|| ProviderError::InvalidResponse {
            provider: NAME,
            message: "last page carried no nextSyncToken".into(),
        })?;
        Ok(IncrementalChanges {
            events,
            next_cursor,
        })
    }
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    async fn create_event(
        &self,
        connection: &CalendarConnection,
        event: &EventPayload,
    ) -> Result<String, ProviderError> {
        let resp = self
            .http
            .post(self.events_url(connection))
            .bearer_auth(bearer(NAME, connection)?)
            .json(event)
            .send()
            .await?;
        let created: Created = read_json(NAME, check_status(NAME, resp).await?).await?;
        Ok(created.id)
    }

    async fn update_event(
        &self,
        connection: &CalendarConnection,
        external_id: &str,
        event: &EventPayload,
    ) -> Result<(), ProviderError> {
        let resp = self
            .http
            .patch(self.event_url(connection, external_id))
            .bearer_auth(bearer(NAME, connection)?)
            .json(event)
            .send()
            .await?;
        check_status(NAME, resp).await?;
        Ok(())
    }

    async fn delete_event(
        &self,
        connection: &CalendarConnection,
        external_id: &str,
    ) -> Result<(), ProviderError> {
        let resp = self
            .http
            .delete(self.event_url(connection, external_id))
            .bearer_auth(bearer(NAME, connection)?)
            .send()
            .await?;
        if matches!(resp.status(), StatusCode::NOT_FOUND | StatusCode::GONE) {
            tracing::debug!(external_id, "google event already deleted");
            return Ok(());
        }
        check_status(NAME, resp).await?;
        Ok(())
    }

    async fn list_events(
        &self,
        connection: &CalendarConnection,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>, ProviderError> {
        let query = [
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
            ("timeMin", time_min.to_rfc3339()),
            ("timeMax", time_max.to_rfc3339()),
        ];
        let (events, _) = self.fetch_pages(connection, &query).await?;
        Ok(events)
    }

    async fn incremental_changes(
        &self,
        connection: &CalendarConnection,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementalChanges, ProviderError> {
        let cursor = connection.sync_cursor.as_deref();
        match self.fetch_changes(connection, cursor, window_start).await {
            Err(ProviderError::CursorExpired) if cursor.is_some() => {
                tracing::warn!(
                    connection_id = connection.id,
                    "google sync token expired, restarting full window"
                );
                self.fetch_changes(connection, None, window_start).await
            }
            other => other,
        }
    }

    async fn refresh_token(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshedTokens, OAuthError> {
        match &self.oauth {
            Some(oauth) => oauth.refresh(refresh_token, now).await,
            None => Err(OAuthError::CredentialsNotConfigured {
                service: NAME.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;

    fn connection(cursor: Option<&str>) -> CalendarConnection {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        CalendarConnection {
            id: 7,
            user_id: "u1".into(),
            provider: ProviderKind::Google,
            calendar_id: None,
            sync_enabled: true,
            access_token: Some("tok".into()),
            refresh_token: None,
            expires_at: None,
            sync_cursor: cursor.map(String::from),
            last_sync_at: None,
            webhook_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn payload() -> EventPayload {
        EventPayload {
            summary: "Tuning - Ana".into(),
            description: "Piano: Yamaha U1".into(),
            location: "Calle Mayor 1".into(),
            start: EventDateTime::new("2026-03-03T09:00:00", Some("Europe/Madrid".into())),
            end: EventDateTime::new("2026-03-03T10:30:00", Some("Europe/Madrid".into())),
        }
    }

    #[tokio::test]
    async fn create_posts_to_primary_calendar() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/calendars/primary/events")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "summary": "Tuning - Ana",
                "start": {"dateTime": "2026-03-03T09:00:00", "timeZone": "Europe/Madrid"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"evt-1","status":"confirmed"}"#)
            .create_async()
            .await;

        let google = GoogleCalendar::new().with_base_url(server.url());
        let id = google.create_event(&connection(None), &payload()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(id, "evt-1");
    }

    #[tokio::test]
    async fn delete_treats_gone_as_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/calendars/primary/events/evt-1")
            .with_status(410)
            .create_async()
            .await;

        let google = GoogleCalendar::new().with_base_url(server.url());
        google.delete_event(&connection(None), "evt-1").await.unwrap();
    }

    #[tokio::test]
    async fn auth_and_quota_statuses_are_classified() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/calendars/primary/events/evt-1")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("PATCH", "/calendars/primary/events/evt-2")
            .with_status(429)
            .create_async()
            .await;

        let google = GoogleCalendar::new().with_base_url(server.url());
        let conn = connection(None);
        assert!(matches!(
            google.update_event(&conn, "evt-1", &payload()).await,
            Err(ProviderError::AuthenticationRequired("google"))
        ));
        assert!(matches!(
            google.update_event(&conn, "evt-2", &payload()).await,
            Err(ProviderError::RateLimited("google"))
        ));
    }

    #[tokio::test]
    async fn incremental_follows_pages_to_sync_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("syncToken".into(), "s1".into()),
                Matcher::UrlEncoded("pageToken".into(), "p2".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"items":[{"id":"b","status":"cancelled"}],"nextSyncToken":"s2"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::UrlEncoded("syncToken".into(), "s1".into()))
            .with_status(200)
            .with_body(
                r#"{"items":[{"id":"a","summary":"Lunch","status":"confirmed",
                    "start":{"dateTime":"2026-03-03T12:00:00Z"},
                    "end":{"dateTime":"2026-03-03T13:00:00Z"}}],
                    "nextPageToken":"p2"}"#,
            )
            .create_async()
            .await;

        let google = GoogleCalendar::new().with_base_url(server.url());
        let window = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let changes = google
            .incremental_changes(&connection(Some("s1")), window)
            .await
            .unwrap();

        assert_eq!(changes.next_cursor, "s2");
        let ids: Vec<_> = changes.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(changes.events[1].is_cancelled());
        assert!(changes.events[0].window().is_some());
    }

    #[tokio::test]
    async fn expired_sync_token_restarts_from_window() {
        let mut server = mockito::Server::new_async().await;
        let window = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::UrlEncoded("syncToken".into(), "stale".into()))
            .with_status(410)
            .create_async()
            .await;
        let fresh = server
            .mock("GET", "/calendars/primary/events")
            .match_query(Matcher::UrlEncoded("timeMin".into(), window.to_rfc3339()))
            .with_status(200)
            .with_body(r#"{"items":[],"nextSyncToken":"s9"}"#)
            .create_async()
            .await;

        let google = GoogleCalendar::new().with_base_url(server.url());
        let changes = google
            .incremental_changes(&connection(Some("stale")), window)
            .await
            .unwrap();

        fresh.assert_async().await;
        assert_eq!(changes.next_cursor, "s9");
        assert!(changes.events.is_empty());
    }

    #[tokio::test]
    async fn missing_token_needs_authentication() {
        let google = GoogleCalendar::new().with_base_url("http://127.0.0.1:9");
        let mut conn = connection(None);
        conn.access_token = None;
        assert!(matches!(
            google.delete_event(&conn, "x").await,
            Err(ProviderError::AuthenticationRequired("google"))
        ));
    }

    #[tokio::test]
    async fn refresh_without_oauth_client_fails() {
        let google = GoogleCalendar::new();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            google.refresh_token("r", now).await,
            Err(OAuthError::CredentialsNotConfigured { .. })
        ));
    }
}
