//! Microsoft Graph v1.0 calendar adapter.
//!
//! Incremental sync walks `calendarView/delta`, following
//! `@odata.nextLink` until the feed hands out an `@odata.deltaLink`. The
//! delta link is an absolute URL and is stored as the cursor verbatim.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::oauth::{OAuthClient, RefreshedTokens};
use super::{
    bearer, check_status, read_json, CalendarProvider, EventDateTime, EventPayload, EventStatus,
    ExternalEvent, IncrementalChanges, ProviderKind,
};
use crate::error::{OAuthError, ProviderError};
use crate::sync::CalendarConnection;

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

/// Length of the calendar view a fresh delta feed tracks.
pub const DELTA_WINDOW_DAYS: i64 = 365;

const NAME: &str = "microsoft";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphTime {
    date_time: String,
    time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    body: Option<GraphBody>,
    location: Option<GraphLocation>,
    start: Option<GraphTime>,
    end: Option<GraphTime>,
    #[serde(default)]
    is_cancelled: bool,
    last_modified_date_time: Option<String>,
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
}

impl From<GraphEvent> for ExternalEvent {
    fn from(ev: GraphEvent) -> Self {
        let status = if ev.is_cancelled || ev.removed.is_some() {
            EventStatus::Cancelled
        } else {
            EventStatus::Confirmed
        };
        ExternalEvent {
            id: ev.id,
            summary: ev.subject,
            description: ev.body.and_then(|b| b.content),
            location: ev.location.and_then(|l| l.display_name),
            start: ev.start.map(|t| EventDateTime::new(t.date_time, t.time_zone)),
            end: ev.end.map(|t| EventDateTime::new(t.date_time, t.time_zone)),
            status,
            updated: ev
                .last_modified_date_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GraphPage {
    #[serde(default)]
    value: Vec<GraphEvent>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

fn graph_body(event: &EventPayload) -> serde_json::Value {
    let time = |t: &EventDateTime| {
        json!({
            "dateTime": t.date_time,
            "timeZone": t.time_zone.as_deref().unwrap_or("UTC"),
        })
    };
    json!({
        "subject": event.summary,
        "body": { "contentType": "Text", "content": event.description },
        "location": { "displayName": event.location },
        "start": time(&event.start),
        "end": time(&event.end),
    })
}

/// Microsoft Graph calendar client.
#[derive(Debug, Clone)]
pub struct MicrosoftCalendar {
    http: Client,
    base_url: String,
    oauth: Option<OAuthClient>,
}

impl Default for MicrosoftCalendar {
    fn default() -> Self {
        Self::new()
    }
}

impl MicrosoftCalendar {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: GRAPH_API_BASE.to_string(),
            oauth: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_oauth(mut self, oauth: OAuthClient) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// `/me/calendars/{id}` for a named calendar, `/me` for the default one.
    fn calendar_scope(&self, connection: &CalendarConnection) -> String {
        match connection.calendar_id.as_deref() {
            Some(calendar) => format!(
                "{}/me/calendars/{}",
                self.base_url,
                urlencoding::encode(calendar)
            ),
            None => format!("{}/me", self.base_url),
        }
    }

    fn event_url(&self, external_id: &str) -> String {
        format!(
            "{}/me/events/{}",
            self.base_url,
            urlencoding::encode(external_id)
        )
    }

    /// GET `url` and every `@odata.nextLink` after it.
    async fn fetch_pages(
        &self,
        connection: &CalendarConnection,
        url: String,
        query: &[(&str, String)],
    ) -> Result<(Vec<ExternalEvent>, Option<String>), ProviderError> {
        let token = bearer(NAME, connection)?;
        let mut events = Vec::new();
        let mut request = self.http.get(url).bearer_auth(token).query(query);

        loop {
            let resp = request.send().await?;
            if resp.status() == StatusCode::GONE {
                return Err(ProviderError::CursorExpired);
            }
            let page: GraphPage = read_json(NAME, check_status(NAME, resp).await?).await?;
            events.extend(page.value.into_iter().map(ExternalEvent::from));

            match page.next_link {
                // nextLink already carries the query.
                Some(next) => request = self.http.get(next).bearer_auth(token),
                None => return Ok((events, page.delta_link)),
            }
        }
    }

    async fn fetch_changes(
        &self,
        connection: &CalendarConnection,
        delta_link: Option<&str>,
        window_start: DateTime<Utc>,
    ) -> Result<IncrementalChanges, ProviderError> {
        let (events, next) = match delta_link {
            Some(link) => {
                // A cursor that is not an absolute URL cannot be replayed.
                let link = url::Url::parse(link).map_err(|_| ProviderError::CursorExpired)?;
                self.fetch_pages(connection, link.into(), &[]).await?
            }
            None => {
                let window_end = window_start + Duration::days(DELTA_WINDOW_DAYS);
                let query = [
                    ("startDateTime", window_start.to_rfc3339()),
                    ("endDateTime", window_end.to_rfc3339()),
                ];
                let url = format!("{}/calendarView/delta", self.calendar_scope(connection));
                self.fetch_pages(connection, url, &query).await?
            }
        };
        let next_cursor = next.ok_or_else(|| ProviderError::InvalidResponse {
            provider: NAME,
            message: "last page carried no @odata.deltaLink".into(),
        })?;
        Ok(IncrementalChanges {
            events,
            next_cursor,
        })
    }
}

#[async_trait]
impl CalendarProvider for MicrosoftCalendar {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Microsoft
    }

    async fn create_event(
        &self,
        connection: &CalendarConnection,
        event: &EventPayload,
    ) -> Result<String, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/events", self.calendar_scope(connection)))
            .bearer_auth(bearer(NAME, connection)?)
            .json(&graph_body(event))
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
            .patch(self.event_url(external_id))
            .bearer_auth(bearer(NAME, connection)?)
            .json(&graph_body(event))
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
            .delete(self.event_url(external_id))
            .bearer_auth(bearer(NAME, connection)?)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!(external_id, "microsoft event already deleted");
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
            ("startDateTime", time_min.to_rfc3339()),
            ("endDateTime", time_max.to_rfc3339()),
        ];
        let url = format!("{}/calendarView", self.calendar_scope(connection));
        let (events, _) = self.fetch_pages(connection, url, &query).await?;
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
                    "microsoft delta link expired, restarting full window"
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

    fn connection(calendar_id: Option<&str>, cursor: Option<String>) -> CalendarConnection {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        CalendarConnection {
            id: 3,
            user_id: "u1".into(),
            provider: ProviderKind::Microsoft,
            calendar_id: calendar_id.map(String::from),
            sync_enabled: true,
            access_token: Some("tok".into()),
            refresh_token: None,
            expires_at: None,
            sync_cursor: cursor,
            last_sync_at: None,
            webhook_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    fn payload() -> EventPayload {
        EventPayload {
            summary: "Regulation - Luis".into(),
            description: "Piano: Steinway B".into(),
            location: String::new(),
            start: EventDateTime::new("2026-03-03T09:00:00", None),
            end: EventDateTime::new("2026-03-03T12:00:00", None),
        }
    }

    #[test]
    fn body_uses_graph_shape_and_utc_default() {
        let body = graph_body(&payload());
        assert_eq!(body["subject"], "Regulation - Luis");
        assert_eq!(body["body"]["contentType"], "Text");
        assert_eq!(body["start"]["timeZone"], "UTC");
    }

    #[test]
    fn removed_entries_read_as_cancelled() {
        let page: GraphPage = serde_json::from_str(
            r#"{"value":[
                {"id":"gone","@removed":{"reason":"deleted"}},
                {"id":"off","isCancelled":true},
                {"id":"on","subject":"Visit","isCancelled":false,
                 "start":{"dateTime":"2026-03-03T09:00:00.0000000","timeZone":"UTC"},
                 "end":{"dateTime":"2026-03-03T10:00:00.0000000","timeZone":"UTC"}}
            ]}"#,
        )
        .unwrap();
        let events: Vec<ExternalEvent> = page.value.into_iter().map(Into::into).collect();
        assert!(events[0].is_cancelled());
        assert!(events[1].is_cancelled());
        assert!(!events[2].is_cancelled());
        assert_eq!(
            events[2].window().map(|(s, _)| s),
            Some(Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn create_targets_named_calendar() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/me/calendars/work/events")
            .match_header("authorization", "Bearer tok")
            .with_status(201)
            .with_body(r#"{"id":"AAMk1"}"#)
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(server.url());
        let id = graph
            .create_event(&connection(Some("work"), None), &payload())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(id, "AAMk1");
    }

    #[tokio::test]
    async fn named_calendar_scopes_list_and_delta() {
        let mut server = mockito::Server::new_async().await;
        let list = server
            .mock("GET", "/me/calendars/work/calendarView")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"value":[{"id":"w1","subject":"Tuning"}]}"#)
            .create_async()
            .await;
        let delta = server
            .mock("GET", "/me/calendars/work/calendarView/delta")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"value":[],"@odata.deltaLink":"https://graph/work/delta?$deltatoken=w"}"#)
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(server.url());
        let conn = connection(Some("work"), None);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

        let events = graph
            .list_events(&conn, now, now + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(events[0].id, "w1");

        let changes = graph.incremental_changes(&conn, now).await.unwrap();
        assert_eq!(changes.next_cursor, "https://graph/work/delta?$deltatoken=w");

        list.assert_async().await;
        delta.assert_async().await;
    }

    #[tokio::test]
    async fn delete_not_found_is_success() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/me/events/AAMk1")
            .with_status(404)
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(server.url());
        graph
            .delete_event(&connection(None, None), "AAMk1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delta_follows_next_link_to_delta_link() {
        let mut server = mockito::Server::new_async().await;
        let base = server.url();
        server
            .mock("GET", "/me/calendarView/delta")
            .match_query(Matcher::UrlEncoded("$skiptoken".into(), "page2".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"value":[{{"id":"b","isCancelled":true}}],
                    "@odata.deltaLink":"{base}/me/calendarView/delta?$deltatoken=d2"}}"#
            ))
            .create_async()
            .await;
        server
            .mock("GET", "/me/calendarView/delta")
            .match_query(Matcher::UrlEncoded("$deltatoken".into(), "d1".into()))
            .with_status(200)
            .with_body(format!(
                r#"{{"value":[{{"id":"a","subject":"Lunch"}}],
                    "@odata.nextLink":"{base}/me/calendarView/delta?$skiptoken=page2"}}"#
            ))
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(base.clone());
        let cursor = format!("{base}/me/calendarView/delta?$deltatoken=d1");
        let window = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let changes = graph
            .incremental_changes(&connection(None, Some(cursor)), window)
            .await
            .unwrap();

        assert_eq!(
            changes.next_cursor,
            format!("{base}/me/calendarView/delta?$deltatoken=d2")
        );
        assert_eq!(changes.events.len(), 2);
        assert!(changes.events[1].is_cancelled());
    }

    #[tokio::test]
    async fn malformed_cursor_restarts_from_window() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/me/calendarView/delta")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"value":[],"@odata.deltaLink":"https://graph/delta?$deltatoken=y"}"#)
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(server.url());
        let window = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let changes = graph
            .incremental_changes(&connection(None, Some("not a url".into())), window)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(changes.next_cursor, "https://graph/delta?$deltatoken=y");
    }

    #[tokio::test]
    async fn first_delta_sends_window() {
        let mut server = mockito::Server::new_async().await;
        let window = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let mock = server
            .mock("GET", "/me/calendarView/delta")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("startDateTime".into(), window.to_rfc3339()),
                Matcher::UrlEncoded(
                    "endDateTime".into(),
                    (window + Duration::days(DELTA_WINDOW_DAYS)).to_rfc3339(),
                ),
            ]))
            .with_status(200)
            .with_body(r#"{"value":[],"@odata.deltaLink":"https://graph/delta?$deltatoken=x"}"#)
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(server.url());
        let changes = graph
            .incremental_changes(&connection(None, None), window)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(changes.next_cursor, "https://graph/delta?$deltatoken=x");
    }

    #[tokio::test]
    async fn throttling_maps_to_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/me/calendarView")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let graph = MicrosoftCalendar::new().with_base_url(server.url());
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            graph
                .list_events(&connection(None, None), now, now + Duration::days(1))
                .await,
            Err(ProviderError::RateLimited("microsoft"))
        ));
    }
}
