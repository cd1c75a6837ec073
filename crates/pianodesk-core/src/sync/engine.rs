//! Bidirectional sync between local appointments and external calendars.
//!
//! Per (appointment, connection) the mapping moves through:
//! - none -> `synced` when a push creates the external event
//! - `synced` -> `synced` when a push updates it
//! - none -> `pending` when an unknown external event shows up inbound
//! - any -> none on local delete or external cancel
//!
//! Failed attempts leave the mapping as it was. Every attempt appends one
//! `sync_log` row, success or failure.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event_codec::appointment_payload;
use super::types::{
    CalendarConnection, FullSyncReport, LogStatus, NewSyncLog, SyncAction, SyncDirection,
    SyncEvent, SyncResult, SyncStatus,
};
use crate::calendar::oauth::is_expired;
use crate::calendar::{CalendarProvider, EventPayload, ExternalEvent, ProviderRegistry};
use crate::clock::Clock;
use crate::error::{CoreError, OAuthError, Result, ValidationError};
use crate::rate_limit::RateLimiter;
use crate::schedule::Appointment;
use crate::storage::{Config, Database};

/// Engine-wide sync settings.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Zone stamped on outbound event times.
    pub event_time_zone: Tz,
    /// Reach of a connection's first incremental fetch.
    pub initial_window_days: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            event_time_zone: chrono_tz::Europe::Madrid,
            initial_window_days: 30,
        }
    }
}

/// Result of pushing one appointment to one connection in a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub connection_id: i64,
    pub appointment_id: i64,
    pub result: SyncResult,
}

/// True when `[ev_start, ev_end)` starts inside, ends inside, or covers
/// `[start, end)`.
pub fn overlaps_window(
    ev_start: DateTime<Utc>,
    ev_end: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    (ev_start >= start && ev_start < end)
        || (ev_end > start && ev_end <= end)
        || (ev_start <= start && ev_end >= end)
}

pub struct SyncEngine {
    pub(super) db: Arc<Database>,
    providers: ProviderRegistry,
    pub(super) clock: Arc<dyn Clock>,
    options: SyncOptions,
    limiter: RateLimiter,
}

impl SyncEngine {
    pub fn new(
        db: Arc<Database>,
        providers: ProviderRegistry,
        clock: Arc<dyn Clock>,
        options: SyncOptions,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            db,
            providers,
            clock,
            options,
            limiter,
        }
    }

    pub fn from_config(
        db: Arc<Database>,
        providers: ProviderRegistry,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Result<Self> {
        let options = SyncOptions {
            event_time_zone: config.event_time_zone()?,
            initial_window_days: i64::from(config.sync.initial_window_days),
        };
        Ok(Self::new(
            db,
            providers,
            clock,
            options,
            RateLimiter::from_sync_config(&config.sync),
        ))
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Connection `id` of `user_id`, or `NotFound`.
    pub fn connection_for(&self, user_id: &str, id: i64) -> Result<CalendarConnection> {
        self.db
            .get_user_connection(user_id, id)?
            .ok_or_else(|| CoreError::not_found("Connection", id))
    }

    /// Adapter for the connection, with a usable access token.
    ///
    /// Refreshes and persists tokens that expire within the skew window.
    async fn prepare(
        &self,
        connection: &CalendarConnection,
    ) -> Result<(Arc<dyn CalendarProvider>, CalendarConnection)> {
        let provider = self.providers.get(connection.provider)?;
        let mut connection = connection.clone();
        let now = self.clock.now();
        if !is_expired(connection.expires_at, now) {
            return Ok((provider, connection));
        }

        let refresh = connection
            .refresh_token
            .clone()
            .ok_or(OAuthError::TokenExpired)?;
        let tokens = provider.refresh_token(&refresh, now).await?;
        self.db.update_connection_tokens(
            connection.id,
            &tokens.access_token,
            tokens.refresh_token.as_deref(),
            tokens.expires_at,
            now,
        )?;
        tracing::info!(connection_id = connection.id, "access token refreshed");

        connection.access_token = Some(tokens.access_token);
        connection.refresh_token = tokens.refresh_token.or(connection.refresh_token);
        connection.expires_at = tokens.expires_at;
        Ok((provider, connection))
    }

    fn audit(&self, entry: NewSyncLog) {
        if let Err(e) = self.db.append_sync_log(&entry, self.clock.now()) {
            tracing::error!(
                connection_id = entry.connection_id,
                action = entry.action.as_str(),
                error = %e,
                "failed to write sync log"
            );
        }
    }

    fn payload_for(&self, appointment: &Appointment) -> Result<EventPayload> {
        let client = match appointment.client_id {
            Some(id) => self.db.get_client(id)?,
            None => None,
        };
        let piano = match appointment.piano_id {
            Some(id) => self.db.get_piano(id)?,
            None => None,
        };
        Ok(appointment_payload(
            appointment,
            client.as_ref(),
            piano.as_ref(),
            self.options.event_time_zone,
        ))
    }

    // === Outbound ===

    /// Create or update the external event for `appointment`.
    ///
    /// Never returns `Err`; failures are logged and reported in the result.
    pub async fn sync_appointment_to_external(
        &self,
        appointment: &Appointment,
        connection: &CalendarConnection,
    ) -> SyncResult {
        let existing = match self.db.sync_event_for_appointment(connection.id, appointment.id) {
            Ok(existing) => existing,
            Err(e) => {
                return self.outbound_failed(
                    connection,
                    appointment.id,
                    SyncAction::Create,
                    None,
                    &e.into(),
                )
            }
        };
        let action = if existing.is_some() {
            SyncAction::Update
        } else {
            SyncAction::Create
        };

        match self.push(appointment, connection, existing.as_ref()).await {
            Ok((mapping_id, external_id)) => {
                tracing::info!(
                    connection_id = connection.id,
                    appointment_id = appointment.id,
                    external_id = %external_id,
                    action = action.as_str(),
                    "appointment pushed"
                );
                self.audit(NewSyncLog {
                    connection_id: connection.id,
                    sync_event_id: Some(mapping_id),
                    appointment_id: Some(appointment.id),
                    external_event_id: Some(external_id.clone()),
                    action,
                    direction: SyncDirection::ToExternal,
                    status: LogStatus::Success,
                    error_message: None,
                });
                SyncResult::ok(Some(external_id))
            }
            Err(e) => {
                self.outbound_failed(connection, appointment.id, action, existing.as_ref(), &e)
            }
        }
    }

    async fn push(
        &self,
        appointment: &Appointment,
        connection: &CalendarConnection,
        existing: Option<&SyncEvent>,
    ) -> Result<(String, String)> {
        let (provider, connection) = self.prepare(connection).await?;
        let payload = self.payload_for(appointment)?;

        if let Some(mapping) = existing {
            provider
                .update_event(&connection, &mapping.external_event_id, &payload)
                .await?;
            self.db
                .mark_sync_event_synced(&mapping.id, self.clock.now())?;
            return Ok((mapping.id.clone(), mapping.external_event_id.clone()));
        }

        let external_id = provider.create_event(&connection, &payload).await?;
        let now = self.clock.now();
        let mapping = SyncEvent {
            id: Uuid::new_v4().to_string(),
            connection_id: connection.id,
            appointment_id: Some(appointment.id),
            external_event_id: external_id.clone(),
            provider: connection.provider,
            sync_status: SyncStatus::Synced,
            last_synced_at: now,
            error_message: None,
            metadata: None,
            created_at: now,
        };
        if let Err(e) = self.db.insert_sync_event(&mapping) {
            // Without a mapping the event would be orphaned; take it back.
            if let Err(undo) = provider.delete_event(&connection, &external_id).await {
                tracing::warn!(external_id = %external_id, error = %undo, "could not remove unmapped event");
            }
            return Err(e.into());
        }
        Ok((mapping.id, external_id))
    }

    fn outbound_failed(
        &self,
        connection: &CalendarConnection,
        appointment_id: i64,
        action: SyncAction,
        existing: Option<&SyncEvent>,
        error: &CoreError,
    ) -> SyncResult {
        tracing::warn!(
            connection_id = connection.id,
            appointment_id,
            action = action.as_str(),
            error = %error,
            "outbound sync failed"
        );
        self.audit(NewSyncLog {
            connection_id: connection.id,
            sync_event_id: existing.map(|m| m.id.clone()),
            appointment_id: Some(appointment_id),
            external_event_id: existing.map(|m| m.external_event_id.clone()),
            action,
            direction: SyncDirection::ToExternal,
            status: LogStatus::Error,
            error_message: Some(error.to_string()),
        });
        SyncResult::failed(error)
    }

    /// Remove the external event of `appointment_id`, if it was ever pushed.
    ///
    /// Idempotent: without a mapping this is a successful no-op and writes
    /// no log row.
    pub async fn delete_appointment_from_external(
        &self,
        appointment_id: i64,
        connection: &CalendarConnection,
    ) -> SyncResult {
        let existing = match self.db.sync_event_for_appointment(connection.id, appointment_id) {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                tracing::debug!(
                    connection_id = connection.id,
                    appointment_id,
                    "nothing to delete"
                );
                return SyncResult::ok(None);
            }
            Err(e) => {
                return self.outbound_failed(
                    connection,
                    appointment_id,
                    SyncAction::Delete,
                    None,
                    &e.into(),
                )
            }
        };

        let attempt = async {
            let (provider, connection) = self.prepare(connection).await?;
            provider
                .delete_event(&connection, &existing.external_event_id)
                .await?;
            self.db.delete_sync_event(&existing.id)?;
            Ok::<_, CoreError>(())
        };

        match attempt.await {
            Ok(()) => {
                tracing::info!(
                    connection_id = connection.id,
                    appointment_id,
                    external_id = %existing.external_event_id,
                    "external event deleted"
                );
                self.audit(NewSyncLog {
                    connection_id: connection.id,
                    sync_event_id: Some(existing.id.clone()),
                    appointment_id: Some(appointment_id),
                    external_event_id: Some(existing.external_event_id.clone()),
                    action: SyncAction::Delete,
                    direction: SyncDirection::ToExternal,
                    status: LogStatus::Success,
                    error_message: None,
                });
                SyncResult::ok(Some(existing.external_event_id))
            }
            Err(e) => self.outbound_failed(
                connection,
                appointment_id,
                SyncAction::Delete,
                Some(&existing),
                &e,
            ),
        }
    }

    /// Push appointment `appointment_id` of `user_id` to connection
    /// `connection_id`. Ownership failures are `Err`; sync failures are not.
    pub async fn push_appointment(
        &self,
        user_id: &str,
        connection_id: i64,
        appointment_id: i64,
    ) -> Result<SyncResult> {
        let connection = self.connection_for(user_id, connection_id)?;
        let appointment = self
            .db
            .get_appointment(user_id, appointment_id)?
            .ok_or_else(|| CoreError::not_found("Appointment", appointment_id))?;
        Ok(self
            .sync_appointment_to_external(&appointment, &connection)
            .await)
    }

    pub async fn remove_appointment(
        &self,
        user_id: &str,
        connection_id: i64,
        appointment_id: i64,
    ) -> Result<SyncResult> {
        let connection = self.connection_for(user_id, connection_id)?;
        Ok(self
            .delete_appointment_from_external(appointment_id, &connection)
            .await)
    }

    /// Push every appointment to every sync-enabled connection of `user_id`,
    /// paced by the sync rate limiter.
    pub async fn sync_all_appointments_for_user(
        &self,
        user_id: &str,
        appointments: &[Appointment],
    ) -> Result<Vec<PushOutcome>> {
        let connections = self.db.list_connections(user_id)?;
        let mut outcomes = Vec::new();
        for connection in connections.iter().filter(|c| c.sync_enabled) {
            for appointment in appointments {
                self.limiter.acquire().await;
                let result = self
                    .sync_appointment_to_external(appointment, connection)
                    .await;
                outcomes.push(PushOutcome {
                    connection_id: connection.id,
                    appointment_id: appointment.id,
                    result,
                });
            }
        }
        Ok(outcomes)
    }

    // === Inbound ===

    /// Apply one external event to the mapping table.
    ///
    /// Local appointments are never touched here. Unknown events become
    /// `pending` rows for the inbound materializer.
    pub async fn sync_external_event_to_piano(
        &self,
        event: &ExternalEvent,
        connection: &CalendarConnection,
    ) -> SyncResult {
        let (action, applied) = self.apply_inbound(event, connection);
        match applied {
            Ok((mapping_id, appointment_id)) => {
                tracing::debug!(
                    connection_id = connection.id,
                    external_id = %event.id,
                    action = action.as_str(),
                    "inbound event applied"
                );
                self.audit(NewSyncLog {
                    connection_id: connection.id,
                    sync_event_id: mapping_id,
                    appointment_id,
                    external_event_id: Some(event.id.clone()),
                    action,
                    direction: SyncDirection::FromExternal,
                    status: LogStatus::Success,
                    error_message: None,
                });
                SyncResult::ok(Some(event.id.clone()))
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = connection.id,
                    external_id = %event.id,
                    action = action.as_str(),
                    error = %e,
                    "inbound sync failed"
                );
                self.audit(NewSyncLog {
                    connection_id: connection.id,
                    sync_event_id: None,
                    appointment_id: None,
                    external_event_id: Some(event.id.clone()),
                    action,
                    direction: SyncDirection::FromExternal,
                    status: LogStatus::Error,
                    error_message: Some(e.to_string()),
                });
                SyncResult::failed(e)
            }
        }
    }

    /// The action attempted for `event`, and its mapping and appointment
    /// ids once applied.
    fn apply_inbound(
        &self,
        event: &ExternalEvent,
        connection: &CalendarConnection,
    ) -> (SyncAction, Result<(Option<String>, Option<i64>)>) {
        let existing = match self.db.sync_event_for_external(connection.id, &event.id) {
            Ok(existing) => existing,
            Err(e) => {
                let action = if event.is_cancelled() {
                    SyncAction::Delete
                } else {
                    SyncAction::Fetch
                };
                return (action, Err(e.into()));
            }
        };
        let action = match (&existing, event.is_cancelled()) {
            (_, true) => SyncAction::Delete,
            (Some(_), false) => SyncAction::Update,
            (None, false) => SyncAction::Create,
        };
        (action, self.write_inbound(event, connection, existing))
    }

    fn write_inbound(
        &self,
        event: &ExternalEvent,
        connection: &CalendarConnection,
        existing: Option<SyncEvent>,
    ) -> Result<(Option<String>, Option<i64>)> {
        let now = self.clock.now();
        match existing {
            Some(mapping) if event.is_cancelled() => {
                // Deleting the local appointment is the caller's business.
                self.db.delete_sync_event(&mapping.id)?;
                Ok((Some(mapping.id), mapping.appointment_id))
            }
            Some(mapping) if mapping.sync_status == SyncStatus::Pending => {
                self.db
                    .refresh_pending_sync_event(&mapping.id, &serde_json::to_value(event)?, now)?;
                Ok((Some(mapping.id), None))
            }
            Some(mapping) => {
                self.db.mark_sync_event_synced(&mapping.id, now)?;
                Ok((Some(mapping.id), mapping.appointment_id))
            }
            None if event.is_cancelled() => Ok((None, None)),
            None => {
                let mapping = SyncEvent {
                    id: Uuid::new_v4().to_string(),
                    connection_id: connection.id,
                    appointment_id: None,
                    external_event_id: event.id.clone(),
                    provider: connection.provider,
                    sync_status: SyncStatus::Pending,
                    last_synced_at: now,
                    error_message: None,
                    metadata: Some(serde_json::to_value(event)?),
                    created_at: now,
                };
                self.db.insert_sync_event(&mapping)?;
                Ok((Some(mapping.id), None))
            }
        }
    }

    /// Pull incremental changes and apply each one.
    ///
    /// The new cursor is stored before events are processed, so a crash
    /// mid-run replays nothing but may skip local processing of a page.
    pub async fn perform_full_sync(&self, connection: &CalendarConnection) -> FullSyncReport {
        let fetched = async {
            let (provider, mut connection) = self.prepare(connection).await?;
            let window_start = Duration::try_days(self.options.initial_window_days)
                .and_then(|days| self.clock.now().checked_sub_signed(days))
                .ok_or_else(|| ValidationError::InvalidValue {
                    field: "initial_window_days".into(),
                    message: "window starts before the representable date range".into(),
                })?;
            let changes = provider
                .incremental_changes(&connection, window_start)
                .await?;
            self.db
                .update_sync_cursor(connection.id, &changes.next_cursor, self.clock.now())?;
            connection.sync_cursor = Some(changes.next_cursor);
            Ok::<_, CoreError>((connection, changes.events))
        };

        let (connection, events) = match fetched.await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(connection_id = connection.id, error = %e, "incremental fetch failed");
                self.audit(NewSyncLog {
                    connection_id: connection.id,
                    sync_event_id: None,
                    appointment_id: None,
                    external_event_id: None,
                    action: SyncAction::Fetch,
                    direction: SyncDirection::FromExternal,
                    status: LogStatus::Error,
                    error_message: Some(e.to_string()),
                });
                return FullSyncReport {
                    success: false,
                    synced: 0,
                    errors: 1,
                    error: Some(e.to_string()),
                };
            }
        };

        let mut report = FullSyncReport {
            success: true,
            ..FullSyncReport::default()
        };
        for event in &events {
            if self.sync_external_event_to_piano(event, &connection).await.success {
                report.synced += 1;
            } else {
                report.errors += 1;
            }
        }
        tracing::info!(
            connection_id = connection.id,
            synced = report.synced,
            errors = report.errors,
            "full sync finished"
        );
        report
    }

    /// External events overlapping `[start, end)`.
    ///
    /// Cancelled events and events without resolvable times are skipped.
    pub async fn detect_conflicts(
        &self,
        connection: &CalendarConnection,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>> {
        if end <= start {
            return Err(ValidationError::InvalidTimeRange { start, end }.into());
        }
        let (provider, connection) = self.prepare(connection).await?;
        let events = provider.list_events(&connection, start, end).await?;
        Ok(events
            .into_iter()
            .filter(|ev| !ev.is_cancelled())
            .filter(|ev| {
                ev.window()
                    .is_some_and(|(s, e)| overlaps_window(s, e, start, end))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{EventDateTime, EventStatus, ProviderKind};
    use crate::clock::FixedClock;
    use crate::sync::NewConnection;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, h, m, 0).unwrap()
    }

    fn engine() -> (Arc<Database>, SyncEngine, CalendarConnection) {
        let db = Arc::new(Database::open_memory().unwrap());
        let id = db
            .insert_connection(
                &NewConnection {
                    user_id: "u1".into(),
                    provider: ProviderKind::Google,
                    calendar_id: None,
                    access_token: Some("tok".into()),
                    refresh_token: None,
                    expires_at: None,
                    webhook_id: None,
                },
                at(8, 0),
            )
            .unwrap();
        let connection = db.get_connection(id).unwrap().unwrap();
        let engine = SyncEngine::new(
            db.clone(),
            ProviderRegistry::new(),
            Arc::new(FixedClock::new(at(9, 0))),
            SyncOptions::default(),
            RateLimiter::new(1000, 1000),
        );
        (db, engine, connection)
    }

    fn event(status: EventStatus) -> ExternalEvent {
        ExternalEvent {
            id: "ext-1".into(),
            summary: Some("Recital".into()),
            description: None,
            location: None,
            start: Some(EventDateTime::new("2026-03-05T18:00:00Z", None)),
            end: Some(EventDateTime::new("2026-03-05T20:00:00Z", None)),
            status,
            updated: None,
        }
    }

    #[tokio::test]
    async fn failed_inbound_write_logs_the_attempted_action() {
        let (db, engine, connection) = engine();
        let created = engine
            .sync_external_event_to_piano(&event(EventStatus::Confirmed), &connection)
            .await;
        assert!(created.success);

        db.lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER freeze_update BEFORE UPDATE ON sync_events
                 BEGIN SELECT RAISE(ABORT, 'mapping frozen'); END;
                 CREATE TRIGGER freeze_delete BEFORE DELETE ON sync_events
                 BEGIN SELECT RAISE(ABORT, 'mapping frozen'); END;",
            )
            .unwrap();

        let updated = engine
            .sync_external_event_to_piano(&event(EventStatus::Confirmed), &connection)
            .await;
        assert!(!updated.success);
        let cancelled = engine
            .sync_external_event_to_piano(&event(EventStatus::Cancelled), &connection)
            .await;
        assert!(!cancelled.success);

        let logged: Vec<_> = db
            .sync_logs(connection.id, 10)
            .unwrap()
            .iter()
            .map(|log| (log.action, log.status))
            .collect();
        assert_eq!(
            logged,
            vec![
                (SyncAction::Delete, LogStatus::Error),
                (SyncAction::Update, LogStatus::Error),
                (SyncAction::Create, LogStatus::Success),
            ]
        );
    }

    #[test]
    fn overlap_cases() {
        let (start, end) = (at(10, 0), at(11, 0));
        // Starts inside.
        assert!(overlaps_window(at(10, 30), at(12, 0), start, end));
        // Ends inside.
        assert!(overlaps_window(at(9, 0), at(10, 30), start, end));
        // Covers.
        assert!(overlaps_window(at(9, 0), at(12, 0), start, end));
        // Inside.
        assert!(overlaps_window(at(10, 15), at(10, 45), start, end));
        // Touching edges.
        assert!(!overlaps_window(at(9, 0), at(10, 0), start, end));
        assert!(!overlaps_window(at(11, 0), at(12, 0), start, end));
    }
}
