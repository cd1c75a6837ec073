//! SQLite storage for calendar connections, event mappings and the sync
//! audit log.
//!
//! `sync_log` is append-only: there is no update or delete for it here.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::database::{decode_enum, decode_opt_timestamp, decode_timestamp, Database};
use crate::calendar::ProviderKind;
use crate::error::DatabaseError;
use crate::sync::{
    CalendarConnection, LogStatus, NewConnection, NewSyncLog, SyncAction, SyncDirection, SyncEvent,
    SyncLog, SyncStatus,
};

const CONNECTION_COLUMNS: &str = "id, user_id, provider, calendar_id, sync_enabled, access_token,
     refresh_token, expires_at, sync_cursor, last_sync_at, webhook_id, created_at, updated_at";

const SYNC_EVENT_COLUMNS: &str = "id, connection_id, appointment_id, external_event_id, provider,
     sync_status, last_synced_at, error_message, metadata, created_at";

const SYNC_LOG_COLUMNS: &str = "id, connection_id, sync_event_id, appointment_id,
     external_event_id, action, direction, status, error_message, created_at";

fn row_to_connection(row: &Row<'_>) -> rusqlite::Result<CalendarConnection> {
    Ok(CalendarConnection {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: decode_enum(2, &row.get::<_, String>(2)?, ProviderKind::parse)?,
        calendar_id: row.get(3)?,
        sync_enabled: row.get(4)?,
        access_token: row.get(5)?,
        refresh_token: row.get(6)?,
        expires_at: decode_opt_timestamp(7, row.get(7)?)?,
        sync_cursor: row.get(8)?,
        last_sync_at: decode_opt_timestamp(9, row.get(9)?)?,
        webhook_id: row.get(10)?,
        created_at: decode_timestamp(11, &row.get::<_, String>(11)?)?,
        updated_at: decode_timestamp(12, &row.get::<_, String>(12)?)?,
    })
}

fn row_to_sync_event(row: &Row<'_>) -> rusqlite::Result<SyncEvent> {
    let metadata: Option<String> = row.get(8)?;
    let metadata = metadata
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
        })?;
    Ok(SyncEvent {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        appointment_id: row.get(2)?,
        external_event_id: row.get(3)?,
        provider: decode_enum(4, &row.get::<_, String>(4)?, ProviderKind::parse)?,
        sync_status: decode_enum(5, &row.get::<_, String>(5)?, SyncStatus::parse)?,
        last_synced_at: decode_timestamp(6, &row.get::<_, String>(6)?)?,
        error_message: row.get(7)?,
        metadata,
        created_at: decode_timestamp(9, &row.get::<_, String>(9)?)?,
    })
}

fn row_to_sync_log(row: &Row<'_>) -> rusqlite::Result<SyncLog> {
    Ok(SyncLog {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        sync_event_id: row.get(2)?,
        appointment_id: row.get(3)?,
        external_event_id: row.get(4)?,
        action: decode_enum(5, &row.get::<_, String>(5)?, SyncAction::parse)?,
        direction: decode_enum(6, &row.get::<_, String>(6)?, SyncDirection::parse)?,
        status: decode_enum(7, &row.get::<_, String>(7)?, LogStatus::parse)?,
        error_message: row.get(8)?,
        created_at: decode_timestamp(9, &row.get::<_, String>(9)?)?,
    })
}

fn encode_metadata(metadata: Option<&serde_json::Value>) -> Option<String> {
    metadata.map(|v| v.to_string())
}

impl Database {
    // === Connections ===

    pub fn insert_connection(
        &self,
        connection: &NewConnection,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO calendar_connections (user_id, provider, calendar_id, sync_enabled,
                access_token, refresh_token, expires_at, webhook_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                connection.user_id,
                connection.provider.as_str(),
                connection.calendar_id,
                connection.access_token,
                connection.refresh_token,
                connection.expires_at.map(|t| t.to_rfc3339()),
                connection.webhook_id,
                now.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_connection(&self, id: i64) -> Result<Option<CalendarConnection>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {CONNECTION_COLUMNS} FROM calendar_connections WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], row_to_connection).optional()?)
    }

    /// Connection `id` if it belongs to `user_id`.
    pub fn get_user_connection(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<CalendarConnection>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {CONNECTION_COLUMNS} FROM calendar_connections WHERE id = ?1 AND user_id = ?2"
        );
        Ok(conn
            .query_row(&sql, params![id, user_id], row_to_connection)
            .optional()?)
    }

    pub fn list_connections(&self, user_id: &str) -> Result<Vec<CalendarConnection>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {CONNECTION_COLUMNS} FROM calendar_connections WHERE user_id = ?1 ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], row_to_connection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Connection whose push channel or subscription id is `webhook_id`.
    pub fn connection_by_webhook(
        &self,
        webhook_id: &str,
    ) -> Result<Option<CalendarConnection>, DatabaseError> {
        let conn = self.lock()?;
        let sql =
            format!("SELECT {CONNECTION_COLUMNS} FROM calendar_connections WHERE webhook_id = ?1");
        Ok(conn
            .query_row(&sql, params![webhook_id], row_to_connection)
            .optional()?)
    }

    pub fn set_connection_sync_enabled(
        &self,
        id: i64,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE calendar_connections SET sync_enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, now.to_rfc3339(), id],
        )?;
        Ok(changed > 0)
    }

    /// Persist the incremental cursor and stamp `last_sync_at`.
    pub fn update_sync_cursor(
        &self,
        id: i64,
        cursor: &str,
        synced_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE calendar_connections SET sync_cursor = ?1, last_sync_at = ?2, updated_at = ?2
             WHERE id = ?3",
            params![cursor, synced_at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn update_connection_tokens(
        &self,
        id: i64,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE calendar_connections
             SET access_token = ?1, refresh_token = COALESCE(?2, refresh_token),
                 expires_at = ?3, updated_at = ?4
             WHERE id = ?5",
            params![
                access_token,
                refresh_token,
                expires_at.map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    // === Sync events ===

    pub fn insert_sync_event(&self, event: &SyncEvent) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_events (id, connection_id, appointment_id, external_event_id,
                provider, sync_status, last_synced_at, error_message, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.id,
                event.connection_id,
                event.appointment_id,
                event.external_event_id,
                event.provider.as_str(),
                event.sync_status.as_str(),
                event.last_synced_at.to_rfc3339(),
                event.error_message,
                encode_metadata(event.metadata.as_ref()),
                event.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn sync_event_for_appointment(
        &self,
        connection_id: i64,
        appointment_id: i64,
    ) -> Result<Option<SyncEvent>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SYNC_EVENT_COLUMNS} FROM sync_events
             WHERE connection_id = ?1 AND appointment_id = ?2"
        );
        Ok(conn
            .query_row(&sql, params![connection_id, appointment_id], row_to_sync_event)
            .optional()?)
    }

    pub fn sync_event_for_external(
        &self,
        connection_id: i64,
        external_event_id: &str,
    ) -> Result<Option<SyncEvent>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SYNC_EVENT_COLUMNS} FROM sync_events
             WHERE connection_id = ?1 AND external_event_id = ?2"
        );
        Ok(conn
            .query_row(&sql, params![connection_id, external_event_id], row_to_sync_event)
            .optional()?)
    }

    pub fn sync_events_for_connection(
        &self,
        connection_id: i64,
    ) -> Result<Vec<SyncEvent>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SYNC_EVENT_COLUMNS} FROM sync_events WHERE connection_id = ?1
             ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![connection_id], row_to_sync_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Inbound-only mappings waiting for a local appointment.
    pub fn pending_sync_events(&self, connection_id: i64) -> Result<Vec<SyncEvent>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SYNC_EVENT_COLUMNS} FROM sync_events
             WHERE connection_id = ?1 AND sync_status = 'pending'
             ORDER BY created_at, id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![connection_id], row_to_sync_event)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Mark a mapping synced at `at` and clear any recorded error.
    pub fn mark_sync_event_synced(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_events SET sync_status = 'synced', last_synced_at = ?1,
                error_message = NULL
             WHERE id = ?2",
            params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Replace the raw event on a pending mapping, leaving it pending.
    pub fn refresh_pending_sync_event(
        &self,
        id: &str,
        metadata: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_events SET metadata = ?1, last_synced_at = ?2 WHERE id = ?3",
            params![metadata.to_string(), at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Attach a materialized appointment to a pending mapping.
    pub fn link_sync_event(
        &self,
        id: &str,
        appointment_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_events SET appointment_id = ?1, sync_status = 'synced',
                last_synced_at = ?2, error_message = NULL
             WHERE id = ?3",
            params![appointment_id, at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn delete_sync_event(&self, id: &str) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM sync_events WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // === Audit log ===

    pub fn append_sync_log(
        &self,
        entry: &NewSyncLog,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_log (connection_id, sync_event_id, appointment_id,
                external_event_id, action, direction, status, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.connection_id,
                entry.sync_event_id,
                entry.appointment_id,
                entry.external_event_id,
                entry.action.as_str(),
                entry.direction.as_str(),
                entry.status.as_str(),
                entry.error_message,
                now.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest `limit` audit rows of a connection.
    pub fn sync_logs(&self, connection_id: i64, limit: usize) -> Result<Vec<SyncLog>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {SYNC_LOG_COLUMNS} FROM sync_log WHERE connection_id = ?1
             ORDER BY id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![connection_id, limit], row_to_sync_log)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn new_connection(user: &str, webhook: Option<&str>) -> NewConnection {
        NewConnection {
            user_id: user.into(),
            provider: ProviderKind::Google,
            calendar_id: None,
            access_token: Some("a1".into()),
            refresh_token: Some("r1".into()),
            expires_at: Some(now()),
            webhook_id: webhook.map(String::from),
        }
    }

    fn mapping(id: &str, connection_id: i64, appointment_id: Option<i64>, ext: &str) -> SyncEvent {
        SyncEvent {
            id: id.into(),
            connection_id,
            appointment_id,
            external_event_id: ext.into(),
            provider: ProviderKind::Google,
            sync_status: if appointment_id.is_some() {
                SyncStatus::Synced
            } else {
                SyncStatus::Pending
            },
            last_synced_at: now(),
            error_message: None,
            metadata: appointment_id
                .is_none()
                .then(|| serde_json::json!({"id": ext})),
            created_at: now(),
        }
    }

    #[test]
    fn connection_round_trip_and_ownership() {
        let db = Database::open_memory().unwrap();
        let id = db.insert_connection(&new_connection("u1", Some("chan-1")), now()).unwrap();

        let stored = db.get_connection(id).unwrap().unwrap();
        assert_eq!(stored.provider, ProviderKind::Google);
        assert!(stored.sync_enabled);
        assert_eq!(stored.access_token.as_deref(), Some("a1"));
        assert_eq!(stored.expires_at, Some(now()));

        assert!(db.get_user_connection("u1", id).unwrap().is_some());
        assert!(db.get_user_connection("u2", id).unwrap().is_none());
        assert_eq!(db.connection_by_webhook("chan-1").unwrap().unwrap().id, id);
        assert!(db.connection_by_webhook("chan-2").unwrap().is_none());
    }

    #[test]
    fn cursor_and_tokens_update() {
        let db = Database::open_memory().unwrap();
        let id = db.insert_connection(&new_connection("u1", None), now()).unwrap();

        db.update_sync_cursor(id, "tok-2", now()).unwrap();
        db.update_connection_tokens(id, "a2", None, None, now()).unwrap();
        db.set_connection_sync_enabled(id, false, now()).unwrap();

        let stored = db.get_connection(id).unwrap().unwrap();
        assert_eq!(stored.sync_cursor.as_deref(), Some("tok-2"));
        assert_eq!(stored.last_sync_at, Some(now()));
        assert_eq!(stored.access_token.as_deref(), Some("a2"));
        // Refresh token kept when the provider does not rotate it.
        assert_eq!(stored.refresh_token.as_deref(), Some("r1"));
        assert_eq!(stored.expires_at, None);
        assert!(!stored.sync_enabled);
    }

    #[test]
    fn mapping_lookups_both_ways() {
        let db = Database::open_memory().unwrap();
        db.insert_sync_event(&mapping("m1", 1, Some(10), "evt-a")).unwrap();
        db.insert_sync_event(&mapping("m2", 1, None, "evt-b")).unwrap();

        assert_eq!(db.sync_event_for_appointment(1, 10).unwrap().unwrap().id, "m1");
        assert_eq!(db.sync_event_for_external(1, "evt-b").unwrap().unwrap().id, "m2");
        assert!(db.sync_event_for_external(2, "evt-b").unwrap().is_none());

        let pending = db.pending_sync_events(1).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].metadata, Some(serde_json::json!({"id": "evt-b"})));

        db.link_sync_event("m2", 11, now()).unwrap();
        assert!(db.pending_sync_events(1).unwrap().is_empty());
        assert_eq!(db.sync_event_for_appointment(1, 11).unwrap().unwrap().id, "m2");
    }

    #[test]
    fn duplicate_mapping_is_rejected() {
        let db = Database::open_memory().unwrap();
        db.insert_sync_event(&mapping("m1", 1, Some(10), "evt-a")).unwrap();
        assert!(db.insert_sync_event(&mapping("m2", 1, Some(10), "evt-z")).is_err());
        assert!(db.insert_sync_event(&mapping("m3", 1, Some(12), "evt-a")).is_err());
        // Same pair on another connection is a different mapping.
        db.insert_sync_event(&mapping("m4", 2, Some(10), "evt-a")).unwrap();
    }

    #[test]
    fn delete_reports_whether_row_existed() {
        let db = Database::open_memory().unwrap();
        db.insert_sync_event(&mapping("m1", 1, Some(10), "evt-a")).unwrap();
        assert!(db.delete_sync_event("m1").unwrap());
        assert!(!db.delete_sync_event("m1").unwrap());
    }

    #[test]
    fn logs_are_newest_first_and_limited() {
        let db = Database::open_memory().unwrap();
        for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
            db.append_sync_log(
                &NewSyncLog {
                    connection_id: 1,
                    sync_event_id: None,
                    appointment_id: Some(10),
                    external_event_id: Some("evt-a".into()),
                    action,
                    direction: SyncDirection::ToExternal,
                    status: LogStatus::Success,
                    error_message: None,
                },
                now(),
            )
            .unwrap();
        }

        let logs = db.sync_logs(1, 2).unwrap();
        let actions: Vec<_> = logs.iter().map(|l| l.action).collect();
        assert_eq!(actions, vec![SyncAction::Delete, SyncAction::Update]);
        assert!(db.sync_logs(2, 10).unwrap().is_empty());
    }
}
