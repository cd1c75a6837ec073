//! Database schema migrations for pianodesk.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            tracing::warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: scheduling tables.
///
/// Clients and pianos are lookups owned by the surrounding application;
/// they exist here so summaries can be rendered.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS clients (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            name        TEXT NOT NULL,
            address     TEXT
        );

        CREATE TABLE IF NOT EXISTS pianos (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id     INTEGER NOT NULL,
            brand         TEXT NOT NULL,
            model         TEXT NOT NULL,
            serial_number TEXT
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id                 TEXT NOT NULL,
            piano_id                INTEGER NOT NULL,
            client_id               INTEGER NOT NULL,
            alert_type              TEXT NOT NULL,
            priority                TEXT NOT NULL,
            status                  TEXT NOT NULL DEFAULT 'active',
            days_since_last_service INTEGER,
            created_at              TEXT NOT NULL,
            acknowledged_at         TEXT,
            updated_at              TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS appointments (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id          TEXT NOT NULL,
            piano_id         INTEGER,
            client_id        INTEGER,
            date             TEXT NOT NULL,
            start_time       TEXT NOT NULL,
            duration_minutes INTEGER NOT NULL,
            appointment_type TEXT NOT NULL,
            status           TEXT NOT NULL DEFAULT 'scheduled',
            notes            TEXT,
            source_alert_id  INTEGER UNIQUE,
            created_at       TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS services (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id        TEXT NOT NULL,
            piano_id       INTEGER NOT NULL,
            client_id      INTEGER NOT NULL,
            date           TEXT NOT NULL,
            service_type   TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'scheduled',
            description    TEXT,
            notes          TEXT,
            appointment_id INTEGER,
            created_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_user_status ON alerts(user_id, status);
        CREATE INDEX IF NOT EXISTS idx_appointments_user_date ON appointments(user_id, date);
        CREATE INDEX IF NOT EXISTS idx_services_appointment ON services(appointment_id);",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()?;
    Ok(())
}

/// Migration v2: calendar connections and sync bookkeeping.
///
/// `sync_log` is append-only; nothing in the crate updates or deletes it.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS calendar_connections (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id       TEXT NOT NULL,
            provider      TEXT NOT NULL,
            calendar_id   TEXT,
            sync_enabled  INTEGER NOT NULL DEFAULT 1,
            access_token  TEXT,
            refresh_token TEXT,
            expires_at    TEXT,
            sync_cursor   TEXT,
            last_sync_at  TEXT,
            webhook_id    TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_events (
            id                TEXT PRIMARY KEY,
            connection_id     INTEGER NOT NULL,
            appointment_id    INTEGER,
            external_event_id TEXT NOT NULL,
            provider          TEXT NOT NULL,
            sync_status       TEXT NOT NULL,
            last_synced_at    TEXT NOT NULL,
            error_message     TEXT,
            metadata          TEXT,
            created_at        TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_events_appointment
            ON sync_events(connection_id, appointment_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_events_external
            ON sync_events(connection_id, external_event_id);

        CREATE TABLE IF NOT EXISTS sync_log (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            connection_id  INTEGER NOT NULL,
            sync_event_id  TEXT,
            appointment_id INTEGER,
            external_event_id TEXT,
            action         TEXT NOT NULL,
            direction      TEXT NOT NULL,
            status         TEXT NOT NULL,
            error_message  TEXT,
            created_at     TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_log_connection ON sync_log(connection_id, id);
        CREATE INDEX IF NOT EXISTS idx_connections_webhook ON calendar_connections(webhook_id);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_from_scratch() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'calendar_connections'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_incremental_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 1);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 2);
        conn.prepare("SELECT connection_id, external_event_id FROM sync_events")
            .unwrap();
    }

    #[test]
    fn sync_event_mapping_is_unique_per_connection() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        let insert = "INSERT INTO sync_events
            (id, connection_id, appointment_id, external_event_id, provider, sync_status, last_synced_at, created_at)
            VALUES (?1, 1, ?2, ?3, 'google', 'synced', 'x', 'x')";
        conn.execute(insert, rusqlite::params!["a", 10, "evt-1"]).unwrap();
        assert!(conn.execute(insert, rusqlite::params!["b", 10, "evt-2"]).is_err());
        assert!(conn.execute(insert, rusqlite::params!["c", 11, "evt-1"]).is_err());
        // NULL appointment ids (pending inbound rows) do not collide.
        conn.execute(insert, rusqlite::params!["d", Option::<i64>::None, "evt-3"]).unwrap();
        conn.execute(insert, rusqlite::params!["e", Option::<i64>::None, "evt-4"]).unwrap();
    }
}
