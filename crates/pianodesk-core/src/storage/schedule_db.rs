//! SQLite storage for alerts, appointments and services.
//!
//! Clients and pianos are read-only lookups here; the insert helpers for
//! them exist for seeding.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::database::{
    decode_date, decode_enum, decode_opt_timestamp, decode_time, decode_timestamp, encode_date,
    encode_time, Database,
};
use crate::error::DatabaseError;
use crate::schedule::{
    Alert, AlertPriority, AlertStatus, Appointment, AppointmentStatus, Client, NewAlert,
    NewAppointment, NewService, Piano, Service, ServiceStatus, ServiceType,
};
use crate::timeline::Booking;

const ALERT_COLUMNS: &str = "id, user_id, piano_id, client_id, alert_type, priority, status,
     days_since_last_service, created_at, acknowledged_at, updated_at";

const APPOINTMENT_COLUMNS: &str = "id, user_id, piano_id, client_id, date, start_time,
     duration_minutes, appointment_type, status, notes, source_alert_id, created_at, updated_at";

const SERVICE_COLUMNS: &str = "id, user_id, piano_id, client_id, date, service_type, status,
     description, notes, appointment_id, created_at";

// === Row mappers ===

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        user_id: row.get(1)?,
        piano_id: row.get(2)?,
        client_id: row.get(3)?,
        alert_type: decode_enum(4, &row.get::<_, String>(4)?, ServiceType::parse)?,
        priority: decode_enum(5, &row.get::<_, String>(5)?, AlertPriority::parse)?,
        status: decode_enum(6, &row.get::<_, String>(6)?, AlertStatus::parse)?,
        days_since_last_service: row.get(7)?,
        created_at: decode_timestamp(8, &row.get::<_, String>(8)?)?,
        acknowledged_at: decode_opt_timestamp(9, row.get(9)?)?,
        updated_at: decode_timestamp(10, &row.get::<_, String>(10)?)?,
    })
}

fn row_to_appointment(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    Ok(Appointment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        piano_id: row.get(2)?,
        client_id: row.get(3)?,
        date: decode_date(4, &row.get::<_, String>(4)?)?,
        start_time: decode_time(5, &row.get::<_, String>(5)?)?,
        duration_minutes: row.get(6)?,
        appointment_type: decode_enum(7, &row.get::<_, String>(7)?, ServiceType::parse)?,
        status: decode_enum(8, &row.get::<_, String>(8)?, AppointmentStatus::parse)?,
        notes: row.get(9)?,
        source_alert_id: row.get(10)?,
        created_at: decode_timestamp(11, &row.get::<_, String>(11)?)?,
        updated_at: decode_timestamp(12, &row.get::<_, String>(12)?)?,
    })
}

fn row_to_service(row: &Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        user_id: row.get(1)?,
        piano_id: row.get(2)?,
        client_id: row.get(3)?,
        date: decode_date(4, &row.get::<_, String>(4)?)?,
        service_type: decode_enum(5, &row.get::<_, String>(5)?, ServiceType::parse)?,
        status: decode_enum(6, &row.get::<_, String>(6)?, ServiceStatus::parse)?,
        description: row.get(7)?,
        notes: row.get(8)?,
        appointment_id: row.get(9)?,
        created_at: decode_timestamp(10, &row.get::<_, String>(10)?)?,
    })
}

fn insert_appointment_on(
    conn: &Connection,
    appt: &NewAppointment,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO appointments (user_id, piano_id, client_id, date, start_time, duration_minutes,
            appointment_type, status, notes, source_alert_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            appt.user_id,
            appt.piano_id,
            appt.client_id,
            encode_date(appt.date),
            encode_time(appt.start_time),
            appt.duration_minutes,
            appt.appointment_type.as_str(),
            appt.status.as_str(),
            appt.notes,
            appt.source_alert_id,
            now.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_service_on(
    conn: &Connection,
    service: &NewService,
    appointment_id: Option<i64>,
    now: DateTime<Utc>,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO services (user_id, piano_id, client_id, date, service_type, status,
            description, notes, appointment_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            service.user_id,
            service.piano_id,
            service.client_id,
            encode_date(service.date),
            service.service_type.as_str(),
            service.status.as_str(),
            service.description,
            service.notes,
            appointment_id,
            now.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Latest date whose text encoding still sorts chronologically.
fn last_stored_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Live appointments of `user_id` on dates in `[from, to]`.
fn appointments_between_on(
    conn: &Connection,
    user_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> rusqlite::Result<Vec<Appointment>> {
    let to = to.min(last_stored_date());
    if from > to {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE user_id = ?1 AND date >= ?2 AND date <= ?3 AND status != 'cancelled'
         ORDER BY date, start_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![user_id, encode_date(from), encode_date(to)],
        row_to_appointment,
    )?;
    rows.collect()
}

/// Everything the auto-scheduler writes for one alert.
#[derive(Debug, Clone)]
pub struct AlertCommit {
    pub user_id: String,
    pub alert_id: i64,
    pub appointment: Option<NewAppointment>,
    pub service: Option<NewService>,
    pub acknowledged_at: DateTime<Utc>,
}

/// Ids produced by a successful [`Database::commit_alert_schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedSchedule {
    pub appointment_id: Option<i64>,
    pub service_id: Option<i64>,
}

impl Database {
    // === Lookups ===

    pub fn insert_client(
        &self,
        user_id: &str,
        name: &str,
        address: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO clients (user_id, name, address) VALUES (?1, ?2, ?3)",
            params![user_id, name, address],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_piano(
        &self,
        client_id: i64,
        brand: &str,
        model: &str,
        serial_number: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pianos (client_id, brand, model, serial_number) VALUES (?1, ?2, ?3, ?4)",
            params![client_id, brand, model, serial_number],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_client(&self, id: i64) -> Result<Option<Client>, DatabaseError> {
        let conn = self.lock()?;
        let client = conn
            .query_row(
                "SELECT id, user_id, name, address FROM clients WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Client {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        address: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(client)
    }

    pub fn get_piano(&self, id: i64) -> Result<Option<Piano>, DatabaseError> {
        let conn = self.lock()?;
        let piano = conn
            .query_row(
                "SELECT id, client_id, brand, model, serial_number FROM pianos WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Piano {
                        id: row.get(0)?,
                        client_id: row.get(1)?,
                        brand: row.get(2)?,
                        model: row.get(3)?,
                        serial_number: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(piano)
    }

    // === Alerts ===

    pub fn insert_alert(&self, alert: &NewAlert) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO alerts (user_id, piano_id, client_id, alert_type, priority, status,
                days_since_last_service, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7, ?7)",
            params![
                alert.user_id,
                alert.piano_id,
                alert.client_id,
                alert.alert_type.as_str(),
                alert.priority.as_str(),
                alert.days_since_last_service,
                alert.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Alert `id` if it belongs to `user_id`.
    pub fn get_alert(&self, user_id: &str, id: i64) -> Result<Option<Alert>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1 AND user_id = ?2");
        let alert = conn
            .query_row(&sql, params![id, user_id], row_to_alert)
            .optional()?;
        Ok(alert)
    }

    /// Alerts of `user_id`, most significant priority first, then newest.
    pub fn list_alerts(
        &self,
        user_id: &str,
        status: Option<AlertStatus>,
        priority: Option<AlertPriority>,
    ) -> Result<Vec<Alert>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE user_id = ?1
               AND (?2 IS NULL OR status = ?2)
               AND (?3 IS NULL OR priority = ?3)
             ORDER BY CASE priority WHEN 'urgent' THEN 0 WHEN 'pending' THEN 1 ELSE 2 END,
                      created_at DESC, id DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                user_id,
                status.map(|s| s.as_str()),
                priority.map(|p| p.as_str())
            ],
            row_to_alert,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Set an alert's status outside the scheduling workflow (dismissal).
    pub fn set_alert_status(
        &self,
        user_id: &str,
        id: i64,
        status: AlertStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE alerts SET status = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
            params![status.as_str(), now.to_rfc3339(), id, user_id],
        )?;
        Ok(changed > 0)
    }

    // === Appointments ===

    pub fn insert_appointment(
        &self,
        appt: &NewAppointment,
        now: DateTime<Utc>,
    ) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        Ok(insert_appointment_on(&conn, appt, now)?)
    }

    pub fn get_appointment(
        &self,
        user_id: &str,
        id: i64,
    ) -> Result<Option<Appointment>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1 AND user_id = ?2"
        );
        let appt = conn
            .query_row(&sql, params![id, user_id], row_to_appointment)
            .optional()?;
        Ok(appt)
    }

    /// Non-cancelled appointments of `user_id` dated within `[from, to]`.
    pub fn list_appointments(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, DatabaseError> {
        let conn = self.lock()?;
        Ok(appointments_between_on(&conn, user_id, from, to)?)
    }

    /// Occupied intervals for the slot finder.
    ///
    /// Starts one day early so a booking spilling past midnight still
    /// blocks the next morning.
    pub fn bookings_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Booking>, DatabaseError> {
        let appointments = self.list_appointments(user_id, from.pred_opt().unwrap_or(from), to)?;
        Ok(appointments
            .iter()
            .map(|a| Booking::new(a.starts_at(), a.duration_minutes))
            .collect())
    }

    // === Services ===

    pub fn get_service(&self, user_id: &str, id: i64) -> Result<Option<Service>, DatabaseError> {
        let conn = self.lock()?;
        let sql = format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1 AND user_id = ?2");
        let service = conn
            .query_row(&sql, params![id, user_id], row_to_service)
            .optional()?;
        Ok(service)
    }

    // === Alert scheduling ===

    /// Create the appointment and service for an alert and acknowledge it,
    /// all or nothing.
    ///
    /// Inside one IMMEDIATE transaction: the alert must still be `active`
    /// and the appointment interval must not overlap another live
    /// appointment of the same owner.
    ///
    /// # Errors
    /// [`DatabaseError::AlertNoLongerActive`] or [`DatabaseError::SlotTaken`]
    /// when the re-checks fail; nothing is written in either case.
    pub fn commit_alert_schedule(
        &self,
        commit: &AlertCommit,
    ) -> Result<CommittedSchedule, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM alerts WHERE id = ?1 AND user_id = ?2",
                params![commit.alert_id, commit.user_id],
                |row| row.get(0),
            )
            .optional()?;
        if status.as_deref() != Some(AlertStatus::Active.as_str()) {
            return Err(DatabaseError::AlertNoLongerActive(commit.alert_id));
        }

        let now = commit.acknowledged_at;

        let appointment_id = match &commit.appointment {
            Some(appt) => {
                let start = appt.starts_at();
                let end = appt.ends_at();
                let neighbours = appointments_between_on(
                    &tx,
                    &appt.user_id,
                    appt.date - Duration::days(1),
                    end.date(),
                )?;
                if let Some(existing) = neighbours
                    .iter()
                    .find(|a| a.starts_at() < end && start < a.ends_at())
                {
                    return Err(DatabaseError::SlotTaken {
                        date: appt.date,
                        start: appt.start_time,
                        end: end.time(),
                        conflicting_id: existing.id,
                    });
                }
                Some(insert_appointment_on(&tx, appt, now)?)
            }
            None => None,
        };

        let service_id = match &commit.service {
            Some(service) => Some(insert_service_on(&tx, service, appointment_id, now)?),
            None => None,
        };

        tx.execute(
            "UPDATE alerts SET status = 'acknowledged', acknowledged_at = ?1, updated_at = ?1
             WHERE id = ?2 AND user_id = ?3",
            params![now.to_rfc3339(), commit.alert_id, commit.user_id],
        )?;

        tx.commit()?;

        Ok(CommittedSchedule {
            appointment_id,
            service_id,
        })
    }
}
