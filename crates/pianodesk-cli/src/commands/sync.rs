//! Sync subcommand: connections, outbound push and inbound pull.

use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use pianodesk_core::calendar::ProviderKind;
use pianodesk_core::sync::{CalendarConnection, NewConnection, PushOutcome};
use pianodesk_core::{Clock, CoreError, SyncResult, SystemClock};

use crate::context::{parse_provider, CliResult, Context};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Register an external calendar account
    Connect {
        /// google or microsoft
        #[arg(long, value_parser = parse_provider)]
        provider: ProviderKind,
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Seconds until the access token expires
        #[arg(long)]
        expires_in: Option<i64>,
        /// Provider calendar id (default calendar when omitted)
        #[arg(long)]
        calendar_id: Option<String>,
        /// Push channel or subscription id
        #[arg(long)]
        webhook_id: Option<String>,
    },
    /// List calendar connections
    Connections,
    /// Resume syncing a connection
    Enable { connection_id: i64 },
    /// Pause syncing a connection
    Disable { connection_id: i64 },
    /// Create or update external events for appointments
    Push {
        /// Appointment to push (default: every upcoming appointment)
        appointment_id: Option<i64>,
        /// Connection to push to (default: every enabled connection)
        #[arg(long)]
        connection: Option<i64>,
    },
    /// Remove an appointment's external event
    Delete {
        appointment_id: i64,
        #[arg(long)]
        connection: i64,
    },
    /// Fetch external changes for one connection
    Pull { connection_id: i64 },
    /// External events overlapping a time range
    Conflicts {
        connection_id: i64,
        /// RFC 3339 start
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 end
        #[arg(long)]
        end: DateTime<Utc>,
    },
    /// Recent sync log rows for a connection, newest first
    Logs {
        connection_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Pull every enabled connection
    Poll,
}

pub async fn run(ctx: &Context, action: SyncAction) -> CliResult {
    let config = ctx.config()?;
    let db = ctx.database(&config)?;
    let owned = |id: i64| -> CliResult<CalendarConnection> {
        Ok(db
            .get_user_connection(&ctx.user, id)?
            .ok_or_else(|| CoreError::not_found("Connection", id))?)
    };

    match action {
        SyncAction::Connect {
            provider,
            access_token,
            refresh_token,
            expires_in,
            calendar_id,
            webhook_id,
        } => {
            let now = SystemClock.now();
            let id = db.insert_connection(
                &NewConnection {
                    user_id: ctx.user.clone(),
                    provider,
                    calendar_id,
                    access_token: Some(access_token),
                    refresh_token,
                    expires_at: expires_in.map(|secs| now + Duration::seconds(secs)),
                    webhook_id,
                },
                now,
            )?;
            println!("connection {id} created");
        }
        SyncAction::Connections => {
            let connections = db.list_connections(&ctx.user)?;
            ctx.emit(&connections, |connections| {
                for c in connections {
                    println!(
                        "{:>4}  {:<9}  {:<24}  {}  last sync: {}",
                        c.id,
                        c.provider.as_str(),
                        c.calendar_id.as_deref().unwrap_or("(default)"),
                        if c.sync_enabled { "enabled " } else { "disabled" },
                        c.last_sync_at
                            .map(|at| at.to_rfc3339())
                            .unwrap_or_else(|| "never".into())
                    );
                }
            })?;
        }
        SyncAction::Enable { connection_id } => {
            owned(connection_id)?;
            db.set_connection_sync_enabled(connection_id, true, SystemClock.now())?;
            println!("connection {connection_id} enabled");
        }
        SyncAction::Disable { connection_id } => {
            owned(connection_id)?;
            db.set_connection_sync_enabled(connection_id, false, SystemClock.now())?;
            println!("connection {connection_id} disabled");
        }
        SyncAction::Push {
            appointment_id,
            connection,
        } => {
            let appointments = match appointment_id {
                Some(id) => vec![db
                    .get_appointment(&ctx.user, id)?
                    .ok_or_else(|| format!("Appointment not found: {id}"))?],
                None => {
                    let today = SystemClock.today(config.scheduling.time_zone()?);
                    let until = today + Duration::days(i64::from(config.scheduling.max_days_ahead));
                    db.list_appointments(&ctx.user, today, until)?
                }
            };
            let engine = ctx.sync_engine(&config, db.clone())?;
            let outcomes = match connection {
                Some(connection_id) => {
                    let mut outcomes = Vec::with_capacity(appointments.len());
                    for appointment in &appointments {
                        let result = engine
                            .push_appointment(&ctx.user, connection_id, appointment.id)
                            .await?;
                        outcomes.push(PushOutcome {
                            connection_id,
                            appointment_id: appointment.id,
                            result,
                        });
                    }
                    outcomes
                }
                None => {
                    engine
                        .sync_all_appointments_for_user(&ctx.user, &appointments)
                        .await?
                }
            };
            ctx.emit(&outcomes, |outcomes| print_outcomes(outcomes))?;
        }
        SyncAction::Delete {
            appointment_id,
            connection,
        } => {
            let engine = ctx.sync_engine(&config, db.clone())?;
            let result = engine
                .remove_appointment(&ctx.user, connection, appointment_id)
                .await?;
            ctx.emit(&result, print_sync_result)?;
        }
        SyncAction::Pull { connection_id } => {
            let connection = owned(connection_id)?;
            let engine = ctx.sync_engine(&config, db.clone())?;
            let report = engine.perform_full_sync(&connection).await;
            ctx.emit(&report, |r| match &r.error {
                Some(error) => println!("pull failed: {error}"),
                None => println!("synced {} event(s), {} error(s)", r.synced, r.errors),
            })?;
        }
        SyncAction::Conflicts {
            connection_id,
            start,
            end,
        } => {
            let connection = owned(connection_id)?;
            let engine = ctx.sync_engine(&config, db.clone())?;
            let events = engine.detect_conflicts(&connection, start, end).await?;
            ctx.emit(&events, |events| {
                if events.is_empty() {
                    println!("no conflicts");
                }
                for ev in events {
                    let window = ev
                        .window()
                        .map(|(s, e)| format!("{} - {}", s.to_rfc3339(), e.to_rfc3339()))
                        .unwrap_or_default();
                    println!(
                        "{}  {}  {}",
                        ev.id,
                        window,
                        ev.summary.as_deref().unwrap_or("(no title)")
                    );
                }
            })?;
        }
        SyncAction::Logs {
            connection_id,
            limit,
        } => {
            owned(connection_id)?;
            let logs = db.sync_logs(connection_id, limit)?;
            ctx.emit(&logs, |logs| {
                for log in logs {
                    println!(
                        "{}  {:<6} {:<13} {:<7} {}",
                        log.created_at.to_rfc3339(),
                        log.action.as_str(),
                        log.direction.as_str(),
                        log.status.as_str(),
                        log.error_message.as_deref().unwrap_or("")
                    );
                }
            })?;
        }
        SyncAction::Poll => {
            let engine = ctx.sync_engine(&config, db.clone())?;
            let reports = engine.poll_user(&ctx.user).await?;
            ctx.emit(&reports, |reports| {
                if reports.is_empty() {
                    println!("no enabled connections");
                }
                for (id, r) in reports {
                    match &r.error {
                        Some(error) => println!("connection {id}: failed: {error}"),
                        None => println!("connection {id}: synced {}, errors {}", r.synced, r.errors),
                    }
                }
            })?;
        }
    }
    Ok(())
}

fn print_sync_result(result: &SyncResult) {
    match (&result.external_event_id, &result.error) {
        (_, Some(error)) => println!("failed: {error}"),
        (Some(id), None) => println!("ok: {id}"),
        (None, None) => println!("ok"),
    }
}

fn print_outcomes(outcomes: &[PushOutcome]) {
    if outcomes.is_empty() {
        println!("nothing to push");
    }
    for o in outcomes {
        print!("appointment {} -> connection {}: ", o.appointment_id, o.connection_id);
        print_sync_result(&o.result);
    }
}
