//! End-to-end scheduling against an on-disk database built from a config
//! file, the way the CLI wires it.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tempfile::TempDir;

use pianodesk_core::clock::FixedClock;
use pianodesk_core::schedule::{
    AlertPriority, AlertStatus, AppointmentStatus, NewAlert, NewAppointment, ServiceType,
};
use pianodesk_core::scheduler::{AutoScheduleOptions, AutoScheduler};
use pianodesk_core::storage::{Config, Database};
use pianodesk_core::timeline::{Booking, SlotFinder, SlotSearch};

// Monday 09:00 in Madrid.
fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn at(d: u32, hour: u32) -> chrono::NaiveDateTime {
    day(d).and_hms_opt(hour, 0, 0).unwrap()
}

struct Workspace {
    _dir: TempDir,
    db_path: std::path::PathBuf,
    db: Arc<Database>,
    scheduler: AutoScheduler,
    piano_id: i64,
    client_id: i64,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[scheduling]\ntime_zone = \"Europe/Madrid\"\nmax_days_ahead = 14\n\n[batch]\nrequests_per_second = 1000\nburst = 1000\n",
    )
    .unwrap();
    let config = Config::load_from(&config_path).unwrap();

    let db_path = dir.path().join("pianodesk.db");
    let db = Arc::new(Database::open_at(&db_path).unwrap());
    let client_id = db.insert_client("u1", "Ana García", Some("Calle Mayor 1")).unwrap();
    let piano_id = db.insert_piano(client_id, "Steinway", "B", None).unwrap();
    let scheduler =
        AutoScheduler::from_config(db.clone(), Arc::new(FixedClock::new(now())), &config).unwrap();

    Workspace {
        _dir: dir,
        db_path,
        db,
        scheduler,
        piano_id,
        client_id,
    }
}

impl Workspace {
    fn alert(&self, priority: AlertPriority, created_at: DateTime<Utc>) -> i64 {
        self.db
            .insert_alert(&NewAlert {
                user_id: "u1".into(),
                piano_id: self.piano_id,
                client_id: self.client_id,
                alert_type: ServiceType::Tuning,
                priority,
                days_since_last_service: Some(300),
                created_at,
            })
            .unwrap()
    }

    fn book(&self, start: chrono::NaiveDateTime, minutes: i64) {
        self.db
            .insert_appointment(
                &NewAppointment {
                    user_id: "u1".into(),
                    piano_id: None,
                    client_id: None,
                    date: start.date(),
                    start_time: start.time(),
                    duration_minutes: minutes,
                    appointment_type: ServiceType::Other,
                    status: AppointmentStatus::Scheduled,
                    notes: None,
                    source_alert_id: None,
                },
                now(),
            )
            .unwrap();
    }
}

#[test]
fn finder_uses_head_gap_before_morning_booking() {
    let bookings = [Booking::new(at(3, 10), 60), Booking::new(at(3, 13), 60)];
    let slot = SlotFinder::default()
        .find_next(
            &bookings,
            &SlotSearch {
                duration_minutes: 60,
                earliest_day_offset: 1,
                latest_day_offset: 1,
            },
            day(2),
        )
        .unwrap();
    assert_eq!(slot.date, day(3));
    assert_eq!(slot.start_time(), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    assert_eq!(slot.end_time(), NaiveTime::from_hms_opt(10, 0, 0).unwrap());
}

#[test]
fn overdue_tuning_is_suggested_in_first_long_enough_gap() {
    let ws = workspace();
    ws.book(at(3, 10), 60);
    ws.book(at(3, 13), 60);
    let alert_id = ws.alert(AlertPriority::Urgent, now());

    let suggestions = ws.scheduler.suggested_dates("u1", None).unwrap();
    assert_eq!(suggestions.len(), 1);
    let suggestion = &suggestions[0];
    assert_eq!(suggestion.alert_id, alert_id);
    assert_eq!(suggestion.days_overdue, Some(30));
    // 09:00-10:00 is too short for a 90 minute tuning.
    assert_eq!(suggestion.slot.start, at(3, 11));
    assert_eq!(suggestion.slot.duration_minutes(), 90);
}

#[test]
fn booked_preferred_day_falls_back_and_persists() {
    let ws = workspace();
    ws.book(at(4, 9), 9 * 60);
    let alert_id = ws.alert(AlertPriority::Urgent, now() - Duration::days(2));

    let result = ws.scheduler.schedule_from_alert(
        "u1",
        alert_id,
        &AutoScheduleOptions {
            preferred_start: Some(at(4, 11)),
            ..Default::default()
        },
    );
    assert!(result.success, "{:?}", result.error);
    let details = result.details.unwrap();
    assert_eq!(details.scheduled_date, day(3));
    assert_eq!(details.piano_info, "Steinway B (S/N)");

    // Reopen from disk: the commit must have landed as a unit.
    let reopened = Database::open_at(&ws.db_path).unwrap();
    let alert = reopened.get_alert("u1", alert_id).unwrap().unwrap();
    assert_eq!(alert.status, AlertStatus::Acknowledged);
    assert_eq!(alert.acknowledged_at, Some(now()));
    let appointment = reopened
        .get_appointment("u1", result.appointment_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(appointment.source_alert_id, Some(alert_id));
    assert!(reopened
        .get_service("u1", result.service_id.unwrap())
        .unwrap()
        .is_some());

    let stats = ws.scheduler.statistics("u1").unwrap();
    assert_eq!(stats.total_scheduled, 1);
    assert_eq!(stats.scheduled_this_week, 1);
    assert_eq!(stats.average_lead_time_days, 2);
}

#[tokio::test]
async fn urgent_batch_books_back_to_back_and_leaves_others_active() {
    let ws = workspace();
    let first = ws.alert(AlertPriority::Urgent, now() - Duration::hours(2));
    let second = ws.alert(AlertPriority::Urgent, now() - Duration::hours(1));
    let pending = ws.alert(AlertPriority::Pending, now());

    let results = ws
        .scheduler
        .schedule_all_urgent_alerts("u1", &AutoScheduleOptions::default())
        .await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));

    let mut times: Vec<String> = results
        .into_iter()
        .map(|r| r.details.unwrap().scheduled_time)
        .collect();
    times.sort();
    assert_eq!(times, ["09:00", "10:30"]);

    for id in [first, second] {
        let alert = ws.db.get_alert("u1", id).unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
    }
    let untouched = ws.db.get_alert("u1", pending).unwrap().unwrap();
    assert_eq!(untouched.status, AlertStatus::Active);
}

#[test]
fn dismissed_alert_is_not_suggested_or_scheduled() {
    let ws = workspace();
    let alert_id = ws.alert(AlertPriority::Urgent, now());
    assert!(ws
        .db
        .set_alert_status("u1", alert_id, AlertStatus::Dismissed, now())
        .unwrap());

    assert!(ws.scheduler.suggested_dates("u1", None).unwrap().is_empty());
    let result = ws
        .scheduler
        .schedule_from_alert("u1", alert_id, &AutoScheduleOptions::default());
    assert!(!result.success);
    assert!(result.error.unwrap().contains("dismissed"));
    assert!(!ws
        .db
        .set_alert_status("u2", alert_id, AlertStatus::Active, now())
        .unwrap());
}
