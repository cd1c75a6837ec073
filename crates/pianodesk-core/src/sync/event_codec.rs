//! Appointment to external event mapping.

use chrono_tz::Tz;

use crate::calendar::{EventDateTime, EventPayload};
use crate::schedule::{Appointment, Client, Piano};

/// Wall-clock format sent alongside an IANA zone name.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Build the provider-agnostic event for `appointment`.
///
/// Times are the appointment's local wall time tagged with `time_zone`;
/// providers resolve DST themselves.
pub fn appointment_payload(
    appointment: &Appointment,
    client: Option<&Client>,
    piano: Option<&Piano>,
    time_zone: Tz,
) -> EventPayload {
    let client_name = client.map(|c| c.name.as_str()).unwrap_or("Client");
    let zone = Some(time_zone.name().to_string());

    EventPayload {
        summary: format!(
            "{}: {client_name}",
            appointment.appointment_type.display_name()
        ),
        description: describe(appointment, piano),
        location: client
            .and_then(|c| c.address.clone())
            .unwrap_or_default(),
        start: EventDateTime::new(
            appointment.starts_at().format(EVENT_TIME_FORMAT).to_string(),
            zone.clone(),
        ),
        end: EventDateTime::new(
            appointment.ends_at().format(EVENT_TIME_FORMAT).to_string(),
            zone,
        ),
    }
}

fn describe(appointment: &Appointment, piano: Option<&Piano>) -> String {
    let mut parts = Vec::new();
    if let Some(piano) = piano {
        parts.push(format!("Piano: {}", piano.label()));
    }
    parts.push(format!(
        "Service: {}",
        appointment.appointment_type.display_name()
    ));
    if let Some(notes) = appointment.notes.as_deref().filter(|n| !n.is_empty()) {
        parts.push(format!("\nNotes: {notes}"));
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{AppointmentStatus, ServiceType};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn appointment(notes: Option<&str>) -> Appointment {
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        Appointment {
            id: 5,
            user_id: "u1".into(),
            piano_id: Some(1),
            client_id: Some(1),
            date: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            start_time: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            duration_minutes: 90,
            appointment_type: ServiceType::Tuning,
            status: AppointmentStatus::Scheduled,
            notes: notes.map(String::from),
            source_alert_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn payload_carries_client_and_piano() {
        let client = Client {
            id: 1,
            user_id: "u1".into(),
            name: "Ana García".into(),
            address: Some("Calle Mayor 1".into()),
        };
        let piano = Piano {
            id: 1,
            client_id: 1,
            brand: "Yamaha".into(),
            model: "U3".into(),
            serial_number: None,
        };
        let payload = appointment_payload(
            &appointment(Some("Bring mutes")),
            Some(&client),
            Some(&piano),
            chrono_tz::Europe::Madrid,
        );

        assert_eq!(payload.summary, "Tuning: Ana García");
        assert_eq!(payload.location, "Calle Mayor 1");
        assert_eq!(
            payload.description,
            "Piano: Yamaha U3 (S/N)\nService: Tuning\n\nNotes: Bring mutes"
        );
        // Crosses midnight.
        assert_eq!(payload.start.date_time, "2026-03-31T23:00:00");
        assert_eq!(payload.end.date_time, "2026-04-01T00:30:00");
        assert_eq!(payload.end.time_zone.as_deref(), Some("Europe/Madrid"));
    }

    #[test]
    fn missing_lookups_fall_back() {
        let payload = appointment_payload(&appointment(None), None, None, chrono_tz::UTC);
        assert_eq!(payload.summary, "Tuning: Client");
        assert_eq!(payload.description, "Service: Tuning");
        assert!(payload.location.is_empty());
    }
}
