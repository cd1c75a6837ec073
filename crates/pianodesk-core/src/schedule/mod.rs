//! Domain records for alerts, appointments and services.
//!
//! These are owned by the scheduling store; the sync engine only reads
//! appointments.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work an alert or appointment is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Tuning,
    Regulation,
    Repair,
    Maintenance,
    Other,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Tuning => "tuning",
            ServiceType::Regulation => "regulation",
            ServiceType::Repair => "repair",
            ServiceType::Maintenance => "maintenance",
            ServiceType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tuning" => Some(ServiceType::Tuning),
            "regulation" => Some(ServiceType::Regulation),
            "repair" => Some(ServiceType::Repair),
            "maintenance" => Some(ServiceType::Maintenance),
            "other" => Some(ServiceType::Other),
            _ => None,
        }
    }

    /// Capitalised name used in summaries and notes.
    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceType::Tuning => "Tuning",
            ServiceType::Regulation => "Regulation",
            ServiceType::Repair => "Repair",
            ServiceType::Maintenance => "Maintenance",
            ServiceType::Other => "Service",
        }
    }
}

/// Alert priority. Variant order is significance order: urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Urgent,
    Pending,
    Optimal,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::Urgent => "urgent",
            AlertPriority::Pending => "pending",
            AlertPriority::Optimal => "optimal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "urgent" => Some(AlertPriority::Urgent),
            "pending" => Some(AlertPriority::Pending),
            "optimal" => Some(AlertPriority::Optimal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "dismissed" => Some(AlertStatus::Dismissed),
            _ => None,
        }
    }
}

/// A detected maintenance condition that needs a future appointment.
///
/// Created by the monitoring collaborator. Moves `active -> acknowledged`
/// exactly once, through the auto-scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub user_id: String,
    pub piano_id: i64,
    pub client_id: i64,
    pub alert_type: ServiceType,
    pub priority: AlertPriority,
    pub status: AlertStatus,
    pub days_since_last_service: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the monitoring collaborator supplies when raising an alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: String,
    pub piano_id: i64,
    pub client_id: i64,
    pub alert_type: ServiceType,
    pub priority: AlertPriority,
    pub days_since_last_service: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }
}

/// A booked visit in the technician's local calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub user_id: String,
    pub piano_id: Option<i64>,
    pub client_id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
    pub appointment_type: ServiceType,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    /// Alert this appointment was scheduled from, if any.
    pub source_alert_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + Duration::minutes(self.duration_minutes)
    }
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub user_id: String,
    pub piano_id: Option<i64>,
    pub client_id: Option<i64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
    pub appointment_type: ServiceType,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub source_alert_id: Option<i64>,
}

impl NewAppointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.starts_at() + Duration::minutes(self.duration_minutes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Scheduled => "scheduled",
            ServiceStatus::Completed => "completed",
            ServiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ServiceStatus::Scheduled),
            "completed" => Some(ServiceStatus::Completed),
            "cancelled" => Some(ServiceStatus::Cancelled),
            _ => None,
        }
    }
}

/// A service record (work order) for a piano.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub user_id: String,
    pub piano_id: i64,
    pub client_id: i64,
    pub date: NaiveDate,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub appointment_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub user_id: String,
    pub piano_id: i64,
    pub client_id: i64,
    pub date: NaiveDate,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub description: Option<String>,
    pub notes: Option<String>,
}

/// Read-only piano lookup used for human-readable summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Piano {
    pub id: i64,
    pub client_id: i64,
    pub brand: String,
    pub model: String,
    pub serial_number: Option<String>,
}

impl Piano {
    /// "Brand Model (serial)" with `S/N` when the serial is unknown.
    pub fn label(&self) -> String {
        format!(
            "{} {} ({})",
            self.brand,
            self.model,
            self.serial_number.as_deref().unwrap_or("S/N")
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub user_id: String,
    pub name: String,
    pub address: Option<String>,
}
