//! Turns open alerts into concrete date suggestions.
//!
//! Each alert gets an estimated duration from its service type and a
//! search start weighted by priority: urgent alerts start searching at
//! `min_days_ahead`, everything else three days later.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schedule::{Alert, AlertPriority, ServiceType};
use crate::storage::SchedulingConfig;
use crate::timeline::{Booking, Slot, SlotFinder, SlotSearch, WorkingHours};

/// Extra days non-urgent alerts wait before their search starts.
pub const NON_URGENT_DELAY_DAYS: i64 = 3;

/// Search window and working-hours policy for suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuggestionOptions {
    pub hours: WorkingHours,
    pub min_days_ahead: i64,
    pub max_days_ahead: i64,
    pub alternative_spacing_days: i64,
}

impl Default for SuggestionOptions {
    fn default() -> Self {
        Self {
            hours: WorkingHours::default(),
            min_days_ahead: 1,
            max_days_ahead: 30,
            alternative_spacing_days: 2,
        }
    }
}

impl SuggestionOptions {
    pub fn from_config(config: &SchedulingConfig) -> Result<Self, ValidationError> {
        Ok(Self {
            hours: config.working_hours()?,
            min_days_ahead: i64::from(config.min_days_ahead),
            max_days_ahead: i64::from(config.max_days_ahead),
            alternative_spacing_days: i64::from(config.alternative_spacing_days),
        })
    }
}

/// Estimated visit length in minutes.
pub fn estimated_duration(service_type: ServiceType) -> i64 {
    match service_type {
        ServiceType::Tuning => 90,
        ServiceType::Regulation => 180,
        ServiceType::Repair => 120,
        ServiceType::Maintenance | ServiceType::Other => 60,
    }
}

/// Days since last service after which the work counts as overdue.
pub fn overdue_threshold(service_type: ServiceType) -> Option<i64> {
    match service_type {
        ServiceType::Tuning => Some(270),
        ServiceType::Regulation | ServiceType::Repair => Some(1095),
        ServiceType::Maintenance | ServiceType::Other => None,
    }
}

/// `days_since_last_service - threshold` when positive.
pub fn days_overdue(service_type: ServiceType, days_since_last_service: Option<i64>) -> Option<i64> {
    let threshold = overdue_threshold(service_type)?;
    let days = days_since_last_service?;
    (days > threshold).then(|| days - threshold)
}

/// Day offset the slot search starts from.
///
/// Never larger for urgent alerts than for any other priority.
pub fn search_start_offset(priority: AlertPriority, min_days_ahead: i64) -> i64 {
    match priority {
        AlertPriority::Urgent => min_days_ahead,
        AlertPriority::Pending | AlertPriority::Optimal => min_days_ahead + NON_URGENT_DELAY_DAYS,
    }
}

fn work_name(service_type: ServiceType) -> &'static str {
    match service_type {
        ServiceType::Other => "service",
        other => other.as_str(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Human-readable reason shown next to a suggestion.
pub fn reason(service_type: ServiceType, priority: AlertPriority, days_overdue: Option<i64>) -> String {
    let work = work_name(service_type);
    match (priority, days_overdue) {
        (AlertPriority::Urgent, Some(days)) => format!("Urgent {work} - {days} days overdue"),
        (AlertPriority::Urgent, None) => format!("Urgent {work} required"),
        (AlertPriority::Pending, _) => format!("Pending {work} - schedule soon"),
        (AlertPriority::Optimal, _) => format!("{} recommended", capitalize(work)),
    }
}

/// A proposed visit for one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateSuggestion {
    pub alert_id: i64,
    pub piano_id: i64,
    pub client_id: i64,
    pub slot: Slot,
    pub priority: AlertPriority,
    pub service_type: ServiceType,
    pub days_overdue: Option<i64>,
    pub reason: String,
}

/// Drives the slot finder for alerts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionEngine {
    options: SuggestionOptions,
}

impl SuggestionEngine {
    pub fn new(options: SuggestionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SuggestionOptions {
        &self.options
    }

    /// First slot for `alert`, searching from its priority-weighted start.
    pub fn suggest(&self, alert: &Alert, bookings: &[Booking], today: NaiveDate) -> Option<DateSuggestion> {
        self.suggest_from(alert, bookings, today, self.options.min_days_ahead)
    }

    fn suggest_from(
        &self,
        alert: &Alert,
        bookings: &[Booking],
        today: NaiveDate,
        min_days_ahead: i64,
    ) -> Option<DateSuggestion> {
        let search = SlotSearch {
            duration_minutes: estimated_duration(alert.alert_type),
            earliest_day_offset: search_start_offset(alert.priority, min_days_ahead),
            latest_day_offset: self.options.max_days_ahead,
        };
        let slot = SlotFinder::new(self.options.hours).find_next(bookings, &search, today)?;
        let overdue = days_overdue(alert.alert_type, alert.days_since_last_service);

        Some(DateSuggestion {
            alert_id: alert.id,
            piano_id: alert.piano_id,
            client_id: alert.client_id,
            slot,
            priority: alert.priority,
            service_type: alert.alert_type,
            days_overdue: overdue,
            reason: reason(alert.alert_type, alert.priority, overdue),
        })
    }

    /// One suggestion per alert that has a slot, in input order.
    pub fn suggest_all(&self, alerts: &[Alert], bookings: &[Booking], today: NaiveDate) -> Vec<DateSuggestion> {
        alerts
            .iter()
            .filter_map(|alert| self.suggest(alert, bookings, today))
            .collect()
    }

    /// Up to `count` suggestions, the i-th searching from
    /// `min_days_ahead + i * alternative_spacing_days`.
    ///
    /// Alternatives may land on the same slot when the calendar is sparse.
    pub fn alternatives(
        &self,
        alert: &Alert,
        bookings: &[Booking],
        today: NaiveDate,
        count: usize,
    ) -> Vec<DateSuggestion> {
        (0..count as i64)
            .filter_map(|i| {
                let min = self.options.min_days_ahead + i * self.options.alternative_spacing_days;
                self.suggest_from(alert, bookings, today, min)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::AlertStatus;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    // Monday
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn alert(alert_type: ServiceType, priority: AlertPriority, days: Option<i64>) -> Alert {
        let created = Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap();
        Alert {
            id: 1,
            user_id: "u1".into(),
            piano_id: 10,
            client_id: 20,
            alert_type,
            priority,
            status: AlertStatus::Active,
            days_since_last_service: days,
            created_at: created,
            acknowledged_at: None,
            updated_at: created,
        }
    }

    #[test]
    fn durations_by_type() {
        assert_eq!(estimated_duration(ServiceType::Tuning), 90);
        assert_eq!(estimated_duration(ServiceType::Regulation), 180);
        assert_eq!(estimated_duration(ServiceType::Repair), 120);
        assert_eq!(estimated_duration(ServiceType::Other), 60);
    }

    #[test]
    fn tuning_300_days_is_30_overdue() {
        assert_eq!(days_overdue(ServiceType::Tuning, Some(300)), Some(30));
        assert_eq!(days_overdue(ServiceType::Tuning, Some(270)), None);
        assert_eq!(days_overdue(ServiceType::Repair, Some(1100)), Some(5));
        assert_eq!(days_overdue(ServiceType::Tuning, None), None);
        assert_eq!(days_overdue(ServiceType::Other, Some(5000)), None);
    }

    #[test]
    fn reason_strings() {
        assert_eq!(
            reason(ServiceType::Tuning, AlertPriority::Urgent, Some(30)),
            "Urgent tuning - 30 days overdue"
        );
        assert_eq!(
            reason(ServiceType::Tuning, AlertPriority::Urgent, None),
            "Urgent tuning required"
        );
        assert_eq!(
            reason(ServiceType::Regulation, AlertPriority::Pending, Some(3)),
            "Pending regulation - schedule soon"
        );
        assert_eq!(
            reason(ServiceType::Tuning, AlertPriority::Optimal, None),
            "Tuning recommended"
        );
        assert_eq!(
            reason(ServiceType::Other, AlertPriority::Optimal, None),
            "Service recommended"
        );
    }

    #[test]
    fn urgent_searches_earlier_than_pending() {
        let engine = SuggestionEngine::default();
        let urgent = engine
            .suggest(&alert(ServiceType::Tuning, AlertPriority::Urgent, Some(300)), &[], today())
            .unwrap();
        let pending = engine
            .suggest(&alert(ServiceType::Tuning, AlertPriority::Pending, Some(300)), &[], today())
            .unwrap();

        assert_eq!(urgent.slot.date, today() + Duration::days(1));
        assert_eq!(pending.slot.date, today() + Duration::days(4));
        assert_eq!(urgent.days_overdue, Some(30));
        assert_eq!(urgent.reason, "Urgent tuning - 30 days overdue");
    }

    #[test]
    fn alternatives_are_spaced() {
        let engine = SuggestionEngine::default();
        let options = engine.alternatives(
            &alert(ServiceType::Tuning, AlertPriority::Urgent, None),
            &[],
            today(),
            3,
        );
        let dates: Vec<_> = options.iter().map(|s| s.slot.date).collect();
        // Tue, Thu, Sat skipped to Mon.
        assert_eq!(
            dates,
            vec![
                today() + Duration::days(1),
                today() + Duration::days(3),
                today() + Duration::days(7),
            ]
        );
    }

    #[test]
    fn no_room_yields_no_suggestion() {
        let options = SuggestionOptions {
            max_days_ahead: 2,
            ..SuggestionOptions::default()
        };
        let engine = SuggestionEngine::new(options);
        // Pending starts at day 4, beyond the window.
        assert!(engine
            .suggest(&alert(ServiceType::Tuning, AlertPriority::Pending, None), &[], today())
            .is_none());
    }

    proptest! {
        #[test]
        fn urgent_offset_never_after_non_urgent(min in 0i64..365) {
            let urgent = search_start_offset(AlertPriority::Urgent, min);
            prop_assert!(urgent <= search_start_offset(AlertPriority::Pending, min));
            prop_assert!(urgent <= search_start_offset(AlertPriority::Optimal, min));
        }
    }
}
