//! Automatic scheduler for maintenance alerts.
//!
//! This module turns active alerts into booked work:
//! - Resolves a start time (caller preference when free, otherwise the
//!   suggestion engine's first slot)
//! - Creates the appointment and service and acknowledges the alert in one
//!   storage transaction
//! - Retries the search when a concurrent booking took the chosen slot
//! - Paces batch runs through a token bucket

pub mod suggestion;

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{CoreError, DatabaseError, Result};
use crate::rate_limit::RateLimiter;
use crate::schedule::{
    Alert, AlertPriority, AlertStatus, AppointmentStatus, NewAppointment, NewService,
    ServiceStatus,
};
use crate::storage::{AlertCommit, CommittedSchedule, Config, Database};
use crate::timeline::{day_after, is_interval_free};

pub use suggestion::{
    days_overdue, estimated_duration, search_start_offset, DateSuggestion, SuggestionEngine,
    SuggestionOptions,
};

/// Attempts before giving up when concurrent bookings keep taking the slot.
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Per-call knobs for [`AutoScheduler::schedule_from_alert`].
#[derive(Debug, Clone)]
pub struct AutoScheduleOptions {
    pub create_appointment: bool,
    pub create_service: bool,
    /// Tried first; ignored silently when it overlaps a booking.
    pub preferred_start: Option<NaiveDateTime>,
    /// Replaces the generated appointment and service notes.
    pub notes: Option<String>,
    /// Overrides the scheduler's search window.
    pub search: Option<SuggestionOptions>,
}

impl Default for AutoScheduleOptions {
    fn default() -> Self {
        Self {
            create_appointment: true,
            create_service: true,
            preferred_start: None,
            notes: None,
            search: None,
        }
    }
}

/// Human-readable summary of what was booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDetails {
    pub piano_info: String,
    pub client_info: String,
    pub scheduled_date: NaiveDate,
    /// `HH:MM`
    pub scheduled_time: String,
    pub service_type: String,
}

/// Outcome of scheduling one alert. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScheduleResult {
    pub success: bool,
    pub appointment_id: Option<i64>,
    pub service_id: Option<i64>,
    pub error: Option<String>,
    pub details: Option<ScheduleDetails>,
}

impl AutoScheduleResult {
    fn failed(err: &CoreError) -> Self {
        Self {
            success: false,
            appointment_id: None,
            service_id: None,
            error: Some(err.to_string()),
            details: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoScheduleStatistics {
    pub total_scheduled: usize,
    pub scheduled_this_week: usize,
    pub scheduled_this_month: usize,
    /// Mean days from alert creation to acknowledgment, rounded.
    pub average_lead_time_days: i64,
}

/// Orchestrates alert -> appointment/service -> acknowledgment.
pub struct AutoScheduler {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    time_zone: Tz,
    options: SuggestionOptions,
    limiter: RateLimiter,
}

impl AutoScheduler {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        time_zone: Tz,
        options: SuggestionOptions,
        limiter: RateLimiter,
    ) -> Self {
        Self {
            db,
            clock,
            time_zone,
            options,
            limiter,
        }
    }

    pub fn from_config(db: Arc<Database>, clock: Arc<dyn Clock>, config: &Config) -> Result<Self> {
        Ok(Self::new(
            db,
            clock,
            config.scheduling.time_zone()?,
            SuggestionOptions::from_config(&config.scheduling)?,
            RateLimiter::from_batch_config(&config.batch),
        ))
    }

    fn today(&self) -> NaiveDate {
        self.clock.today(self.time_zone)
    }

    fn load_active_alert(&self, user_id: &str, alert_id: i64) -> Result<Alert> {
        let alert = self
            .db
            .get_alert(user_id, alert_id)?
            .ok_or_else(|| CoreError::not_found("Alert", alert_id))?;
        if alert.status != AlertStatus::Active {
            return Err(CoreError::NotActive {
                alert_id,
                status: alert.status.as_str().to_string(),
            });
        }
        Ok(alert)
    }

    // === Suggestions ===

    /// One suggestion per active alert of `user_id`, urgent first.
    pub fn suggested_dates(
        &self,
        user_id: &str,
        search: Option<SuggestionOptions>,
    ) -> Result<Vec<DateSuggestion>> {
        let engine = SuggestionEngine::new(search.unwrap_or(self.options));
        let alerts = self
            .db
            .list_alerts(user_id, Some(AlertStatus::Active), None)?;
        if alerts.is_empty() {
            return Ok(Vec::new());
        }
        let today = self.today();
        let bookings = self.bookings_for(user_id, engine.options(), today)?;
        Ok(engine.suggest_all(&alerts, &bookings, today))
    }

    /// Suggestion for one alert of `user_id`, `None` when nothing fits.
    pub fn suggestion_for_alert(
        &self,
        user_id: &str,
        alert_id: i64,
        search: Option<SuggestionOptions>,
    ) -> Result<Option<DateSuggestion>> {
        let engine = SuggestionEngine::new(search.unwrap_or(self.options));
        let alert = self
            .db
            .get_alert(user_id, alert_id)?
            .ok_or_else(|| CoreError::not_found("Alert", alert_id))?;
        let today = self.today();
        let bookings = self.bookings_for(user_id, engine.options(), today)?;
        Ok(engine.suggest(&alert, &bookings, today))
    }

    /// Up to `count` spaced-out suggestions for one alert.
    pub fn date_options_for_alert(
        &self,
        user_id: &str,
        alert_id: i64,
        count: usize,
        search: Option<SuggestionOptions>,
    ) -> Result<Vec<DateSuggestion>> {
        let engine = SuggestionEngine::new(search.unwrap_or(self.options));
        let alert = self
            .db
            .get_alert(user_id, alert_id)?
            .ok_or_else(|| CoreError::not_found("Alert", alert_id))?;
        let today = self.today();
        let bookings = self.bookings_for(user_id, engine.options(), today)?;
        Ok(engine.alternatives(&alert, &bookings, today, count))
    }

    fn bookings_for(
        &self,
        user_id: &str,
        options: &SuggestionOptions,
        today: NaiveDate,
    ) -> Result<Vec<crate::timeline::Booking>> {
        let from = day_after(today, options.min_days_ahead).ok_or(CoreError::NoAvailableSlot)?;
        // A horizon past the calendar's end covers every remaining day.
        let to = day_after(today, options.max_days_ahead).unwrap_or(NaiveDate::MAX);
        Ok(self.db.bookings_between(user_id, from, to)?)
    }

    // === Scheduling ===

    /// Schedule one alert. Never returns `Err`; failures come back with
    /// `success: false`.
    pub fn schedule_from_alert(
        &self,
        user_id: &str,
        alert_id: i64,
        options: &AutoScheduleOptions,
    ) -> AutoScheduleResult {
        self.schedule_with(user_id, alert_id, options, |commit| {
            self.db.commit_alert_schedule(commit)
        })
    }

    /// [`Self::schedule_from_alert`] with the storage commit supplied by
    /// the caller.
    fn schedule_with<F>(
        &self,
        user_id: &str,
        alert_id: i64,
        options: &AutoScheduleOptions,
        commit: F,
    ) -> AutoScheduleResult
    where
        F: FnMut(&AlertCommit) -> Result<CommittedSchedule, DatabaseError>,
    {
        match self.try_schedule(user_id, alert_id, options, commit) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(user_id, alert_id, error = %e, "auto-schedule failed");
                AutoScheduleResult::failed(&e)
            }
        }
    }

    fn try_schedule<F>(
        &self,
        user_id: &str,
        alert_id: i64,
        options: &AutoScheduleOptions,
        mut commit: F,
    ) -> Result<AutoScheduleResult>
    where
        F: FnMut(&AlertCommit) -> Result<CommittedSchedule, DatabaseError>,
    {
        let alert = self.load_active_alert(user_id, alert_id)?;
        let engine = SuggestionEngine::new(options.search.unwrap_or(self.options));
        let duration = estimated_duration(alert.alert_type);
        let today = self.today();

        let mut preferred = options.preferred_start;
        let mut last_conflict = None;

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let start = match preferred.take() {
                Some(start) if self.is_free(user_id, start, duration)? => start,
                Some(start) => {
                    tracing::warn!(alert_id, %start, "preferred time is busy, searching instead");
                    self.search_start(&engine, &alert, today)?
                }
                None => self.search_start(&engine, &alert, today)?,
            };

            let pending = self.build_commit(&alert, start, duration, options);
            match commit(&pending) {
                Ok(committed) => {
                    tracing::info!(
                        user_id,
                        alert_id,
                        appointment_id = ?committed.appointment_id,
                        service_id = ?committed.service_id,
                        %start,
                        "alert scheduled"
                    );
                    return Ok(AutoScheduleResult {
                        success: true,
                        appointment_id: committed.appointment_id,
                        service_id: committed.service_id,
                        error: None,
                        details: Some(self.details(&alert, start)?),
                    });
                }
                Err(err @ DatabaseError::SlotTaken { .. }) => {
                    tracing::warn!(alert_id, attempt, error = %err, "slot taken concurrently, retrying");
                    last_conflict = Some(err);
                }
                Err(DatabaseError::AlertNoLongerActive(_)) => {
                    let status = self
                        .db
                        .get_alert(user_id, alert_id)?
                        .map(|a| a.status.as_str().to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    return Err(CoreError::NotActive { alert_id, status });
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(last_conflict.map_or(CoreError::NoAvailableSlot, CoreError::from))
    }

    fn is_free(&self, user_id: &str, start: NaiveDateTime, duration: i64) -> Result<bool> {
        let end = start + Duration::minutes(duration);
        let bookings = self.db.bookings_between(user_id, start.date(), end.date())?;
        Ok(is_interval_free(&bookings, start, duration))
    }

    fn search_start(
        &self,
        engine: &SuggestionEngine,
        alert: &Alert,
        today: NaiveDate,
    ) -> Result<NaiveDateTime> {
        let bookings = self.bookings_for(&alert.user_id, engine.options(), today)?;
        engine
            .suggest(alert, &bookings, today)
            .map(|s| s.slot.start)
            .ok_or(CoreError::NoAvailableSlot)
    }

    fn build_commit(
        &self,
        alert: &Alert,
        start: NaiveDateTime,
        duration: i64,
        options: &AutoScheduleOptions,
    ) -> AlertCommit {
        let type_name = alert.alert_type.display_name();

        let appointment = options.create_appointment.then(|| NewAppointment {
            user_id: alert.user_id.clone(),
            piano_id: Some(alert.piano_id),
            client_id: Some(alert.client_id),
            date: start.date(),
            start_time: start.time(),
            duration_minutes: duration,
            appointment_type: alert.alert_type,
            status: AppointmentStatus::Scheduled,
            notes: Some(
                options
                    .notes
                    .clone()
                    .unwrap_or_else(|| format!("{type_name} scheduled automatically from alert")),
            ),
            source_alert_id: Some(alert.id),
        });

        let service = options.create_service.then(|| NewService {
            user_id: alert.user_id.clone(),
            piano_id: alert.piano_id,
            client_id: alert.client_id,
            date: start.date(),
            service_type: alert.alert_type,
            status: ServiceStatus::Scheduled,
            description: Some(format!("{type_name} scheduled from alert")),
            notes: Some(
                options
                    .notes
                    .clone()
                    .unwrap_or_else(|| format!("Scheduled automatically - alert #{}", alert.id)),
            ),
        });

        AlertCommit {
            user_id: alert.user_id.clone(),
            alert_id: alert.id,
            appointment,
            service,
            acknowledged_at: self.clock.now(),
        }
    }

    fn details(&self, alert: &Alert, start: NaiveDateTime) -> Result<ScheduleDetails> {
        let piano_info = self
            .db
            .get_piano(alert.piano_id)?
            .map(|p| p.label())
            .unwrap_or_else(|| format!("Piano #{}", alert.piano_id));
        let client_info = self
            .db
            .get_client(alert.client_id)?
            .map(|c| c.name)
            .unwrap_or_else(|| format!("Client #{}", alert.client_id));

        Ok(ScheduleDetails {
            piano_info,
            client_info,
            scheduled_date: start.date(),
            scheduled_time: start.format("%H:%M").to_string(),
            service_type: alert.alert_type.display_name().to_string(),
        })
    }

    /// Schedule alerts one after another, paced by the batch limiter.
    ///
    /// Results line up with `alert_ids`; one failure does not stop the rest.
    pub async fn schedule_multiple_alerts(
        &self,
        user_id: &str,
        alert_ids: &[i64],
        options: &AutoScheduleOptions,
    ) -> Vec<AutoScheduleResult> {
        let mut results = Vec::with_capacity(alert_ids.len());
        for &alert_id in alert_ids {
            self.limiter.acquire().await;
            results.push(self.schedule_from_alert(user_id, alert_id, options));
        }
        results
    }

    /// Schedule every active urgent alert of `user_id`.
    pub async fn schedule_all_urgent_alerts(
        &self,
        user_id: &str,
        options: &AutoScheduleOptions,
    ) -> Vec<AutoScheduleResult> {
        let alerts = match self.db.list_alerts(
            user_id,
            Some(AlertStatus::Active),
            Some(AlertPriority::Urgent),
        ) {
            Ok(alerts) => alerts,
            Err(e) => return vec![AutoScheduleResult::failed(&e.into())],
        };
        let ids: Vec<i64> = alerts.iter().map(|a| a.id).collect();
        tracing::info!(user_id, count = ids.len(), "scheduling urgent alerts");
        self.schedule_multiple_alerts(user_id, &ids, options).await
    }

    // === Statistics ===

    pub fn statistics(&self, user_id: &str) -> Result<AutoScheduleStatistics> {
        let acknowledged = self
            .db
            .list_alerts(user_id, Some(AlertStatus::Acknowledged), None)?;
        let now = self.clock.now();
        let week_ago = now - Duration::days(7);
        let month_ago = now - Duration::days(30);

        let acknowledged_since = |cutoff| {
            acknowledged
                .iter()
                .filter(|a| a.acknowledged_at.is_some_and(|at| at >= cutoff))
                .count()
        };

        let lead_times: Vec<f64> = acknowledged
            .iter()
            .filter_map(|a| a.acknowledged_at.map(|at| at - a.created_at))
            .map(|lead| lead.num_seconds() as f64 / 86_400.0)
            .collect();
        let average_lead_time_days = if lead_times.is_empty() {
            0
        } else {
            (lead_times.iter().sum::<f64>() / lead_times.len() as f64).round() as i64
        };

        Ok(AutoScheduleStatistics {
            total_scheduled: acknowledged.len(),
            scheduled_this_week: acknowledged_since(week_ago),
            scheduled_this_month: acknowledged_since(month_ago),
            average_lead_time_days,
        })
    }
}
