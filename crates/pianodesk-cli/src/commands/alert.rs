use chrono::NaiveDateTime;
use clap::Subcommand;
use pianodesk_core::{
    AlertStatus, AutoScheduleOptions, AutoScheduleResult, Clock, CoreError, DateSuggestion,
    SystemClock,
};

use crate::context::{CliResult, Context};

#[derive(Subcommand)]
pub enum AlertAction {
    /// Suggested visit for every active alert, urgent first
    Suggest,
    /// Several spaced-out options for one alert
    Options {
        alert_id: i64,
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
    /// Book one alert and acknowledge it
    Schedule {
        alert_id: i64,
        /// Preferred start, "YYYY-MM-DD HH:MM" (used when free)
        #[arg(long, value_parser = parse_start)]
        at: Option<NaiveDateTime>,
        /// Skip creating the appointment
        #[arg(long)]
        no_appointment: bool,
        /// Skip creating the service record
        #[arg(long)]
        no_service: bool,
        /// Notes for the appointment and service
        #[arg(long)]
        notes: Option<String>,
    },
    /// Book every active urgent alert
    ScheduleUrgent,
    /// Close an alert without booking it
    Dismiss { alert_id: i64 },
    /// Auto-scheduling statistics
    Stats,
}

fn parse_start(s: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .map_err(|e| format!("expected \"YYYY-MM-DD HH:MM\": {e}"))
}

pub async fn run(ctx: &Context, action: AlertAction) -> CliResult {
    let scheduler = ctx.scheduler()?;
    match action {
        AlertAction::Suggest => {
            let suggestions = scheduler.suggested_dates(&ctx.user, None)?;
            ctx.emit(&suggestions, |s| print_suggestions(s))?;
        }
        AlertAction::Options { alert_id, count } => {
            let options = scheduler.date_options_for_alert(&ctx.user, alert_id, count, None)?;
            ctx.emit(&options, |s| print_suggestions(s))?;
        }
        AlertAction::Schedule {
            alert_id,
            at,
            no_appointment,
            no_service,
            notes,
        } => {
            let options = AutoScheduleOptions {
                create_appointment: !no_appointment,
                create_service: !no_service,
                preferred_start: at,
                notes,
                search: None,
            };
            let result = scheduler.schedule_from_alert(&ctx.user, alert_id, &options);
            ctx.emit(&result, print_result)?;
            if !result.success {
                return Err("scheduling failed".into());
            }
        }
        AlertAction::ScheduleUrgent => {
            let results = scheduler
                .schedule_all_urgent_alerts(&ctx.user, &AutoScheduleOptions::default())
                .await;
            ctx.emit(&results, |results| {
                if results.is_empty() {
                    println!("no urgent alerts");
                }
                results.iter().for_each(print_result);
            })?;
        }
        AlertAction::Dismiss { alert_id } => {
            let config = ctx.config()?;
            let db = ctx.database(&config)?;
            if !db.set_alert_status(&ctx.user, alert_id, AlertStatus::Dismissed, SystemClock.now())? {
                return Err(CoreError::not_found("Alert", alert_id).into());
            }
            println!("alert {alert_id} dismissed");
        }
        AlertAction::Stats => {
            let stats = scheduler.statistics(&ctx.user)?;
            ctx.emit(&stats, |s| {
                println!("Total scheduled:     {}", s.total_scheduled);
                println!("This week:           {}", s.scheduled_this_week);
                println!("This month:          {}", s.scheduled_this_month);
                println!("Average lead (days): {}", s.average_lead_time_days);
            })?;
        }
    }
    Ok(())
}

fn print_suggestions(suggestions: &[DateSuggestion]) {
    if suggestions.is_empty() {
        println!("no suggestions");
    }
    for s in suggestions {
        println!(
            "alert {:>4}  {} {}  {:<10}  {}",
            s.alert_id,
            s.slot.date,
            s.slot.start_time().format("%H:%M"),
            s.priority.as_str(),
            s.reason
        );
    }
}

fn print_result(result: &AutoScheduleResult) {
    match (&result.details, &result.error) {
        (Some(d), _) => println!(
            "scheduled {} for {} ({}) on {} at {}",
            d.service_type, d.client_info, d.piano_info, d.scheduled_date, d.scheduled_time
        ),
        (None, Some(error)) => println!("failed: {error}"),
        (None, None) => println!("failed"),
    }
}
