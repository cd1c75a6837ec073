use chrono::Duration;
use clap::Args;
use pianodesk_core::timeline::{SlotFinder, SlotSearch};
use pianodesk_core::{Clock, SystemClock};

use crate::context::{CliResult, Context};

#[derive(Args)]
pub struct SlotsArgs {
    /// Visit length in minutes
    #[arg(long, default_value_t = 60)]
    duration: i64,
    /// First day to search, as days from today (default: config min_days_ahead)
    #[arg(long)]
    from_day: Option<i64>,
    /// Last day to search, as days from today (default: config max_days_ahead)
    #[arg(long)]
    to_day: Option<i64>,
}

pub fn run(ctx: &Context, args: SlotsArgs) -> CliResult {
    let config = ctx.config()?;
    let db = ctx.database(&config)?;
    let scheduling = &config.scheduling;
    let finder = SlotFinder::new(scheduling.working_hours()?);
    let today = SystemClock.today(scheduling.time_zone()?);

    let search = SlotSearch {
        duration_minutes: args.duration,
        earliest_day_offset: args
            .from_day
            .unwrap_or(i64::from(scheduling.min_days_ahead)),
        latest_day_offset: args.to_day.unwrap_or(i64::from(scheduling.max_days_ahead)),
    };
    let bookings = db.bookings_between(
        &ctx.user,
        today + Duration::days(search.earliest_day_offset),
        today + Duration::days(search.latest_day_offset),
    )?;

    let slot = finder.find_next(&bookings, &search, today);
    ctx.emit(&slot, |slot| match slot {
        Some(slot) => println!(
            "{} {}-{}",
            slot.date,
            slot.start_time().format("%H:%M"),
            slot.end_time().format("%H:%M")
        ),
        None => println!("no free slot in range"),
    })
}
