mod config;
pub mod database;
pub mod migrations;
pub mod schedule_db;
pub mod sync_db;

pub use config::{BatchConfig, Config, SchedulingConfig, SyncConfig};
pub use database::Database;
pub use schedule_db::{AlertCommit, CommittedSchedule};

use std::path::PathBuf;

use crate::error::CoreError;

/// Returns `~/.config/pianodesk[-dev]/` based on PIANODESK_ENV.
///
/// Set PIANODESK_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, CoreError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("PIANODESK_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("pianodesk-dev")
    } else {
        base_dir.join("pianodesk")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
