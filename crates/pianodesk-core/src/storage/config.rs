//! TOML-based application configuration.
//!
//! Stores:
//! - Working hours and the suggestion search window
//! - Pacing for batch scheduling and calendar sync
//! - An optional database path override
//!
//! Configuration is stored at `~/.config/pianodesk/config.toml`.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::{ConfigError, CoreError, ValidationError};
use crate::timeline::WorkingHours;

/// Working hours and suggestion search window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    #[serde(default = "default_working_hours_start")]
    pub working_hours_start: u32,
    #[serde(default = "default_working_hours_end")]
    pub working_hours_end: u32,
    #[serde(default)]
    pub include_weekends: bool,
    #[serde(default = "default_min_days_ahead")]
    pub min_days_ahead: u32,
    #[serde(default = "default_max_days_ahead")]
    pub max_days_ahead: u32,
    /// Day step between alternative suggestions for one alert.
    #[serde(default = "default_alternative_spacing_days")]
    pub alternative_spacing_days: u32,
    /// IANA zone that defines "today" for the technician.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

/// Token bucket between batch scheduling iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_batch_rate")]
    pub requests_per_second: u32,
    #[serde(default = "default_batch_burst")]
    pub burst: u32,
}

/// Calendar sync pacing and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_rate")]
    pub requests_per_second: u32,
    #[serde(default = "default_sync_burst")]
    pub burst: u32,
    /// How far back the first incremental fetch of a connection reaches.
    #[serde(default = "default_initial_window_days")]
    pub initial_window_days: u32,
    /// Zone stamped on outbound events; falls back to the scheduling zone.
    #[serde(default)]
    pub event_time_zone: Option<String>,
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/pianodesk/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Override for the SQLite file location.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

// Default functions
fn default_working_hours_start() -> u32 {
    9
}
fn default_working_hours_end() -> u32 {
    18
}
fn default_min_days_ahead() -> u32 {
    1
}
fn default_max_days_ahead() -> u32 {
    30
}
fn default_alternative_spacing_days() -> u32 {
    2
}
fn default_time_zone() -> String {
    "Europe/Madrid".into()
}
fn default_batch_rate() -> u32 {
    10
}
fn default_batch_burst() -> u32 {
    1
}
fn default_sync_rate() -> u32 {
    5
}
fn default_sync_burst() -> u32 {
    5
}
fn default_initial_window_days() -> u32 {
    30
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            working_hours_start: default_working_hours_start(),
            working_hours_end: default_working_hours_end(),
            include_weekends: false,
            min_days_ahead: default_min_days_ahead(),
            max_days_ahead: default_max_days_ahead(),
            alternative_spacing_days: default_alternative_spacing_days(),
            time_zone: default_time_zone(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_batch_rate(),
            burst: default_batch_burst(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_sync_rate(),
            burst: default_sync_burst(),
            initial_window_days: default_initial_window_days(),
            event_time_zone: None,
        }
    }
}

impl SchedulingConfig {
    pub fn working_hours(&self) -> Result<WorkingHours, ValidationError> {
        WorkingHours::new(
            self.working_hours_start,
            self.working_hours_end,
            self.include_weekends,
        )
    }

    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        parse_zone("scheduling.time_zone", &self.time_zone)
    }
}

fn parse_zone(key: &str, name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>().map_err(|_| ConfigError::InvalidValue {
        key: key.into(),
        message: format!("'{name}' is not an IANA time zone"),
    })
}

/// Longest look-ahead or look-back, in days, any setting may ask for.
pub const MAX_HORIZON_DAYS: u32 = 3660;

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.into(),
        message: message.into(),
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value
                            .parse::<bool>()
                            .map_err(|_| invalid(key, format!("cannot parse '{value}' as bool")))?,
                    ),
                    serde_json::Value::Number(_) => value
                        .parse::<u64>()
                        .map(|n| serde_json::Value::Number(n.into()))
                        .map_err(|_| {
                            invalid(key, format!("cannot parse '{value}' as a whole number"))
                        })?,
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        return Err(invalid(key, "cannot set a whole section"));
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Path of the config file.
    pub fn path() -> Result<PathBuf, CoreError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, or defaults when the file is missing.
    pub fn load() -> Result<Self, CoreError> {
        Ok(Self::load_from(&Self::path()?)?)
    }

    /// Load from `path`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or
    /// validated.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        let cfg: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), CoreError> {
        Ok(self.save_to(&Self::path()?)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Cross-field checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduling;
        s.working_hours().map_err(|e| invalid("scheduling.working_hours_start", e.to_string()))?;
        if s.min_days_ahead > s.max_days_ahead {
            return Err(invalid(
                "scheduling.min_days_ahead",
                format!(
                    "must not exceed max_days_ahead ({} > {})",
                    s.min_days_ahead, s.max_days_ahead
                ),
            ));
        }
        for (key, days) in [
            ("scheduling.max_days_ahead", s.max_days_ahead),
            ("scheduling.alternative_spacing_days", s.alternative_spacing_days),
            ("sync.initial_window_days", self.sync.initial_window_days),
        ] {
            if days > MAX_HORIZON_DAYS {
                return Err(invalid(key, format!("must be at most {MAX_HORIZON_DAYS} days")));
            }
        }
        s.time_zone()?;
        if let Some(zone) = &self.sync.event_time_zone {
            parse_zone("sync.event_time_zone", zone)?;
        }
        if self.batch.requests_per_second == 0 || self.batch.burst == 0 {
            return Err(invalid("batch", "rate and burst must be positive"));
        }
        if self.sync.requests_per_second == 0 || self.sync.burst == 0 {
            return Err(invalid("sync", "rate and burst must be positive"));
        }
        Ok(())
    }

    /// Zone for outbound event times.
    pub fn event_time_zone(&self) -> Result<Tz, ConfigError> {
        match &self.sync.event_time_zone {
            Some(zone) => parse_zone("sync.event_time_zone", zone),
            None => self.scheduling.time_zone(),
        }
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key, keeping the existing value's type.
    ///
    /// Does not persist; call [`Config::save`] afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown, the value cannot be parsed,
    /// or the result fails validation.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        let updated: Config =
            serde_json::from_value(json).map_err(|e| invalid(key, e.to_string()))?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
