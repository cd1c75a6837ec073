//! Wiring shared by every subcommand: config, database and services.

use std::sync::Arc;

use pianodesk_core::calendar::google::GOOGLE_TOKEN_URL;
use pianodesk_core::calendar::microsoft::MICROSOFT_TOKEN_URL;
use pianodesk_core::calendar::{
    GoogleCalendar, MicrosoftCalendar, OAuthClient, ProviderKind, ProviderRegistry,
};
use pianodesk_core::{AutoScheduler, Config, Database, SyncEngine, SystemClock};
use serde::Serialize;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct Context {
    pub user: String,
    pub json: bool,
}

impl Context {
    pub fn new(user: String, json: bool) -> Self {
        Self { user, json }
    }

    pub fn config(&self) -> CliResult<Config> {
        Ok(Config::load()?)
    }

    pub fn database(&self, config: &Config) -> CliResult<Arc<Database>> {
        let db = match &config.database_path {
            Some(path) => Database::open_at(path)?,
            None => Database::open()?,
        };
        Ok(Arc::new(db))
    }

    pub fn scheduler(&self) -> CliResult<AutoScheduler> {
        let config = self.config()?;
        let db = self.database(&config)?;
        Ok(AutoScheduler::from_config(db, Arc::new(SystemClock), &config)?)
    }

    /// Engine over `db` with both provider adapters registered.
    pub fn sync_engine(&self, config: &Config, db: Arc<Database>) -> CliResult<SyncEngine> {
        Ok(SyncEngine::from_config(
            db,
            providers(),
            Arc::new(SystemClock),
            config,
        )?)
    }

    /// JSON when `--json` was given, otherwise the human rendering.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> CliResult {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

/// Both adapters, with token refresh enabled where client credentials are
/// stored in the keyring.
fn providers() -> ProviderRegistry {
    let google = GoogleCalendar::new();
    let google = match oauth_client(ProviderKind::Google, GOOGLE_TOKEN_URL) {
        Some(oauth) => google.with_oauth(oauth),
        None => google,
    };
    let microsoft = MicrosoftCalendar::new();
    let microsoft = match oauth_client(ProviderKind::Microsoft, MICROSOFT_TOKEN_URL) {
        Some(oauth) => microsoft.with_oauth(oauth),
        None => microsoft,
    };
    ProviderRegistry::new()
        .with(Arc::new(google))
        .with(Arc::new(microsoft))
}

fn oauth_client(provider: ProviderKind, token_url: &str) -> Option<OAuthClient> {
    match OAuthClient::from_keyring(provider, token_url) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(%provider, error = %e, "keyring unavailable, token refresh disabled");
            None
        }
    }
}

pub fn parse_provider(s: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(s).ok_or_else(|| format!("unknown provider: {s} (google, microsoft)"))
}
