use clap::Subcommand;
use pianodesk_core::Config;

use crate::context::{CliResult, Context};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Dotted key (e.g. "scheduling.working_hours_start")
        key: String,
    },
    /// Set a config value
    Set {
        /// Dotted key
        key: String,
        /// New value
        value: String,
    },
    /// Show the whole configuration
    Show,
    /// Print the config file location
    Path,
}

pub fn run(ctx: &Context, action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Get { key } => {
            let config = ctx.config()?;
            match config.get(&key) {
                Some(value) => println!("{value}"),
                None => return Err(format!("unknown key: {key}").into()),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = ctx.config()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("ok");
        }
        ConfigAction::Show => {
            let config = ctx.config()?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigAction::Path => println!("{}", Config::path()?.display()),
    }
    Ok(())
}
