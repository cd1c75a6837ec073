use clap::Subcommand;
use pianodesk_core::calendar::{OAuthClient, ProviderKind};

use crate::context::{parse_provider, CliResult, Context};

#[derive(Subcommand)]
pub enum AuthAction {
    /// Store OAuth client credentials used for token refresh
    Login {
        /// google or microsoft
        #[arg(value_parser = parse_provider)]
        provider: ProviderKind,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        client_secret: String,
    },
    /// Remove stored client credentials
    Logout {
        #[arg(value_parser = parse_provider)]
        provider: ProviderKind,
    },
    /// Show which providers have client credentials
    Status,
}

pub fn run(ctx: &Context, action: AuthAction) -> CliResult {
    match action {
        AuthAction::Login {
            provider,
            client_id,
            client_secret,
        } => {
            OAuthClient::store_credentials(provider, &client_id, &client_secret)?;
            println!("{provider}: credentials stored");
        }
        AuthAction::Logout { provider } => {
            OAuthClient::clear_credentials(provider)?;
            println!("{provider}: credentials removed");
        }
        AuthAction::Status => {
            let mut status = serde_json::Map::new();
            for provider in [ProviderKind::Google, ProviderKind::Microsoft] {
                let stored = OAuthClient::has_credentials(provider)?;
                status.insert(provider.as_str().to_string(), stored.into());
            }
            ctx.emit(&status, |status| {
                for (provider, stored) in status {
                    let label = if stored.as_bool() == Some(true) {
                        "configured"
                    } else {
                        "not configured"
                    };
                    println!("{provider}: {label}");
                }
            })?;
        }
    }
    Ok(())
}
