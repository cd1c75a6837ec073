use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod context;

use context::Context;

#[derive(Parser)]
#[command(name = "pianodesk-cli", version, about = "PianoDesk scheduling and calendar sync")]
struct Cli {
    /// Technician account the command acts for
    #[arg(long, global = true, default_value = "default")]
    user: String,
    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the next free slot
    Slots(commands::slots::SlotsArgs),
    /// Maintenance alert suggestions and auto-scheduling
    Alert {
        #[command(subcommand)]
        action: commands::alert::AlertAction,
    },
    /// External calendar sync
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// OAuth client credentials for calendar providers
    Auth {
        #[command(subcommand)]
        action: commands::auth::AuthAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PIANODESK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    let ctx = Context::new(cli.user, cli.json);

    let result = match cli.command {
        Commands::Slots(args) => commands::slots::run(&ctx, args),
        Commands::Alert { action } => commands::alert::run(&ctx, action).await,
        Commands::Sync { action } => commands::sync::run(&ctx, action).await,
        Commands::Auth { action } => commands::auth::run(&ctx, action),
        Commands::Config { action } => commands::config::run(&ctx, action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
