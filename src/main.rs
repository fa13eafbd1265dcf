//! Klipp CLI entry point.

use anyhow::Result;
use clap::Parser;
use klipp::cli::{commands, Cli, Commands};
use klipp::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    // Initialize logging; -v flags win over the configured level
    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("klipp={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    match &cli.command {
        Commands::Doctor => {
            commands::run_doctor(&settings).await?;
        }

        Commands::Run {
            source,
            owner,
            max_clips,
            min_seconds,
            max_seconds,
        } => {
            let overrides = commands::RunOverrides {
                max_clips: *max_clips,
                min_seconds: *min_seconds,
                max_seconds: *max_seconds,
            };
            commands::run_task(source, owner, overrides, settings).await?;
        }

        Commands::Status { task_id, json } => {
            commands::run_status(task_id, *json, settings).await?;
        }

        Commands::Clips { task_id, json } => {
            commands::run_clips(task_id, *json, settings).await?;
        }

        Commands::List { limit } => {
            commands::run_list(*limit, settings).await?;
        }

        Commands::Recover => {
            commands::run_recover(settings).await?;
        }

        Commands::Serve { host, port } => {
            commands::run_serve(host.clone(), *port, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings)?;
        }
    }

    Ok(())
}
