use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fluxstudio_cli::cli::{self, Cli};
use fluxstudio_cli::config::StudioConfig;
use fluxstudio_cli::studio::{Studio, StudioError};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fluxstudio=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Cli::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    // --- Configuration ---
    let config = StudioConfig::from_env()?;
    tracing::debug!(data_dir = %config.data_dir.display(), queue_url = %config.queue_url, "Loaded configuration");

    // --- Studio ---
    let studio = Studio::open(&config)?;

    cli::run(args, &studio, &config).await
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<StudioError>() {
        Some(studio_err) => {
            eprintln!("error [{}]: {}", studio_err.code(), studio_err.message());
            if let Some(remedy) = studio_err.remedy() {
                eprintln!("  {}: {}", remedy.label, remedy.url);
            }
        }
        None => eprintln!("error: {err:#}"),
    }
}
