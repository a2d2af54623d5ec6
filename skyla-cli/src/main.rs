//! ## skyla-cli
//! **Operational interface for the inspection engine**
//!
//! Scan mode prints the hit report; redact mode prints the transformed
//! text, optionally processing the input as a chunked stream.

use clap::Parser;
use skyla_config::SkylaConfig;
use skyla_telemetry::logging::EventLogger;
use skyla_telemetry::metrics::MetricsRecorder;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match SkylaConfig::load() {
        Ok(config) => EventLogger::init_with_level(&config.telemetry.log_level),
        Err(_) => EventLogger::init(),
    }
    let metrics = MetricsRecorder::new();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => commands::run_scan(args, metrics).await,
        Commands::Redact(args) => commands::run_redact(args, metrics).await,
        Commands::Watch(args) => commands::run_watch(args, metrics).await,
    }
}
