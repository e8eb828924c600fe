use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Parser;
use logger::LogFormat;
use tracing::{info, level_filters::LevelFilter, warn};
use uptick_service::config::Config;
use uptick_service::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "uptick-service")]
#[command(about = "Probe HTTP(S) checks on a schedule and text owners when they go up or down")]
#[command(version)]
struct Args {
    /// Path to the TOML config; created with defaults if missing
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one probe cycle and one rotation cycle, then exit
    #[arg(long)]
    once: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::load(args.config.as_ref()).context("loading configuration")?;

    let (level, level_error) = match LevelFilter::from_str(&config.logging.level) {
        Ok(level) => (level, None),
        Err(e) => (LevelFilter::INFO, Some(e)),
    };
    let (format, format_error) = match config.logging.format.parse::<LogFormat>() {
        Ok(format) => (format, None),
        Err(e) => (LogFormat::default(), Some(e)),
    };
    logger::init_with(level, format);
    if let Some(e) = level_error {
        warn!(level = %config.logging.level, error = %e, "Invalid log level in config, using info");
    }
    if let Some(e) = format_error {
        warn!(error = %e, "Invalid log format in config, using compact");
    }

    if args.print_config {
        print!("{config}");
        return Ok(());
    }

    let orchestrator = Orchestrator::new(config).await?;
    if args.once {
        let (probes, rotation) = orchestrator.run_once().await;
        info!(
            evaluated = probes.evaluated,
            invalid = probes.invalid,
            alerts = probes.alerts,
            rotated = rotation.rotated,
            "Single pass complete"
        );
        return Ok(());
    }

    orchestrator.run().await
}
