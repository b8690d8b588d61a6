//! Command line front end for the Neo driver.
//!
//! Runs the full startup sequence against the simulated camera and answers queries:
//! - `info`: sensor description and image channel metadata as JSON
//! - `features`: every registered feature with its current value
//! - `options <name>`: allowed values of an enumerated feature
//! - `wait`: block until the sensor temperature stabilizes (Ctrl-C cancels)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neo_daq::hardware::MockFeatureBackend;
use neo_daq::{logging, NeoCamera, NeoConfig, StabilizationOutcome};
use serde_json::json;
use tracing::{info, warn};

/// Andor Neo configuration and temperature monitor
#[derive(Parser, Debug)]
#[command(name = "neo_daq")]
#[command(version)]
struct Args {
    /// Configuration file [default: config/config.neo.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print sensor info and image channel metadata
    Info,
    /// List features and their current values
    Features,
    /// List the allowed values of an enumerated feature
    Options {
        /// Feature key or SDK name, e.g. `AOIBinning`
        name: String,
    },
    /// Wait for the sensor temperature to stabilize
    Wait,
}

/// Simulated Neo whose sensor cools from ambient toward the default -30 C setpoint.
fn simulated_camera() -> Arc<MockFeatureBackend> {
    let ramp = (0..11).map(|step| 22.5 - 5.0 * f64::from(step)).chain([-29.6]);
    Arc::new(MockFeatureBackend::new().with_temperature_sequence(ramp))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => NeoConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NeoConfig::load().context("loading config/config.neo.toml")?,
    };
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(config.application.log_level.as_str());
    logging::init_tracing(level);
    info!(name = %config.application.name, "Starting neo_daq");

    let mut camera = NeoCamera::open(simulated_camera(), &config.camera, &config.temperature)
        .context("camera initialization failed")?;

    match args.command {
        Command::Info => {
            let report = json!({
                "sensor": camera.get_sensor_info(),
                "aoi": camera.aoi(),
                "channel": camera.channel(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Features => {
            for row in camera.feature_snapshot()? {
                match (&row.value, &row.error) {
                    (Some(value), _) => println!("{:<28} {}", row.name, value),
                    (None, Some(error)) => println!("{:<28} <{}>", row.name, error),
                    (None, None) => println!("{:<28} -", row.name),
                }
            }
        }
        Command::Options { name } => {
            for option in camera.get_feature_options(&name)? {
                println!("{}", option);
            }
        }
        Command::Wait => {
            let waited = tokio::select! {
                outcome = camera.wait_for_stabilization() => Some(outcome),
                _ = tokio::signal::ctrl_c() => None,
            };
            match waited {
                None => warn!("Interrupted, cancelling temperature monitor"),
                Some(outcome) => match outcome? {
                    None => info!("Cooling is disabled, nothing to wait for"),
                    Some(StabilizationOutcome::Stabilized { polls, temperature }) => {
                        println!("Stabilized at {:.2} C after {} polls", temperature, polls);
                    }
                    Some(StabilizationOutcome::Cancelled { polls }) => {
                        println!("Cancelled after {} polls", polls);
                    }
                },
            }
        }
    }

    camera.close().await?;
    Ok(())
}
