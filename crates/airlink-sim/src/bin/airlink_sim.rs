//! airlink-sim
//!
//! Runs one scenario file and prints the JSON report.
//!
//! - `--seed` and `--duration-ms` override the scenario's values
//! - `--output` writes the report to a file instead of stdout

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use airlink_sim::scenario::ScenarioInput;
use airlink_sim::Simulation;

/// Discrete-event simulation of the airlink MAC.
#[derive(Parser, Debug)]
#[command(name = "airlink-sim", about = "Simulate 802.11 stations over a shared channel")]
struct Cli {
    /// Scenario TOML file.
    scenario: PathBuf,

    /// Seed override.
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated time override, in milliseconds.
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Write the report here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let mut input = ScenarioInput::load(&cli.scenario)?;
    if cli.seed.is_some() {
        input.seed = cli.seed;
    }
    if cli.duration_ms.is_some() {
        input.duration_ms = cli.duration_ms;
    }
    let scenario = input
        .resolve()
        .with_context(|| format!("in scenario {}", cli.scenario.display()))?;

    tracing::info!(
        scenario = %cli.scenario.display(),
        seed = scenario.seed,
        stations = scenario.stations.len(),
        "airlink-sim starting"
    );

    let report = Simulation::new(&scenario).run();
    for station in &report.stations {
        tracing::info!(
            station = %station.address,
            delivered = station.delivered_frames,
            throughput_mbps = station.throughput_mbps,
            dropped = station.mac.dropped,
            "station summary"
        );
    }

    let json = report.to_json()?;
    match cli.output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
