use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use workcache::config::Config;
use workcache::{logging, metrics};

use crate::stresstest::perform_stresstest;
use crate::workloads::WorkloadsConfig;

mod stresstest;
mod workloads;

/// Hammers a work cache with concurrent, partially overlapping requests.
///
/// Prints per workload how many requests were served, how many computations actually ran, and the
/// resulting deduplication ratio.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;
    workloads.validate()?;

    let config = Config::get(cli.config.as_deref())?;

    logging::init_logging(&config.logging);
    if let Err(err) = metrics::init_metrics(&config.metrics) {
        logging::ensure_log_error(&err.context("failed to configure metrics"));
    }

    perform_stresstest(config, workloads, cli.duration).await
}
