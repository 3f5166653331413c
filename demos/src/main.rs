use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use surge::prelude::*;
use surge::THRESHOLDS_FAILED_EXIT_CODE;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use users_ramp::{options::options, users_ramp};

/// Ramp virtual users against the users endpoint and check latency and error thresholds.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// URL requested by every iteration.
    #[arg(long, default_value = users_ramp::DEFAULT_URL)]
    url: String,

    /// Options document replacing the built-in stages and thresholds.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ramp stage as `<duration>:<target>`, e.g. `30s:50`. Repeatable; replaces the stages.
    #[arg(short, long = "stage")]
    stages: Vec<Stage>,

    /// VUs for a constant or shared-iterations run, or the starting VUs of a ramp.
    #[arg(long)]
    vus: Option<usize>,

    /// Run `--vus` VUs for this long instead of ramping, e.g. `30s`.
    #[arg(long, value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Share this many iterations between `--vus` VUs instead of ramping.
    #[arg(long)]
    iterations: Option<u64>,

    /// Write the end-of-run summary as JSON to this path.
    #[arg(long)]
    summary_export: Option<PathBuf>,

    /// Serve Prometheus metrics on this address while the run is in progress.
    #[arg(long)]
    prometheus: Option<SocketAddr>,
}

impl Cli {
    fn scenario_config(&self) -> anyhow::Result<ScenarioConfig> {
        let mut config = match &self.config {
            Some(path) => ScenarioConfig::from_path(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => options()?,
        };

        if !self.stages.is_empty() {
            config.stages = self.stages.clone();
        } else if self.duration.is_some() || self.iterations.is_some() {
            config.stages.clear();
        }

        if self.vus.is_some() {
            config.vus = self.vus;
        }
        if self.duration.is_some() {
            config.duration = self.duration;
        }
        if self.iterations.is_some() {
            config.iterations = self.iterations;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "surge=debug,users_ramp=info".into()),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.scenario_config()?;
    users_ramp::set_target(cli.url.clone());

    if let Some(addr) = cli.prometheus {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Serving metrics on http://{addr}/metrics");
    }

    info!("Targeting {}", users_ramp::target());
    let stats = tokio::select! {
        stats = users_ramp().config(config) => stats?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping all VUs.");
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("{stats}");

    if let Some(path) = &cli.summary_export {
        let json = serde_json::to_vec_pretty(&stats)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }

    Ok(ExitCode::from(exit_status(&stats)))
}

fn exit_status(stats: &RunStatistics) -> u8 {
    if stats.passed() {
        0
    } else {
        THRESHOLDS_FAILED_EXIT_CODE as u8
    }
}
