//! VM scale test runner
//!
//! One-shot binary that loads a campaign settings file, connects to the
//! cluster, runs the configured scale scenario, and prints a final VMI
//! status summary.

use anyhow::{Context, Result};
use clap::Parser;
use scale_lib::{
    ActionRunner, ClusterGateway, CpuProbe, KubeGateway, ScaleOrchestrator, Settings, SshTopProbe,
    StatusReporter, VirtctlRunner,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod output;

/// VM scale test runner
#[derive(Parser)]
#[command(name = "vmscale")]
#[command(author, version, about = "Scale and endurance test runner for cluster VMs", long_about = None)]
struct Cli {
    /// Path to the campaign settings file
    #[arg(long, short, env = "VMSCALE_CONFIG", default_value = "conf/scale_test.yaml")]
    config: PathBuf,

    /// Emit logs as JSON instead of human-readable lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = format!("{err:#}"), "Run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    info!("Starting vmscale");

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    info!(scenario = ?settings.scenario, "Campaign configured");

    let gateway: Arc<dyn ClusterGateway> = Arc::new(
        KubeGateway::connect()
            .await
            .context("cluster login required")?,
    );
    let actions: Arc<dyn ActionRunner> = Arc::new(VirtctlRunner::new(settings.virtctl_path.clone()));
    let probe: Arc<dyn CpuProbe> = Arc::new(SshTopProbe);

    let reporter = StatusReporter::new(gateway.clone());
    let mut orchestrator = ScaleOrchestrator::new(settings, gateway, actions, probe)?;
    orchestrator.run().await?;

    let snapshot = reporter.log_snapshot().await?;
    output::print_status_table(&snapshot);
    output::print_success("Campaign complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
