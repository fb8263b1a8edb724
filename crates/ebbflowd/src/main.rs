//! ebbflowd — the ebbflow daemon.
//!
//! Runs the adaptive autoscaler against an in-process cluster described by
//! a scenario file, either tick-by-tick (`simulate`) or on its real timer
//! (`run`).
//!
//! # Usage
//!
//! ```text
//! ebbflowd simulate --config burst.toml --ticks 30
//! ebbflowd run --config burst.toml
//! ebbflowd config > ebbflow.toml
//! ```

mod scenario;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ebbflow_cluster::ClusterController;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::scenario::DaemonConfig;

#[derive(Parser)]
#[command(name = "ebbflowd", about = "ebbflow adaptive autoscaling daemon")]
struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Step the autoscaler through a scenario and print its scaling history.
    Simulate {
        /// Config file with `[adaptive]` and `[scenario]` tables.
        #[arg(long)]
        config: PathBuf,

        /// Number of ticks; defaults to the scenario's length.
        #[arg(long)]
        ticks: Option<u32>,
    },
    /// Run the autoscaler loop against a scenario until Ctrl-C.
    Run {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the default configuration.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Simulate { config, ticks } => {
            simulate(DaemonConfig::from_file(&config)?, ticks).await
        }
        Command::Run { config } => run(DaemonConfig::from_file(&config)?).await,
        Command::Config => {
            print!("{}", DaemonConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,ebbflowd=debug,ebbflow=debug")
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn simulate(config: DaemonConfig, ticks: Option<u32>) -> anyhow::Result<()> {
    let report = scenario::simulate(config, ticks).await?;
    info!(
        plan = report.state.plan.len(),
        observed = report.state.observed.len(),
        retired = report.retired,
        "simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&report.history)?);
    Ok(())
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let (mut adaptive, cluster, scenario) = config.build()?;
    let interval = adaptive.policy().interval;
    info!(scenario = %scenario.name, "ebbflow daemon starting");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut provision_shutdown = shutdown_rx.clone();

    // ── Background tasks ───────────────────────────────────────

    let autoscale_handle = tokio::spawn(async move {
        adaptive.run(shutdown_rx).await;
    });

    // Stands in for the provisioner: loads the scenario and brings
    // requested workers online once per interval.
    let provision_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let mut tick = 0u32;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(phase) = scenario.phase_at(tick)
                        && let Err(e) = phase.apply(&cluster, scenario.memory_limit)
                    {
                        warn!(error = %e, "failed to apply scenario load");
                    }
                    if let Err(e) = cluster.reconcile().await {
                        warn!(error = %e, "reconcile failed");
                    }
                    cluster.arrive_all();
                    tick += 1;
                }
                _ = provision_shutdown.changed() => break,
            }
        }
        cluster.close();
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = autoscale_handle.await;
    let _ = provision_handle.await;

    info!("ebbflow daemon stopped");
    Ok(())
}
