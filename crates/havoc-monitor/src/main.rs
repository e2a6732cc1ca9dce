//! havoc-monitor - chaos cycle scheduler
//!
//! Deploys agents to the target over SSH, listens for their encrypted reports
//! and records them until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use havoc_core::{
    Orchestrator, SystemEnv, TcpTransport,
    sink::{JsonlAuditLog, Sinks, YamlVariableStore},
};
use havoc_monitor::{MonitorConfig, SshDeployer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// havoc-monitor - chaos cycle scheduler
#[derive(Parser, Debug)]
#[command(name = "havoc-monitor")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the monitor configuration file
    #[arg(short, long, default_value = "havoc.toml")]
    config: PathBuf,

    /// Stop after this many cycles (default: run until interrupted)
    #[arg(long)]
    cycles: Option<u64>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Log filter (e.g. `info`, `havoc_core=trace`)
    #[arg(long, default_value = "info,havoc_core=debug")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = MonitorConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if cli.check {
        info!(config = %cli.config.display(), "configuration ok");
        return Ok(());
    }

    let audit = JsonlAuditLog::new(&config.sinks.audit_log);
    let variables = YamlVariableStore::new(&config.sinks.variables);
    variables
        .load()
        .await
        .with_context(|| format!("reading variable store {}", config.sinks.variables.display()))?;
    let deployer = SshDeployer::new(&config);

    info!(
        target = %config.target.host,
        advertise = %config.monitor.advertise_host,
        audit = %audit.path().display(),
        "monitor starting"
    );

    let orchestrator = Orchestrator::<TcpTransport, _, _>::new(
        SystemEnv,
        config.session_config(),
        config.schedule_config(),
        config.catalog(),
        config.cycle_target(),
        &deployer,
        Sinks::new(&audit, &variables),
    );

    tokio::select! {
        stats = orchestrator.run(cli.cycles) => {
            info!(
                succeeded = stats.succeeded,
                timed_out = stats.timed_out,
                failed = stats.failed,
                skipped = stats.skipped,
                "all cycles finished"
            );
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for interrupt")?;
            warn!("interrupted, abandoning current cycle");
        }
    }

    Ok(())
}
