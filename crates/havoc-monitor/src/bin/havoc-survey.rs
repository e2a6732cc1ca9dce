//! havoc-survey - minimal agent payload
//!
//! Reports the target's hostname and uptime without changing anything. The
//! connection string is baked in when the monitor builds it (the build runs
//! with `HAVOC_MONITOR_HOST`, `HAVOC_MONITOR_PORT` and `HAVOC_PUBLIC_KEY`
//! set) and falls back to the same variables at run time.

use anyhow::{Context, Result};
use havoc_core::{AgentConfig, Reporter, SystemEnv, agent::mint_token};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn agent_config() -> Result<AgentConfig> {
    let baked = (
        option_env!("HAVOC_MONITOR_HOST"),
        option_env!("HAVOC_MONITOR_PORT"),
        option_env!("HAVOC_PUBLIC_KEY"),
    );
    let config = match baked {
        (Some(host), Some(port), Some(key)) => AgentConfig::from_parts(host, port, key),
        _ => AgentConfig::from_env(),
    };
    config.context("no usable monitor connection string")
}

fn read_trimmed(path: &str) -> String {
    std::fs::read_to_string(path).map_or_else(|_| "unknown".to_string(), |s| s.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = agent_config()?;
    let token = mint_token(&SystemEnv);
    info!(monitor = %config.address(), "connecting");

    let mut reporter = Reporter::connect(&config).await.context("connecting to monitor")?;
    reporter.init(&token, "survey starting").await?;

    let hostname = read_trimmed("/proc/sys/kernel/hostname");
    let uptime = read_trimmed("/proc/uptime");
    reporter.general(&token, &format!("uptime {uptime}")).await?;
    reporter.variable(&token, "surveyed_hosts", &hostname).await?;
    reporter.report(&token, &format!("survey ran on {hostname}")).await?;
    reporter.complete(&token).await?;

    // The monitor closes the connection once the last token is retired.
    if let Err(e) = reporter.shutdown().await {
        debug!(error = %e, "shutdown after completion failed");
    }
    info!("survey finished");
    Ok(())
}
