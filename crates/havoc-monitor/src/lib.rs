//! Chaos monitor: configuration and the SSH deployer behind the
//! `havoc-monitor` binary.

pub mod config;
pub mod deploy;

pub use config::{ConfigError, MonitorConfig};
pub use deploy::SshDeployer;
