//! Monitor configuration file.
//!
//! ```toml
//! [monitor]
//! advertise_host = "10.0.0.2"
//!
//! [target]
//! host = "testenv"
//!
//! [payloads]
//! cheap = ["havoc-survey"]
//! ```
//!
//! Every section is optional except that `monitor.advertise_host` and
//! `target.host` must be set and at least one cheap payload configured.

use std::{
    path::{Component, Path, PathBuf},
    time::Duration,
};

use havoc_core::{CycleTarget, PayloadCatalog, ScheduleConfig, SessionConfig};
use serde::Deserialize;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is missing or out of range
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Listener settings
    #[serde(default)]
    pub monitor: MonitorSection,
    /// Deployment target
    #[serde(default)]
    pub target: TargetSection,
    /// Agent build command
    #[serde(default)]
    pub build: BuildSection,
    /// Payload names per tier
    #[serde(default)]
    pub payloads: PayloadSection,
    /// Cycle intervals
    #[serde(default)]
    pub schedule: ScheduleSection,
    /// Output files
    #[serde(default)]
    pub sinks: SinkSection,
}

/// `[monitor]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    /// Interface the session listener binds
    pub bind_address: String,
    /// Host or IP agents dial back to
    pub advertise_host: String,
    /// Idle window in seconds
    pub idle_timeout_secs: u64,
    /// Per-frame read limit in seconds
    pub read_timeout_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            bind_address: "0.0.0.0".to_string(),
            advertise_host: String::new(),
            idle_timeout_secs: session.idle_timeout.as_secs(),
            read_timeout_secs: session.read_timeout.as_secs(),
        }
    }
}

/// `[target]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TargetSection {
    /// SSH destination (host alias from the SSH config, or `user@host`)
    pub host: String,
    /// SSH client config passed with `-F`
    pub ssh_config: Option<PathBuf>,
    /// Where the agent binary is placed on the target
    pub remote_path: String,
    /// Limit for each `scp`/`ssh` invocation, in seconds
    pub timeout_secs: u64,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            ssh_config: None,
            remote_path: "/tmp/break_tool".to_string(),
            timeout_secs: 60,
        }
    }
}

/// `[build]`
///
/// `{payload}` in `args` and `artifact` is replaced with the selected payload
/// name. The command runs with a cleared environment plus `PATH`,
/// `HOME=/tmp` and the agent connection variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    /// Build program
    pub program: String,
    /// Build arguments
    pub args: Vec<String>,
    /// Path of the produced binary
    pub artifact: String,
    /// Build time limit in seconds
    pub timeout_secs: u64,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            program: "cargo".to_string(),
            args: ["build", "--release", "--bin", "{payload}"].map(String::from).to_vec(),
            artifact: "target/release/{payload}".to_string(),
            timeout_secs: 120,
        }
    }
}

/// `[payloads]`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PayloadSection {
    /// Frequent, low-impact payloads
    pub cheap: Vec<String>,
    /// Occasional, high-impact payloads
    pub expensive: Vec<String>,
}

/// `[schedule]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSection {
    /// Shortest pause between cycles
    pub short_min_secs: u64,
    /// Longest pause between cycles
    pub short_max_secs: u64,
    /// Shortest accumulated pause before an expensive cycle
    pub long_min_secs: u64,
    /// Longest accumulated pause before an expensive cycle
    pub long_max_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        let schedule = ScheduleConfig::default();
        Self {
            short_min_secs: schedule.short_min.as_secs(),
            short_max_secs: schedule.short_max.as_secs(),
            long_min_secs: schedule.long_min.as_secs(),
            long_max_secs: schedule.long_max.as_secs(),
        }
    }
}

/// `[sinks]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SinkSection {
    /// Newline-delimited JSON audit log
    pub audit_log: PathBuf,
    /// YAML variable store
    pub variables: PathBuf,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self { audit_log: PathBuf::from("/tmp/chaos_reports.log"), variables: PathBuf::from("vars.yml") }
    }
}

/// Whether `path` is an absolute path strictly below `/tmp/` made of
/// shell-safe characters.
pub fn is_safe_remote_path(path: &str) -> bool {
    let p = Path::new(path);
    p.starts_with("/tmp")
        && p != Path::new("/tmp")
        && p.components().all(|c| matches!(c, Component::RootDir | Component::Normal(_)))
        && path.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'))
}

impl MonitorConfig {
    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Validation`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Validation(msg.to_string()));

        if self.monitor.advertise_host.trim().is_empty() {
            return invalid("monitor.advertise_host is required");
        }
        if self.monitor.idle_timeout_secs == 0 || self.monitor.read_timeout_secs == 0 {
            return invalid("monitor timeouts must be positive");
        }
        if self.target.host.trim().is_empty() {
            return invalid("target.host is required");
        }
        if !is_safe_remote_path(&self.target.remote_path) {
            return invalid("target.remote_path must be a plain path under /tmp/");
        }
        if self.build.program.trim().is_empty() {
            return invalid("build.program is required");
        }
        if self.payloads.cheap.is_empty() {
            return invalid("payloads.cheap must list at least one payload");
        }
        let s = &self.schedule;
        if s.short_min_secs > s.short_max_secs || s.long_min_secs > s.long_max_secs {
            return invalid("schedule minimums must not exceed maximums");
        }
        if s.short_max_secs == 0 {
            return invalid("schedule.short_max_secs must be positive");
        }
        Ok(())
    }

    /// Session timing.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            idle_timeout: Duration::from_secs(self.monitor.idle_timeout_secs),
            read_timeout: Duration::from_secs(self.monitor.read_timeout_secs),
            ..SessionConfig::default()
        }
    }

    /// Cycle intervals.
    #[must_use]
    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            short_min: Duration::from_secs(self.schedule.short_min_secs),
            short_max: Duration::from_secs(self.schedule.short_max_secs),
            long_min: Duration::from_secs(self.schedule.long_min_secs),
            long_max: Duration::from_secs(self.schedule.long_max_secs),
        }
    }

    /// Payload lists.
    #[must_use]
    pub fn catalog(&self) -> PayloadCatalog {
        PayloadCatalog { cheap: self.payloads.cheap.clone(), expensive: self.payloads.expensive.clone() }
    }

    /// Bind, advertise and target hosts for each cycle.
    #[must_use]
    pub fn cycle_target(&self) -> CycleTarget {
        let host = self.monitor.bind_address.trim();
        let bind_address = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:0")
        } else {
            format!("{host}:0")
        };
        CycleTarget {
            bind_address,
            advertise_host: self.monitor.advertise_host.trim().to_string(),
            target_host: self.target.host.trim().to_string(),
        }
    }
}
