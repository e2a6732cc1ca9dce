//! SSH deployment of agents.
//!
//! Each deploy runs three commands: the configured build (with the session's
//! connection string in its environment), `scp` of the artifact to the target,
//! and an `ssh` that starts the agent detached. Every command is killed if
//! its time limit passes or the deploy future is dropped.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use havoc_core::{DeployRequest, Deployer, error::DeployError};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::MonitorConfig;

/// Search path for the build when the monitor has none.
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Where the launched agent's output goes on the target.
const REMOTE_LOG: &str = "/tmp/break_tool.log";

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 512;

#[derive(Debug, Clone, Copy)]
enum Step {
    Build,
    Copy,
    Launch,
}

impl Step {
    fn name(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Copy => "copy",
            Self::Launch => "launch",
        }
    }

    fn failed(self, detail: String) -> DeployError {
        match self {
            Self::Build => DeployError::Build(detail),
            Self::Copy => DeployError::Copy(detail),
            Self::Launch => DeployError::Launch(detail),
        }
    }
}

/// Deploys agents with the local toolchain, `scp` and `ssh`.
#[derive(Debug, Clone)]
pub struct SshDeployer {
    build_program: String,
    build_args: Vec<String>,
    artifact: String,
    build_timeout: Duration,
    ssh_config: Option<PathBuf>,
    remote_path: String,
    remote_timeout: Duration,
    scp_program: String,
    ssh_program: String,
}

impl SshDeployer {
    /// Deployer for a validated configuration.
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            build_program: config.build.program.clone(),
            build_args: config.build.args.clone(),
            artifact: config.build.artifact.clone(),
            build_timeout: Duration::from_secs(config.build.timeout_secs),
            ssh_config: config.target.ssh_config.clone(),
            remote_path: config.target.remote_path.clone(),
            remote_timeout: Duration::from_secs(config.target.timeout_secs),
            scp_program: "scp".to_string(),
            ssh_program: "ssh".to_string(),
        }
    }

    fn artifact_for(&self, payload: &str) -> PathBuf {
        PathBuf::from(self.artifact.replace("{payload}", payload))
    }

    fn build_args_for(&self, payload: &str, artifact: &Path) -> Vec<String> {
        let artifact = artifact.to_string_lossy();
        self.build_args
            .iter()
            .map(|arg| arg.replace("{payload}", payload).replace("{artifact}", &artifact))
            .collect()
    }

    fn ssh_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        if let Some(config) = &self.ssh_config {
            options.push("-F".to_string());
            options.push(config.to_string_lossy().into_owned());
        }
        options.push("-o".to_string());
        options.push("BatchMode=yes".to_string());
        options
    }

    /// Remote shell command that starts the agent detached, with the
    /// connection string in its environment.
    fn launch_command(&self, request: &DeployRequest) -> String {
        let env: Vec<String> =
            request.agent.env_vars().iter().map(|(name, value)| format!("{name}='{value}'")).collect();
        let path = &self.remote_path;
        format!("chmod +x {path} && {} nohup {path} >{REMOTE_LOG} 2>&1 &", env.join(" "))
    }

    async fn build(&self, request: &DeployRequest) -> Result<PathBuf, DeployError> {
        let artifact = self.artifact_for(&request.payload);
        let path = std::env::var_os("PATH").unwrap_or_else(|| DEFAULT_PATH.into());

        let mut command = Command::new(&self.build_program);
        command
            .args(self.build_args_for(&request.payload, &artifact))
            .env_clear()
            .env("PATH", path)
            .env("HOME", "/tmp")
            .envs(request.agent.env_vars());
        run_step(Step::Build, command, self.build_timeout).await?;

        match tokio::fs::metadata(&artifact).await {
            Ok(meta) if meta.is_file() => Ok(artifact),
            Ok(_) => Err(DeployError::Build(format!("{} is not a file", artifact.display()))),
            Err(e) => Err(DeployError::Build(format!("missing artifact {}: {e}", artifact.display()))),
        }
    }

    async fn copy(&self, artifact: &Path, host: &str) -> Result<(), DeployError> {
        let mut command = Command::new(&self.scp_program);
        command.args(self.ssh_options()).arg(artifact).arg(format!("{host}:{}", self.remote_path));
        run_step(Step::Copy, command, self.remote_timeout).await
    }

    async fn launch(&self, request: &DeployRequest) -> Result<(), DeployError> {
        let mut command = Command::new(&self.ssh_program);
        command
            .args(self.ssh_options())
            .arg(&request.target_host)
            .arg("--")
            .arg(self.launch_command(request));
        run_step(Step::Launch, command, self.remote_timeout).await
    }
}

#[async_trait]
impl Deployer for SshDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError> {
        validate_request(request)?;

        let artifact = self.build(request).await?;
        info!(payload = %request.payload, artifact = %artifact.display(), "agent built");

        self.copy(&artifact, &request.target_host).await?;
        info!(host = %request.target_host, path = %self.remote_path, "agent copied");

        self.launch(request).await?;
        info!(host = %request.target_host, "agent launched");
        Ok(())
    }
}

fn validate_request(request: &DeployRequest) -> Result<(), DeployError> {
    let payload_ok = !request.payload.is_empty()
        && request.payload.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if !payload_ok {
        return Err(DeployError::Rejected(format!("invalid payload name {:?}", request.payload)));
    }

    let host = &request.target_host;
    if host.is_empty() || host.starts_with('-') || host.chars().any(char::is_whitespace) {
        return Err(DeployError::Rejected(format!("invalid target host {host:?}")));
    }
    if request.agent.monitor_host.chars().any(|c| c == '\'' || c.is_whitespace()) {
        return Err(DeployError::Rejected("invalid monitor host".to_string()));
    }
    Ok(())
}

async fn run_step(step: Step, mut command: Command, limit: Duration) -> Result<(), DeployError> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
    debug!(step = step.name(), ?command, "running");

    let child = command.spawn()?;
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => return Err(DeployError::Timeout { step: step.name(), timeout: limit }),
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
    Err(step.failed(format!("{}: {excerpt}", output.status)))
}
