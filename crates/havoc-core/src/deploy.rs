//! Deployment collaborator.
//!
//! A deployer builds an agent with the session's connection string embedded,
//! copies it to the target and starts it. The core only sees success or
//! failure; the SSH implementation lives in the monitor binary.

use async_trait::async_trait;

use crate::{agent::AgentConfig, error::DeployError};

/// What to deploy and where it should report back.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Payload (break program) name to build
    pub payload: String,
    /// Host the agent is started on
    pub target_host: String,
    /// Connection string the agent dials (public material only)
    pub agent: AgentConfig,
}

/// Builds, copies and launches one agent.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Deploy and start an agent for `request`.
    ///
    /// Returns once the agent has been launched; it does not wait for the
    /// agent to finish.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError`] if any step fails. The session is torn down.
    async fn deploy(&self, request: &DeployRequest) -> Result<(), DeployError>;
}
