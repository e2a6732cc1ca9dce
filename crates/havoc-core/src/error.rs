//! Error types for the havoc monitor core.
//!
//! Errors are layered by blast radius:
//!
//! - [`TransportError`] ends one connection; the session keeps listening
//! - [`RegistryError`] and [`SinkError`] affect one message
//! - [`DeployError`] and [`SessionError`] end the cycle with
//!   `Outcome::Error`

use std::{io, time::Duration};

use havoc_proto::{EnvelopeError, ProtocolError, Token};
use thiserror::Error;

/// Failure reading or writing frames on one connection.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Length prefix or payload violated the frame rules
    #[error("framing error: {0}")]
    Frame(#[from] ProtocolError),

    /// Underlying socket error
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer sent nothing for the configured read timeout
    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),
}

/// Token bookkeeping violations.
///
/// These are logged and the offending message is otherwise ignored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `init` for a token that is already outstanding
    #[error("token already registered: {0}")]
    DuplicateToken(Token),

    /// `operation_complete` for a token that is not outstanding
    #[error("token not registered: {0}")]
    UnknownToken(Token),
}

/// Failure writing to an audit log or variable store.
#[derive(Error, Debug)]
pub enum SinkError {
    /// Filesystem error
    #[error("sink i/o error: {0}")]
    Io(#[from] io::Error),

    /// Could not serialize the store contents
    #[error("failed to encode store: {0}")]
    Encode(String),

    /// Existing store contents are not a valid variable map
    #[error("failed to decode store: {0}")]
    Decode(String),
}

/// Failure building, copying or starting an agent.
#[derive(Error, Debug)]
pub enum DeployError {
    /// Build step failed or produced no artifact
    #[error("build failed: {0}")]
    Build(String),

    /// Copying the artifact to the target failed
    #[error("copy to target failed: {0}")]
    Copy(String),

    /// Starting the agent on the target failed
    #[error("launch on target failed: {0}")]
    Launch(String),

    /// Request was refused before any command ran
    #[error("deploy request rejected: {0}")]
    Rejected(String),

    /// A step exceeded its time limit
    #[error("{step} timed out after {timeout:?}")]
    Timeout {
        /// Step that timed out
        step: &'static str,
        /// Configured limit
        timeout: Duration,
    },

    /// Could not spawn a command
    #[error("deploy i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that end a session before it can produce `Success` or `TimedOut`.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Could not bind the listener
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested bind address
        address: String,
        /// Underlying error
        source: io::Error,
    },

    /// Could not read back the bound address
    #[error("failed to read listener address: {0}")]
    LocalAddr(io::Error),

    /// No entropy for the session secret key
    #[error("failed to generate session keypair: {0}")]
    KeyGeneration(rand::Error),

    /// `run` was called on a session that is not listening
    #[error("session is not listening")]
    NotListening,

    /// Deployment failed while the listener was up
    #[error("deployment failed: {0}")]
    Deploy(#[from] DeployError),
}

/// Errors on the agent side of the channel.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Connection settings are missing or malformed
    #[error("invalid agent configuration: {0}")]
    Config(String),

    /// Sealing failed
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Message could not be encoded or framed
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Writing to the monitor failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Connecting to the monitor failed
    #[error("agent i/o error: {0}")]
    Io(#[from] io::Error),
}
