//! Havoc monitor core logic
//!
//! This crate contains everything the monitor needs to run one deployment
//! cycle: a secure listener that accepts agent connections, decrypts framed
//! messages, tracks outstanding work tokens and decides when the cycle is
//! over.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Decision logic is separated from I/O:
//!
//! ```text
//!      ┌────────────────────────────┐
//!      │ havoc-core                 │
//!      │ - Token registry           │
//!      │ - Dispatcher (actions)     │
//!      │ - Session driver           │
//!      └────────────────────────────┘
//!         ↓                      ↓
//! ┌────────────────┐  ┌────────────────┐
//! │ havoc-harness  │  │ havoc-monitor  │
//! │ (Turmoil)      │  │ (Tokio)        │
//! │ - Virtual time │  │ - Real network │
//! │ - Seeded RNG   │  │ - SSH deployer │
//! └────────────────┘  └────────────────┘
//! ```
//!
//! The [`dispatch::Dispatcher`] is pure: it turns a decrypted message into
//! [`dispatch::DispatchAction`]s. The connection handler executes those
//! actions against the [`sink`] traits, and the [`session::Session`] owns the
//! listener, the idle timer and the outcome.
//!
//! # Modules
//!
//! - [`codec`]: async frame reader/writer
//! - [`registry`]: outstanding token set
//! - [`dispatch`]: message handling rules
//! - [`connection`]: per-connection receive loop
//! - [`session`]: listener lifecycle and [`session::run_session`]
//! - [`sink`]: audit log and variable store
//! - [`deploy`]: deployer abstraction
//! - [`agent`]: agent-side reporter
//! - [`schedule`]: cheap/expensive cycle scheduling
//! - [`env`]: environment abstraction (time, RNG)
//! - [`transport`]: listener abstraction

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod codec;
pub mod connection;
pub mod deploy;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod registry;
pub mod schedule;
pub mod session;
pub mod sink;
pub mod transport;

pub use agent::{AgentConfig, Reporter};
pub use deploy::{DeployRequest, Deployer};
pub use env::{Environment, SystemEnv};
pub use error::{AgentError, DeployError, RegistryError, SessionError, SinkError, TransportError};
pub use registry::TokenRegistry;
pub use schedule::{CycleStats, CycleTarget, Orchestrator, PayloadCatalog, ScheduleConfig, Tier};
pub use session::{CycleRequest, Outcome, Session, SessionConfig, SessionState, run_session};
pub use sink::{AuditLog, Sinks, VariableStore};
pub use transport::{TcpTransport, Transport};
