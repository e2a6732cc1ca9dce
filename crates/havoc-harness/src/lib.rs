//! Deterministic simulation harness for the havoc control channel.
//!
//! This crate provides Turmoil-based implementations of the `Environment`
//! and `Transport` traits, so whole sessions (listener, agents, idle timer)
//! run over a simulated network on virtual time with a seeded RNG.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod sim_env;
mod sim_transport;

pub use sim_env::SimEnv;
pub use sim_transport::SimTransport;
