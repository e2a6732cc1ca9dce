//! Collaborators that receive agent output.
//!
//! - [`AuditLog`]: append-only newline-delimited JSON records
//! - [`VariableStore`]: persisted `key -> [values]` map with append-if-absent
//!
//! File-backed implementations live in [`file`], in-memory ones in
//! [`memory`]. Sink failures are logged by the connection handler and never
//! end a session.

pub mod file;
pub mod memory;

pub use file::{JsonlAuditLog, YamlVariableStore};
pub use memory::{MemoryAuditLog, MemoryVariableStore};

use async_trait::async_trait;

use crate::error::SinkError;

/// Append-only audit log.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one record. The record is stored verbatim (trailing whitespace
    /// trimmed) followed by a single newline.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the record could not be persisted.
    async fn append_record(&self, record: &[u8]) -> Result<(), SinkError>;
}

/// Persisted multi-valued variable map.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Append `value` to the list under `key` unless already present.
    ///
    /// Returns `true` if the store changed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the store could not be read or written.
    async fn upsert(&self, key: &str, value: &str) -> Result<bool, SinkError>;
}

/// Sinks handed to a session.
#[derive(Clone, Copy)]
pub struct Sinks<'a> {
    /// Destination for `chaos_report` and `error` records
    pub audit: &'a dyn AuditLog,
    /// Destination for `variable` messages
    pub variables: &'a dyn VariableStore,
}

impl<'a> Sinks<'a> {
    /// Bundle an audit log and a variable store.
    #[must_use]
    pub fn new(audit: &'a dyn AuditLog, variables: &'a dyn VariableStore) -> Self {
        Self { audit, variables }
    }
}

impl std::fmt::Debug for Sinks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks").finish_non_exhaustive()
    }
}
