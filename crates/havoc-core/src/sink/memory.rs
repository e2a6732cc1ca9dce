//! In-memory sinks for tests and dry runs.
//!
//! Clones share state, so a test can keep one handle while the session
//! writes through another.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;

use super::{AuditLog, VariableStore};
use crate::error::SinkError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Audit log that keeps records in a vector.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    records: Arc<Mutex<Vec<Bytes>>>,
}

impl MemoryAuditLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records, in append order.
    #[must_use]
    pub fn records(&self) -> Vec<Bytes> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append_record(&self, record: &[u8]) -> Result<(), SinkError> {
        lock(&self.records).push(Bytes::copy_from_slice(record.trim_ascii_end()));
        Ok(())
    }
}

/// Variable store backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MemoryVariableStore {
    vars: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
}

impl MemoryVariableStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Values recorded under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Vec<String> {
        lock(&self.vars).get(key).cloned().unwrap_or_default()
    }

    /// Snapshot of the whole map.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        lock(&self.vars).clone()
    }
}

#[async_trait]
impl VariableStore for MemoryVariableStore {
    async fn upsert(&self, key: &str, value: &str) -> Result<bool, SinkError> {
        let mut vars = lock(&self.vars);
        let values = vars.entry(key.to_string()).or_default();
        if values.iter().any(|v| v == value) {
            return Ok(false);
        }
        values.push(value.to_string());
        Ok(true)
    }
}
