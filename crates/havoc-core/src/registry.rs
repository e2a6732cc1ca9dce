//! Outstanding work tokens for one session.
//!
//! Agents register a token with `init` before starting a unit of work and
//! retire it with `operation_complete`. The session is finished when a retire
//! brings the set back to empty.
//!
//! The registry is shared by every concurrent connection of a session. Each
//! operation, including "remove and report what is left", happens under one
//! lock so two connections retiring the last two tokens cannot both observe
//! a count of one.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use havoc_proto::Token;

use crate::error::RegistryError;

/// Thread-safe set of outstanding tokens.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: Mutex<HashSet<Token>>,
}

impl TokenRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Token>> {
        // A panic while holding the lock cannot leave a HashSet half-updated
        // in a way that matters here; keep serving.
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `token`. Returns the number of outstanding tokens afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateToken`] if the token is already
    /// outstanding; the registry is unchanged.
    pub fn add(&self, token: Token) -> Result<usize, RegistryError> {
        let mut tokens = self.lock();
        if tokens.contains(&token) {
            return Err(RegistryError::DuplicateToken(token));
        }
        tokens.insert(token);
        Ok(tokens.len())
    }

    /// Retire `token`. Returns the number of tokens still outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownToken`] if the token is not
    /// outstanding; the registry is unchanged.
    pub fn remove(&self, token: &Token) -> Result<usize, RegistryError> {
        let mut tokens = self.lock();
        if !tokens.remove(token) {
            return Err(RegistryError::UnknownToken(token.clone()));
        }
        Ok(tokens.len())
    }

    /// Number of outstanding tokens.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `token` is outstanding.
    #[must_use]
    pub fn contains(&self, token: &Token) -> bool {
        self.lock().contains(token)
    }
}
