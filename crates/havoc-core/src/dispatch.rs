//! Message dispatcher.
//!
//! Turns one decrypted [`ChaosMessage`] into registry updates and a list of
//! [`DispatchAction`]s for the driver. Only the registry is touched here;
//! file writes and the session-ending decision are returned as actions so
//! this logic can be tested without any I/O.
//!
//! # Rules
//!
//! | status               | effect                                         |
//! |----------------------|------------------------------------------------|
//! | `init`               | register token                                 |
//! | `operation_complete` | retire token; `Complete` if none remain        |
//! | `chaos_report`       | `AppendAudit` with the raw plaintext           |
//! | `error`              | `AppendAudit` with the raw plaintext           |
//! | `general`            | log only                                       |
//! | `variable`           | `UpsertVariable` if `key,value` parses         |
//! | anything else        | warn                                           |
//!
//! Registry anomalies (duplicate `init`, unknown `operation_complete`) are
//! logged and never end the session.

use bytes::Bytes;
use havoc_proto::{ChaosMessage, Status};
use tracing::{debug, info, warn};

use crate::registry::TokenRegistry;

/// Side effect requested by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchAction {
    /// Append this exact plaintext record to the audit log
    AppendAudit(Bytes),

    /// Append `value` under `key` in the variable store if absent
    UpsertVariable {
        /// Variable name
        key: String,
        /// Value to add to the list for `key`
        value: String,
    },

    /// The registry just drained to zero; end the session successfully
    Complete,
}

/// Applies the dispatch rules against one session's registry.
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher<'a> {
    registry: &'a TokenRegistry,
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher bound to `registry`.
    #[must_use]
    pub fn new(registry: &'a TokenRegistry) -> Self {
        Self { registry }
    }

    /// Dispatch one message.
    ///
    /// `raw` is the decrypted plaintext the message was parsed from; audit
    /// records carry it verbatim. `message.token_check` is overwritten with
    /// whether the token was outstanding when the message arrived.
    pub fn dispatch(&self, message: &mut ChaosMessage, raw: &Bytes) -> Vec<DispatchAction> {
        message.token_check = self.registry.contains(&message.token);

        let token = &message.token;
        debug!(status = %message.status, token = %token, token_check = message.token_check, "dispatching message");

        match &message.status {
            Status::Init => {
                match self.registry.add(token.clone()) {
                    Ok(outstanding) => info!(token = %token, outstanding, "token registered"),
                    Err(e) => warn!(error = %e, "ignoring init"),
                }
                Vec::new()
            },
            Status::OperationComplete => match self.registry.remove(token) {
                Ok(0) => {
                    info!(token = %token, "last token retired");
                    vec![DispatchAction::Complete]
                },
                Ok(outstanding) => {
                    info!(token = %token, outstanding, "token retired");
                    Vec::new()
                },
                Err(e) => {
                    warn!(error = %e, "ignoring operation_complete");
                    Vec::new()
                },
            },
            Status::ChaosReport | Status::Error => {
                info!(status = %message.status, token = %token, message = %message.message, "agent report");
                vec![DispatchAction::AppendAudit(raw.clone())]
            },
            Status::General => {
                info!(token = %token, message = %message.message, "agent log");
                Vec::new()
            },
            Status::Variable => match message.variable() {
                Some((key, value)) => {
                    debug!(token = %token, key, value, "agent variable");
                    vec![DispatchAction::UpsertVariable {
                        key: key.to_string(),
                        value: value.to_string(),
                    }]
                },
                None => {
                    warn!(token = %token, message = %message.message, "malformed variable, expected key,value");
                    Vec::new()
                },
            },
            Status::Unknown(tag) => {
                warn!(status = %tag, token = %token, "unknown message status");
                Vec::new()
            },
        }
    }
}
