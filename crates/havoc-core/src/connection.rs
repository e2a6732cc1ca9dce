//! Per-connection receive loop.
//!
//! ```text
//! read_frame → open envelope → parse ChaosMessage → dispatch → apply actions
//! ```
//!
//! Failure scopes:
//!
//! - Envelope, JSON and sink failures drop one message; the loop keeps
//!   reading.
//! - Framing errors, socket errors and read timeouts end this connection
//!   with [`ConnectionOutcome::Failed`]. The session keeps listening.
//! - A clean end of stream ends the connection with
//!   [`ConnectionOutcome::Disconnected`].
//!
//! Only a `Complete` action from the dispatcher ends the connection with
//! [`ConnectionOutcome::Complete`].

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use havoc_proto::{ChaosMessage, Frame, SessionKeypair};
use tokio::io::AsyncRead;
use tracing::{debug, trace, warn};

use crate::{
    codec,
    dispatch::{DispatchAction, Dispatcher},
    error::TransportError,
    registry::TokenRegistry,
    sink::Sinks,
};

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// Peer closed the stream cleanly
    Disconnected,
    /// The registry drained to zero on this connection
    Complete,
    /// Transport failure; connection-scoped
    Failed(TransportError),
}

/// Everything a connection needs from its session.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionHandler<'a> {
    keypair: &'a SessionKeypair,
    dispatcher: Dispatcher<'a>,
    sinks: Sinks<'a>,
    read_timeout: Duration,
}

impl<'a> ConnectionHandler<'a> {
    /// Handler that opens envelopes with `keypair` and updates `registry`.
    #[must_use]
    pub fn new(
        keypair: &'a SessionKeypair,
        registry: &'a TokenRegistry,
        sinks: Sinks<'a>,
        read_timeout: Duration,
    ) -> Self {
        Self { keypair, dispatcher: Dispatcher::new(registry), sinks, read_timeout }
    }

    /// Serve one connection until it ends.
    ///
    /// `on_activity` is called for every frame whose envelope opened with the
    /// session key, whether or not its contents were valid. Frames from a
    /// peer without the key do not count as activity.
    pub async fn run<S, F>(&self, stream: &mut S, peer: SocketAddr, on_activity: F) -> ConnectionOutcome
    where
        S: AsyncRead + Unpin,
        F: Fn(),
    {
        loop {
            let frame = match codec::read_frame_timeout(stream, self.read_timeout).await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(peer = %peer, "peer disconnected");
                    return ConnectionOutcome::Disconnected;
                },
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dropping connection");
                    return ConnectionOutcome::Failed(e);
                },
            };

            if self.handle_frame(&frame, peer, &on_activity).await {
                return ConnectionOutcome::Complete;
            }
        }
    }

    /// Process one frame. Returns `true` if the session is complete.
    async fn handle_frame(&self, frame: &Frame, peer: SocketAddr, on_activity: &impl Fn()) -> bool {
        trace!(peer = %peer, len = frame.payload.len(), "frame received");

        let plaintext = match self.keypair.open(&frame.payload) {
            Ok(plaintext) => Bytes::from(plaintext),
            Err(e) => {
                warn!(peer = %peer, error = %e, "dropping message");
                return false;
            },
        };
        on_activity();

        let mut message = match ChaosMessage::from_json(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %peer, error = %e, "dropping message");
                return false;
            },
        };

        let actions = self.dispatcher.dispatch(&mut message, &plaintext);
        self.apply(actions).await
    }

    async fn apply(&self, actions: Vec<DispatchAction>) -> bool {
        let mut complete = false;
        for action in actions {
            match action {
                DispatchAction::AppendAudit(record) => {
                    if let Err(e) = self.sinks.audit.append_record(&record).await {
                        warn!(error = %e, "failed to append audit record");
                    }
                },
                DispatchAction::UpsertVariable { key, value } => {
                    if let Err(e) = self.sinks.variables.upsert(&key, &value).await {
                        warn!(key = %key, error = %e, "failed to store variable");
                    }
                },
                DispatchAction::Complete => complete = true,
            }
        }
        complete
    }
}
