//! Session listener.
//!
//! One session serves one deployment cycle: it binds an ephemeral port,
//! generates a fresh keypair, and accepts agent connections until the token
//! registry drains or the idle window passes with no activity.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────┐  bind + keygen  ┌───────────┐  drained / idle  ┌──────────┐       ┌────────┐
//! │ Starting │────────────────>│ Listening │─────────────────>│ Draining │──────>│ Closed │
//! └──────────┘                 └───────────┘                  └──────────┘       └────────┘
//!       │ bind failure                                                               ↑
//!       └──> SessionError (no session)                                               │
//!                                      deploy failure (run_session) ─────────────────┘
//! ```
//!
//! # Concurrency
//!
//! The accept loop and the idle timer are two branches of one `select!`;
//! there is no spawned task. Connections are served one at a time, inside
//! the accept loop. The idle deadline lives in a `watch` channel: accepting a
//! connection or opening a frame pushes it forward, and the timer branch
//! re-arms whenever it changes. Under [`run_session`] the timer is held until
//! the deployer reports the agent launched, so a slow build cannot use up
//! the window. When either termination branch wins, the
//! pending accept (or connection) future is dropped and the listener is
//! released.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use havoc_proto::{PublicKey, SessionKeypair, envelope::KEY_SIZE};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    agent::AgentConfig,
    connection::{ConnectionHandler, ConnectionOutcome},
    deploy::{DeployRequest, Deployer},
    env::Environment,
    error::SessionError,
    registry::TokenRegistry,
    sink::Sinks,
    transport::Transport,
};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Binding and generating keys
    Starting,
    /// Accepting agent connections
    Listening,
    /// Termination decided; releasing the listener
    Draining,
    /// Listener released. Terminal.
    Closed,
}

/// Result of one session.
#[derive(Debug)]
pub enum Outcome {
    /// Every registered token was retired
    Success,
    /// The idle window elapsed with no activity
    TimedOut,
    /// The session could not start, or deployment failed
    Error(SessionError),
}

impl Outcome {
    /// Short label for logs and counters.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TimedOut => "timed_out",
            Self::Error(_) => "error",
        }
    }
}

/// Session timing configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Window without accepts or frames after which the session is abandoned
    pub idle_timeout: Duration,
    /// Limit on a single frame read from an accepted connection
    pub read_timeout: Duration,
    /// Pause after a failed accept before trying again
    pub accept_backoff: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            accept_backoff: Duration::from_millis(100),
        }
    }
}

/// Rolling idle deadline.
///
/// `None` means the timer is held: nothing expires until the next touch.
/// Clones share one deadline.
#[derive(Debug, Clone)]
struct IdleTimer {
    window: Duration,
    deadline: Arc<watch::Sender<Option<Instant>>>,
}

impl IdleTimer {
    fn held(window: Duration) -> Self {
        let (deadline, _) = watch::channel(None);
        Self { window, deadline: Arc::new(deadline) }
    }

    fn touch(&self) {
        self.deadline.send_replace(Some(Instant::now() + self.window));
    }

    fn subscribe(&self) -> watch::Receiver<Option<Instant>> {
        self.deadline.subscribe()
    }
}

/// Resolves once the current deadline passes without being moved.
async fn idle_expired(mut deadline: watch::Receiver<Option<Instant>>) {
    loop {
        let current = *deadline.borrow_and_update();
        let Some(at) = current else {
            if deadline.changed().await.is_err() {
                // Held with no sender left; this timer can never fire.
                std::future::pending::<()>().await;
            }
            continue;
        };

        tokio::select! {
            () = tokio::time::sleep_until(at) => {
                if matches!(*deadline.borrow(), Some(current) if current <= at) {
                    return;
                }
            },
            changed = deadline.changed() => {
                if changed.is_err() {
                    // Sender gone; nothing can extend the deadline any more.
                    tokio::time::sleep_until(at).await;
                    return;
                }
            },
        }
    }
}

/// One deployment cycle's listener, keypair and registry.
#[derive(Debug)]
pub struct Session<T: Transport> {
    transport: Option<T>,
    local_addr: SocketAddr,
    keypair: SessionKeypair,
    registry: TokenRegistry,
    config: SessionConfig,
    idle: IdleTimer,
    state: SessionState,
}

impl<T: Transport> Session<T> {
    /// Bind `bind_address` and generate the session keypair.
    ///
    /// Use port 0 for an ephemeral port. Entropy for the secret key comes
    /// from `env`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Bind`] if the listener cannot be bound
    /// - [`SessionError::LocalAddr`] if the bound port cannot be read
    /// - [`SessionError::KeyGeneration`] if `env` has no entropy
    pub async fn start<E: Environment>(
        bind_address: &str,
        env: &E,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let transport = T::bind(bind_address)
            .await
            .map_err(|source| SessionError::Bind { address: bind_address.to_string(), source })?;
        let local_addr = transport.local_addr().map_err(SessionError::LocalAddr)?;

        let mut secret = [0u8; KEY_SIZE];
        env.try_random_bytes(&mut secret).map_err(SessionError::KeyGeneration)?;
        let keypair = SessionKeypair::from_secret_bytes(secret);

        info!(
            addr = %local_addr,
            public_key = %keypair.public_key_base64(),
            "session listening"
        );

        Ok(Self {
            transport: Some(transport),
            local_addr,
            keypair,
            registry: TokenRegistry::new(),
            idle: IdleTimer::held(config.idle_timeout),
            config,
            state: SessionState::Listening,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Session public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.keypair.public_key()
    }

    /// Outstanding tokens.
    #[must_use]
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Connection string for an agent that reaches this monitor at
    /// `advertise_host`.
    #[must_use]
    pub fn agent_config(&self, advertise_host: &str) -> AgentConfig {
        AgentConfig {
            monitor_host: advertise_host.to_string(),
            port: self.port(),
            public_key: self.public_key().clone(),
        }
    }

    /// Accept and serve connections until the registry drains
    /// ([`Outcome::Success`]) or the idle window passes
    /// ([`Outcome::TimedOut`]). The listener is released before returning.
    ///
    /// Returns [`Outcome::Error`] with [`SessionError::NotListening`] if the
    /// session already ended.
    pub async fn run(&mut self, sinks: Sinks<'_>) -> Outcome {
        self.idle.touch();
        self.serve(sinks).await
    }

    /// Accept loop behind [`Session::run`]. The idle window is whatever the
    /// session's timer currently holds; a held timer never expires.
    async fn serve(&mut self, sinks: Sinks<'_>) -> Outcome {
        let Some(transport) = self.transport.as_ref() else {
            return Outcome::Error(SessionError::NotListening);
        };

        let handler =
            ConnectionHandler::new(&self.keypair, &self.registry, sinks, self.config.read_timeout);
        let idle = &self.idle;
        let expired = idle_expired(idle.subscribe());
        tokio::pin!(expired);

        let outcome = loop {
            let accepted = tokio::select! {
                biased;
                () = &mut expired => break Outcome::TimedOut,
                accepted = transport.accept() => accepted,
            };

            let (mut stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::select! {
                        biased;
                        () = &mut expired => break Outcome::TimedOut,
                        () = tokio::time::sleep(self.config.accept_backoff) => continue,
                    }
                },
            };

            idle.touch();
            info!(peer = %peer, "agent connected");

            let served = tokio::select! {
                biased;
                () = &mut expired => break Outcome::TimedOut,
                served = handler.run(&mut stream, peer, || idle.touch()) => served,
            };

            match served {
                ConnectionOutcome::Complete => break Outcome::Success,
                ConnectionOutcome::Disconnected => {
                    debug!(peer = %peer, outstanding = self.registry.count(), "waiting for next connection");
                },
                ConnectionOutcome::Failed(e) => {
                    debug!(peer = %peer, error = %e, "connection failed, still listening");
                },
            }
        };

        self.close();
        info!(outcome = outcome.label(), outstanding = self.registry.count(), "session ended");
        outcome
    }

    /// Release the listener. Idempotent.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Draining;
        drop(self.transport.take());
        self.state = SessionState::Closed;
        debug!(addr = %self.local_addr, "listener released");
    }
}

/// One deployment cycle.
#[derive(Debug, Clone)]
pub struct CycleRequest {
    /// Address the listener binds (`host:0` for an ephemeral port)
    pub bind_address: String,
    /// Host agents dial back to
    pub advertise_host: String,
    /// Host the agent runs on
    pub target_host: String,
    /// Payload to deploy
    pub payload: String,
}

/// Start a session, deploy an agent that reports to it, and wait for the
/// session to end.
///
/// The listener is up before the deployer runs. The idle window opens when
/// the deployer returns (or an agent connects first). If deployment fails
/// the listener is released immediately and the outcome is
/// [`Outcome::Error`]; if the session ends while the deployer is still
/// running, the deployment is abandoned.
pub async fn run_session<T, E, D>(
    request: &CycleRequest,
    env: &E,
    config: &SessionConfig,
    deployer: &D,
    sinks: Sinks<'_>,
) -> Outcome
where
    T: Transport,
    E: Environment,
    D: Deployer + ?Sized,
{
    let mut session = match Session::<T>::start(&request.bind_address, env, config.clone()).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "session failed to start");
            return Outcome::Error(e);
        },
    };

    let deployment = DeployRequest {
        payload: request.payload.clone(),
        target_host: request.target_host.clone(),
        agent: session.agent_config(&request.advertise_host),
    };

    let idle = session.idle.clone();
    let outcome = {
        let listen = session.serve(sinks);
        tokio::pin!(listen);

        tokio::select! {
            outcome = &mut listen => outcome,
            deployed = deployer.deploy(&deployment) => match deployed {
                Ok(()) => {
                    idle.touch();
                    info!(payload = %deployment.payload, target = %deployment.target_host, "agent deployed");
                    listen.await
                },
                Err(e) => {
                    warn!(payload = %deployment.payload, error = %e, "deployment failed");
                    Outcome::Error(SessionError::Deploy(e))
                },
            },
        }
    };

    session.close();
    outcome
}
