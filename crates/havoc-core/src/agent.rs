//! Agent side of the control channel.
//!
//! A deployed agent knows three public values: the monitor host, the session
//! port and the session public key. [`AgentConfig`] carries them (parsed
//! from build-time constants or the environment) and [`Reporter`] turns
//! agent events into sealed, framed [`ChaosMessage`]s.
//!
//! ```text
//! mint_token → init → (general | chaos_report | error | variable)* → operation_complete
//! ```

use std::fmt;

use crypto_box::aead::OsRng;
use havoc_proto::{
    ChaosMessage, Frame, PublicKey, Status, Token,
    envelope::{public_key_from_base64, public_key_to_base64, seal},
    message::TOKEN_BYTES,
};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tracing::debug;

use crate::{codec, env::Environment, error::AgentError};

/// Environment variable holding the monitor host.
pub const ENV_MONITOR_HOST: &str = "HAVOC_MONITOR_HOST";
/// Environment variable holding the session port.
pub const ENV_MONITOR_PORT: &str = "HAVOC_MONITOR_PORT";
/// Environment variable holding the base64 session public key.
pub const ENV_PUBLIC_KEY: &str = "HAVOC_PUBLIC_KEY";

/// Mint a fresh token from the environment's RNG.
pub fn mint_token(env: &impl Environment) -> Token {
    let mut bytes = [0u8; TOKEN_BYTES];
    env.random_bytes(&mut bytes);
    Token::from_random(bytes)
}

/// Where an agent reports to.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Host or IP the monitor is reachable at
    pub monitor_host: String,
    /// Session port
    pub port: u16,
    /// Session public key
    pub public_key: PublicKey,
}

impl AgentConfig {
    /// Parse the three connection-string parts.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] for an empty host or an invalid port,
    /// and [`AgentError::Envelope`] for an invalid public key.
    pub fn from_parts(host: &str, port: &str, public_key: &str) -> Result<Self, AgentError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(AgentError::Config("monitor host is empty".to_string()));
        }
        let port = port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| AgentError::Config(format!("invalid port {port:?}")))?;
        let public_key = public_key_from_base64(public_key)?;

        Ok(Self { monitor_host: host.to_string(), port, public_key })
    }

    /// Read the connection string from `HAVOC_MONITOR_HOST`,
    /// `HAVOC_MONITOR_PORT` and `HAVOC_PUBLIC_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if a variable is missing, otherwise as
    /// [`AgentConfig::from_parts`].
    pub fn from_env() -> Result<Self, AgentError> {
        let var = |name: &str| {
            std::env::var(name).map_err(|_| AgentError::Config(format!("{name} is not set")))
        };
        Self::from_parts(&var(ENV_MONITOR_HOST)?, &var(ENV_MONITOR_PORT)?, &var(ENV_PUBLIC_KEY)?)
    }

    /// The connection string as environment variable pairs, for handing to a
    /// build step.
    #[must_use]
    pub fn env_vars(&self) -> [(&'static str, String); 3] {
        [
            (ENV_MONITOR_HOST, self.monitor_host.clone()),
            (ENV_MONITOR_PORT, self.port.to_string()),
            (ENV_PUBLIC_KEY, public_key_to_base64(&self.public_key)),
        ]
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.monitor_host.contains(':') && !self.monitor_host.starts_with('[') {
            format!("[{}]:{}", self.monitor_host, self.port)
        } else {
            format!("{}:{}", self.monitor_host, self.port)
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("monitor_host", &self.monitor_host)
            .field("port", &self.port)
            .field("public_key", &public_key_to_base64(&self.public_key))
            .finish()
    }
}

/// Sends sealed messages to the monitor over one stream.
pub struct Reporter<S> {
    stream: S,
    public_key: PublicKey,
}

impl Reporter<TcpStream> {
    /// Dial the monitor described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Io`] if the connection fails.
    pub async fn connect(config: &AgentConfig) -> Result<Self, AgentError> {
        let stream = TcpStream::connect(config.address()).await?;
        Ok(Self::new(stream, config.public_key.clone()))
    }
}

impl<S> Reporter<S>
where
    S: AsyncWrite + Unpin,
{
    /// Reporter over an already connected stream.
    pub fn new(stream: S, public_key: PublicKey) -> Self {
        Self { stream, public_key }
    }

    /// Seal, frame and send one message.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if encoding, sealing or writing fails.
    pub async fn send(&mut self, message: &ChaosMessage) -> Result<(), AgentError> {
        let json = message.to_json()?;
        let envelope = seal(&json, &self.public_key, &mut OsRng)?;
        codec::write_frame(&mut self.stream, &Frame::new(envelope)).await?;

        debug!(status = %message.status, token = %message.token, "message sent");
        Ok(())
    }

    async fn send_status(&mut self, status: Status, text: &str, token: &Token) -> Result<(), AgentError> {
        self.send(&ChaosMessage::new(status, text, token.clone())).await
    }

    /// Register `token` with the monitor.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    pub async fn init(&mut self, token: &Token, text: &str) -> Result<(), AgentError> {
        self.send_status(Status::Init, text, token).await
    }

    /// Free-form log line.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    pub async fn general(&mut self, token: &Token, text: &str) -> Result<(), AgentError> {
        self.send_status(Status::General, text, token).await
    }

    /// Report for the audit log.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    pub async fn report(&mut self, token: &Token, text: &str) -> Result<(), AgentError> {
        self.send_status(Status::ChaosReport, text, token).await
    }

    /// Agent-side failure, also recorded in the audit log.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    pub async fn error(&mut self, token: &Token, text: &str) -> Result<(), AgentError> {
        self.send_status(Status::Error, text, token).await
    }

    /// Record `value` under `key` in the monitor's variable store.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if `key` contains a comma, otherwise see
    /// [`Reporter::send`].
    pub async fn variable(&mut self, token: &Token, key: &str, value: &str) -> Result<(), AgentError> {
        if key.contains(',') {
            return Err(AgentError::Config(format!("variable key {key:?} contains a comma")));
        }
        self.send_status(Status::Variable, &format!("{key},{value}"), token).await
    }

    /// Retire `token`.
    ///
    /// # Errors
    ///
    /// See [`Reporter::send`].
    pub async fn complete(&mut self, token: &Token) -> Result<(), AgentError> {
        self.send_status(Status::OperationComplete, "", token).await
    }

    /// Close the write side of the stream.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Io`] if the shutdown fails.
    pub async fn shutdown(mut self) -> Result<(), AgentError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Recover the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use havoc_proto::SessionKeypair;

    use super::*;
    use crate::env::SystemEnv;

    #[test]
    fn minted_tokens_are_unique_hex() {
        let a = mint_token(&SystemEnv);
        let b = mint_token(&SystemEnv);
        assert_eq!(a.as_str().len(), TOKEN_BYTES * 2);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn config_round_trips_through_env_vars() {
        let keys = SessionKeypair::from_secret_bytes([3u8; 32]);
        let config = AgentConfig {
            monitor_host: "10.0.0.5".to_string(),
            port: 41234,
            public_key: keys.public_key().clone(),
        };

        let [(_, host), (_, port), (_, key)] = config.env_vars();
        let parsed = AgentConfig::from_parts(&host, &port, &key).expect("valid parts");
        assert_eq!(parsed, config);
        assert_eq!(parsed.address(), "10.0.0.5:41234");
    }

    #[test]
    fn ipv6_address_is_bracketed() {
        let keys = SessionKeypair::from_secret_bytes([3u8; 32]);
        let config = AgentConfig {
            monitor_host: "::1".to_string(),
            port: 9000,
            public_key: keys.public_key().clone(),
        };
        assert_eq!(config.address(), "[::1]:9000");
    }

    #[test]
    fn invalid_parts_rejected() {
        let key = SessionKeypair::from_secret_bytes([3u8; 32]).public_key_base64();
        assert!(matches!(AgentConfig::from_parts("", "1", &key), Err(AgentError::Config(_))));
        assert!(matches!(AgentConfig::from_parts("h", "0", &key), Err(AgentError::Config(_))));
        assert!(matches!(AgentConfig::from_parts("h", "70000", &key), Err(AgentError::Config(_))));
        assert!(matches!(AgentConfig::from_parts("h", "1", "short"), Err(AgentError::Envelope(_))));
    }

    #[tokio::test]
    async fn reporter_output_opens_with_session_key() {
        let keys = SessionKeypair::from_secret_bytes([5u8; 32]);
        let token = Token::new("abcd");

        let mut reporter = Reporter::new(Vec::new(), keys.public_key().clone());
        reporter.init(&token, "starting").await.expect("init");
        reporter.variable(&token, "files", "/etc/a,b").await.expect("variable");
        let wire = reporter.into_inner();

        let mut reader = wire.as_slice();
        let first = codec::read_frame(&mut reader).await.expect("read").expect("frame");
        let second = codec::read_frame(&mut reader).await.expect("read").expect("frame");

        let init = ChaosMessage::from_json(&keys.open(&first.payload).expect("open")).expect("json");
        assert_eq!(init.status, Status::Init);
        assert_eq!(init.token, token);

        let var = ChaosMessage::from_json(&keys.open(&second.payload).expect("open")).expect("json");
        assert_eq!(var.variable(), Some(("files", "/etc/a,b")));
    }

    #[tokio::test]
    async fn comma_in_variable_key_rejected() {
        let keys = SessionKeypair::from_secret_bytes([5u8; 32]);
        let mut reporter = Reporter::new(Vec::new(), keys.public_key().clone());
        let result = reporter.variable(&Token::new("t"), "a,b", "v").await;
        assert!(matches!(result, Err(AgentError::Config(_))));
        assert!(reporter.into_inner().is_empty());
    }
}
