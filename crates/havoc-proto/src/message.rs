//! Chaos messages: the JSON application payload carried inside an envelope.
//!
//! ```json
//! {"status": "init", "message": "starting", "token": "9f1c...", "token_check": false}
//! ```
//!
//! `token_check` is receiver-side metadata. Senders may omit it or set it to
//! anything; the monitor overwrites it after looking the token up in the
//! session registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Number of random bytes in a freshly minted token (128 bits).
pub const TOKEN_BYTES: usize = 16;

/// Opaque identifier for one outstanding unit of agent-side work.
///
/// Tokens are minted by agents (hex of [`TOKEN_BYTES`] random bytes) and are
/// never reused. The monitor treats them as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap an existing token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Build a token from raw random bytes (lower-case hex).
    #[must_use]
    pub fn from_random(bytes: [u8; TOKEN_BYTES]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message status tag.
///
/// The six known tags map to explicit variants; anything else is preserved in
/// [`Status::Unknown`] so the receiver can log what it got. Matching on this
/// enum is exhaustive, so adding a tag forces every dispatcher to handle it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Registers a new token
    Init,
    /// Retires a token; the session completes when none remain
    OperationComplete,
    /// Report for the audit log
    ChaosReport,
    /// Agent-side error, also recorded in the audit log
    Error,
    /// Free-form log line
    General,
    /// `key,value` pair for the variable store
    Variable,
    /// Unrecognized tag
    Unknown(String),
}

impl Status {
    /// Wire representation of this status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::OperationComplete => "operation_complete",
            Self::ChaosReport => "chaos_report",
            Self::Error => "error",
            Self::General => "general",
            Self::Variable => "variable",
            Self::Unknown(other) => other,
        }
    }
}

impl From<String> for Status {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "init" => Self::Init,
            "operation_complete" => Self::OperationComplete,
            "chaos_report" => Self::ChaosReport,
            "error" => Self::Error,
            "general" => Self::General,
            "variable" => Self::Variable,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One application message from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaosMessage {
    /// Status tag
    pub status: Status,
    /// Free-form payload; `variable` messages carry `key,value`
    #[serde(default)]
    pub message: String,
    /// Token this message belongs to
    pub token: Token,
    /// Set by the receiver after checking `token` against the registry
    #[serde(default)]
    pub token_check: bool,
}

impl ChaosMessage {
    /// Create a message with `token_check` cleared.
    pub fn new(status: Status, message: impl Into<String>, token: Token) -> Self {
        Self { status, message: message.into(), token, token_check: false }
    }

    /// Parse a decrypted payload.
    ///
    /// Surrounding whitespace (agents commonly newline-terminate) is ignored
    /// by the JSON parser.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidJson`] if the bytes are not a chaos
    /// message.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    /// Serialize to compact JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::JsonEncode`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))
    }

    /// Split a `variable` message into `(key, value)` at the first comma.
    ///
    /// Returns `None` when there is no comma. The value may itself contain
    /// commas.
    #[must_use]
    pub fn variable(&self) -> Option<(&str, &str)> {
        self.message.split_once(',')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> Token {
        Token::from_random([0xab; TOKEN_BYTES])
    }

    #[test]
    fn token_is_lowercase_hex_of_sixteen_bytes() {
        let token = token();
        assert_eq!(token.as_str().len(), 32);
        assert_eq!(token.as_str(), "abababababababababababababababab");
    }

    #[test]
    fn parse_known_statuses() {
        for (tag, status) in [
            ("init", Status::Init),
            ("operation_complete", Status::OperationComplete),
            ("chaos_report", Status::ChaosReport),
            ("error", Status::Error),
            ("general", Status::General),
            ("variable", Status::Variable),
        ] {
            let json = format!(r#"{{"status":"{tag}","message":"m","token":"t"}}"#);
            let msg = ChaosMessage::from_json(json.as_bytes()).expect("valid message");
            assert_eq!(msg.status, status);
            assert_eq!(msg.status.as_str(), tag);
        }
    }

    #[test]
    fn unknown_status_preserved() {
        let msg = ChaosMessage::from_json(br#"{"status":"bogus","message":"","token":"t"}"#)
            .expect("unknown status is still a message");
        assert_eq!(msg.status, Status::Unknown("bogus".to_string()));
        assert_eq!(msg.status.to_string(), "bogus");
    }

    #[test]
    fn token_check_optional_and_message_defaults() {
        let msg = ChaosMessage::from_json(b"{\"status\":\"init\",\"token\":\"t\"}\n")
            .expect("token_check and message may be omitted");
        assert!(!msg.token_check);
        assert!(msg.message.is_empty());
    }

    #[test]
    fn missing_token_rejected() {
        let result = ChaosMessage::from_json(br#"{"status":"init","message":"x"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn garbage_rejected() {
        let result = ChaosMessage::from_json(b"not json");
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn json_shape_matches_wire_protocol() {
        let msg = ChaosMessage::new(Status::OperationComplete, "done", Token::new("00ff"));
        let json = String::from_utf8(msg.to_json().expect("encodes")).expect("utf8");
        assert_eq!(
            json,
            r#"{"status":"operation_complete","message":"done","token":"00ff","token_check":false}"#
        );
    }

    #[test]
    fn variable_splits_on_first_comma() {
        let msg = ChaosMessage::new(Status::Variable, "broken_files,/etc/a,b", token());
        assert_eq!(msg.variable(), Some(("broken_files", "/etc/a,b")));

        let malformed = ChaosMessage::new(Status::Variable, "no-comma", token());
        assert_eq!(malformed.variable(), None);
    }
}
