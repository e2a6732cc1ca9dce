//! # Havoc Protocol: Wire Format
//!
//! This crate implements the wire layer of the havoc control channel, the
//! link between the monitor and the fault-injection agents it deploys.
//!
//! ## Protocol Design
//!
//! ```text
//! Frame    := uint32_be(length) || payload[length]
//! payload  := base64(seal(json(ChaosMessage), session_public_key)) [+ '\n']
//! length   := 1 ..= 4 MiB
//! ```
//!
//! - **Frame**: a 4-byte Big Endian length prefix followed by exactly that many
//!   bytes. There is no header beyond the length; the monitor never routes on
//!   anything but the decrypted message.
//! - **Envelope**: anonymous sealed-box encryption (X25519 + XSalsa20-Poly1305).
//!   Agents only ever hold the session public key, so a compromised agent
//!   binary can read a public value but cannot forge traffic.
//! - **ChaosMessage**: a small JSON object tagged by [`Status`].
//!
//! ## Security Properties
//!
//! - **Bounded Allocation**: frame lengths are validated before any payload
//!   buffer is allocated. Zero and oversized lengths are rejected.
//! - **Authenticated Payloads**: every envelope carries a Poly1305 tag. A
//!   flipped bit makes [`SessionKeypair::open`] fail rather than return
//!   altered plaintext.
//! - **No Sender Authentication**: the token inside a message is bookkeeping,
//!   not a credential.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod frame;
pub mod message;

pub use envelope::{PublicKey, SessionKeypair, seal};
pub use errors::{EnvelopeError, ProtocolError, Result};
pub use frame::Frame;
pub use message::{ChaosMessage, Status, Token};
