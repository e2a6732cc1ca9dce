//! Sealed envelopes.
//!
//! Payloads are encrypted with anonymous sealed boxes (X25519 +
//! XSalsa20-Poly1305, libsodium `crypto_box_seal` layout). The sender needs
//! only the recipient public key: each seal uses a fresh ephemeral keypair
//! whose public half is prepended to the ciphertext.
//!
//! On the wire an envelope is the base64 text of the sealed ciphertext,
//! optionally newline-terminated. [`SessionKeypair::open`] trims surrounding
//! whitespace before decoding.
//!
//! # Key Lifetime
//!
//! A [`SessionKeypair`] lives for exactly one deployment cycle. The public half
//! is embedded in the deployed agent; the secret half never leaves the monitor
//! process and is never logged (`Debug` is redacted).

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
pub use crypto_box::PublicKey;
use crypto_box::{SecretKey, aead::rand_core::CryptoRngCore};

use crate::errors::EnvelopeError;

/// Size of public and secret keys in bytes
pub const KEY_SIZE: usize = 32;

/// Per-session X25519 keypair.
pub struct SessionKeypair {
    public: PublicKey,
    secret: SecretKey,
}

impl SessionKeypair {
    /// Generate a fresh keypair from a cryptographically secure RNG.
    pub fn generate(rng: &mut impl CryptoRngCore) -> Self {
        Self::from_secret(SecretKey::generate(rng))
    }

    /// Build a keypair from 32 secret bytes.
    ///
    /// Used by drivers that source entropy from an `Environment` (seeded in
    /// simulation, OS entropy in production).
    #[must_use]
    pub fn from_secret_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self::from_secret(SecretKey::from(bytes))
    }

    fn from_secret(secret: SecretKey) -> Self {
        Self { public: secret.public_key(), secret }
    }

    /// Public half, safe to embed in deployed binaries.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Public half as standard base64 (the agent connection string format).
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        public_key_to_base64(&self.public)
    }

    /// Open an envelope addressed to this keypair.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Base64`] if the trimmed text is not base64
    /// - [`EnvelopeError::Open`] if the ciphertext is malformed, was sealed
    ///   for another key, or fails authentication
    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        let ciphertext = STANDARD
            .decode(envelope.trim_ascii())
            .map_err(|e| EnvelopeError::Base64(e.to_string()))?;

        self.open_raw(&ciphertext)
    }

    /// Open raw sealed-box ciphertext (no base64 layer).
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Open`] on any authentication failure.
    pub fn open_raw(&self, ciphertext: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
        self.secret.unseal(ciphertext).map_err(|_| EnvelopeError::Open)
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("public", &self.public_key_base64())
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Seal `plaintext` for `recipient` and return newline-terminated base64 text,
/// ready to be used as a frame payload.
///
/// # Errors
///
/// Returns [`EnvelopeError::Seal`] if the cipher fails.
pub fn seal(
    plaintext: &[u8],
    recipient: &PublicKey,
    rng: &mut impl CryptoRngCore,
) -> Result<Vec<u8>, EnvelopeError> {
    let ciphertext = seal_raw(plaintext, recipient, rng)?;

    let mut text = STANDARD.encode(ciphertext).into_bytes();
    text.push(b'\n');
    Ok(text)
}

/// Seal `plaintext` for `recipient` without the base64 layer.
///
/// # Errors
///
/// Returns [`EnvelopeError::Seal`] if the cipher fails.
pub fn seal_raw(
    plaintext: &[u8],
    recipient: &PublicKey,
    rng: &mut impl CryptoRngCore,
) -> Result<Vec<u8>, EnvelopeError> {
    recipient.seal(rng, plaintext).map_err(|_| EnvelopeError::Seal)
}

/// Encode a public key as standard base64.
#[must_use]
pub fn public_key_to_base64(key: &PublicKey) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Decode a standard base64 public key (surrounding whitespace ignored).
///
/// # Errors
///
/// - [`EnvelopeError::Base64`] if the text is not base64
/// - [`EnvelopeError::InvalidKeyLength`] if it does not decode to 32 bytes
pub fn public_key_from_base64(text: &str) -> Result<PublicKey, EnvelopeError> {
    let raw = STANDARD.decode(text.trim()).map_err(|e| EnvelopeError::Base64(e.to_string()))?;
    let bytes: [u8; KEY_SIZE] =
        raw.as_slice().try_into().map_err(|_| EnvelopeError::InvalidKeyLength(raw.len()))?;
    Ok(PublicKey::from(bytes))
}

#[cfg(test)]
mod tests {
    use crypto_box::aead::OsRng;
    use proptest::prelude::*;

    use super::*;

    fn keypair() -> SessionKeypair {
        SessionKeypair::generate(&mut OsRng)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn envelope_round_trip(plaintext in prop::collection::vec(any::<u8>(), 0..1024)) {
            let keys = keypair();

            let envelope = seal(&plaintext, keys.public_key(), &mut OsRng).expect("seal");
            let opened = keys.open(&envelope).expect("open");

            prop_assert_eq!(opened, plaintext);
        }

        #[test]
        fn single_bit_flip_detected(
            plaintext in prop::collection::vec(any::<u8>(), 1..256),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let keys = keypair();

            let mut ciphertext = seal_raw(&plaintext, keys.public_key(), &mut OsRng).expect("seal");
            let index = position.index(ciphertext.len());
            ciphertext[index] ^= 1 << bit;

            prop_assert_eq!(keys.open_raw(&ciphertext), Err(EnvelopeError::Open));
        }
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let keys = keypair();
        let envelope = seal(b"payload", keys.public_key(), &mut OsRng).expect("seal");
        assert_eq!(envelope.last(), Some(&b'\n'));

        let mut padded = b"  \r\n".to_vec();
        padded.extend_from_slice(&envelope);
        padded.extend_from_slice(b"\r\n\n");

        assert_eq!(keys.open(&padded).expect("open"), b"payload");
    }

    #[test]
    fn wrong_key_cannot_open() {
        let sender_target = keypair();
        let other = keypair();

        let envelope = seal(b"secret", sender_target.public_key(), &mut OsRng).expect("seal");
        assert_eq!(other.open(&envelope), Err(EnvelopeError::Open));
    }

    #[test]
    fn invalid_base64_rejected() {
        let keys = keypair();
        assert!(matches!(keys.open(b"%%% not base64 %%%"), Err(EnvelopeError::Base64(_))));
    }

    #[test]
    fn short_ciphertext_rejected() {
        let keys = keypair();
        assert_eq!(keys.open_raw(&[0u8; 8]), Err(EnvelopeError::Open));
    }

    #[test]
    fn public_key_base64_round_trip() {
        let keys = SessionKeypair::from_secret_bytes([7u8; KEY_SIZE]);
        let text = keys.public_key_base64();

        let decoded = public_key_from_base64(&format!("{text}\n")).expect("valid key");
        assert_eq!(decoded.as_bytes(), keys.public_key().as_bytes());
    }

    #[test]
    fn public_key_wrong_length_rejected() {
        let text = STANDARD.encode([1u8; 31]);
        assert_eq!(public_key_from_base64(&text), Err(EnvelopeError::InvalidKeyLength(31)));
    }

    #[test]
    fn debug_redacts_secret() {
        let keys = SessionKeypair::from_secret_bytes([9u8; KEY_SIZE]);
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(rendered.contains(&keys.public_key_base64()));
    }
}
