//! Length-prefixed frames.
//!
//! A `Frame` is the transport-layer packet consisting of:
//! - 4-byte Big Endian payload length
//! - Variable-length raw bytes (the envelope text)
//!
//! This is a pure data holder. The async read/write path lives in
//! `havoc-core::codec`; this module owns the layout and the length rules so
//! both paths (and the fuzzer) agree on them.

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Complete protocol frame (transport layer)
///
/// Layout on the wire:
/// `[length: u32 BE] + [payload: length bytes]`
///
/// # Invariants
///
/// - **Non-empty**: a frame never carries zero payload bytes.
/// - **Size Limit**: `payload.len()` MUST NOT exceed
///   [`Frame::MAX_PAYLOAD_SIZE`] (4 MiB). Violations are rejected during
///   encoding and decoding.
///
/// # Security
///
/// This struct provides **structural validity** only. It does **NOT**
/// guarantee that the payload is a valid envelope or that it was produced by
/// a legitimate agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw payload bytes (base64 envelope text)
    pub payload: Bytes,
}

impl Frame {
    /// Size of the length prefix in bytes
    pub const PREFIX_SIZE: usize = 4;

    /// Maximum payload size (4 MiB)
    pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

    /// Create a new frame around `payload`.
    ///
    /// No validation happens here; oversized or empty frames are rejected by
    /// [`Frame::encode`]. This keeps test construction unrestricted.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self { payload: payload.into() }
    }

    /// Validate a length prefix and return the payload size it announces.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::EmptyFrame`] if the length is zero
    /// - [`ProtocolError::FrameTooLarge`] if the length exceeds
    ///   [`Frame::MAX_PAYLOAD_SIZE`]
    pub fn parse_prefix(prefix: [u8; Self::PREFIX_SIZE]) -> Result<usize> {
        let len = u32::from_be_bytes(prefix);
        Self::check_len(len as usize)?;
        Ok(len as usize)
    }

    fn check_len(len: usize) -> Result<()> {
        if len == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if len > Self::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }
        Ok(())
    }

    /// Length prefix for this frame's payload.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Frame::encode`].
    pub fn prefix(&self) -> Result<[u8; Self::PREFIX_SIZE]> {
        Self::check_len(self.payload.len())?;

        #[allow(clippy::cast_possible_truncation)]
        let len = self.payload.len() as u32;
        Ok(len.to_be_bytes())
    }

    /// Total encoded size (prefix + payload)
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::PREFIX_SIZE + self.payload.len()
    }

    /// Encode frame into buffer
    ///
    /// Writes: `[length (4 bytes)] + [payload (variable)]`
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EmptyFrame`] for an empty payload and
    /// [`ProtocolError::FrameTooLarge`] if the payload exceeds
    /// [`Frame::MAX_PAYLOAD_SIZE`].
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let prefix = self.prefix()?;

        dst.put_slice(&prefix);
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode frame from wire format
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Fewer than 4 bytes are available
    /// - The length prefix is zero or too large
    /// - Payload is truncated (fewer bytes than the prefix claims)
    ///
    /// # Security
    ///
    /// - **Fail Fast**: the length is validated before the payload is copied.
    /// - **Exact Size**: only `length` bytes are read; trailing data is
    ///   ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::PREFIX_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: Self::PREFIX_SIZE,
                actual: bytes.len(),
            });
        }

        let mut prefix = [0u8; Self::PREFIX_SIZE];
        prefix.copy_from_slice(&bytes[..Self::PREFIX_SIZE]);

        let payload_size = Self::parse_prefix(prefix)?;
        let total_size = Self::PREFIX_SIZE + payload_size;

        if bytes.len() < total_size {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_size,
                actual: bytes.len() - Self::PREFIX_SIZE,
            });
        }

        Ok(Self { payload: Bytes::copy_from_slice(&bytes[Self::PREFIX_SIZE..total_size]) })
    }
}
