//! Multiplexed frame envelope.
//!
//! While a transfer is in progress, every byte on the stream travels inside a
//! tagged frame: a 4-byte little-endian header whose top byte is
//! `MPLEX_BASE + code` and whose low 24 bits hold the payload length. Frames
//! tagged [`MessageCode::Data`] merge into the application stream; all other
//! tags carry out-of-band messages.

use thiserror::Error;

/// Offset added to the message code in the frame header's tag byte.
pub const MPLEX_BASE: u8 = 7;

/// Length in bytes of the encoded frame header.
pub const HEADER_LEN: usize = 4;

/// Largest payload a single frame can carry (24-bit length field).
pub const MAX_PAYLOAD_LENGTH: u32 = 0x00ff_ffff;

const PAYLOAD_MASK: u32 = MAX_PAYLOAD_LENGTH;

/// Tags used for multiplexed frames.
///
/// The numeric values mirror the reference implementation's message codes so
/// the streams interoperate byte for byte. Only the codes the sender speaks
/// or understands are defined here.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum MessageCode {
    /// Application bytes of the transfer itself.
    Data = 0,
    /// Fatal transfer error reported by the peer.
    ErrorXfer = 1,
    /// Informational log message.
    Info = 2,
    /// Non-fatal error message.
    Error = 3,
    /// Warning message.
    Warning = 4,
    /// Message destined for the daemon log only.
    Log = 6,
    /// Accumulated I/O error bits from one side's source or target tree.
    IoError = 22,
    /// Sender failed to open a requested file; the index follows as payload.
    NoSend = 102,
}

impl MessageCode {
    /// Returns the numeric representation expected on the wire.
    #[must_use]
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to construct a [`MessageCode`] from its wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::ErrorXfer),
            2 => Some(Self::Info),
            3 => Some(Self::Error),
            4 => Some(Self::Warning),
            6 => Some(Self::Log),
            22 => Some(Self::IoError),
            102 => Some(Self::NoSend),
            _ => None,
        }
    }

    /// Reports whether the payload is human-readable logging text.
    #[must_use]
    pub const fn is_logging(self) -> bool {
        matches!(
            self,
            Self::ErrorXfer | Self::Info | Self::Error | Self::Warning | Self::Log
        )
    }
}

/// Errors produced while encoding or decoding a frame header.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum EnvelopeError {
    /// The payload length does not fit the 24-bit length field.
    #[error("frame payload of {0} bytes exceeds the 24-bit length limit")]
    OversizedPayload(u32),
    /// Fewer than [`HEADER_LEN`] bytes were available.
    #[error("truncated frame header ({actual} of {HEADER_LEN} bytes)")]
    TruncatedHeader {
        /// Number of bytes actually available.
        actual: usize,
    },
    /// The tag byte is below [`MPLEX_BASE`].
    #[error("invalid frame tag {0:#04x}")]
    InvalidTag(u8),
    /// The tag byte maps to no known message code.
    #[error("unknown multiplexed message code {0}")]
    UnknownMessageCode(u8),
}

/// A decoded frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    code: MessageCode,
    payload_len: u32,
}

impl MessageHeader {
    /// Creates a header for `code` with the provided payload length.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::OversizedPayload`] when the length exceeds
    /// the 24-bit limit.
    pub const fn new(code: MessageCode, payload_len: u32) -> Result<Self, EnvelopeError> {
        if payload_len > MAX_PAYLOAD_LENGTH {
            return Err(EnvelopeError::OversizedPayload(payload_len));
        }
        Ok(Self { code, payload_len })
    }

    /// Parses a header from the beginning of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::TruncatedHeader`] on short input and the
    /// tag-validation errors of [`from_raw`](Self::from_raw) otherwise.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < HEADER_LEN {
            return Err(EnvelopeError::TruncatedHeader { actual: bytes.len() });
        }
        let mut encoded = [0u8; HEADER_LEN];
        encoded.copy_from_slice(&bytes[..HEADER_LEN]);
        Self::from_raw(u32::from_le_bytes(encoded))
    }

    /// Constructs a header from the raw 32-bit wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::InvalidTag`] for tags below [`MPLEX_BASE`]
    /// and [`EnvelopeError::UnknownMessageCode`] for unmapped codes.
    pub const fn from_raw(raw: u32) -> Result<Self, EnvelopeError> {
        let tag = (raw >> 24) as u8;
        if tag < MPLEX_BASE {
            return Err(EnvelopeError::InvalidTag(tag));
        }
        match MessageCode::from_u8(tag - MPLEX_BASE) {
            Some(code) => Self::new(code, raw & PAYLOAD_MASK),
            None => Err(EnvelopeError::UnknownMessageCode(tag - MPLEX_BASE)),
        }
    }

    /// Encodes this header into the little-endian wire format.
    #[must_use]
    pub const fn encode(self) -> [u8; HEADER_LEN] {
        let tag = (MPLEX_BASE as u32) + (self.code as u32);
        ((tag << 24) | (self.payload_len & PAYLOAD_MASK)).to_le_bytes()
    }

    /// Returns the decoded message code.
    #[must_use]
    #[inline]
    pub const fn code(self) -> MessageCode {
        self.code
    }

    /// Returns the payload length encoded in the header.
    #[must_use]
    #[inline]
    pub const fn payload_len(self) -> u32 {
        self.payload_len
    }
}
