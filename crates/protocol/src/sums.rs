//! Per-file checksum header.
//!
//! Before requesting a file, the peer transmits four little-endian 32-bit
//! integers describing the block checksums that follow: the chunk count, the
//! block length, the strong-digest length, and the length of the final short
//! block (the remainder). A block length of zero announces that the peer has
//! no basis file and the whole content must be streamed.

use thiserror::Error;

/// Longest strong digest the protocol can carry per block (full MD5).
pub const MAX_DIGEST_LENGTH: u32 = 16;

/// Error produced when a received checksum header is out of range.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SumHeaderError {
    /// One of the four fields was negative.
    #[error("checksum header field {field} is negative ({value})")]
    NegativeField {
        /// Name of the offending field.
        field: &'static str,
        /// The received value.
        value: i32,
    },
    /// The digest length exceeds a full MD5 digest.
    #[error("checksum digest length {0} exceeds {MAX_DIGEST_LENGTH}")]
    OversizedDigest(u32),
    /// The remainder is not smaller than the block length.
    #[error("checksum remainder {remainder} not below block length {block_length}")]
    OversizedRemainder {
        /// The received remainder.
        remainder: u32,
        /// The received block length.
        block_length: u32,
    },
}

/// The four-field checksum header preceding each file's block checksums.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SumHeader {
    /// Number of `(weak, strong)` pairs that follow.
    pub chunk_count: u32,
    /// Length of every block except possibly the last.
    pub block_length: u32,
    /// Number of strong-digest bytes sent per block and for the whole file.
    pub digest_length: u32,
    /// Length of the final short block, or zero.
    pub remainder: u32,
}

impl SumHeader {
    /// Validates the four raw wire integers into a header.
    ///
    /// # Errors
    ///
    /// Returns a [`SumHeaderError`] describing the first out-of-range field.
    pub fn from_wire(
        chunk_count: i32,
        block_length: i32,
        digest_length: i32,
        remainder: i32,
    ) -> Result<Self, SumHeaderError> {
        let field = |name: &'static str, value: i32| -> Result<u32, SumHeaderError> {
            u32::try_from(value).map_err(|_| SumHeaderError::NegativeField { field: name, value })
        };

        let header = Self {
            chunk_count: field("chunk_count", chunk_count)?,
            block_length: field("block_length", block_length)?,
            digest_length: field("digest_length", digest_length)?,
            remainder: field("remainder", remainder)?,
        };

        if header.digest_length > MAX_DIGEST_LENGTH {
            return Err(SumHeaderError::OversizedDigest(header.digest_length));
        }
        if header.remainder >= header.block_length && header.remainder != 0 {
            return Err(SumHeaderError::OversizedRemainder {
                remainder: header.remainder,
                block_length: header.block_length,
            });
        }

        Ok(header)
    }

    /// Returns the header fields in wire order.
    #[must_use]
    pub const fn to_wire(self) -> [i32; 4] {
        [
            self.chunk_count as i32,
            self.block_length as i32,
            self.digest_length as i32,
            self.remainder as i32,
        ]
    }

    /// Reports whether the peer holds no basis file for this transfer.
    #[must_use]
    pub const fn is_whole_file(&self) -> bool {
        self.block_length == 0
    }

    /// Length of the block at `index`, accounting for the short final block.
    #[must_use]
    pub const fn chunk_length(&self, index: u32) -> u32 {
        if self.remainder > 0 && index == self.chunk_count - 1 {
            self.remainder
        } else {
            self.block_length
        }
    }

    /// The smallest block length present, the lower bound for the sliding
    /// window during matching.
    #[must_use]
    pub const fn smallest_chunk_size(&self) -> u32 {
        if self.remainder > 0 {
            self.remainder
        } else {
            self.block_length
        }
    }
}
