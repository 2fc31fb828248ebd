//! # Overview
//!
//! Byte-level building blocks of the delta-transfer wire protocol, shared by
//! the channel and driver layers: the variable-length integer codec, the
//! multiplexed frame envelope, the transmit/item/io-error flag constants, the
//! per-file checksum header, session statistics, and the strict pathname text
//! codec. All integers on the wire are little-endian.

pub mod envelope;
pub mod flags;
pub mod stats;
pub mod sums;
pub mod text;
pub mod varint;

pub use envelope::{EnvelopeError, MessageCode, MessageHeader, HEADER_LEN, MAX_PAYLOAD_LENGTH};
pub use stats::SessionStatistics;
pub use sums::SumHeader;
pub use text::TextCodec;
pub use varint::{read_varint, read_varlong, write_varint, write_varlong};
