//! # Overview
//!
//! Checksum primitives used on the sending side of the delta-transfer
//! protocol: the incrementally updatable weak rolling sum that screens
//! candidate block positions, and the seeded MD5 strong digest that confirms
//! them. Both must match the reference implementation bit for bit, since the
//! values travel over the wire and are recomputed independently by the peer.

pub mod rolling;
pub mod strong;

pub use rolling::RollingChecksum;
pub use strong::{block_digest, ChecksumSeed, Md5};
