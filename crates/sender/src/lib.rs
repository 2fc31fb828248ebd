//! # Overview
//!
//! The sending side of the delta-transfer wire protocol: the party that owns
//! the authoritative file set and streams it to a remote receiver holding
//! stale or partial copies. Three subsystems cooperate on a single thread:
//! the streaming file-list pipeline that discovers and serialises entries,
//! the block-matching delta engine that turns each requested file into a
//! minimal stream of literal runs and match tokens, and the multiplexed
//! duplex channel that interleaves protocol bytes with out-of-band messages
//! in both directions.
//!
//! Session negotiation, authentication, and the receiving side are external
//! collaborators; this crate starts from an established transport and a
//! negotiated checksum seed.
//!
//! # Example
//!
//! ```no_run
//! use checksums::ChecksumSeed;
//! use sender::SenderBuilder;
//! use std::net::TcpStream;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("peer:873")?;
//! let seed = ChecksumSeed::new([0u8; 16]);
//! let mut sender = SenderBuilder::new_client(vec!["/srv/data".into()], seed)
//!     .build(stream.try_clone()?, stream);
//! let clean = sender.run()?;
//! println!("transfer ok: {clean}");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod delta;
pub mod driver;
pub mod error;
pub mod fileview;
pub mod sums;

pub use channel::DuplexChannel;
pub use driver::{FileSelection, Sender, SenderBuilder};
pub use error::{ChannelError, SenderError};
pub use fileview::{FileView, FileViewOpenError};
