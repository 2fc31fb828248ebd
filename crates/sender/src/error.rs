//! Error types of the sender core.
//!
//! Transport failures and peer protocol violations are fatal and unwind the
//! session. Per-file local I/O failures are not represented here: they are
//! recovered inline (the entry is purged and a `NO_SEND` message sent) and
//! only surface through the accumulated io-error bits and the run's success
//! flag.

use std::io;

use thiserror::Error;

/// Fatal failures of the duplex channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed the stream before the requested bytes arrived.
    #[error("unexpected end of stream from peer")]
    Eof,
    /// The transport failed.
    #[error("channel I/O error: {0}")]
    Io(#[source] io::Error),
    /// The peer sent bytes that do not parse as a valid frame or message.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Eof
        } else {
            Self::Io(err)
        }
    }
}

/// Fatal failures of a sender run.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The peer sent syntactically or semantically invalid data.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The underlying channel failed.
    #[error(transparent)]
    Channel(ChannelError),
    /// An encoded user name cannot be represented on the wire.
    #[error("user name for uid {uid} is {len} bytes, exceeding the wire limit of 255")]
    UserNameTooLong {
        /// The uid whose name overflowed.
        uid: u32,
        /// The encoded name length.
        len: usize,
    },
    /// The host signalled cooperative cancellation.
    #[error("transfer interrupted")]
    Interrupted,
}

impl From<ChannelError> for SenderError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Protocol(message) => Self::Protocol(message),
            other => Self::Channel(other),
        }
    }
}
