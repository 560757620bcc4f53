//! Crate error type
//!
//! Only configuration and framing problems surface as errors. Anything the
//! stream can recover from (missing tags, late records, sequence gaps) is
//! logged where it happens and never reaches the caller.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("serialized record of {len} bytes exceeds frame limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("unknown transport type: {0}")]
    UnknownTransport(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("channel peer disconnected")]
    Disconnected,

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("zmq: {0}")]
    Zmq(#[from] zmq::Error),

    #[error("record encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedRecord(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}
