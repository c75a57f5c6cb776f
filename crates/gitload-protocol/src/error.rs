//! Git protocol error types.

use thiserror::Error;

/// Errors that can occur while speaking the upload-pack protocol.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line framing.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Malformed ref advertisement.
    #[error("invalid ref advertisement: {0}")]
    InvalidAdvertisement(String),

    /// The advertisement contains no ref that can be cloned.
    #[error("no usable ref in advertisement")]
    NoUsableRef,

    /// A negotiation request was built without any wants.
    #[error("negotiation requires at least one want")]
    EmptyWants,

    /// The server reported a fatal error.
    #[error("remote error: {0}")]
    Remote(String),

    /// I/O error surfaced through [`PktLineCodec`](crate::PktLineCodec) when
    /// it drives a `FramedRead`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
