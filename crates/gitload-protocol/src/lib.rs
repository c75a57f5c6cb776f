//! Git upload-pack client protocol for the load tester.
//!
//! This crate is the pure half of a clone: pkt-line framing, ref
//! advertisement parsing, want/done request construction and pack stream
//! accounting. It performs no I/O; transports feed it bytes.

mod advertisement;
mod error;
mod negotiation;
mod pktline;
mod sideband;

pub use advertisement::{AdvertisementParser, Capabilities, ObjectId, RefAdvertisement};
pub use error::GitError;
pub use negotiation::{NegotiationRequest, SideBand, AGENT};
pub use pktline::{
    decode_all, PktLine, PktLineCodec, PktLineDecoder, PktLines, HEADER_LEN, MAX_DATA_LEN,
    MAX_PKT_LEN,
};
pub use sideband::{
    PackSink, PackStreamStats, SinkStatus, CHANNEL_ERROR, CHANNEL_PACK, CHANNEL_PROGRESS,
};

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
