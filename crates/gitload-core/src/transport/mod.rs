//! Transports that carry the upload-pack exchange.
//!
//! Smart HTTP and SSH look different on the wire but both reduce to the same
//! shape: connect, read an advertisement, send one request, read one
//! response. Implementations provide raw byte movement; the provided methods
//! run the pkt-line codec over it so both transports decode identically.

mod https;
mod ssh;

pub use https::HttpsTransport;
pub use ssh::SshTransport;

use crate::config::Timeouts;
use crate::credentials::CredentialProvider;
use crate::error::{LoadError, Result};
use crate::remote::RemoteUrl;
use async_trait::async_trait;
use bytes::Bytes;
use gitload_protocol::{
    AdvertisementParser, NegotiationRequest, PackSink, PackStreamStats, PktLineDecoder,
    RefAdvertisement, SinkStatus,
};
use std::sync::Arc;
use std::time::Duration;

/// Byte movement for one clone.
///
/// A transport is owned by exactly one session and is closed when the
/// session ends, whatever the outcome.
#[async_trait]
pub trait Transport: Send {
    /// Connects and starts the advertisement response.
    async fn open(&mut self) -> Result<()>;

    /// Returns the next chunk of the current response, `None` at its end.
    async fn read_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Sends an encoded request; later reads return its response.
    async fn write_request(&mut self, request: Bytes) -> Result<()>;

    /// Releases the connection. Safe to call in any state.
    async fn close(&mut self) -> Result<()>;

    /// Reads one chunk, failing with `Timeout` if none arrives within `idle`.
    async fn read_chunk_within(&mut self, idle: Duration) -> Result<Option<Bytes>> {
        tokio::time::timeout(idle, self.read_chunk())
            .await
            .map_err(|_| LoadError::Timeout(format!("no data received for {idle:?}")))?
    }

    /// Reads and parses the ref advertisement, stopping at its terminating
    /// flush.
    async fn read_advertisement(&mut self, idle: Duration) -> Result<RefAdvertisement> {
        let mut decoder = PktLineDecoder::new();
        let mut parser = AdvertisementParser::new();

        loop {
            while let Some(pkt) = decoder.next_pkt()? {
                if parser.push(pkt)? {
                    return Ok(parser.finish()?);
                }
            }
            match self.read_chunk_within(idle).await? {
                Some(chunk) => decoder.feed(&chunk),
                None => {
                    decoder.finish()?;
                    return Ok(parser.finish()?);
                }
            }
        }
    }

    /// Encodes and sends a negotiation request.
    async fn send_request(&mut self, request: &NegotiationRequest) -> Result<()> {
        let encoded = request.encode()?;
        self.write_request(encoded).await
    }

    /// Streams the pack response through `sink`, calling `on_progress` with
    /// the running pack byte count after every chunk.
    async fn stream_response(
        &mut self,
        sink: &mut PackSink,
        idle: Duration,
        on_progress: &mut (dyn FnMut(u64) + Send),
    ) -> Result<PackStreamStats> {
        loop {
            match self.read_chunk_within(idle).await? {
                Some(chunk) => {
                    let status = sink.feed(&chunk)?;
                    on_progress(sink.pack_bytes());
                    if status == SinkStatus::Finished {
                        return Ok(sink.finish()?);
                    }
                }
                None => return Ok(sink.finish()?),
            }
        }
    }
}

/// Creates a fresh transport for each clone.
pub trait TransportFactory: Send + Sync {
    /// Returns a new, unconnected transport for clone `index`.
    fn create(&self, index: usize) -> Box<dyn Transport>;
}

/// Picks HTTPS or SSH from the repository URL.
pub struct RemoteTransportFactory {
    remote: RemoteUrl,
    timeouts: Timeouts,
    user_agent: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl RemoteTransportFactory {
    /// Creates a factory for `remote`.
    pub fn new(
        remote: RemoteUrl,
        timeouts: Timeouts,
        user_agent: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            remote,
            timeouts,
            user_agent: user_agent.into(),
            credentials,
        }
    }
}

impl TransportFactory for RemoteTransportFactory {
    fn create(&self, _index: usize) -> Box<dyn Transport> {
        match &self.remote {
            RemoteUrl::Https(url) => Box::new(HttpsTransport::new(
                url.clone(),
                self.timeouts,
                self.user_agent.clone(),
            )),
            RemoteUrl::Ssh(target) => Box::new(SshTransport::new(
                target.clone(),
                Arc::clone(&self.credentials),
                self.timeouts,
            )),
        }
    }
}
