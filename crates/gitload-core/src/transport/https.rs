//! Smart HTTP transport.
//!
//! `GET <repo>/info/refs?service=git-upload-pack` yields the advertisement,
//! `POST <repo>/git-upload-pack` carries the request and returns the pack.
//! Every transport builds its own client, so each clone pays for one cold
//! connection that both requests share and nothing outlives the clone.
//! See: https://git-scm.com/docs/http-protocol

use super::Transport;
use crate::config::Timeouts;
use crate::error::{LoadError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use url::Url;

const ADVERTISEMENT_CONTENT_TYPE: &str = "application/x-git-upload-pack-advertisement";
const REQUEST_CONTENT_TYPE: &str = "application/x-git-upload-pack-request";
const RESULT_CONTENT_TYPE: &str = "application/x-git-upload-pack-result";

/// HTTPS transport for one clone.
pub struct HttpsTransport {
    repo: Url,
    timeouts: Timeouts,
    user_agent: String,
    client: Option<Client>,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
}

impl HttpsTransport {
    /// Creates an unconnected transport for the repository at `repo`.
    pub fn new(repo: Url, timeouts: Timeouts, user_agent: impl Into<String>) -> Self {
        Self {
            repo,
            timeouts,
            user_agent: user_agent.into(),
            client: None,
            body: None,
        }
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/{suffix}", self.repo.as_str().trim_end_matches('/'))
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| LoadError::Transport("transport is not open".to_string()))
    }

    /// Sends a request, waiting at most the idle bound for response headers.
    async fn execute(request: RequestBuilder, idle: Duration, what: &str) -> Result<Response> {
        let response = tokio::time::timeout(idle, request.send())
            .await
            .map_err(|_| LoadError::Timeout(format!("{what}: no response headers")))??;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Transport(format!("{what} returned HTTP {status}")));
        }
        Ok(response)
    }

    async fn drain(
        mut body: BoxStream<'static, reqwest::Result<Bytes>>,
        idle: Duration,
    ) -> Result<()> {
        loop {
            let next = tokio::time::timeout(idle, body.next())
                .await
                .map_err(|_| LoadError::Timeout("advertisement body not finished".to_string()))?;
            match next {
                Some(chunk) => {
                    chunk?;
                }
                None => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpsTransport {
    async fn open(&mut self) -> Result<()> {
        let client = Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(self.timeouts.connect)
            .build()?;
        self.client = Some(client);

        let url = self.endpoint("info/refs?service=git-upload-pack");
        tracing::debug!(url = %url, "fetching ref advertisement");
        let request = self.client()?.get(&url);
        let response = Self::execute(request, self.timeouts.idle, "GET info/refs").await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(ADVERTISEMENT_CONTENT_TYPE) {
            return Err(LoadError::Protocol(format!(
                "server does not speak smart HTTP (content-type {content_type:?})"
            )));
        }

        self.body = Some(response.bytes_stream().boxed());
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| LoadError::Transport("no response in progress".to_string()))?;
        match body.next().await {
            Some(chunk) => Ok(Some(chunk?)),
            None => Ok(None),
        }
    }

    async fn write_request(&mut self, request: Bytes) -> Result<()> {
        // The connection goes back to the client's pool only once the
        // advertisement body has been read to its end.
        if let Some(rest) = self.body.take() {
            Self::drain(rest, self.timeouts.idle).await?;
        }

        let url = self.endpoint("git-upload-pack");
        tracing::debug!(url = %url, bytes = request.len(), "posting upload-pack request");
        let request = self
            .client()?
            .post(&url)
            .header(CONTENT_TYPE, REQUEST_CONTENT_TYPE)
            .header(ACCEPT, RESULT_CONTENT_TYPE)
            .body(request);
        let response = Self::execute(request, self.timeouts.idle, "POST git-upload-pack").await?;

        self.body = Some(response.bytes_stream().boxed());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.body = None;
        self.client = None;
        Ok(())
    }
}
