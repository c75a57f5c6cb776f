//! SSH transport.
//!
//! Runs `git-upload-pack '<path>'` on a fresh session channel. The channel's
//! stdout carries the advertisement, and after the request is written to
//! stdin (followed by EOF), the pack response.

use super::Transport;
use crate::config::Timeouts;
use crate::credentials::{CredentialProvider, Identity};
use crate::error::{LoadError, Result};
use crate::remote::SshTarget;
use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;

/// Extended data stream number for stderr.
const STDERR: u32 = 1;
/// Upper bound on captured remote stderr.
const STDERR_LIMIT: usize = 4096;

/// Accepts any host key; the tool measures servers it was pointed at.
struct LoadClient;

impl client::Handler for LoadClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH transport for one clone.
pub struct SshTransport {
    target: SshTarget,
    credentials: Arc<dyn CredentialProvider>,
    timeouts: Timeouts,
    session: Option<Handle<LoadClient>>,
    channel: Option<Channel<client::Msg>>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl SshTransport {
    /// Creates an unconnected transport for `target`.
    pub fn new(
        target: SshTarget,
        credentials: Arc<dyn CredentialProvider>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            target,
            credentials,
            timeouts,
            session: None,
            channel: None,
            stderr: Vec::new(),
            exit_status: None,
        }
    }

    async fn connect(
        target: &SshTarget,
        credentials: &dyn CredentialProvider,
    ) -> Result<Handle<LoadClient>> {
        let config = Arc::new(client::Config::default());
        let addr = (target.host.as_str(), target.port);
        let mut session = client::connect(config, addr, LoadClient).await?;
        Self::authenticate(&mut session, target, credentials).await?;
        Ok(session)
    }

    async fn authenticate(
        session: &mut Handle<LoadClient>,
        target: &SshTarget,
        credentials: &dyn CredentialProvider,
    ) -> Result<()> {
        let identities = credentials.identities().await;
        if identities.is_empty() {
            return Err(LoadError::Authentication(
                "no SSH identities available".to_string(),
            ));
        }

        let tried = identities.len();
        for identity in identities {
            match Self::try_identity(session, &target.user, &identity).await {
                Ok(true) => {
                    tracing::debug!(identity = %identity.describe(), "authenticated");
                    return Ok(());
                }
                Ok(false) => {
                    tracing::debug!(identity = %identity.describe(), "identity rejected");
                }
                Err(e) => {
                    tracing::debug!(identity = %identity.describe(), error = %e, "identity unusable");
                }
            }
        }

        Err(LoadError::Authentication(format!(
            "all {tried} identities rejected for {}@{}",
            target.user, target.host
        )))
    }

    async fn try_identity(
        session: &mut Handle<LoadClient>,
        user: &str,
        identity: &Identity,
    ) -> Result<bool> {
        let hash_alg = session.best_supported_rsa_hash().await?.flatten();

        match identity {
            Identity::KeyFile(path) => {
                let key = russh::keys::load_secret_key(path, None).map_err(|e| {
                    LoadError::Authentication(format!("{}: {e}", path.display()))
                })?;
                let auth = session
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                    .await?;
                Ok(auth.success())
            }
            Identity::Agent(key) => Self::try_agent(session, user, key.clone(), hash_alg).await,
        }
    }

    #[cfg(unix)]
    async fn try_agent(
        session: &mut Handle<LoadClient>,
        user: &str,
        key: PublicKey,
        hash_alg: Option<russh::keys::HashAlg>,
    ) -> Result<bool> {
        let mut agent = russh::keys::agent::client::AgentClient::connect_env()
            .await
            .map_err(|e| LoadError::Authentication(format!("SSH agent: {e}")))?;
        match session
            .authenticate_publickey_with(user, key, hash_alg, &mut agent)
            .await
        {
            Ok(auth) => Ok(auth.success()),
            Err(e) => Err(LoadError::Authentication(format!("SSH agent signing: {e:?}"))),
        }
    }

    #[cfg(not(unix))]
    async fn try_agent(
        _session: &mut Handle<LoadClient>,
        _user: &str,
        _key: PublicKey,
        _hash_alg: Option<russh::keys::HashAlg>,
    ) -> Result<bool> {
        Ok(false)
    }

    fn channel(&mut self) -> Result<&mut Channel<client::Msg>> {
        self.channel
            .as_mut()
            .ok_or_else(|| LoadError::Transport("transport is not open".to_string()))
    }

    fn capture_stderr(&mut self, data: &[u8]) {
        let room = STDERR_LIMIT.saturating_sub(self.stderr.len());
        self.stderr.extend_from_slice(&data[..data.len().min(room)]);
    }

    fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&mut self) -> Result<()> {
        tracing::debug!(
            host = %self.target.host,
            port = self.target.port,
            user = %self.target.user,
            "opening SSH session"
        );
        let connect = tokio::time::timeout(
            self.timeouts.connect,
            Self::connect(&self.target, self.credentials.as_ref()),
        );
        let session = connect.await.map_err(|_| {
            LoadError::Timeout(format!(
                "SSH connection to {}:{} not established within {:?}",
                self.target.host, self.target.port, self.timeouts.connect
            ))
        })??;

        let command = self.target.upload_pack_command();
        let idle = self.timeouts.idle;
        let session = self.session.insert(session);

        let channel = tokio::time::timeout(idle, session.channel_open_session())
            .await
            .map_err(|_| {
                LoadError::Timeout(format!("session channel not confirmed within {idle:?}"))
            })??;
        tokio::time::timeout(idle, channel.exec(true, command))
            .await
            .map_err(|_| LoadError::Timeout(format!("exec request not sent within {idle:?}")))??;

        self.channel = Some(channel);
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let msg = self.channel()?.wait().await;
            match msg {
                Some(ChannelMsg::Data { ref data }) => {
                    return Ok(Some(Bytes::copy_from_slice(data)));
                }
                Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == STDERR => {
                    self.capture_stderr(data);
                }
                Some(ChannelMsg::Failure) => {
                    return Err(LoadError::Transport(format!(
                        "exec refused: {}",
                        self.target.upload_pack_command()
                    )));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_status = Some(exit_status);
                }
                Some(ChannelMsg::Close) | None => {
                    return match self.exit_status {
                        Some(status) if status != 0 => Err(LoadError::Transport(format!(
                            "git-upload-pack exited with status {status}: {}",
                            self.stderr_text()
                        ))),
                        _ => Ok(None),
                    };
                }
                // EOF is followed by the exit status and close.
                Some(_) => {}
            }
        }
    }

    async fn write_request(&mut self, request: Bytes) -> Result<()> {
        let channel = self.channel()?;
        channel.data(&request[..]).await?;
        channel.eof().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(channel) = self.channel.take() {
            let _ = channel.close().await;
        }
        if let Some(session) = self.session.take() {
            session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await?;
        }
        if !self.stderr.is_empty() {
            tracing::trace!(stderr = %self.stderr_text(), "remote stderr");
        }
        Ok(())
    }
}
