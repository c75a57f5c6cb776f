//! SSH credential discovery.
//!
//! Sessions ask a [`CredentialProvider`] for an ordered list of identities and
//! try them one after another until the server accepts one.

use async_trait::async_trait;
use russh::keys::PublicKey;
use std::path::{Path, PathBuf};

/// Key files tried after agent identities, in priority order.
pub const DEFAULT_KEY_FILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

/// One credential to offer the server.
#[derive(Debug, Clone)]
pub enum Identity {
    /// A key held by the running SSH agent.
    Agent(PublicKey),
    /// A private key file on disk.
    KeyFile(PathBuf),
}

impl Identity {
    /// Short human readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Agent(key) => format!("agent key {}", key.algorithm()),
            Self::KeyFile(path) => format!("key file {}", path.display()),
        }
    }
}

/// Supplies SSH identities in the order they should be tried.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Returns the identities to try, highest priority first.
    async fn identities(&self) -> Vec<Identity>;
}

/// A fixed identity list.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Vec<Identity>);

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn identities(&self) -> Vec<Identity> {
        self.0.clone()
    }
}

/// Agent identities first, then the default key files under `~/.ssh`.
#[derive(Debug, Clone)]
pub struct StandardCredentials {
    ssh_dir: Option<PathBuf>,
    use_agent: bool,
}

impl StandardCredentials {
    /// Uses the agent from `SSH_AUTH_SOCK` and keys from `~/.ssh`.
    pub fn new() -> Self {
        Self {
            ssh_dir: dirs::home_dir().map(|home| home.join(".ssh")),
            use_agent: true,
        }
    }

    /// Looks for key files in `dir` instead of `~/.ssh`.
    pub fn with_ssh_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ssh_dir = Some(dir.into());
        self
    }

    /// Skips the SSH agent.
    pub fn without_agent(mut self) -> Self {
        self.use_agent = false;
        self
    }

    fn key_files(dir: &Path) -> Vec<Identity> {
        DEFAULT_KEY_FILES
            .iter()
            .map(|name| dir.join(name))
            .filter(|path| path.is_file())
            .map(Identity::KeyFile)
            .collect()
    }
}

impl Default for StandardCredentials {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialProvider for StandardCredentials {
    async fn identities(&self) -> Vec<Identity> {
        let mut identities = Vec::new();

        if self.use_agent {
            identities.extend(agent_identities().await);
        }
        if let Some(dir) = &self.ssh_dir {
            identities.extend(Self::key_files(dir));
        }

        tracing::debug!(count = identities.len(), "discovered SSH identities");
        identities
    }
}

#[cfg(unix)]
async fn agent_identities() -> Vec<Identity> {
    use russh::keys::agent::client::AgentClient;

    if std::env::var_os("SSH_AUTH_SOCK").is_none() {
        return Vec::new();
    }
    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::debug!(error = %e, "SSH agent unavailable");
            return Vec::new();
        }
    };
    match agent.request_identities().await {
        Ok(keys) => keys.into_iter().map(Identity::Agent).collect(),
        Err(e) => {
            tracing::debug!(error = %e, "SSH agent refused to list identities");
            Vec::new()
        }
    }
}

#[cfg(not(unix))]
async fn agent_identities() -> Vec<Identity> {
    Vec::new()
}
