//! Remote URL classification.
//!
//! `https://` and `http://` URLs use smart HTTP; `ssh://user@host[:port]/path`
//! and scp-like `user@host:path` use SSH.

use crate::error::{LoadError, Result};
use std::fmt;
use url::Url;

/// Default SSH port.
const SSH_PORT: u16 = 22;

/// Transport a URL maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Https,
    Ssh,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Https => write!(f, "HTTPS"),
            Self::Ssh => write!(f, "SSH"),
        }
    }
}

/// Where and as whom to run `git-upload-pack` over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    /// Repository path, always absolute.
    pub path: String,
}

impl SshTarget {
    /// The remote command, with the path single-quoted for the remote shell.
    pub fn upload_pack_command(&self) -> String {
        format!("git-upload-pack '{}'", self.path.replace('\'', r"'\''"))
    }
}

/// A classified repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUrl {
    /// Smart HTTP repository base, normalised to end in `.git`.
    Https(Url),
    Ssh(SshTarget),
}

impl RemoteUrl {
    /// Classifies and parses a repository URL.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.starts_with("ssh://") {
            return Self::parse_ssh_url(input);
        }
        if input.starts_with("https://") || input.starts_with("http://") {
            return Self::parse_http_url(input);
        }
        if !input.contains("://") && input.contains('@') && input.contains(':') {
            return Self::parse_scp_like(input);
        }
        Err(LoadError::Configuration(format!(
            "unsupported repository URL {input:?}"
        )))
    }

    /// Transport this URL selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Https(_) => TransportKind::Https,
            Self::Ssh(_) => TransportKind::Ssh,
        }
    }

    fn parse_http_url(input: &str) -> Result<Self> {
        let mut url = Url::parse(input)
            .map_err(|e| LoadError::Configuration(format!("invalid URL {input:?}: {e}")))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(LoadError::Configuration(format!(
                "URL {input:?} has no host"
            )));
        }

        let mut path = url.path().trim_end_matches('/').to_string();
        if !path.ends_with(".git") {
            path.push_str(".git");
        }
        url.set_path(&path);
        Ok(Self::Https(url))
    }

    fn parse_ssh_url(input: &str) -> Result<Self> {
        let url = Url::parse(input)
            .map_err(|e| LoadError::Configuration(format!("invalid SSH URL {input:?}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| LoadError::Configuration(format!("SSH URL {input:?} has no host")))?;
        if url.username().is_empty() {
            return Err(LoadError::Configuration(format!(
                "SSH URL must contain user@host: {input}"
            )));
        }
        if url.path().len() <= 1 {
            return Err(LoadError::Configuration(format!(
                "SSH URL {input:?} has no repository path"
            )));
        }

        Ok(Self::Ssh(SshTarget {
            user: url.username().to_string(),
            host: host.to_string(),
            port: url.port().unwrap_or(SSH_PORT),
            path: url.path().to_string(),
        }))
    }

    fn parse_scp_like(input: &str) -> Result<Self> {
        let invalid = || LoadError::Configuration(format!("invalid SSH URL {input:?}"));
        let (user_host, path) = input.split_once(':').ok_or_else(invalid)?;
        let (user, host) = user_host.split_once('@').ok_or_else(|| {
            LoadError::Configuration(format!("SSH URL must contain user@host: {input}"))
        })?;
        if user.is_empty() || host.is_empty() || path.is_empty() {
            return Err(invalid());
        }

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        Ok(Self::Ssh(SshTarget {
            user: user.to_string(),
            host: host.to_string(),
            port: SSH_PORT,
            path,
        }))
    }
}

impl fmt::Display for RemoteUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Https(url) => {
                let mut shown = url.clone();
                let _ = shown.set_password(None);
                write!(f, "{shown}")
            }
            Self::Ssh(t) => write!(f, "ssh://{}@{}:{}{}", t.user, t.host, t.port, t.path),
        }
    }
}
