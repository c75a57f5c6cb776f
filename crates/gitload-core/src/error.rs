//! Error types for load runs.

use gitload_protocol::GitError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Errors raised while cloning or setting up a run.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// Malformed frame, advertisement or pack response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server advertised nothing that can be cloned.
    #[error("no usable ref: {0}")]
    NoUsableRef(String),

    /// Invalid run or negotiation input.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Connection, TLS, HTTP status or channel failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Every credential was rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The server reported a fatal error.
    #[error("remote error: {0}")]
    Remote(String),

    /// No progress within the configured bound.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The run was cancelled while the session was in flight.
    #[error("cancelled")]
    Cancelled,

    /// A worker task panicked.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LoadError {
    /// Returns the kind tag for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::NoUsableRef(_) => ErrorKind::NoUsableRef,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Remote(_) => ErrorKind::Remote,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<GitError> for LoadError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::InvalidPktLine(_) | GitError::InvalidAdvertisement(_) => {
                Self::Protocol(err.to_string())
            }
            GitError::NoUsableRef => Self::NoUsableRef(err.to_string()),
            GitError::EmptyWants => Self::Configuration(err.to_string()),
            GitError::Remote(msg) => Self::Remote(msg),
            GitError::Io(e) => Self::Transport(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        let msg = error_chain(&err);
        if err.is_timeout() {
            Self::Timeout(msg)
        } else {
            Self::Transport(msg)
        }
    }
}

impl From<russh::Error> for LoadError {
    fn from(err: russh::Error) -> Self {
        Self::Transport(error_chain(&err))
    }
}

/// Joins an error and its sources, which is where reqwest and hyper keep the
/// useful part of the message.
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

/// Copyable classification of a [`LoadError`], carried by failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Protocol,
    NoUsableRef,
    Configuration,
    Transport,
    Authentication,
    Remote,
    Timeout,
    Cancelled,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Protocol => "protocol",
            Self::NoUsableRef => "no-usable-ref",
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Authentication => "authentication",
            Self::Remote => "remote",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Result type for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;
