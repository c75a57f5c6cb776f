//! Run configuration types.

use crate::error::{LoadError, Result};
use serde::Serialize;
use std::time::Duration;

/// User agent sent on HTTP requests.
pub const USER_AGENT: &str = concat!("git-load-tester/", env!("CARGO_PKG_VERSION"));

/// Bounds on how long a session may wait at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeouts {
    /// Connection establishment (TCP, TLS, SSH handshake and auth).
    pub connect: Duration,
    /// Any single read or write without progress.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            idle: Duration::from_secs(60),
        }
    }
}

/// Configuration for one load run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Total number of clones.
    pub count: usize,
    /// Maximum clones in flight.
    pub concurrency: usize,
    /// Log each result as it arrives.
    pub verbose: bool,
    /// Suspension point bounds.
    pub timeouts: Timeouts,
    /// HTTP user agent.
    pub user_agent: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            count: 100,
            concurrency: 10,
            verbose: false,
            timeouts: Timeouts::default(),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl RunConfig {
    /// Rejects settings no run can start with.
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(LoadError::Configuration(
                "count must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(LoadError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeouts.connect.is_zero() || self.timeouts.idle.is_zero() {
            return Err(LoadError::Configuration(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert_eq!(config.count, 100);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.timeouts.connect, Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = RunConfig {
            count: 0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(LoadError::Configuration(_))));

        let config = RunConfig {
            concurrency: 0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(LoadError::Configuration(_))));

        let config = RunConfig {
            timeouts: Timeouts {
                idle: Duration::ZERO,
                ..Timeouts::default()
            },
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
