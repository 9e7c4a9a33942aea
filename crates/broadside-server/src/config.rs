//! Server configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::resilience::RetryPolicy;

/// Server configuration, optionally loaded from a YAML file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener
    pub bind_address: SocketAddr,
    /// How long a session that vanished without a close handshake is held for reconnection
    pub grace_period_secs: u64,
    /// Retries for transient read/write failures before the connection is dropped
    pub write_retry_limit: u32,
    /// Linear backoff unit: retry `n` sleeps `n * backoff_factor_ms`
    pub backoff_factor_ms: u64,
    /// Idle read bound; expiry counts as a transient failure
    pub read_timeout_secs: u64,
    /// Session age after which the periodic sweep reaps it
    pub cleanup_interval_secs: u64,
    /// Concurrent session ceiling
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            grace_period_secs: 120,
            write_retry_limit: 2,
            backoff_factor_ms: 1000,
            read_timeout_secs: 300,
            cleanup_interval_secs: 900,
            max_connections: 1024,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn backoff_factor(&self) -> Duration {
        Duration::from_millis(self.backoff_factor_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.write_retry_limit, self.backoff_factor())
    }
}
