//! Master configuration, loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::session::LeaseConfig;

/// Runtime configuration of the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Address the request listener binds to.
    pub bind_addr: SocketAddr,
    /// Lease length granted by each contact, in milliseconds.
    pub lease_interval_ms: u64,
    /// Jeopardy grace period after a lease lapses, in milliseconds.
    pub grace_period_ms: u64,
    /// How often the lease reaper runs, in milliseconds.
    pub reaper_interval_ms: u64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 38040)),
            lease_interval_ms: 12_000,
            grace_period_ms: 30_000,
            reaper_interval_ms: 1_000,
            max_frame_len: 4 * 1024 * 1024,
        }
    }
}

impl MasterConfig {
    /// Loads a config file, choosing the format by extension.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: MasterConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the master cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lease_interval_ms == 0 || self.grace_period_ms == 0 || self.reaper_interval_ms == 0 {
            anyhow::bail!("lease, grace and reaper intervals must be non-zero");
        }
        if self.max_frame_len == 0 {
            anyhow::bail!("max_frame_len must be non-zero");
        }
        Ok(())
    }

    /// Lease timing for the session table.
    pub fn lease(&self) -> LeaseConfig {
        LeaseConfig {
            lease_interval: Duration::from_millis(self.lease_interval_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }

    /// Lease reaper period.
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }
}
