//! Runtime configuration.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The operator's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for healthchecks & metrics.
    pub http_port: u16,

    /// The Kubernetes namespace into which all namespaced operands are placed.
    pub namespace: String,
    /// The name of the pod on which this instance is running.
    pub pod_name: String,

    /// The duration in seconds for which a lease is considered held.
    ///
    /// To ensure stable cluster leadership, a 60 second lease is currently recommended.
    pub lease_duration_seconds: u32,
    /// The duration that a lease holder will retry refreshing lease.
    ///
    /// To ensure stable cluster leadership, a 10 seconds renew rate is currently recommended.
    pub lease_renew_seconds: u32,
    /// The interval in seconds at which every SpireServer is reconciled, regardless of events.
    #[serde(default = "Config::default_resync_seconds")]
    pub resync_seconds: u64,

    /// The image of the SPIRE server container.
    #[serde(default = "Config::default_spire_server_image")]
    pub spire_server_image: String,
    /// The image of the SPIRE controller manager container.
    #[serde(default = "Config::default_spire_controller_manager_image")]
    pub spire_controller_manager_image: String,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Self = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the lease timings, a lease must be renewed well before it expires.
    pub fn validate(&self) -> Result<()> {
        if self.lease_renew_seconds == 0 {
            bail!("LEASE_RENEW_SECONDS must be greater than 0");
        }
        if self.lease_duration_seconds <= self.lease_renew_seconds {
            bail!(
                "LEASE_DURATION_SECONDS ({}) must be greater than LEASE_RENEW_SECONDS ({})",
                self.lease_duration_seconds,
                self.lease_renew_seconds
            );
        }
        if self.resync_seconds == 0 {
            bail!("RESYNC_SECONDS must be greater than 0");
        }
        Ok(())
    }

    /// The resync interval as a duration.
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_seconds)
    }

    fn default_resync_seconds() -> u64 {
        300
    }

    fn default_spire_server_image() -> String {
        "ghcr.io/spiffe/spire-server:1.12.4".into()
    }

    fn default_spire_controller_manager_image() -> String {
        "ghcr.io/spiffe/spire-controller-manager:0.6.2".into()
    }
}
