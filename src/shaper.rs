//! Traffic shaping primitives.
//!
//! Degrades a device's network quality (packet loss or added latency) or
//! restores it to normal, through a [`CommandBackend`]. Shaping always
//! replaces the root discipline, so repeated calls are idempotent
//! overwrites, never additive.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::SharedBackend;
use crate::endpoint::NetworkState;
use crate::error::Result;

#[cfg(doc)]
use crate::backend::CommandBackend;

/// The kind of degradation to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapingKind {
    /// Drop a fraction of packets.
    Loss,
    /// Delay packets.
    Delay,
}

impl ShapingKind {
    /// The netem token this kind maps to.
    pub fn token(self) -> &'static str {
        match self {
            ShapingKind::Loss => "loss",
            ShapingKind::Delay => "delay",
        }
    }
}

/// Default netem parameter strings for the two degraded states.
///
/// Parameters are caller-validated netem syntax and are passed through to
/// the device verbatim, split on whitespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapingConfig {
    /// Parameters appended to `netem loss` by [`TrafficShaper::flaky`].
    pub flaky: String,

    /// Parameters appended to `netem delay` by [`TrafficShaper::slow`].
    pub slow: String,
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            flaky: "30%".to_string(),
            slow: "75ms 100ms distribution normal".to_string(),
        }
    }
}

/// Issues device-level shaping and restoration commands.
pub struct TrafficShaper {
    backend: SharedBackend,
    config: ShapingConfig,
}

impl TrafficShaper {
    /// Creates a shaper with the default configuration.
    pub fn new(backend: SharedBackend) -> Self {
        Self::with_config(backend, ShapingConfig::default())
    }

    /// Creates a shaper with the given configuration.
    pub fn with_config(backend: SharedBackend, config: ShapingConfig) -> Self {
        Self { backend, config }
    }

    /// Degrades a device with the given kind and verbatim parameters.
    pub async fn degrade(&self, device: &str, kind: ShapingKind, params: &[&str]) -> Result<()> {
        let mut full = vec![kind.token()];
        full.extend_from_slice(params);
        self.backend.qdisc_replace(device, &full).await?;
        info!(device, kind = kind.token(), "device degraded");
        Ok(())
    }

    /// Makes a device flaky using the configured loss parameters.
    pub async fn flaky(&self, device: &str) -> Result<()> {
        let params: Vec<&str> = self.config.flaky.split_whitespace().collect();
        self.degrade(device, ShapingKind::Loss, &params).await
    }

    /// Makes a device slow using the configured delay parameters.
    pub async fn slow(&self, device: &str) -> Result<()> {
        let params: Vec<&str> = self.config.slow.split_whitespace().collect();
        self.degrade(device, ShapingKind::Delay, &params).await
    }

    /// Restores a device to normal behavior.
    ///
    /// Succeeds whether or not a discipline was present.
    pub async fn restore(&self, device: &str) -> Result<()> {
        self.backend.qdisc_remove(device).await?;
        info!(device, "device restored");
        Ok(())
    }

    /// Queries the current shaping state of a device. Never errors.
    pub async fn query(&self, device: &str) -> NetworkState {
        self.backend.qdisc_state(device).await
    }
}

/// Generates a random veth device name (`veth` + 8 alphanumerics).
pub fn random_veth_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("veth{suffix}")
}
