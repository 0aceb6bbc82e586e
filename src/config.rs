//! Run configuration
//!
//! A `ProbeConfig` is built once (defaults, optional JSON file, CLI flags)
//! and passed explicitly into every component.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Port used when none is configured
pub const DEFAULT_PORT: u16 = 49198;

/// Configuration for one classification run
///
/// # Example
/// ```rust,no_run
/// use reachcheck::ProbeConfig;
///
/// // Load config (returns default if file doesn't exist)
/// let mut config = ProbeConfig::load("reachcheck.json").expect("Failed to load");
/// config.debug = true;
/// println!("Listening port: {}", config.listen_port());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Verbose diagnostics, including raw response bodies
    pub debug: bool,
    /// Listener port; `None` selects `DEFAULT_PORT`, `Some(0)` an ephemeral port
    pub port: Option<u16>,
    /// Pause between listener readiness and the probe, in milliseconds
    pub settle_delay_ms: u64,
    /// Timeout for HTTP echo and probe requests, in seconds
    pub http_timeout_secs: u64,
    /// Timeout for the STUN binding exchange, in milliseconds
    pub stun_timeout_ms: u64,
    /// HTTP echo endpoint returning the caller's IP
    pub echo_url: String,
    /// Reachability probe endpoint
    pub probe_url: String,
    /// STUN server as `host:port`
    pub stun_server: String,
    /// Attempt a NAT-PMP mapping alongside the probe
    pub natpmp_enabled: bool,
    /// Requested NAT-PMP lease in seconds
    pub natpmp_lease_secs: u32,
    /// Gateway override; discovered from the routing table when unset
    pub natpmp_gateway: Option<IpAddr>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            debug: false,
            port: None,
            settle_delay_ms: 2000,
            http_timeout_secs: 10,
            stun_timeout_ms: 3000,
            echo_url: "https://api.ipify.org?format=text".to_string(),
            probe_url: "https://portchecker.io/api/v1/query".to_string(),
            stun_server: "stun.l.google.com:19302".to_string(),
            natpmp_enabled: true,
            natpmp_lease_secs: 3600,
            natpmp_gateway: None,
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a JSON file
    ///
    /// Returns defaults if the file doesn't exist or is empty. Missing keys
    /// take their default values.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be greater than 0".to_string()));
        }
        if self.stun_timeout_ms == 0 {
            return Err(Error::Config("stun_timeout_ms must be greater than 0".to_string()));
        }
        if self.echo_url.trim().is_empty() {
            return Err(Error::Config("echo_url must not be empty".to_string()));
        }
        if self.probe_url.trim().is_empty() {
            return Err(Error::Config("probe_url must not be empty".to_string()));
        }
        if self.stun_server.trim().is_empty() {
            return Err(Error::Config("stun_server must not be empty".to_string()));
        }
        Ok(())
    }

    /// Port the listener binds: the configured one, or `DEFAULT_PORT`
    pub fn listen_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// Settling delay as a `Duration`
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// HTTP request timeout as a `Duration`
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// STUN exchange timeout as a `Duration`
    pub fn stun_timeout(&self) -> Duration {
        Duration::from_millis(self.stun_timeout_ms)
    }
}
