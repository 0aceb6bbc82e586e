//! Third-party reachability probe
//!
//! A remote service attempts an inbound TCP connection to `host:port` from
//! the public internet and reports whether it succeeded. Unlike anything the
//! host can test for itself, this verdict comes from outside the local
//! network.

use super::types::{ProbeError, ReachabilityResult};
use crate::ProbeConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Request body sent to the probe service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeRequest {
    /// Host to connect to
    pub host: String,
    /// Ports to test (always exactly one here)
    pub ports: Vec<u16>,
}

/// One entry of the service's check list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortCheck {
    /// Tested port
    pub port: u16,
    /// Whether the inbound connection succeeded
    pub status: bool,
}

/// Response body returned by the probe service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeResponse {
    /// Service-level failure flag
    pub error: bool,
    /// Per-port results
    #[serde(default)]
    pub check: Vec<PortCheck>,
    /// Optional message, usually set alongside `error`
    #[serde(default)]
    pub msg: Option<String>,
}

/// Asks an outside observer whether a port is reachable
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Probe `host:port`
    async fn probe(&self, host: IpAddr, port: u16) -> Result<ReachabilityResult, ProbeError>;
}

/// Probe backed by an HTTP port-checking service
#[derive(Debug, Clone)]
pub struct HttpReachabilityProber {
    client: reqwest::Client,
    url: String,
    debug: bool,
}

impl HttpReachabilityProber {
    /// Build a prober for `config.probe_url` with `config.http_timeout()`
    pub fn new(config: &ProbeConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.probe_url.clone(),
            debug: config.debug,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProber {
    async fn probe(&self, host: IpAddr, port: u16) -> Result<ReachabilityResult, ProbeError> {
        info!(
            "Checking if port {} on IP {} is reachable from the internet...",
            port, host
        );

        let request = ProbeRequest {
            host: host.to_string(),
            ports: vec![port],
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!("Probe request to {} failed: {}", self.url, e);
                ProbeError::Transport(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Transport(format!("Failed to read probe body: {}", e)))?;

        if self.debug {
            debug!("Probe response body ({}): {}", status, body);
        }

        if !status.is_success() {
            // Some services still explain themselves in a JSON body
            if let Ok(ProbeResponse { error: true, msg, .. }) = serde_json::from_str(&body) {
                return Err(ProbeError::Rejected(
                    msg.unwrap_or_else(|| format!("status {}", status)),
                ));
            }
            return Err(ProbeError::Transport(format!(
                "Probe service returned status {}",
                status
            )));
        }

        let result = interpret_response(&body, port)?;
        info!(
            "Probe verdict for port {}: {}",
            port,
            if result.reachable { "open" } else { "closed" }
        );
        Ok(result)
    }
}

/// Turn a probe response body into the verdict for `port`
///
/// An empty check list, or one without an entry for `port`, is
/// `ProbeError::NoResult`, never an implicit "closed".
pub fn interpret_response(body: &str, port: u16) -> Result<ReachabilityResult, ProbeError> {
    let response: ProbeResponse =
        serde_json::from_str(body).map_err(|e| ProbeError::Parse(e.to_string()))?;

    if response.error {
        return Err(ProbeError::Rejected(
            response
                .msg
                .unwrap_or_else(|| "service reported an error".to_string()),
        ));
    }

    let entry = response
        .check
        .iter()
        .find(|c| c.port == port)
        .ok_or(ProbeError::NoResult)?;

    Ok(ReachabilityResult {
        port,
        reachable: entry.status,
    })
}
