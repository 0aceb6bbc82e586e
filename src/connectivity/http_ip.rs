//! HTTP-based external IP detection
//!
//! Queries an echo service that returns the caller's IP as seen on the
//! outbound TCP path. The body may be plain text (`203.0.113.5`) or a JSON
//! object with an `ip` field.

use super::types::{PublicEndpoint, ResolveError};
use crate::ProbeConfig;
use serde::Deserialize;
use std::net::IpAddr;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct EchoBody {
    ip: String,
}

/// Resolves the public IP through an HTTP echo service
#[derive(Debug, Clone)]
pub struct HttpEchoResolver {
    client: reqwest::Client,
    url: String,
    debug: bool,
}

impl HttpEchoResolver {
    /// Build a resolver for `config.echo_url` with `config.http_timeout()`
    pub fn new(config: &ProbeConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.echo_url.clone(),
            debug: config.debug,
        })
    }

    /// Fetch the public IP from the echo service
    pub async fn resolve(&self) -> Result<PublicEndpoint, ResolveError> {
        info!("Fetching external IP address from {}", self.url);

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            debug!("Echo request to {} failed: {}", self.url, e);
            ResolveError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!("Echo service returned status {}", status);
            return Err(ResolveError::EchoResolutionFailed(format!(
                "unexpected status {}",
                status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::Transport(format!("Failed to read echo body: {}", e)))?;

        if self.debug {
            debug!("Echo response body: {}", body);
        }

        let ip = parse_echo_body(&body)?;
        info!("External IP detected via HTTP: {}", ip);
        Ok(PublicEndpoint::http_echo(ip))
    }
}

/// Parse an echo body as a bare IP or `{"ip": "..."}`
///
/// Only IPv4 is accepted.
pub fn parse_echo_body(body: &str) -> Result<IpAddr, ResolveError> {
    let text = body.trim();

    let candidate = if text.starts_with('{') {
        serde_json::from_str::<EchoBody>(text)
            .map_err(|e| ResolveError::EchoResolutionFailed(format!("Invalid JSON body: {}", e)))?
            .ip
    } else {
        text.to_string()
    };

    let ip = candidate.trim().parse::<IpAddr>().map_err(|_| {
        ResolveError::EchoResolutionFailed(format!("Not an IP address: {:?}", candidate))
    })?;

    match ip {
        IpAddr::V4(_) => Ok(ip),
        IpAddr::V6(_) => Err(ResolveError::EchoResolutionFailed(format!(
            "IPv6 address {} is not supported",
            ip
        ))),
    }
}
