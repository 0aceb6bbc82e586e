//! Public endpoint resolution over two independent mechanisms
//!
//! HTTP echo reflects the outbound TCP translation, STUN the UDP one. Both
//! results are kept; neither overwrites the other.

use super::http_ip::HttpEchoResolver;
use super::stun::StunResolver;
use super::types::{PublicEndpoint, ResolveError};
use crate::ProbeConfig;
use async_trait::async_trait;

/// Discovers the host's externally visible address
#[async_trait]
pub trait PublicEndpointResolver: Send + Sync {
    /// Public IP as reported by an HTTP echo service
    async fn resolve_via_http_echo(&self) -> Result<PublicEndpoint, ResolveError>;

    /// Public IP and UDP port as observed by the STUN server at `server`
    async fn resolve_via_stun(&self, server: &str) -> Result<PublicEndpoint, ResolveError>;
}

/// Resolver backed by the real echo service and STUN server
#[derive(Debug, Clone)]
pub struct NetworkResolver {
    echo: HttpEchoResolver,
    stun: StunResolver,
}

impl NetworkResolver {
    /// Build both mechanisms from configuration
    pub fn new(config: &ProbeConfig) -> crate::Result<Self> {
        Ok(Self {
            echo: HttpEchoResolver::new(config)?,
            stun: StunResolver::new(config.stun_timeout()),
        })
    }
}

#[async_trait]
impl PublicEndpointResolver for NetworkResolver {
    async fn resolve_via_http_echo(&self) -> Result<PublicEndpoint, ResolveError> {
        self.echo.resolve().await
    }

    async fn resolve_via_stun(&self, server: &str) -> Result<PublicEndpoint, ResolveError> {
        self.stun.resolve(server).await
    }
}
