//! Reachcheck - dedicated vs. NATed public IP classification
//!
//! This library determines how a host is connected to the internet by
//! cross-referencing several vantage points: local interfaces, an HTTP echo
//! service, a STUN binding, a third-party inbound reachability probe against
//! a locally bound listener, and an optional NAT-PMP mapping.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectivity;

pub use config::ProbeConfig;

/// Result type alias for fatal reachcheck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors that abort a classification run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network interfaces could not be listed at all
    #[error("Interface enumeration failed: {0}")]
    Enumeration(String),

    /// Neither the HTTP echo nor the STUN mechanism produced a public address
    #[error("No public endpoint resolved (HTTP echo: {http_echo}; STUN: {stun})")]
    NoPublicEndpoint {
        /// Why the HTTP echo lookup failed
        http_echo: String,
        /// Why the STUN binding failed
        stun: String,
    },

    /// The listening socket could not be bound
    #[error("Failed to bind listener on port {port}: {source}")]
    ListenerBind {
        /// Requested port (0 = ephemeral)
        port: u16,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// The listener stopped before signalling readiness
    #[error("Listener error: {0}")]
    Listener(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Initialize logging; `debug` raises the level from INFO to DEBUG
pub fn init(debug: bool) {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // A second call (e.g. from tests) leaves the first subscriber in place
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests;
