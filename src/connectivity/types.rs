//! Common types for connectivity module

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// A non-loopback address assigned to a local interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalInterface {
    /// Interface name (e.g. `eth0`)
    pub name: String,
    /// Address assigned to the interface
    pub address: IpAddr,
}

/// Which discovery mechanism produced a public endpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EndpointSource {
    /// Plain HTTP echo service (TCP path)
    HttpEcho,
    /// STUN binding (UDP path)
    Stun,
}

impl fmt::Display for EndpointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpEcho => write!(f, "HTTP echo"),
            Self::Stun => write!(f, "STUN"),
        }
    }
}

/// Externally visible address as observed by one discovery mechanism
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicEndpoint {
    /// Public IP address
    pub ip: IpAddr,
    /// NAT-translated source port; only set for STUN results
    pub port: Option<u16>,
    /// Mechanism that observed this endpoint
    pub source: EndpointSource,
}

impl PublicEndpoint {
    /// Endpoint observed by the HTTP echo service
    pub fn http_echo(ip: IpAddr) -> Self {
        Self {
            ip,
            port: None,
            source: EndpointSource::HttpEcho,
        }
    }

    /// Endpoint observed by a STUN server, including the mapped UDP port
    pub fn stun(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port: Some(port),
            source: EndpointSource::Stun,
        }
    }
}

/// Verdict of a single reachability probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReachabilityResult {
    /// Probed port
    pub port: u16,
    /// Whether the probing service could connect inbound
    pub reachable: bool,
}

/// IP protocol numbers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    /// TCP protocol
    TCP = 6,
    /// UDP protocol
    UDP = 17,
}

/// Port mapping granted by the gateway
///
/// Valid only for `lease_secs`; it is never renewed, and the engine deletes
/// it before a run ends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    /// Mapped protocol
    pub protocol: IpProtocol,
    /// Local port the mapping forwards to
    pub internal_port: u16,
    /// Port assigned on the gateway's public side
    pub external_port: u16,
    /// Granted lease, possibly shorter than requested
    pub lease_secs: u32,
    /// Gateway that granted the mapping
    pub gateway: IpAddr,
    /// External address reported by the gateway, when it answered
    pub external_ip: Option<IpAddr>,
}

/// Public endpoint resolution failures (each mechanism fails on its own)
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
pub enum ResolveError {
    /// DNS, connect, send or receive failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Echo service answered with a non-2xx status or an unparsable body
    #[error("Echo resolution failed: {0}")]
    EchoResolutionFailed(String),

    /// No STUN response within the configured interval
    #[error("STUN request timed out")]
    StunTimeout,

    /// STUN response without a usable mapped-address attribute
    #[error("Malformed STUN response: {0}")]
    StunMalformedResponse(String),
}

/// Reachability probe failures; any of these makes the verdict indeterminate
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
pub enum ProbeError {
    /// The probe service could not be reached or timed out
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// Service responded but evaluated no entry for the requested port
    #[error("Probe returned no result for the requested port")]
    NoResult,

    /// Service reported an error of its own
    #[error("Probe service rejected the request: {0}")]
    Rejected(String),
}

/// Errors that can occur during port mapping
#[derive(Debug, Error)]
pub enum MappingError {
    /// Network timeout waiting for response
    #[error("Mapping request timed out")]
    Timeout,

    /// Invalid response from gateway
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Gateway returned an error
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// No gateway found on network
    #[error("No gateway found")]
    NoGateway,

    /// IO error during communication
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol not supported on this platform or by the gateway
    #[error("Protocol not supported")]
    NotSupported,
}

/// Outcome of the optional NAT-PMP step
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub enum MappingAttempt {
    /// Mapping was disabled for this run
    NotAttempted,
    /// Gateway granted a mapping
    Mapped(PortMapping),
    /// NAT-PMP absent, unreachable or refused
    Unsupported(String),
}

/// Final classification of the host's connectivity
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Verdict {
    /// The public IP routes inbound connections straight to this host
    DedicatedPublicIP,
    /// The public IP is shared or translated; unsolicited inbound traffic is dropped
    SharedOrNATedIP,
    /// The probe could not produce a verdict
    Indeterminate,
}

impl Verdict {
    /// Derive the verdict from the probe outcome alone
    ///
    /// Only the third-party probe is confirmed from outside the local
    /// network, so nothing else feeds into this.
    pub fn from_probe(reachability: &Result<ReachabilityResult, ProbeError>) -> Self {
        match reachability {
            Ok(result) if result.reachable => Self::DedicatedPublicIP,
            Ok(_) => Self::SharedOrNATedIP,
            Err(_) => Self::Indeterminate,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DedicatedPublicIP => write!(f, "dedicated public IP"),
            Self::SharedOrNATedIP => write!(f, "shared/NATed IP"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Everything the engine observed on the way to a verdict
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Evidence {
    /// HTTP echo resolution outcome
    pub http_echo: Result<PublicEndpoint, ResolveError>,
    /// STUN resolution outcome
    pub stun: Result<PublicEndpoint, ResolveError>,
    /// Whether both mechanisms saw the same IP (None unless both succeeded)
    pub endpoints_agree: Option<bool>,
    /// Host submitted to the probe
    pub probed_host: IpAddr,
    /// Port submitted to the probe (the listener's bound port)
    pub probed_port: u16,
    /// Probe outcome
    pub reachability: Result<ReachabilityResult, ProbeError>,
    /// NAT-PMP outcome (advisory)
    pub mapping: MappingAttempt,
    /// Probed host lies in 100.64.0.0/10
    pub cgnat_detected: bool,
    /// Probed host is a private/local address
    pub private_address: bool,
}

/// Verdict plus the evidence behind it; computed once, never mutated
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Classification {
    /// Final verdict
    pub verdict: Verdict,
    /// Supporting evidence
    pub evidence: Evidence,
}

impl Classification {
    /// Classify from collected evidence
    pub fn from_evidence(evidence: Evidence) -> Self {
        Self {
            verdict: Verdict::from_probe(&evidence.reachability),
            evidence,
        }
    }

    /// Human-readable one-line verdict
    pub fn summary(&self) -> String {
        let host = self.evidence.probed_host;
        let port = self.evidence.probed_port;

        let mut line = match (&self.verdict, &self.evidence.reachability) {
            (Verdict::DedicatedPublicIP, _) => format!(
                "Port {} on IP {} is reachable. Your ISP has likely provided you with a dedicated public IP.",
                port, host
            ),
            (Verdict::SharedOrNATedIP, _) => format!(
                "Port {} on IP {} is not reachable. Your ISP has likely provided you with a shared public IP (NATed).",
                port, host
            ),
            (Verdict::Indeterminate, Err(e)) => format!(
                "Could not determine whether port {} on IP {} is reachable: {}",
                port, host, e
            ),
            (Verdict::Indeterminate, Ok(_)) => format!(
                "Could not determine whether port {} on IP {} is reachable",
                port, host
            ),
        };

        let mut notes = Vec::new();
        if self.evidence.cgnat_detected {
            notes.push("public IP is in CGNAT space".to_string());
        }
        if self.evidence.private_address {
            notes.push("public IP is a private address".to_string());
        }
        if self.evidence.endpoints_agree == Some(false) {
            notes.push("HTTP echo and STUN disagree on the public IP".to_string());
        }
        if let MappingAttempt::Mapped(mapping) = &self.evidence.mapping {
            notes.push(format!(
                "NAT-PMP mapped external port {} for {}s",
                mapping.external_port, mapping.lease_secs
            ));
        }

        if !notes.is_empty() {
            line.push_str(&format!(" ({})", notes.join("; ")));
        }
        line
    }
}
