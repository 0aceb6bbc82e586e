//! NAT-PMP (NAT Port Mapping Protocol) client - RFC 6886
//!
//! NAT-PMP uses UDP port 5351 on the default gateway. A mapping request
//! names the protocol, internal port, suggested external port and lease;
//! the gateway answers with the port it actually assigned and the lease it
//! granted (which may be shorter than requested).
//!
//! A failed mapping is an expected outcome: most consumer networks either
//! don't speak NAT-PMP or refuse it. Mappings are never renewed; a
//! lifetime-0 request deletes one early.
//!
//! # Example
//!
//! ```no_run
//! use reachcheck::connectivity::{IpProtocol, NatPmpClient, PortMapper};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = NatPmpClient::discover(std::time::Duration::from_secs(2))?;
//! let mapping = client.request_mapping(IpProtocol::TCP, 49198, 49198, 3600).await?;
//! println!("External port {} for {}s", mapping.external_port, mapping.lease_secs);
//! # Ok(())
//! # }
//! ```

use super::gateway::find_default_gateway;
use super::types::{IpProtocol, MappingError, PortMapping};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// NAT-PMP server port (IANA assigned)
pub const NATPMP_SERVER_PORT: u16 = 5351;

/// Default wait for a gateway response
pub const NATPMP_TIMEOUT: Duration = Duration::from_secs(2);

/// NAT-PMP protocol version
pub(crate) const NATPMP_VERSION: u8 = 0;

/// Responses set the high bit of the request opcode
pub(crate) const RESPONSE_OPCODE_OFFSET: u8 = 128;

/// NAT-PMP opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NatPmpOpcode {
    /// External address request
    ExternalAddress = 0,
    /// UDP port mapping
    MapUdp = 1,
    /// TCP port mapping
    MapTcp = 2,
}

impl NatPmpOpcode {
    fn for_protocol(protocol: IpProtocol) -> Self {
        match protocol {
            IpProtocol::UDP => Self::MapUdp,
            IpProtocol::TCP => Self::MapTcp,
        }
    }
}

/// NAT-PMP result codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub(crate) enum NatPmpResultCode {
    Success = 0,
    UnsupportedVersion = 1,
    NotAuthorized = 2,
    NetworkFailure = 3,
    OutOfResources = 4,
    UnsupportedOpcode = 5,
}

impl NatPmpResultCode {
    pub(crate) fn from_u16(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::NotAuthorized),
            3 => Some(Self::NetworkFailure),
            4 => Some(Self::OutOfResources),
            5 => Some(Self::UnsupportedOpcode),
            _ => None,
        }
    }

    pub(crate) fn to_error_message(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnsupportedVersion => "Unsupported NAT-PMP version",
            Self::NotAuthorized => "Not authorized/refused",
            Self::NetworkFailure => "Network failure",
            Self::OutOfResources => "Out of resources",
            Self::UnsupportedOpcode => "Unsupported opcode",
        }
    }
}

/// Fields of a successful MAP response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapResponse {
    pub internal_port: u16,
    pub external_port: u16,
    pub lease_secs: u32,
}

/// Negotiates temporary port mappings with the gateway
#[async_trait]
pub trait PortMapper: Send + Sync {
    /// Request `external_port_hint -> internal_port` for `lease_secs`
    async fn request_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port_hint: u16,
        lease_secs: u32,
    ) -> Result<PortMapping, MappingError>;

    /// Delete a mapping granted by `request_mapping` before its lease ends
    async fn release_mapping(&self, mapping: &PortMapping) -> Result<(), MappingError>;
}

/// NAT-PMP client bound to one gateway control address
#[derive(Debug, Clone)]
pub struct NatPmpClient {
    server: SocketAddr,
    timeout: Duration,
}

impl NatPmpClient {
    /// Talk to `gateway` on the standard NAT-PMP port
    pub fn new(gateway: IpAddr, timeout: Duration) -> Self {
        Self::with_server(SocketAddr::new(gateway, NATPMP_SERVER_PORT), timeout)
    }

    /// Talk to an explicit control address
    pub fn with_server(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    /// Use the default gateway from the routing table
    pub fn discover(timeout: Duration) -> Result<Self, MappingError> {
        let gateway = find_default_gateway()?;
        debug!("Found default gateway: {}", gateway);
        Ok(Self::new(IpAddr::V4(gateway), timeout))
    }

    /// Gateway control address
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Ask the gateway for its public IPv4 address
    pub async fn external_address(&self) -> Result<Ipv4Addr, MappingError> {
        let request = [NATPMP_VERSION, NatPmpOpcode::ExternalAddress as u8];
        let response = self.exchange(&request).await?;
        parse_external_address_response(&response)
    }

    /// Send one request and wait for one response
    async fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, MappingError> {
        if !self.server.is_ipv4() {
            return Err(MappingError::NotSupported);
        }

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(request, self.server).await?;
        debug!("Sent {}-byte NAT-PMP request to {}", request.len(), self.server);

        let mut buf = [0u8; 16];
        let receive = async {
            loop {
                let (len, from) = socket.recv_from(&mut buf).await?;
                if from.ip() == self.server.ip() {
                    return Ok::<usize, std::io::Error>(len);
                }
                debug!("Ignoring NAT-PMP datagram from {}", from);
            }
        };

        let len = tokio::time::timeout(self.timeout, receive)
            .await
            .map_err(|_| MappingError::Timeout)??;

        debug!("Received {} bytes from NAT-PMP server", len);
        Ok(buf[..len].to_vec())
    }
}

#[async_trait]
impl PortMapper for NatPmpClient {
    async fn request_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port_hint: u16,
        lease_secs: u32,
    ) -> Result<PortMapping, MappingError> {
        info!(
            "Attempting NAT-PMP mapping for port {} (lifetime: {}s, protocol: {:?})",
            internal_port, lease_secs, protocol
        );

        let request =
            build_natpmp_map_request(internal_port, external_port_hint, lease_secs, protocol);
        let response = self.exchange(&request).await?;
        let granted = parse_natpmp_map_response(&response, protocol)?;

        // MAP responses don't carry the public IP; ask separately
        let external_ip = match self.external_address().await {
            Ok(ip) => Some(IpAddr::V4(ip)),
            Err(e) => {
                debug!("Gateway granted a mapping but not its external address: {}", e);
                None
            }
        };

        let mapping = PortMapping {
            protocol,
            internal_port: granted.internal_port,
            external_port: granted.external_port,
            lease_secs: granted.lease_secs,
            gateway: self.server.ip(),
            external_ip,
        };

        info!(
            "NAT-PMP mapping successful: external port {} -> {} (lifetime: {}s)",
            mapping.external_port, mapping.internal_port, mapping.lease_secs
        );
        Ok(mapping)
    }

    async fn release_mapping(&self, mapping: &PortMapping) -> Result<(), MappingError> {
        // RFC 6886 section 3.4: lifetime 0 and external port 0 delete the mapping
        let request = build_natpmp_map_request(mapping.internal_port, 0, 0, mapping.protocol);
        let response = self.exchange(&request).await?;
        parse_natpmp_map_response(&response, mapping.protocol)?;

        info!("NAT-PMP mapping for port {} released", mapping.internal_port);
        Ok(())
    }
}

/// Mapper that finds its gateway at request time
///
/// Gateway discovery failures then surface like any other mapping failure.
#[derive(Debug, Clone)]
pub struct NatPmpMapper {
    gateway: Option<IpAddr>,
    timeout: Duration,
}

impl NatPmpMapper {
    /// Use `gateway` if given, otherwise the routing table's default gateway
    pub fn new(gateway: Option<IpAddr>, timeout: Duration) -> Self {
        Self { gateway, timeout }
    }

    fn client(&self) -> Result<NatPmpClient, MappingError> {
        match self.gateway {
            Some(gateway) => Ok(NatPmpClient::new(gateway, self.timeout)),
            None => NatPmpClient::discover(self.timeout),
        }
    }
}

#[async_trait]
impl PortMapper for NatPmpMapper {
    async fn request_mapping(
        &self,
        protocol: IpProtocol,
        internal_port: u16,
        external_port_hint: u16,
        lease_secs: u32,
    ) -> Result<PortMapping, MappingError> {
        self.client()?
            .request_mapping(protocol, internal_port, external_port_hint, lease_secs)
            .await
    }

    async fn release_mapping(&self, mapping: &PortMapping) -> Result<(), MappingError> {
        NatPmpClient::new(mapping.gateway, self.timeout)
            .release_mapping(mapping)
            .await
    }
}

/// Build a NAT-PMP MAP request packet
pub(crate) fn build_natpmp_map_request(
    internal_port: u16,
    suggested_external_port: u16,
    lifetime_secs: u32,
    protocol: IpProtocol,
) -> Vec<u8> {
    let mut request = Vec::with_capacity(12);
    request.push(NATPMP_VERSION);
    request.push(NatPmpOpcode::for_protocol(protocol) as u8);
    // Reserved
    request.extend_from_slice(&[0u8; 2]);
    request.extend_from_slice(&internal_port.to_be_bytes());
    request.extend_from_slice(&suggested_external_port.to_be_bytes());
    request.extend_from_slice(&lifetime_secs.to_be_bytes());
    request
}

/// Validate version, opcode and result code shared by every response
fn check_response_header(response: &[u8], expected_opcode: NatPmpOpcode) -> Result<(), MappingError> {
    let version = response[0];
    if version != NATPMP_VERSION {
        return Err(MappingError::InvalidResponse(format!(
            "Invalid version: {} (expected {})",
            version, NATPMP_VERSION
        )));
    }

    let opcode = response[1];
    let expected = RESPONSE_OPCODE_OFFSET + expected_opcode as u8;
    if opcode != expected {
        return Err(MappingError::InvalidResponse(format!(
            "Unexpected opcode: {} (expected {})",
            opcode, expected
        )));
    }

    let result_code = u16::from_be_bytes([response[2], response[3]]);
    let result = NatPmpResultCode::from_u16(result_code).ok_or_else(|| {
        MappingError::InvalidResponse(format!("Unknown result code: {}", result_code))
    })?;

    if result != NatPmpResultCode::Success {
        return Err(MappingError::GatewayError(
            result.to_error_message().to_string(),
        ));
    }

    Ok(())
}

/// Parse a 16-byte NAT-PMP MAP response
pub(crate) fn parse_natpmp_map_response(
    response: &[u8],
    protocol: IpProtocol,
) -> Result<MapResponse, MappingError> {
    if response.len() < 16 {
        return Err(MappingError::InvalidResponse(format!(
            "Response too short: {} bytes (expected 16)",
            response.len()
        )));
    }

    check_response_header(response, NatPmpOpcode::for_protocol(protocol))?;

    // Bytes 4-7 hold the gateway's seconds-since-start-of-epoch; unused
    Ok(MapResponse {
        internal_port: u16::from_be_bytes([response[8], response[9]]),
        external_port: u16::from_be_bytes([response[10], response[11]]),
        lease_secs: u32::from_be_bytes([response[12], response[13], response[14], response[15]]),
    })
}

/// Parse a 12-byte external address response
pub(crate) fn parse_external_address_response(response: &[u8]) -> Result<Ipv4Addr, MappingError> {
    if response.len() < 12 {
        return Err(MappingError::InvalidResponse(format!(
            "External IP response too short: {} bytes",
            response.len()
        )));
    }

    check_response_header(response, NatPmpOpcode::ExternalAddress)?;

    Ok(Ipv4Addr::new(
        response[8],
        response[9],
        response[10],
        response[11],
    ))
}
