//! STUN binding client (RFC 5389)
//!
//! Sends a single Binding request over UDP and reads the XOR-MAPPED-ADDRESS
//! attribute of the success response. The mapped port belongs to this UDP
//! flow only; it is reported for comparison and never reused for TCP.

use super::types::{PublicEndpoint, ResolveError};
use rand::RngCore;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// STUN magic cookie
pub(crate) const STUN_MAGIC_COOKIE: u32 = 0x2112A442;
pub(crate) const STUN_BINDING_REQUEST: u16 = 0x0001;
pub(crate) const STUN_BINDING_RESPONSE: u16 = 0x0101;
pub(crate) const STUN_HEADER_SIZE: usize = 20;
pub(crate) const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

const FAMILY_IPV4: u8 = 0x01;

/// Resolves the public endpoint through a STUN Binding exchange
#[derive(Debug, Clone)]
pub struct StunResolver {
    timeout: Duration,
}

impl StunResolver {
    /// Create a resolver that waits at most `timeout` for a response
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Query `server` (`host:port`) for this host's mapped IPv4 address and port
    pub async fn resolve(&self, server: &str) -> Result<PublicEndpoint, ResolveError> {
        info!("Querying STUN server {}", server);

        let server_addr = tokio::net::lookup_host(server)
            .await
            .map_err(|e| ResolveError::Transport(format!("Failed to resolve {}: {}", server, e)))?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                ResolveError::Transport(format!("No IPv4 address for STUN server {}", server))
            })?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ResolveError::Transport(format!("Failed to bind UDP socket: {}", e)))?;

        let transaction_id = generate_transaction_id();
        let request = build_binding_request(&transaction_id);

        socket
            .send_to(&request, server_addr)
            .await
            .map_err(|e| ResolveError::Transport(format!("Failed to send to {}: {}", server_addr, e)))?;
        debug!("Sent STUN binding request to {}", server_addr);

        let mapped = tokio::time::timeout(
            self.timeout,
            await_binding_response(&socket, server_addr, &transaction_id),
        )
        .await
        .map_err(|_| {
            debug!("STUN server {} did not answer within {:?}", server_addr, self.timeout);
            ResolveError::StunTimeout
        })??;

        info!("STUN mapped address: {}", mapped);
        Ok(PublicEndpoint::stun(mapped.ip(), mapped.port()))
    }
}

/// Read datagrams until one from `server` carries our transaction id
async fn await_binding_response(
    socket: &UdpSocket,
    server: SocketAddr,
    transaction_id: &[u8; 12],
) -> Result<SocketAddr, ResolveError> {
    let mut buf = [0u8; 576];
    loop {
        let (len, from) = socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| ResolveError::Transport(format!("STUN receive failed: {}", e)))?;

        let data = &buf[..len];
        if from != server || !transaction_matches(data, transaction_id) {
            debug!("Ignoring stray {}-byte datagram from {}", len, from);
            continue;
        }

        return parse_binding_response(data, transaction_id);
    }
}

/// Fresh random 96-bit transaction id
pub fn generate_transaction_id() -> [u8; 12] {
    let mut id = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut id);
    id
}

/// Build a 20-byte Binding request with no attributes
pub fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(STUN_HEADER_SIZE);
    msg.extend_from_slice(&STUN_BINDING_REQUEST.to_be_bytes());
    // Message length: no attributes
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    msg.extend_from_slice(transaction_id);
    msg
}

fn transaction_matches(data: &[u8], transaction_id: &[u8; 12]) -> bool {
    data.len() >= STUN_HEADER_SIZE && &data[8..20] == transaction_id
}

/// Extract the XOR-MAPPED-ADDRESS from a Binding success response
pub fn parse_binding_response(
    data: &[u8],
    transaction_id: &[u8; 12],
) -> Result<SocketAddr, ResolveError> {
    if data.len() < STUN_HEADER_SIZE {
        return Err(ResolveError::StunMalformedResponse(format!(
            "Response too short: {} bytes",
            data.len()
        )));
    }

    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    if msg_type != STUN_BINDING_RESPONSE {
        return Err(ResolveError::StunMalformedResponse(format!(
            "Unexpected message type {:#06x}",
            msg_type
        )));
    }

    let cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if cookie != STUN_MAGIC_COOKIE {
        return Err(ResolveError::StunMalformedResponse(
            "Bad magic cookie".to_string(),
        ));
    }

    if !transaction_matches(data, transaction_id) {
        return Err(ResolveError::StunMalformedResponse(
            "Transaction id mismatch".to_string(),
        ));
    }

    let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = STUN_HEADER_SIZE + msg_len;
    if data.len() < end {
        return Err(ResolveError::StunMalformedResponse(format!(
            "Truncated body: {} of {} bytes",
            data.len() - STUN_HEADER_SIZE,
            msg_len
        )));
    }

    let mut offset = STUN_HEADER_SIZE;
    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let value_start = offset + 4;

        if value_start + attr_len > end {
            break;
        }

        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            return parse_xor_mapped_address(&data[value_start..value_start + attr_len]);
        }

        // Attributes are padded to a 4-byte boundary
        offset = value_start + ((attr_len + 3) & !3);
    }

    Err(ResolveError::StunMalformedResponse(
        "No XOR-MAPPED-ADDRESS attribute".to_string(),
    ))
}

fn parse_xor_mapped_address(value: &[u8]) -> Result<SocketAddr, ResolveError> {
    if value.len() < 8 {
        return Err(ResolveError::StunMalformedResponse(format!(
            "XOR-MAPPED-ADDRESS too short: {} bytes",
            value.len()
        )));
    }

    let family = value[1];
    if family != FAMILY_IPV4 {
        return Err(ResolveError::StunMalformedResponse(format!(
            "Unsupported address family {:#04x}",
            family
        )));
    }

    let port = u16::from_be_bytes([value[2], value[3]]) ^ (STUN_MAGIC_COOKIE >> 16) as u16;
    let ip = u32::from_be_bytes([value[4], value[5], value[6], value[7]]) ^ STUN_MAGIC_COOKIE;

    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port))
}
