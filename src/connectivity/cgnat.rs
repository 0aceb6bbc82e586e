//! Address-range hints for an observed public IP
//!
//! An echo or STUN result inside CGNAT or private space means the address
//! seen from outside is itself behind another translation layer.

use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// CGNAT (RFC 6598) range: 100.64.0.0/10
const CGNAT_RANGE_START: u32 = 0x6440_0000; // 100.64.0.0
const CGNAT_RANGE_END: u32 = 0x647F_FFFF; // 100.127.255.255

/// Where an address sits in the address plan
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum AddressClass {
    /// Globally routable
    Public,
    /// Carrier-grade NAT shared space
    Cgnat,
    /// RFC 1918, loopback, link-local, ULA or unspecified
    Private,
}

/// Classify an address
///
/// ```
/// use reachcheck::connectivity::{classify_address, AddressClass};
///
/// assert_eq!(classify_address("100.64.0.1".parse().unwrap()), AddressClass::Cgnat);
/// assert_eq!(classify_address("203.0.113.5".parse().unwrap()), AddressClass::Public);
/// assert_eq!(classify_address("10.0.0.7".parse().unwrap()), AddressClass::Private);
/// ```
pub fn classify_address(ip: IpAddr) -> AddressClass {
    match ip {
        IpAddr::V4(v4) if is_cgnat_v4(v4) => AddressClass::Cgnat,
        IpAddr::V4(v4)
            if v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified() =>
        {
            AddressClass::Private
        }
        IpAddr::V6(v6) if v6.is_loopback() || v6.is_unspecified() || is_ipv6_local(&v6) => {
            AddressClass::Private
        }
        _ => AddressClass::Public,
    }
}

fn is_cgnat_v4(ip: Ipv4Addr) -> bool {
    (CGNAT_RANGE_START..=CGNAT_RANGE_END).contains(&u32::from(ip))
}

/// ULA (fc00::/7) or link-local (fe80::/10)
fn is_ipv6_local(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}
