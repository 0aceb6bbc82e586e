//! Local interface enumeration

use super::types::LocalInterface;
use crate::{Error, Result};
use std::net::IpAddr;
use tracing::debug;

/// Raw view of one interface as reported by the platform
#[derive(Debug, Clone)]
pub struct InterfaceRecord {
    /// Interface name
    pub name: String,
    /// Assigned addresses, or why they could not be read
    pub addresses: std::result::Result<Vec<IpAddr>, String>,
}

/// Source of interface records
pub trait InterfaceSource: Send + Sync {
    /// List all interfaces with their addresses
    fn interfaces(&self) -> std::io::Result<Vec<InterfaceRecord>>;
}

/// Reads interfaces from the operating system via `if-addrs`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> std::io::Result<Vec<InterfaceRecord>> {
        let mut records: Vec<InterfaceRecord> = Vec::new();

        for iface in if_addrs::get_if_addrs()? {
            let ip = iface.ip();
            match records.iter_mut().find(|r| r.name == iface.name) {
                Some(InterfaceRecord {
                    addresses: Ok(addresses),
                    ..
                }) => addresses.push(ip),
                Some(_) => {}
                None => records.push(InterfaceRecord {
                    name: iface.name,
                    addresses: Ok(vec![ip]),
                }),
            }
        }

        Ok(records)
    }
}

/// List the host's non-loopback addresses in enumeration order
///
/// An interface whose addresses cannot be read is logged and skipped;
/// failing to list interfaces at all is an `Error::Enumeration`.
pub fn list_local_addresses(source: &dyn InterfaceSource) -> Result<Vec<LocalInterface>> {
    let records = source
        .interfaces()
        .map_err(|e| Error::Enumeration(e.to_string()))?;

    let mut found = Vec::new();
    for record in records {
        let addresses = match record.addresses {
            Ok(addresses) => addresses,
            Err(e) => {
                debug!("Skipping interface {}: {}", record.name, e);
                continue;
            }
        };

        for address in addresses {
            if is_loopback(address) {
                continue;
            }
            debug!("Local address {} on {}", address, record.name);
            found.push(LocalInterface {
                name: record.name.clone(),
                address,
            });
        }
    }

    Ok(found)
}

/// Loopback check covering 127.0.0.0/8, ::1 and IPv4-mapped loopback
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}
