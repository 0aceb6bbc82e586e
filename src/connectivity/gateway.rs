//! Default gateway discovery for different platforms

use crate::connectivity::types::MappingError;
use std::net::Ipv4Addr;

/// Find the default IPv4 gateway
///
/// On Linux it reads the routing table; on macOS and Windows it parses the
/// output of `netstat`/`route`.
pub fn find_default_gateway() -> Result<Ipv4Addr, MappingError> {
    #[cfg(target_os = "linux")]
    {
        let table = std::fs::read_to_string("/proc/net/route")?;
        parse_linux_route_table(&table).ok_or(MappingError::NoGateway)
    }

    #[cfg(target_os = "macos")]
    {
        let stdout = run_command("netstat", &["-rn", "-f", "inet"])?;
        parse_netstat_output(&stdout).ok_or(MappingError::NoGateway)
    }

    #[cfg(target_os = "windows")]
    {
        let stdout = run_command("route", &["print", "0.0.0.0"])?;
        parse_route_print_output(&stdout).ok_or(MappingError::NoGateway)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(MappingError::NotSupported)
    }
}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn run_command(program: &str, args: &[&str]) -> Result<String, MappingError> {
    let output = std::process::Command::new(program).args(args).output()?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Gateway of the first default route in `/proc/net/route`
///
/// Columns are `Iface Destination Gateway ...` with addresses as
/// little-endian hex.
pub fn parse_linux_route_table(table: &str) -> Option<Ipv4Addr> {
    table.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 || fields[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(fields[2], 16).ok()?;
        let gateway = Ipv4Addr::from(raw.to_be());
        (!gateway.is_unspecified()).then_some(gateway)
    })
}

/// Gateway from `netstat -rn -f inet` output (`default  192.168.1.1 ...`)
pub fn parse_netstat_output(stdout: &str) -> Option<Ipv4Addr> {
    stdout
        .lines()
        .filter(|line| line.starts_with("default"))
        .find_map(|line| line.split_whitespace().nth(1)?.parse().ok())
}

/// Gateway from `route print 0.0.0.0` output (`0.0.0.0  0.0.0.0  192.168.1.1 ...`)
pub fn parse_route_print_output(stdout: &str) -> Option<Ipv4Addr> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("0.0.0.0"))
        .find_map(|line| line.split_whitespace().nth(2)?.parse().ok())
}
