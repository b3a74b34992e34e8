use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{EbafError, Result};

const SYS_CLASS_NET: &str = "/sys/class/net";
const PROC_NET_ROUTE: &str = "/proc/net/route";

/// Pick the interface to attach to: the operator's choice if given, else
/// the default-route interface, else the first active non-loopback one.
pub fn select_interface(requested: Option<&str>) -> Result<String> {
    if let Some(name) = requested {
        if Path::new(SYS_CLASS_NET).join(name).exists() {
            return Ok(name.to_string());
        }
        return Err(EbafError::InterfaceNotFound(name.to_string()));
    }

    if let Some(name) = default_route_interface() {
        info!(iface = %name, "using default-route interface");
        return Ok(name);
    }
    if let Some(name) = first_up_interface() {
        info!(iface = %name, "no default route, using first active interface");
        return Ok(name);
    }
    Err(EbafError::NoInterface)
}

fn default_route_interface() -> Option<String> {
    let text = fs::read_to_string(PROC_NET_ROUTE).ok()?;
    parse_default_route(&text)
}

/// Extract the interface of the first default route from the kernel route
/// table. Columns: Iface, Destination (hex, little-endian), Gateway, ...
/// with one header line; a destination of 00000000 is the default route.
fn parse_default_route(text: &str) -> Option<String> {
    for line in text.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let (Some(iface), Some(destination)) = (fields.next(), fields.next()) else {
            continue;
        };
        if destination == "00000000" {
            return Some(iface.to_string());
        }
    }
    None
}

fn first_up_interface() -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(SYS_CLASS_NET)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    names.into_iter().find(|name| {
        if name == "lo" {
            return false;
        }
        let up = fs::read_to_string(Path::new(SYS_CLASS_NET).join(name).join("operstate"))
            .map(|state| state.trim() == "up")
            .unwrap_or(false);
        if !up {
            debug!(iface = %name, "interface not up, skipping");
        }
        up
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0101A8C0\t0003\t0\t0\t100\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t100\t00FFFFFF\t0\t0\t0
";

    #[test]
    fn default_route_interface_is_found() {
        assert_eq!(parse_default_route(ROUTE_TABLE).as_deref(), Some("eth0"));
    }

    #[test]
    fn no_default_route_yields_none() {
        let table = "\
Iface\tDestination\tGateway \tFlags
eth0\t0001A8C0\t00000000\t0001
";
        assert_eq!(parse_default_route(table), None);
    }

    #[test]
    fn blank_and_short_lines_are_tolerated() {
        let table = "Iface\tDestination\n\nnonsense\nwlan0\t00000000\t0101A8C0\n";
        assert_eq!(parse_default_route(table).as_deref(), Some("wlan0"));
    }

    #[test]
    fn requesting_a_nonexistent_interface_fails() {
        let err = select_interface(Some("definitely-not-a-nic-0")).unwrap_err();
        assert!(matches!(err, EbafError::InterfaceNotFound(_)));
    }
}
