//! Local network interface selection.

use hue_discovery_core::{DiscoveryError, Result};
use std::net::Ipv4Addr;
use tracing::debug;

/// Widest subnet the scanner will walk
const MAX_SCAN_PREFIX: u32 = 24;

/// An IPv4 interface of this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl LocalInterface {
    /// Length of the netmask in bits
    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).leading_ones()
    }
}

/// Returns the first non-loopback interface with a private IPv4 address.
///
/// When several qualify, enumeration order decides and the rest are ignored.
pub fn first_private_interface() -> Result<LocalInterface> {
    let interfaces = if_addrs::get_if_addrs()?;

    let candidates = interfaces.into_iter().filter_map(|iface| {
        if iface.is_loopback() {
            return None;
        }
        match iface.addr {
            if_addrs::IfAddr::V4(ref v4) => Some(LocalInterface {
                name: iface.name.clone(),
                ip: v4.ip,
                netmask: v4.netmask,
            }),
            _ => None,
        }
    });

    pick_private(candidates).ok_or(DiscoveryError::NoNetworkInterface)
}

fn pick_private(candidates: impl IntoIterator<Item = LocalInterface>) -> Option<LocalInterface> {
    let chosen = candidates.into_iter().find(|iface| iface.ip.is_private());
    if let Some(iface) = &chosen {
        debug!(interface = %iface.name, ip = %iface.ip, "Selected network interface");
    }
    chosen
}

/// Host addresses of the interface's subnet, excluding its own address.
///
/// Subnets wider than /24 are narrowed to the /24 holding the interface
/// address. Point-to-point links (/31, /32) yield nothing.
pub fn subnet_hosts(iface: &LocalInterface) -> Vec<Ipv4Addr> {
    let prefix = iface.prefix_len().max(MAX_SCAN_PREFIX);
    if prefix >= 31 {
        return Vec::new();
    }

    let mask = u32::MAX << (32 - prefix);
    let network = u32::from(iface.ip) & mask;
    let broadcast = network | !mask;
    let own = u32::from(iface.ip);

    (network + 1..broadcast)
        .filter(|addr| *addr != own)
        .map(Ipv4Addr::from)
        .collect()
}
