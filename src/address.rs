use ipnetwork::Ipv4Network;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

// Any routable address works; nothing is ever sent to it.
const ROUTE_PROBE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Returns the address this host uses for outbound LAN traffic.
///
/// Tries the routing table first (a connected UDP socket), then the default
/// interface, and finally degrades to loopback. Never fails.
pub fn local_address() -> Ipv4Addr {
    if let Some(ip) = routed_address() {
        return ip;
    }

    match default_interface_address() {
        Some(ip) => {
            tracing::debug!(ip = %ip, "No route for local address lookup, using default interface");
            ip
        }
        None => {
            tracing::warn!("Could not determine local address, falling back to loopback");
            Ipv4Addr::LOCALHOST
        }
    }
}

fn routed_address() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_PROBE_TARGET).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        _ => None,
    }
}

fn default_interface_address() -> Option<Ipv4Addr> {
    let interface = default_net::get_default_interface().ok()?;
    interface
        .ipv4
        .iter()
        .map(|net| net.addr)
        .find(|ip| !ip.is_loopback() && !ip.is_unspecified())
}

/// The /24 containing `ip`.
///
/// Assumes a class-C sized LAN; networks with other prefix lengths are only
/// partially covered.
pub fn subnet_for(ip: Ipv4Addr) -> Ipv4Network {
    let [a, b, c, _] = ip.octets();
    // A /24 prefix is always valid.
    Ipv4Network::new(Ipv4Addr::new(a, b, c, 0), 24)
        .unwrap_or_else(|_| Ipv4Network::from(Ipv4Addr::new(a, b, c, 0)))
}
