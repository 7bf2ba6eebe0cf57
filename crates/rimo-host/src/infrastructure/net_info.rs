//! Addresses the host advertises to controllers.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Non-loopback IPv4 addresses a controller on the LAN can use.
///
/// Uses `configured` when it has any; otherwise the address of the
/// outbound route; otherwise `127.0.0.1`.
pub fn advertised_ips(configured: &[IpAddr]) -> Vec<IpAddr> {
    let usable: Vec<IpAddr> = configured
        .iter()
        .copied()
        .filter(|ip| ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified())
        .collect();
    if !usable.is_empty() {
        return usable;
    }
    match outbound_ip() {
        Some(ip) => vec![ip],
        None => vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
    }
}

/// Local address the OS would route public traffic from.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}
