//! Routing interface queries.

use std::net::{SocketAddr, UdpSocket};

use nd_types::{NdError, NdResult, SockAddr};

/// Answers which local address the host would use to reach a remote one.
pub trait RouteQuery: Send + Sync {
    fn local_for(&self, remote: &SockAddr) -> NdResult<SockAddr>;
}

/// Asks the OS routing table through an unconnected datagram socket. No
/// packet is sent; connecting only selects the source address.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRoute;

impl RouteQuery for SystemRoute {
    fn local_for(&self, remote: &SockAddr) -> NdResult<SockAddr> {
        let target = probe_target(remote.to_socket_addr());
        let bind: SocketAddr = if target.is_ipv4() {
            ([0u8, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).map_err(map_route_err)?;
        socket.connect(target).map_err(map_route_err)?;
        let local = socket.local_addr().map_err(map_route_err)?;
        Ok(SockAddr::from(local))
    }
}

/// Connecting a datagram socket to port zero is rejected, so route probes
/// for port-less addresses use the discard port instead.
fn probe_target(mut addr: SocketAddr) -> SocketAddr {
    if addr.port() == 0 {
        addr.set_port(9);
    }
    addr
}

fn map_route_err(err: std::io::Error) -> NdError {
    match err.raw_os_error() {
        Some(code)
            if code == libc::ENETUNREACH
                || code == libc::ENETDOWN
                || code == libc::EHOSTUNREACH =>
        {
            NdError::NetworkUnreachable
        }
        Some(code) if code == libc::EINVAL => NdError::InvalidAddress,
        _ => NdError::Unsuccessful(err),
    }
}
