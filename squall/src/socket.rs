use crate::config::PeerConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};

/// Binds the peer's socket: `SO_REUSEADDR`, configured buffer sizes,
/// non-blocking, broadcast-capable for discovery.
pub(crate) fn bind_socket(config: &PeerConfig) -> std::io::Result<UdpSocket> {
    let addr = SocketAddr::new(config.local_address, config.port);
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(config.receive_buffer_size)?;
    socket.set_send_buffer_size(config.send_buffer_size)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// Toggles the IP don't-fragment flag around MTU probe sends. Only Linux
/// exposes this per-socket; elsewhere probes rely on the explicit
/// send-failure path.
#[cfg(target_os = "linux")]
pub(crate) fn set_dont_fragment(socket: &UdpSocket, enabled: bool) {
    use std::os::fd::AsRawFd;
    let value: libc::c_int = if enabled {
        libc::IP_PMTUDISC_DO
    } else {
        libc::IP_PMTUDISC_WANT
    };
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MTU_DISCOVER,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        tracing::trace!("could not toggle don't-fragment");
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_dont_fragment(_socket: &UdpSocket, _enabled: bool) {}
