//! Node Identity
//!
//! Derives the logical name and routable IPv4 address of this process.
//! Cheap enough to recompute on every hook invocation.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use crate::config::NodeConfig;
use crate::error::{Error, Result};

/// Destination used to pick the outbound interface; never contacted
const ROUTE_PROBE_ADDR: &str = "10.255.255.255:1";

/// Identity of this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Host name as reported by the OS
    pub hostname: String,
    /// Logical name: `<prefix>-<hostname>`
    pub name: String,
    /// Routable address other nodes use to reach this one
    pub address: Ipv4Addr,
}

impl NodeIdentity {
    pub fn new(prefix: &str, hostname: impl Into<String>, address: Ipv4Addr) -> Self {
        let hostname = hostname.into();
        Self {
            name: format!("{}-{}", prefix, hostname),
            hostname,
            address,
        }
    }

    /// Resolve the identity of the running host
    pub fn resolve(config: &NodeConfig) -> Result<Self> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .map_err(|e| Error::Identity(format!("cannot read hostname: {}", e)))?;

        let address = match &config.advertise_address {
            Some(addr) => addr
                .parse()
                .map_err(|_| Error::Identity(format!("invalid advertise address '{}'", addr)))?,
            None => detect_ipv4(&config.interface),
        };

        let identity = Self::new(&config.name_prefix, hostname, address);
        tracing::debug!("Resolved identity {} at {}", identity.name, identity.address);
        Ok(identity)
    }

    /// Address as stored in the seed record
    pub fn address_string(&self) -> String {
        self.address.to_string()
    }
}

/// Interface address, then the outbound route's address, then loopback
pub fn detect_ipv4(interface: &str) -> Ipv4Addr {
    match interface_ipv4(interface) {
        Ok(addr) => return addr,
        Err(e) => tracing::debug!("No IPv4 address on {}: {}", interface, e),
    }

    match outbound_ipv4() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!("Cannot determine a routable address ({}), using loopback", e);
            Ipv4Addr::LOCALHOST
        }
    }
}

/// Local endpoint of a UDP socket "connected" towards a non-local address
pub fn outbound_ipv4() -> std::io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(ROUTE_PROBE_ADDR)?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Ok(*addr.ip()),
        other => Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("unusable local address {}", other),
        )),
    }
}

#[cfg(target_os = "linux")]
const SIOCGIFADDR: libc::c_ulong = 0x8915;

#[cfg(target_os = "linux")]
#[repr(C)]
struct IfreqAddr {
    ifr_name: [u8; 16],
    ifr_addr: libc::sockaddr_in,
    _pad: [u8; 8],
}

/// IPv4 address bound to `interface`, via the SIOCGIFADDR ioctl
#[cfg(target_os = "linux")]
pub fn interface_ipv4(interface: &str) -> std::io::Result<Ipv4Addr> {
    let name = interface.as_bytes();
    if name.is_empty() || name.len() > 15 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid interface name '{}'", interface),
        ));
    }

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut req: IfreqAddr = unsafe { std::mem::zeroed() };
    req.ifr_name[..name.len()].copy_from_slice(name);

    let ret = unsafe { libc::ioctl(fd, SIOCGIFADDR as _, &mut req as *mut _) };
    let err = std::io::Error::last_os_error();
    unsafe { libc::close(fd); }
    if ret < 0 {
        return Err(err);
    }

    let addr = Ipv4Addr::from(u32::from_be(req.ifr_addr.sin_addr.s_addr));
    if addr.is_unspecified() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{} has no IPv4 address", interface),
        ));
    }
    Ok(addr)
}

#[cfg(not(target_os = "linux"))]
pub fn interface_ipv4(interface: &str) -> std::io::Result<Ipv4Addr> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("interface lookup for {} not supported on this platform", interface),
    ))
}
