//! Subnet keys for per-origin connection limits.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::net::SocketAddress;

/// Number of leading IPv6 octets that make up a /56 prefix.
const IPV6_PREFIX_OCTETS: usize = 7;

/// Grouping unit for the per-subnet connection limit.
///
/// IPv4 clients are bucketed by exact address, IPv6 clients by their /56
/// prefix (the usual size of an end-site delegation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubnetKey {
    V4(Ipv4Addr),
    V6Prefix([u8; IPV6_PREFIX_OCTETS]),
}

impl SubnetKey {
    /// Subnet of an accepted client, or `None` if the client is exempt.
    ///
    /// Unix-domain clients (no local port) and loopback peers are exempt.
    pub fn for_client(remote: &SocketAddress, local: &SocketAddress) -> Option<Self> {
        if local.port().is_none() {
            return None;
        }
        Self::from_ip(remote.ip()?)
    }

    /// Subnet of a remote IP, or `None` for loopback addresses.
    ///
    /// IPv4-mapped IPv6 addresses are keyed as the IPv4 address they carry.
    pub fn from_ip(ip: IpAddr) -> Option<Self> {
        if is_loopback(ip) {
            return None;
        }

        match ip {
            IpAddr::V4(v4) => Some(SubnetKey::V4(v4)),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Some(SubnetKey::V4(v4)),
                None => {
                    let mut prefix = [0u8; IPV6_PREFIX_OCTETS];
                    prefix.copy_from_slice(&v6.octets()[..IPV6_PREFIX_OCTETS]);
                    Some(SubnetKey::V6Prefix(prefix))
                }
            },
        }
    }

    pub fn is_ipv6_prefix(&self) -> bool {
        matches!(self, SubnetKey::V6Prefix(_))
    }
}

impl fmt::Display for SubnetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetKey::V4(addr) => write!(f, "{}", addr),
            SubnetKey::V6Prefix(prefix) => {
                let mut octets = [0u8; 16];
                octets[..IPV6_PREFIX_OCTETS].copy_from_slice(prefix);
                write!(f, "{}/56", Ipv6Addr::from(octets))
            }
        }
    }
}

/// Loopback check covering 127.0.0.0/8, ::1 and IPv4-mapped 127.0.0.0/8.
pub fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}
