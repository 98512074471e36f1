//! Transport abstraction layer for Outpost.
//!
//! Provides the [`DatagramTransport`] trait: one unconnected socket that
//! every client, master server and query tool talks to. There are no
//! connections at this layer; sessions are built on top from addresses.
//!
//! # Feature Flags
//!
//! - `udp` (default): [`UdpTransport`] over `tokio::net::UdpSocket`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "udp")]
mod udp;

pub use error::TransportError;
#[cfg(feature = "udp")]
pub use udp::UdpTransport;

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Receive buffer size. Anything larger than a UDP payload can be is
/// impossible, so datagrams are never truncated.
pub const MAX_DATAGRAM_LEN: usize = 65536;

/// One received datagram and its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Where it came from. Replies go here and nowhere else.
    pub from: SocketAddr,
    /// Raw bytes, envelope included.
    pub data: Vec<u8>,
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes from {}", self.data.len(), self.from)
    }
}

/// An unconnected datagram socket.
pub trait DatagramTransport: Send + Sync + 'static {
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next datagram.
    async fn recv(&self) -> Result<Datagram, Self::Error>;

    /// Returns a queued datagram without waiting, or `Ok(None)` when the
    /// socket is drained.
    fn try_recv(&self) -> Result<Option<Datagram>, Self::Error>;

    /// Sends one datagram to `to`.
    async fn send_to(&self, data: &[u8], to: SocketAddr) -> Result<(), Self::Error>;

    /// Resolves once a datagram is ready to be read.
    async fn readable(&self) -> Result<(), Self::Error>;

    /// The bound local address.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// Whether `ip` is on a local network.
///
/// LAN clients skip the connection challenge and IP authorization.
/// Loopback, RFC 1918 private ranges, link-local, and IPv6 unique-local
/// addresses count.
pub fn is_lan_address(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_lan_address(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_lan_ranges() {
        for lan in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "172.31.255.255",
            "192.168.1.20",
            "169.254.0.7",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:192.168.0.1",
        ] {
            assert!(is_lan_address(ip(lan)), "{lan} should be LAN");
        }
    }

    #[test]
    fn test_public_addresses_are_not_lan() {
        for public in ["8.8.8.8", "172.32.0.1", "192.169.0.1", "2001:db8::1"] {
            assert!(!is_lan_address(ip(public)), "{public} should be public");
        }
    }

    #[test]
    fn test_datagram_display() {
        let d = Datagram {
            from: "1.2.3.4:27960".parse().unwrap(),
            data: vec![0; 3],
        };
        assert_eq!(d.to_string(), "3 bytes from 1.2.3.4:27960");
    }
}
