// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery transport.
//!
//! Owns the UDP endpoints on the well-known discovery port and originates
//! every query: interface broadcast, IPv6 multicast, loopback, and unicast
//! to explicit targets. Sends are fire-and-forget -- there is no response
//! correlation, retry, or timeout; the scheduled repetition of queries is
//! the only reliability mechanism, so send failures are logged at debug
//! level and swallowed.
//!
//! Inbound datagrams are filtered before decoding: anything from an
//! automatically-assigned (link-local) IPv4 source is dropped as noise.

use crate::iface::{self, NetInterface};
use crate::protocol;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use tokio::net::UdpSocket;
use tracing::debug;

/// Link-local IPv6 multicast group queried on every eligible interface.
pub const DISCOVERY_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x7430);

/// Upper bound on a single scan-a-block request.
pub const MAX_SCAN_RANGE: u32 = 256;

const MAX_DATAGRAM: usize = 2048;

/// UDP endpoints for discovery queries and answers.
pub struct DiscoveryTransport {
    v4: UdpSocket,
    v6: Option<UdpSocket>,
    port: u16,
}

impl DiscoveryTransport {
    /// Bind the discovery endpoints.
    ///
    /// The IPv4 socket is broadcast-enabled; the IPv6 socket is v6-only and
    /// joins the discovery multicast group on every eligible interface. A
    /// machine without usable IPv6 still works -- the v6 endpoint is simply
    /// absent then.
    pub fn bind(bind_address: IpAddr, port: u16) -> io::Result<Self> {
        let v4_bind = match bind_address {
            IpAddr::V4(addr) => addr,
            IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };

        let v4 = Self::bind_v4(v4_bind, port)?;

        let v6 = match Self::bind_v6(port) {
            Ok(socket) => Some(socket),
            Err(e) => {
                debug!("IPv6 discovery endpoint unavailable: {}", e);
                None
            }
        };

        Ok(Self { v4, v6, port })
    }

    fn bind_v4(addr: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::V4(SocketAddrV4::new(addr, port)).into())?;
        UdpSocket::from_std(socket.into())
    }

    fn bind_v6(port: u16) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_only_v6(true)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(
            &SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0)).into(),
        )?;

        // Join the discovery group on every eligible interface. Join failures
        // are non-fatal: an interface without multicast support just stays
        // unicast-reachable.
        if let Ok(interfaces) = iface::list_interfaces() {
            for index in iface::multicast_v6_indices(&interfaces) {
                match socket.join_multicast_v6(&DISCOVERY_MULTICAST_V6, index) {
                    Ok(()) => debug!("joined {} on interface {}", DISCOVERY_MULTICAST_V6, index),
                    Err(e) => debug!(
                        "join_multicast_v6({}) on interface {} failed (non-fatal): {}",
                        DISCOVERY_MULTICAST_V6, index, e
                    ),
                }
            }
        }

        UdpSocket::from_std(socket.into())
    }

    /// Local address of the IPv4 endpoint.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.v4.local_addr()
    }

    /// Send the query to the broadcast address of every eligible interface
    /// and to the IPv6 discovery group scoped to each of them.
    pub async fn send_broadcast(&self, interfaces: &[NetInterface]) {
        for target in iface::broadcast_targets(interfaces) {
            let dest = SocketAddr::V4(SocketAddrV4::new(target, self.port));
            if let Err(e) = self.v4.send_to(protocol::query_bytes(), dest).await {
                debug!("broadcast query to {} failed: {}", dest, e);
            }
        }

        if let Some(v6) = &self.v6 {
            for index in iface::multicast_v6_indices(interfaces) {
                if let Err(e) = SockRef::from(v6).set_multicast_if_v6(index) {
                    debug!("selecting interface {} for multicast failed: {}", index, e);
                    continue;
                }
                let dest =
                    SocketAddr::V6(SocketAddrV6::new(DISCOVERY_MULTICAST_V6, self.port, 0, 0));
                if let Err(e) = v6.send_to(protocol::query_bytes(), dest).await {
                    debug!("multicast query on interface {} failed: {}", index, e);
                }
            }
        }
    }

    /// Send the query to both loopback addresses, so an agent on this
    /// machine is found promptly.
    pub async fn send_loopback(&self) {
        let dest = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, self.port));
        if let Err(e) = self.v4.send_to(protocol::query_bytes(), dest).await {
            debug!("loopback query to {} failed: {}", dest, e);
        }

        if let Some(v6) = &self.v6 {
            let dest = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::LOCALHOST, self.port, 0, 0));
            if let Err(e) = v6.send_to(protocol::query_bytes(), dest).await {
                debug!("loopback query to {} failed: {}", dest, e);
            }
        }
    }

    /// Send the query to one explicit target.
    pub async fn send_to(&self, dest: SocketAddr) {
        let socket = match (&dest, &self.v6) {
            (SocketAddr::V6(_), Some(v6)) => v6,
            (SocketAddr::V6(_), None) => {
                debug!("no IPv6 endpoint, dropping query to {}", dest);
                return;
            }
            (SocketAddr::V4(_), _) => &self.v4,
        };
        if let Err(e) = socket.send_to(protocol::query_bytes(), dest).await {
            debug!("query to {} failed: {}", dest, e);
        }
    }

    /// Send the query to up to [`MAX_SCAN_RANGE`] consecutive IPv4
    /// addresses starting at `start`.
    pub async fn send_range(&self, start: Ipv4Addr, count: u32) {
        let count = count.clamp(1, MAX_SCAN_RANGE);
        let base = u32::from(start);
        for offset in 0..count {
            let Some(raw) = base.checked_add(offset) else {
                break;
            };
            self.send_to(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(raw),
                self.port,
            )))
            .await;
        }
    }

    /// Receive the next datagram that passes the source filter.
    pub async fn recv(&self) -> io::Result<(Vec<u8>, SocketAddr)> {
        let mut buf_v4 = [0u8; MAX_DATAGRAM];
        let mut buf_v6 = [0u8; MAX_DATAGRAM];
        loop {
            let (payload, source) = match &self.v6 {
                Some(v6) => tokio::select! {
                    result = self.v4.recv_from(&mut buf_v4) => {
                        let (len, source) = result?;
                        (&buf_v4[..len], source)
                    }
                    result = v6.recv_from(&mut buf_v6) => {
                        let (len, source) = result?;
                        (&buf_v6[..len], source)
                    }
                },
                None => {
                    let (len, source) = self.v4.recv_from(&mut buf_v4).await?;
                    (&buf_v4[..len], source)
                }
            };

            if is_filtered_source(source.ip()) {
                debug!("dropping datagram from link-local source {}", source);
                continue;
            }
            return Ok((payload.to_vec(), source));
        }
    }
}

/// True for sources the transport silently drops: automatically-assigned
/// (link-local) IPv4 addresses.
pub fn is_filtered_source(ip: IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4.is_link_local())
}

/// Format a sender address for the registry.
///
/// IPv4 is used verbatim and is always the preferred protocol. IPv6 is
/// canonicalized, and only globally-routable addresses are preferred --
/// loopback, link-local, and unique-local stay at the back of a host's
/// address list.
pub fn format_source(ip: IpAddr) -> (String, bool) {
    match ip {
        IpAddr::V4(v4) => (v4.to_string(), true),
        IpAddr::V6(v6) => (v6.to_string(), is_global_v6(v6)),
    }
}

fn is_global_v6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    let link_local = (first & 0xffc0) == 0xfe80;
    let unique_local = (first & 0xfe00) == 0xfc00;
    !(addr.is_loopback() || addr.is_unspecified() || addr.is_multicast() || link_local || unique_local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_drops_link_local_v4() {
        assert!(is_filtered_source("169.254.12.7".parse().unwrap()));
        assert!(!is_filtered_source("10.0.0.5".parse().unwrap()));
        assert!(!is_filtered_source("192.168.1.9".parse().unwrap()));
        // The filter targets auto-configured IPv4 only.
        assert!(!is_filtered_source("fe80::1".parse().unwrap()));
    }

    #[test]
    fn test_format_source_v4_is_preferred() {
        let (addr, preferred) = format_source("10.0.0.5".parse().unwrap());
        assert_eq!(addr, "10.0.0.5");
        assert!(preferred);
    }

    #[test]
    fn test_format_source_v6() {
        let (addr, preferred) = format_source("2001:db8::1".parse().unwrap());
        assert_eq!(addr, "2001:db8::1");
        assert!(preferred);

        let (_, preferred) = format_source("fe80::1".parse().unwrap());
        assert!(!preferred);

        let (_, preferred) = format_source("fd00::1".parse().unwrap());
        assert!(!preferred);

        let (_, preferred) = format_source("::1".parse().unwrap());
        assert!(!preferred);
    }

    #[tokio::test]
    async fn test_send_to_and_recv_roundtrip() {
        let transport =
            DiscoveryTransport::bind("127.0.0.1".parse().unwrap(), 0).expect("bind transport");
        let transport_addr = transport.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.expect("bind peer");
        let peer_addr = peer.local_addr().unwrap();

        // Console -> peer: the query bytes.
        transport.send_to(peer_addr).await;
        let mut buf = [0u8; 256];
        let (len, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], protocol::query_bytes());
        assert_eq!(from.port(), transport_addr.port());

        // Peer -> console: an answer.
        let announce = br#"{"command":"ANNOUNCE","id":"h1","name":"Server1"}"#;
        peer.send_to(announce, transport_addr).await.unwrap();
        let (payload, source) = transport.recv().await.unwrap();
        assert_eq!(payload, announce);
        assert_eq!(source.port(), peer_addr.port());
    }
}
