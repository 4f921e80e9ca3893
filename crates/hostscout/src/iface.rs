// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network interface discovery for broadcast and multicast queries.
//!
//! Broadcast queries go to the IPv4 broadcast address of every interface
//! that is up, broadcast-capable, and not loopback; multicast queries go to
//! the discovery group scoped to each of those interfaces. On Linux the
//! interface set is read from `ip addr show`; elsewhere (or when `ip` is
//! unavailable, e.g. minimal containers) the `local_ip_address` crate is
//! used, which cannot report per-interface broadcast addresses -- the
//! limited broadcast address stands in then.

use std::io;
use std::net::Ipv4Addr;

/// One discovered network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetInterface {
    /// Kernel interface index (0 = unknown).
    pub index: u32,
    pub name: String,
    pub up: bool,
    pub broadcast_capable: bool,
    pub loopback: bool,
    /// IPv4 broadcast addresses of this interface.
    pub ipv4_broadcast: Vec<Ipv4Addr>,
    /// Interface has at least one IPv6 address.
    pub has_ipv6: bool,
}

impl NetInterface {
    /// Interfaces queries are sent on: up, broadcast-capable, not loopback.
    pub fn eligible(&self) -> bool {
        self.up && self.broadcast_capable && !self.loopback
    }
}

/// Enumerate network interfaces.
pub fn list_interfaces() -> io::Result<Vec<NetInterface>> {
    list_interfaces_platform()
}

/// IPv4 broadcast targets across all eligible interfaces.
///
/// Falls back to the limited broadcast address when no per-interface
/// broadcast address is known.
pub fn broadcast_targets(interfaces: &[NetInterface]) -> Vec<Ipv4Addr> {
    let mut targets: Vec<Ipv4Addr> = interfaces
        .iter()
        .filter(|i| i.eligible())
        .flat_map(|i| i.ipv4_broadcast.iter().copied())
        .collect();
    targets.dedup();

    if targets.is_empty() {
        targets.push(Ipv4Addr::BROADCAST);
    }
    targets
}

/// Interface indices to scope IPv6 multicast queries to.
pub fn multicast_v6_indices(interfaces: &[NetInterface]) -> Vec<u32> {
    interfaces
        .iter()
        .filter(|i| i.eligible() && i.has_ipv6 && i.index != 0)
        .map(|i| i.index)
        .collect()
}

/// Linux: parse `ip addr show`. Falls back to the portable path if the
/// `ip` command is unavailable.
#[cfg(target_os = "linux")]
fn list_interfaces_platform() -> io::Result<Vec<NetInterface>> {
    use std::process::Command;

    let output = match Command::new("ip").args(["addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => {
            tracing::debug!("'ip' command not found, using local_ip_address crate");
            return list_interfaces_fallback();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_ip_addr_output(&stdout))
}

#[cfg(not(target_os = "linux"))]
fn list_interfaces_platform() -> io::Result<Vec<NetInterface>> {
    list_interfaces_fallback()
}

/// Parse the output of `ip addr show`.
///
/// Header lines look like `2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> ...`,
/// followed by indented `inet`/`inet6` address lines.
fn parse_ip_addr_output(text: &str) -> Vec<NetInterface> {
    let mut interfaces: Vec<NetInterface> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_start();

        if !line.starts_with(' ') && line.contains('<') {
            // Header line: "index: name: <FLAGS> ..."
            let mut parts = line.splitn(3, ':');
            let index = parts
                .next()
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let name = parts.next().map(|s| s.trim()).unwrap_or("");
            let flags = line
                .split_once('<')
                .and_then(|(_, rest)| rest.split_once('>'))
                .map(|(flags, _)| flags)
                .unwrap_or("");
            let flag_set: Vec<&str> = flags.split(',').collect();

            interfaces.push(NetInterface {
                index,
                // VLAN names ("eth0.100@eth0") keep only the device part.
                name: name.split('@').next().unwrap_or(name).to_string(),
                up: flag_set.contains(&"UP"),
                broadcast_capable: flag_set.contains(&"BROADCAST"),
                loopback: flag_set.contains(&"LOOPBACK"),
                ipv4_broadcast: Vec::new(),
                has_ipv6: false,
            });
        } else if let Some(current) = interfaces.last_mut() {
            if let Some(rest) = trimmed.strip_prefix("inet ") {
                let mut tokens = rest.split_whitespace();
                let _addr = tokens.next();
                // "brd <addr>" follows the prefix on broadcast interfaces.
                while let Some(tok) = tokens.next() {
                    if tok == "brd" {
                        if let Some(brd) = tokens.next().and_then(|s| s.parse::<Ipv4Addr>().ok()) {
                            current.ipv4_broadcast.push(brd);
                        }
                        break;
                    }
                }
            } else if trimmed.starts_with("inet6 ") {
                current.has_ipv6 = true;
            }
        }
    }

    interfaces
}

/// Portable interface discovery via the `local_ip_address` crate.
///
/// Broadcast addresses are not reported on this path; callers fall back to
/// the limited broadcast address.
fn list_interfaces_fallback() -> io::Result<Vec<NetInterface>> {
    use std::collections::BTreeMap;
    use std::net::IpAddr;

    let netifas = match local_ip_address::list_afinet_netifas() {
        Ok(list) => list,
        Err(e) => {
            tracing::debug!("failed to list network interfaces: {}", e);
            return Ok(Vec::new());
        }
    };

    let mut by_name: BTreeMap<String, NetInterface> = BTreeMap::new();
    for (name, ip) in netifas {
        let entry = by_name.entry(name.clone()).or_insert_with(|| NetInterface {
            index: if_index(&name).unwrap_or(0),
            name: name.clone(),
            up: true,
            broadcast_capable: true,
            loopback: false,
            ipv4_broadcast: Vec::new(),
            has_ipv6: false,
        });
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_loopback() {
                    entry.loopback = true;
                    entry.broadcast_capable = false;
                }
            }
            IpAddr::V6(_) => entry.has_ipv6 = true,
        }
    }

    Ok(by_name.into_values().collect())
}

#[cfg(unix)]
fn if_index(name: &str) -> Option<u32> {
    let c_name = std::ffi::CString::new(name).ok()?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    (index != 0).then_some(index)
}

#[cfg(not(unix))]
fn if_index(_name: &str) -> Option<u32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_ADDR_OUTPUT: &str = "\
1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN group default qlen 1000
    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00
    inet 127.0.0.1/8 scope host lo
       valid_lft forever preferred_lft forever
    inet6 ::1/128 scope host
       valid_lft forever preferred_lft forever
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP group default qlen 1000
    link/ether 52:54:00:12:34:56 brd ff:ff:ff:ff:ff:ff
    inet 192.168.1.10/24 brd 192.168.1.255 scope global dynamic eth0
       valid_lft 86050sec preferred_lft 86050sec
    inet6 fe80::5054:ff:fe12:3456/64 scope link
       valid_lft forever preferred_lft forever
3: docker0: <NO-CARRIER,BROADCAST,MULTICAST,UP> mtu 1500 qdisc noqueue state DOWN group default
    link/ether 02:42:ac:11:00:01 brd ff:ff:ff:ff:ff:ff
    inet 172.17.0.1/16 brd 172.17.255.255 scope global docker0
       valid_lft forever preferred_lft forever
";

    #[test]
    fn test_parse_headers_and_flags() {
        let interfaces = parse_ip_addr_output(IP_ADDR_OUTPUT);
        assert_eq!(interfaces.len(), 3);

        let lo = &interfaces[0];
        assert_eq!(lo.index, 1);
        assert_eq!(lo.name, "lo");
        assert!(lo.loopback);
        assert!(!lo.broadcast_capable);

        let eth0 = &interfaces[1];
        assert_eq!(eth0.index, 2);
        assert_eq!(eth0.name, "eth0");
        assert!(eth0.up);
        assert!(eth0.broadcast_capable);
        assert!(!eth0.loopback);
        assert!(eth0.has_ipv6);
        assert_eq!(eth0.ipv4_broadcast, vec!["192.168.1.255".parse::<Ipv4Addr>().unwrap()]);
    }

    #[test]
    fn test_eligible_excludes_loopback() {
        let interfaces = parse_ip_addr_output(IP_ADDR_OUTPUT);
        let eligible: Vec<&str> = interfaces
            .iter()
            .filter(|i| i.eligible())
            .map(|i| i.name.as_str())
            .collect();
        assert_eq!(eligible, vec!["eth0", "docker0"]);
    }

    #[test]
    fn test_broadcast_targets() {
        let interfaces = parse_ip_addr_output(IP_ADDR_OUTPUT);
        let targets = broadcast_targets(&interfaces);
        assert!(targets.contains(&"192.168.1.255".parse().unwrap()));
        assert!(targets.contains(&"172.17.255.255".parse().unwrap()));
        // Loopback never contributes a target.
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_broadcast_targets_fallback_to_limited() {
        let targets = broadcast_targets(&[]);
        assert_eq!(targets, vec![Ipv4Addr::BROADCAST]);
    }

    #[test]
    fn test_multicast_v6_indices() {
        let interfaces = parse_ip_addr_output(IP_ADDR_OUTPUT);
        assert_eq!(multicast_v6_indices(&interfaces), vec![2]);
    }

    #[test]
    fn test_parse_vlan_name() {
        let text = "4: eth0.100@eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500\n";
        let interfaces = parse_ip_addr_output(text);
        assert_eq!(interfaces[0].name, "eth0.100");
    }
}
