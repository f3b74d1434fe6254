//! Endpoint registry: pure functions over the host's network identity.
//!
//! No background tasks and no caching — every call reads current OS state.

use std::net::{IpAddr, Ipv4Addr};

// ── Host identity ─────────────────────────────────────────────────────────────

/// Canonical short host name.
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
}

/// Primary LAN IPv4 address of this host, loopback when offline.
pub fn local_ip() -> String {
    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        _ => "127.0.0.1".to_owned(),
    }
}

/// All non-loopback IPv4 addresses of the local interfaces.
pub fn host_ips() -> Vec<String> {
    let Ok(ifas) = local_ip_address::list_afinet_netifas() else {
        return Vec::new();
    };
    ifas.into_iter()
        .filter_map(|(_name, addr)| match addr {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(v4.to_string()),
            _ => None,
        })
        .collect()
}

/// Whether `ip` designates this host.
pub fn is_local(ip: &str) -> bool {
    if ip == "localhost" {
        return true;
    }
    match ip.parse::<Ipv4Addr>() {
        Ok(v4) if v4.is_loopback() => true,
        Ok(_) => host_ips().iter().any(|local| local == ip),
        Err(_) => false,
    }
}

// ── Closest-address matching ──────────────────────────────────────────────────

/// Of the local addresses, the one sharing the longest leading bit prefix
/// with `peer_ip` — i.e. the interface most likely routable to that peer.
/// Falls back to loopback when nothing matches or `peer_ip` is unparseable.
pub fn closest_host_ip(peer_ip: &str) -> String {
    let Ok(peer) = peer_ip.parse::<Ipv4Addr>() else {
        return "127.0.0.1".to_owned();
    };

    let mut best: Option<(u32, String)> = None;
    for local in host_ips() {
        let Ok(v4) = local.parse::<Ipv4Addr>() else {
            continue;
        };
        let len = common_prefix_len(v4, peer);
        if best.as_ref().map_or(true, |(b, _)| len > *b) {
            best = Some((len, local));
        }
    }

    best.map(|(_, ip)| ip).unwrap_or_else(|| "127.0.0.1".to_owned())
}

fn common_prefix_len(a: Ipv4Addr, b: Ipv4Addr) -> u32 {
    (u32::from(a) ^ u32::from(b)).leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_local() {
        assert!(is_local("127.0.0.1"));
        assert!(is_local("localhost"));
        assert!(!is_local("not-an-ip"));
    }

    #[test]
    fn prefix_length_counts_shared_leading_bits() {
        let a: Ipv4Addr = "192.168.1.10".parse().unwrap();
        let b: Ipv4Addr = "192.168.1.77".parse().unwrap();
        let c: Ipv4Addr = "10.0.0.1".parse().unwrap();
        assert!(common_prefix_len(a, b) >= 24);
        assert!(common_prefix_len(a, c) < 8);
        assert_eq!(common_prefix_len(a, a), 32);
    }

    #[test]
    fn unparseable_peer_falls_back_to_loopback() {
        assert_eq!(closest_host_ip("garbage"), "127.0.0.1");
    }
}
