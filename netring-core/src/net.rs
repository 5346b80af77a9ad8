//! Self-IP detection and address classification helpers
//!
//! Advertise-address resolution is intentionally heuristic: managed
//! environments inject the pod IP through the downward API, bare
//! deployments fall back to the default-route socket trick.

use std::net::{Ipv4Addr, UdpSocket};

/// RFC1918 private-range predicate.
///
/// Loopback is deliberately not considered private here; callers treat
/// 127.0.0.1 as a failed detection, not a usable advertise address.
#[must_use]
pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    match octets[0] {
        10 => true,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        _ => false,
    }
}

/// String-form convenience wrapper; non-IPv4 input is never private.
#[must_use]
pub fn is_private_ip(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().map(is_private_ipv4).unwrap_or(false)
}

/// Determine the local IP by opening a UDP socket toward a well-known
/// external address and reading the chosen source address. No packets are
/// sent. Falls back to loopback when the host has no default route.
#[must_use]
pub fn detect_local_ip() -> String {
    probe_local_ip("8.8.8.8:80")
        .or_else(|| probe_local_ip("1.1.1.1:80"))
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

fn probe_local_ip(external: &str) -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(external).ok()?;
    let addr = socket.local_addr().ok()?;
    if addr.ip().is_loopback() {
        return None;
    }
    Some(addr.ip().to_string())
}

/// Resolve the address this member advertises to the registry.
///
/// `spec` accepts:
/// - `auto`: pod-IP environment hints (`POD_IP`, `HOST_IP`), then the
///   default-route socket trick;
/// - `env:<VARNAME>`: read that variable, socket trick when unset;
/// - anything else: taken as a literal address.
#[must_use]
pub fn resolve_advertise_ip(spec: &str) -> String {
    match spec {
        "auto" => {
            for hint in ["POD_IP", "HOST_IP"] {
                if let Ok(ip) = std::env::var(hint) {
                    if !ip.is_empty() {
                        return ip;
                    }
                }
            }
            let ip = detect_local_ip();
            if is_private_ip(&ip) {
                tracing::debug!(
                    ip = %ip,
                    "auto-detected an RFC1918 address; cross-site peers may need an explicit advertise_ip"
                );
            }
            ip
        }
        other => {
            if let Some(var) = other.strip_prefix("env:") {
                match std::env::var(var) {
                    Ok(ip) if !ip.is_empty() => ip,
                    _ => {
                        tracing::warn!(var = %var, "advertise_ip env var unset, probing");
                        detect_local_ip()
                    }
                }
            } else {
                other.to_string()
            }
        }
    }
}
