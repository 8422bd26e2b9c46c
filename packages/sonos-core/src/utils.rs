//! General utilities shared across the crate.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Address Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Returns true if the address is private, loopback or link-local.
///
/// These are the only destinations the curl fallback and the proxy bypass
/// apply to.
#[must_use]
pub fn is_local_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

/// Parses `host` as an IPv4 literal and classifies it with [`is_local_ipv4`].
///
/// Hostnames and IPv6 literals are never local by this definition.
#[must_use]
pub fn is_local_ipv4_host(host: &str) -> bool {
    host.parse::<Ipv4Addr>().map(is_local_ipv4).unwrap_or(false)
}
