//! Canonical `host:port` registry addresses.

use crate::config::DEFAULT_PORT;
use crate::error::{Result, SyncError};
use std::fmt;

/// A registry endpoint in canonical `host:port` form.
///
/// Only [`resolve_registry_address`] constructs one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryAddress {
    host: String,
    port: u16,
    canonical: String,
}

impl RegistryAddress {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Loopback registries are always spoken to over plain HTTP.
    pub fn is_loopback(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "::1") || self.host.starts_with("127.")
    }
}

impl fmt::Display for RegistryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl AsRef<str> for RegistryAddress {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

/// Resolve `host` (optionally `host:port`) into a canonical address.
///
/// Port precedence: the trailing segment of `fallback_port` when it is
/// supplied and non-empty; the port carried by `host` only when no fallback
/// source is supplied at all; otherwise [`DEFAULT_PORT`].
pub fn resolve_registry_address(host: &str, fallback_port: Option<&str>) -> Result<RegistryAddress> {
    let input = host.trim();

    let (host, embedded_port) = if input.contains(':') {
        let (h, p) = split_host_port(input)?;
        (h, Some(p))
    } else {
        (input, None)
    };

    if host.is_empty() {
        return Err(invalid(input, "missing host"));
    }

    let port_str = match fallback_port {
        Some(fallback) => {
            let segment = match fallback.rfind(':') {
                Some(idx) => &fallback[idx + 1..],
                None => fallback,
            };
            if segment.is_empty() {
                DEFAULT_PORT
            } else {
                segment
            }
        }
        None => embedded_port.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PORT),
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| invalid(input, &format!("invalid port '{}'", port_str)))?;

    Ok(RegistryAddress {
        host: host.to_string(),
        port,
        canonical: join_host_port(host, port),
    })
}

/// Split `host:port` / `[v6]:port`; rejects what `net.SplitHostPort` rejects.
fn split_host_port(input: &str) -> Result<(&str, &str)> {
    if let Some(rest) = input.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| invalid(input, "missing ']' in address"))?;
        let host = &rest[..end];
        let after = &rest[end + 1..];
        return match after.strip_prefix(':') {
            Some(port) if !port.contains(':') => Ok((host, port)),
            Some(_) => Err(invalid(input, "too many colons in address")),
            None if after.is_empty() => Err(invalid(input, "missing port in address")),
            None => Err(invalid(input, "unexpected characters after ']'")),
        };
    }

    if input.contains(']') {
        return Err(invalid(input, "unexpected ']' in address"));
    }

    let idx = input
        .rfind(':')
        .ok_or_else(|| invalid(input, "missing port in address"))?;
    let (host, port) = (&input[..idx], &input[idx + 1..]);
    if host.contains(':') {
        return Err(invalid(input, "too many colons in address"));
    }
    Ok((host, port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

fn invalid(address: &str, reason: &str) -> SyncError {
    SyncError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_gets_default_port() {
        let addr = resolve_registry_address("r1.example.com", None).unwrap();
        assert_eq!(addr.as_str(), "r1.example.com:5000");
    }

    #[test]
    fn test_embedded_port_kept_without_fallback() {
        let addr = resolve_registry_address("r1.example.com:8443", None).unwrap();
        assert_eq!(addr.as_str(), "r1.example.com:8443");
        assert_eq!(addr.port(), 8443);
    }

    #[test]
    fn test_embedded_port_ignored_with_fallback() {
        for host in ["r1.example.com:8443", "10.0.0.7:1", "[fd00::1]:9000"] {
            let addr = resolve_registry_address(host, Some("6000")).unwrap();
            assert!(addr.as_str().ends_with(":6000"), "{}", addr);

            let addr = resolve_registry_address(host, Some("")).unwrap();
            assert!(addr.as_str().ends_with(":5000"), "{}", addr);
        }
    }

    #[test]
    fn test_empty_fallback_uses_default_port() {
        for host in ["r1.example.com", "127.0.0.1", "sealos.hub"] {
            let addr = resolve_registry_address(host, Some("")).unwrap();
            assert!(addr.as_str().ends_with(":5000"));
        }
    }

    #[test]
    fn test_empty_embedded_port_uses_default_port() {
        let addr = resolve_registry_address("r1.example.com:", None).unwrap();
        assert_eq!(addr.as_str(), "r1.example.com:5000");

        let addr = resolve_registry_address("[::1]:", None).unwrap();
        assert_eq!(addr.as_str(), "[::1]:5000");
    }

    #[test]
    fn test_fallback_with_host_uses_trailing_port() {
        let addr = resolve_registry_address("127.0.0.1", Some("0.0.0.0:41234")).unwrap();
        assert_eq!(addr.as_str(), "127.0.0.1:41234");

        let addr = resolve_registry_address("127.0.0.1", Some(":5050")).unwrap();
        assert_eq!(addr.as_str(), "127.0.0.1:5050");
    }

    #[test]
    fn test_ipv6_is_bracketed() {
        let addr = resolve_registry_address("[::1]:5000", Some("7000")).unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.as_str(), "[::1]:7000");
        assert!(addr.is_loopback());
    }

    #[test]
    fn test_malformed_addresses() {
        for host in ["a:b:c", "[::1", "[::1]", "host]:80", ":5000", "host:notaport"] {
            let err = resolve_registry_address(host, None).unwrap_err();
            assert!(matches!(err, SyncError::InvalidAddress { .. }), "{}", host);
        }
    }

    #[test]
    fn test_loopback_detection() {
        assert!(resolve_registry_address("127.0.0.1", None).unwrap().is_loopback());
        assert!(resolve_registry_address("localhost", None).unwrap().is_loopback());
        assert!(!resolve_registry_address("r1.example.com", None).unwrap().is_loopback());
    }
}
