//! Purge authorization by caller address.
//!
//! Purge requests are accepted only from addresses listed in a [`PurgeAcl`].
//! Entries are literal addresses or CIDR blocks; a caller is authorized when
//! any entry matches. The caller address is taken from request extensions
//! populated by the connection layer, never from forwarding headers.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use http::Extensions;
use ipnetwork::IpNetwork;

use crate::error::CacheError;

/// Peer address of the connection a request arrived on.
///
/// Insert this into request extensions when the server does not already
/// provide a `SocketAddr` extension. The value may carry a port suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(String);

impl ClientAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reads the caller address from `extensions`.
    ///
    /// Prefers an explicit [`ClientAddr`], then a `SocketAddr`.
    pub fn from_extensions(extensions: &Extensions) -> Option<Self> {
        extensions
            .get::<ClientAddr>()
            .cloned()
            .or_else(|| extensions.get::<SocketAddr>().map(|addr| Self::from(*addr)))
    }
}

impl From<SocketAddr> for ClientAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<IpAddr> for ClientAddr {
    fn from(addr: IpAddr) -> Self {
        Self(addr.to_string())
    }
}

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered allow-list of addresses and CIDR blocks permitted to purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeAcl {
    entries: Vec<IpNetwork>,
}

impl PurgeAcl {
    /// Parses every entry; any invalid entry rejects the whole list.
    pub fn new<I, S>(entries: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = entries
            .into_iter()
            .map(|entry| {
                let entry = entry.as_ref().trim();
                parse_entry(entry).ok_or_else(|| {
                    CacheError::config(format!("invalid purge ACL entry `{entry}`"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Allows only the IPv4 loopback address.
    pub fn localhost() -> Self {
        Self {
            entries: vec![IpNetwork::from(IpAddr::from([127, 0, 0, 1]))],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if `addr` (optionally with a port) matches any entry.
    pub fn is_authorized(&self, addr: &str) -> bool {
        let Some(ip) = parse_caller(addr) else {
            return false;
        };
        self.entries.iter().any(|network| network.contains(ip))
    }
}

/// Tests whether `addr` (optionally with a port) falls inside `cidr`.
///
/// `cidr` may also be a literal address, which then has to match exactly.
pub fn cidr_contains(cidr: &str, addr: &str) -> bool {
    match (parse_entry(cidr.trim()), parse_caller(addr)) {
        (Some(network), Some(ip)) => network.contains(ip),
        _ => false,
    }
}

fn parse_entry(entry: &str) -> Option<IpNetwork> {
    parse_caller(entry)
        .map(IpNetwork::from)
        .or_else(|| IpNetwork::from_str(entry).ok())
}

/// Parses a caller address, dropping any port suffix.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`), as reported by dual-stack
/// listeners, are returned in their IPv4 form.
fn parse_caller(addr: &str) -> Option<IpAddr> {
    let addr = addr.trim();
    let ip = match SocketAddr::from_str(addr) {
        Ok(socket) => socket.ip(),
        Err(_) => {
            let bare = addr
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .unwrap_or(addr);
            IpAddr::from_str(bare).ok()?
        }
    };
    Some(unmap_ipv4(ip))
}

fn unmap_ipv4(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_contains_matches_blocks_and_literals() {
        assert!(cidr_contains("10.0.0.0/8", "10.0.0.4"));
        assert!(!cidr_contains("10.0.0.0/8", "111.0.0.4"));
        assert!(!cidr_contains("10.0.0.0/8", "111.0.0.4:34567"));
        assert!(cidr_contains("127.0.0.1", "127.0.0.1"));
        assert!(cidr_contains("127.0.0.1", "127.0.0.1:4567"));
        assert!(!cidr_contains("127.0.0.1", "127.0.0.2"));
    }

    #[test]
    fn cidr_contains_handles_ipv6() {
        assert!(cidr_contains("::1", "[::1]:8080"));
        assert!(cidr_contains("fd00::/8", "fd12:3456::1"));
        assert!(!cidr_contains("fd00::/8", "2001:db8::1"));
    }

    #[test]
    fn mapped_ipv4_callers_match_ipv4_entries() {
        assert!(cidr_contains("10.0.0.0/8", "::ffff:10.0.0.4"));
        assert!(cidr_contains("10.0.0.0/8", "[::ffff:10.0.0.4]:8080"));
        assert!(!cidr_contains("10.0.0.0/8", "::ffff:11.0.0.4"));

        let acl = PurgeAcl::localhost();
        assert!(acl.is_authorized("[::ffff:127.0.0.1]:4567"));
        assert!(acl.is_authorized("::ffff:127.0.0.1"));
        assert!(!acl.is_authorized("[::ffff:127.0.0.2]:4567"));
    }

    #[test]
    fn mapped_ipv4_acl_entries_match_ipv4_callers() {
        let acl = PurgeAcl::new(["::ffff:192.168.1.10"]).expect("valid acl");
        assert!(acl.is_authorized("192.168.1.10:80"));
    }

    #[test]
    fn garbage_never_matches() {
        assert!(!cidr_contains("not-an-address", "10.0.0.1"));
        assert!(!cidr_contains("10.0.0.0/8", "somewhere"));
        assert!(!cidr_contains("10.0.0.0/8", ""));
    }

    #[test]
    fn acl_authorizes_when_any_entry_matches() {
        let acl = PurgeAcl::new(["11.11.11.11", "192.168.0.0/16"]).expect("valid acl");
        assert_eq!(acl.len(), 2);
        assert!(acl.is_authorized("11.11.11.11:5000"));
        assert!(acl.is_authorized("192.168.44.2"));
        assert!(!acl.is_authorized("11.11.11.12"));
        assert!(!acl.is_authorized("127.0.0.1"));
    }

    #[test]
    fn invalid_entries_are_config_errors() {
        let err = PurgeAcl::new(["10.0.0.0/8", "10.0.0.0/99"]).expect_err("bad prefix");
        assert!(matches!(err, CacheError::Config(_)));
        assert!(PurgeAcl::new(["localhost"]).is_err());
    }

    #[test]
    fn default_acl_is_loopback_only() {
        let acl = PurgeAcl::localhost();
        assert!(acl.is_authorized("127.0.0.1:4567"));
        assert!(!acl.is_authorized("10.0.0.1"));
    }

    #[test]
    fn client_addr_prefers_explicit_extension() {
        let mut extensions = Extensions::new();
        assert_eq!(ClientAddr::from_extensions(&extensions), None);

        extensions.insert(SocketAddr::from(([10, 0, 0, 1], 443)));
        assert_eq!(
            ClientAddr::from_extensions(&extensions),
            Some(ClientAddr::new("10.0.0.1:443"))
        );

        extensions.insert(ClientAddr::new("127.0.0.1"));
        assert_eq!(
            ClientAddr::from_extensions(&extensions),
            Some(ClientAddr::new("127.0.0.1"))
        );
    }
}
