//! IPv4 CIDR arithmetic
//!
//! Pure value types for reasoning about address ranges: containment,
//! overlap, and the derived network/broadcast/first-host addresses.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing addresses and prefixes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    #[error("invalid CIDR '{0}': expected <address>/<prefix>")]
    InvalidCidr(String),

    #[error("invalid prefix length {0}: must be between 0 and 32")]
    InvalidPrefix(u8),

    #[error("invalid IP address '{0}'")]
    InvalidIp(String),
}

/// An IPv4 network prefix.
///
/// The stored address always has its host bits cleared, so two blocks
/// written differently (`10.4.3.0/16` and `10.4.0.0/16`) compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CidrBlock {
    network: u32,
    prefix_len: u8,
}

impl CidrBlock {
    /// Build a block from any address inside it and a prefix length
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, CidrError> {
        if prefix_len > 32 {
            return Err(CidrError::InvalidPrefix(prefix_len));
        }
        let mask = prefix_mask(prefix_len);
        Ok(Self {
            network: u32::from(address) & mask,
            prefix_len,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    fn mask(&self) -> u32 {
        prefix_mask(self.prefix_len)
    }

    /// Base address with all host bits zeroed
    pub fn network_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network)
    }

    /// Base address with all host bits set to one.
    ///
    /// For a /32 this is the network address itself.
    pub fn broadcast_address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network | !self.mask())
    }

    /// Number of addresses covered by the block (2^32 for /0)
    pub fn address_count(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }

    /// The network address plus one.
    ///
    /// Wraps for `255.255.255.255/32`; callers that need the result inside
    /// the block must check with [`CidrBlock::contains_addr`].
    pub fn first_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.network.wrapping_add(1))
    }

    pub fn contains_addr(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == self.network
    }

    /// True when every address of `other` lies within `self`
    pub fn contains(&self, other: &CidrBlock) -> bool {
        self.prefix_len <= other.prefix_len && other.network & self.mask() == self.network
    }

    /// True when the two ranges share at least one address.
    ///
    /// Prefix ranges are either nested or disjoint, so intersection reduces
    /// to containment in one direction.
    pub fn overlaps(&self, other: &CidrBlock) -> bool {
        self.contains(other) || other.contains(self)
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

/// Parse a dotted-quad IPv4 address
pub fn parse_ip(s: &str) -> Result<Ipv4Addr, CidrError> {
    s.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| CidrError::InvalidIp(s.to_string()))
}

impl FromStr for CidrBlock {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (addr, prefix) = trimmed
            .split_once('/')
            .ok_or_else(|| CidrError::InvalidCidr(s.to_string()))?;

        let address = addr
            .parse::<Ipv4Addr>()
            .map_err(|_| CidrError::InvalidCidr(s.to_string()))?;

        // Reject signs and whitespace that u8 parsing would otherwise tolerate
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CidrError::InvalidCidr(s.to_string()));
        }
        let prefix_len = prefix
            .parse::<u8>()
            .map_err(|_| CidrError::InvalidCidr(s.to_string()))?;

        Self::new(address, prefix_len)
    }
}

impl TryFrom<String> for CidrBlock {
    type Error = CidrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CidrBlock> for String {
    fn from(block: CidrBlock) -> Self {
        block.to_string()
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network_address(), self.prefix_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(s: &str) -> CidrBlock {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_masks_host_bits() {
        let b = block("172.5.10.10/22");
        assert_eq!(b.network_address(), ip("172.5.8.0"));
        assert_eq!(b.prefix_len(), 22);
        assert_eq!(b.to_string(), "172.5.8.0/22");
        assert_eq!(block("10.4.3.0/16"), block("10.4.0.0/16"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "10.0.0.0",
            "10.0.0.0/",
            "10.0.0.0/33",
            "10.0.0/8",
            "10.0.0.0/+8",
            "not-a-cidr",
            "",
        ] {
            assert!(bad.parse::<CidrBlock>().is_err(), "{} should not parse", bad);
        }
        assert_eq!(
            "10.0.0.0/40".parse::<CidrBlock>(),
            Err(CidrError::InvalidPrefix(40))
        );
    }

    #[test]
    fn test_broadcast_address() {
        assert_eq!(block("10.10.10.160/28").broadcast_address(), ip("10.10.10.175"));
        assert_eq!(block("172.4.18.206/30").broadcast_address(), ip("172.4.18.207"));
        assert_eq!(block("172.6.30.0/20").broadcast_address(), ip("172.6.31.255"));
        assert_eq!(block("10.1.2.3/32").broadcast_address(), ip("10.1.2.3"));
        assert_eq!(block("0.0.0.0/0").broadcast_address(), ip("255.255.255.255"));
    }

    #[test]
    fn test_first_host() {
        assert_eq!(block("172.5.10.10/22").first_host(), ip("172.5.8.1"));
        assert_eq!(block("10.5.70.10/18").first_host(), ip("10.5.64.1"));
        assert_eq!(block("172.4.155.98/27").first_host(), ip("172.4.155.97"));
        assert_eq!(block("10.6.142.100/28").first_host(), ip("10.6.142.97"));
    }

    #[test]
    fn test_address_count() {
        assert_eq!(block("10.0.0.0/24").address_count(), 256);
        assert_eq!(block("10.0.0.0/32").address_count(), 1);
        assert_eq!(block("0.0.0.0/0").address_count(), 1 << 32);
    }

    #[test]
    fn test_bounds_are_contained_and_neighbours_are_not() {
        for s in [
            "10.10.10.160/28",
            "172.4.18.206/30",
            "10.0.0.0/8",
            "192.168.1.7/31",
            "192.168.1.7/32",
            "10.20.0.0/16",
        ] {
            let b = block(s);
            let net = u32::from(b.network_address());
            let bcast = u32::from(b.broadcast_address());
            assert!(b.contains_addr(b.network_address()), "{}", s);
            assert!(b.contains_addr(b.broadcast_address()), "{}", s);
            assert!(!b.contains_addr(Ipv4Addr::from(net - 1)), "{}", s);
            assert!(!b.contains_addr(Ipv4Addr::from(bcast + 1)), "{}", s);
        }
    }

    #[test]
    fn test_contains_block() {
        assert!(block("10.4.0.0/16").contains(&block("10.4.3.0/24")));
        assert!(block("10.4.3.0/24").contains(&block("10.4.3.0/24")));
        assert!(!block("10.4.0.0/16").contains(&block("10.5.3.0/24")));
        assert!(!block("10.4.3.0/24").contains(&block("10.4.0.0/16")));
        assert!(block("0.0.0.0/0").contains(&block("192.168.0.0/16")));
    }

    #[test]
    fn test_overlaps_is_symmetric_and_implied_by_containment() {
        let samples = [
            "10.4.0.0/16",
            "10.4.3.0/24",
            "10.4.3.0/16",
            "10.5.0.0/16",
            "10.0.0.0/8",
            "172.4.0.0/16",
            "10.4.3.128/25",
            "10.4.3.255/32",
        ];
        for a in samples {
            for b in samples {
                let (a, b) = (block(a), block(b));
                assert_eq!(a.overlaps(&b), b.overlaps(&a), "{} / {}", a, b);
                if a.contains(&b) {
                    assert!(a.overlaps(&b), "{} contains {}", a, b);
                }
            }
        }
        assert!(block("10.4.3.0/16").overlaps(&block("10.4.0.0/16")));
        assert!(block("10.0.0.0/8").overlaps(&block("10.4.3.255/32")));
        assert!(!block("10.4.0.0/16").overlaps(&block("10.5.0.0/16")));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let b = block("10.3.0.0/24");
        let json = serde_json::to_string(&b).unwrap();
        assert_eq!(json, "\"10.3.0.0/24\"");
        let back: CidrBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_parse_ip() {
        assert_eq!(parse_ip(" 10.0.0.50 ").unwrap(), ip("10.0.0.50"));
        assert!(matches!(parse_ip("10.0.0"), Err(CidrError::InvalidIp(_))));
    }
}
