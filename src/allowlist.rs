//! Source-address allowlist built from CIDR ranges.

use ipnet::IpNet;
use std::net::IpAddr;

use crate::error::DnsError;

/// Loopback ranges that are always permitted.
const LOOPBACK: [&str; 2] = ["127.0.0.0/8", "::1/128"];

/// Immutable set of permitted source ranges.
///
/// Loopback v4/v6 is always present. IPv4-mapped IPv6 sources are tested
/// as their IPv4 form so dual-stack listeners match v4 ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowlist {
    nets: Vec<IpNet>,
}

impl Allowlist {
    /// Build an allowlist from CIDR strings. Entries are trimmed before parsing.
    pub fn new<S: AsRef<str>>(cidrs: &[S]) -> Result<Self, DnsError> {
        let mut nets = Vec::with_capacity(cidrs.len() + LOOPBACK.len());
        for loopback in LOOPBACK {
            nets.push(parse_cidr(loopback)?);
        }
        for cidr in cidrs {
            nets.push(parse_cidr(cidr.as_ref())?);
        }
        Ok(Self { nets })
    }

    /// Check whether `ip` falls inside any stored range.
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = normalize(ip);
        if ip.is_unspecified() {
            return false;
        }
        self.nets.iter().any(|net| net.contains(&ip))
    }
}

fn parse_cidr(entry: &str) -> Result<IpNet, DnsError> {
    entry
        .trim()
        .parse::<IpNet>()
        .map_err(|e| DnsError::InvalidCidr {
            entry: entry.to_string(),
            reason: e.to_string(),
        })
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}
