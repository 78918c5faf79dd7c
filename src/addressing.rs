//! Deterministic ZeroTier IPv6 addresses for a network/node pair.

use sha2::{Digest, Sha256};
use std::net::Ipv6Addr;

use crate::error::DnsError;

const NETWORK_ID_BYTES: usize = 8;
const NODE_ID_BYTES: usize = 5;

/// RFC4193 unique local address: `fd`, five bytes of
/// `SHA-256(network || node)`, then the node bytes.
pub fn rfc4193(network_id: &str, node_id: &str) -> Result<Ipv6Addr, DnsError> {
    let network = decode("network id", network_id)?;
    if network.len() != NETWORK_ID_BYTES {
        return Err(invalid("network id", network_id));
    }
    let node = decode("node id", node_id)?;
    if node.is_empty() || node.len() > 10 {
        return Err(invalid("node id", node_id));
    }

    let digest = Sha256::new()
        .chain_update(&network)
        .chain_update(&node)
        .finalize();

    let mut octets = [0u8; 16];
    octets[0] = 0xfd;
    octets[1..6].copy_from_slice(&digest[..5]);
    octets[6..6 + node.len()].copy_from_slice(&node);
    Ok(Ipv6Addr::from(octets))
}

/// 6PLANE address: `fc`, the first four network bytes, then five node bytes.
pub fn six_plane(network_id: &str, node_id: &str) -> Result<Ipv6Addr, DnsError> {
    let network = decode("network id", network_id)?;
    if network.len() < 4 {
        return Err(invalid("network id", network_id));
    }
    let node = decode("node id", node_id)?;
    if node.len() < NODE_ID_BYTES {
        return Err(invalid("node id", node_id));
    }

    let mut octets = [0u8; 16];
    octets[0] = 0xfc;
    octets[1..5].copy_from_slice(&network[..4]);
    octets[5..10].copy_from_slice(&node[..NODE_ID_BYTES]);
    Ok(Ipv6Addr::from(octets))
}

fn decode(kind: &'static str, value: &str) -> Result<Vec<u8>, DnsError> {
    hex::decode(value.trim()).map_err(|_| invalid(kind, value))
}

fn invalid(kind: &'static str, value: &str) -> DnsError {
    DnsError::InvalidIdentifier {
        kind,
        value: value.to_string(),
    }
}
