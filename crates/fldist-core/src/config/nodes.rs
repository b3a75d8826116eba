//! Relay selection from an environment and command line overrides.

use crate::error::{DistError, Result};
use crate::types::Node;

/// Ensure `address` names `peer_id`, appending `/p2p/<peer_id>` if needed.
pub fn address_with_peer(address: &str, peer_id: &str) -> String {
    let segments: Vec<&str> = address.trim_end_matches('/').split('/').collect();
    let n = segments.len();
    let names_peer = segments.last() == Some(&peer_id)
        || (n >= 2 && segments[n - 2] == "p2p")
        || (n >= 2 && segments[n - 2] == peer_id);
    if names_peer {
        address.to_string()
    } else {
        format!("{}/p2p/{}", address.trim_end_matches('/'), peer_id)
    }
}

/// Pick the relay.
///
/// An id plus an address builds an ad-hoc node. An id alone must belong to
/// the environment. Without an id the environment's first node is used.
pub fn select_relay(
    env_name: &str,
    nodes: &[Node],
    node_id: Option<&str>,
    node_addr: Option<&str>,
) -> Result<Node> {
    match (node_id, node_addr) {
        (Some(id), Some(addr)) => Ok(Node::new(id, address_with_peer(addr, id))),
        (Some(id), None) => nodes.iter().find(|n| n.peer_id == id).cloned().ok_or_else(|| {
            let peers: Vec<&str> = nodes.iter().map(|n| n.peer_id.as_str()).collect();
            DistError::Config(format!(
                "'--node {id}' doesn't belong to selected environment ({env_name}):\n\t{}",
                peers.join("\n\t")
            ))
        }),
        (None, Some(_)) => Err(DistError::Config(
            "'--node-addr' requires '--node-id'".to_string(),
        )),
        (None, None) => nodes.first().cloned().ok_or_else(|| {
            DistError::Config(format!("environment '{env_name}' has no nodes"))
        }),
    }
}
