//! Peer derivation from the link list.
//!
//! A router's outbound connections are not declared directly: they are
//! derived by scanning the full link list for links touching the router
//! and resolving each opposite (node, endpoint-index) pair.

use super::types::{Endpoint, NodeSpec, TopologyError};
use super::Topology;
use std::collections::BTreeMap;

/// What a router must know about its peers: the endpoints it dials out
/// to, and the capacity tag per peer identity token.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerView {
    pub endpoints: Vec<Endpoint>,
    /// Keyed by the peer's zid; BTreeMap keeps serialization deterministic.
    pub capacities: BTreeMap<String, u64>,
}

/// Resolve the peer endpoints and capacities for one graph-form router.
pub fn router_peers(topology: &Topology, node_id: &str) -> Result<PeerView, TopologyError> {
    let mut view = PeerView::default();
    for link in &topology.links {
        let Some((peer_id, peer_idx)) = link.peer_of(node_id) else {
            continue;
        };
        let peer = topology
            .node(peer_id)
            .ok_or_else(|| TopologyError::UnknownNode(peer_id.to_string()))?;
        let endpoint = peer.listen_endpoints.get(peer_idx).ok_or_else(|| {
            TopologyError::EndpointIndexOutOfRange {
                node: peer_id.to_string(),
                index: peer_idx,
                count: peer.listen_endpoints.len(),
            }
        })?;
        view.endpoints.push(endpoint.clone());

        if let Some(cap) = link.cap {
            // The capacity map is keyed by the peer's fixed identity token.
            let zid = peer
                .zid
                .as_ref()
                .ok_or_else(|| TopologyError::PeerZidRequired(peer_id.to_string()))?;
            view.capacities.insert(zid.clone(), cap);
        }
    }
    Ok(view)
}

/// Resolve a flat-form router's declared connect targets to endpoints.
///
/// Each target contributes its first listen endpoint.
pub fn connect_targets(topology: &Topology, node: &NodeSpec) -> Result<Vec<Endpoint>, TopologyError> {
    node.connect
        .iter()
        .map(|target| {
            let peer =
                topology
                    .node(target)
                    .ok_or_else(|| TopologyError::UnknownConnectTarget {
                        node: node.id.clone(),
                        target: target.clone(),
                    })?;
            peer.listen_endpoints
                .first()
                .cloned()
                .ok_or_else(|| TopologyError::TargetHasNoEndpoint(target.clone()))
        })
        .collect()
}
