//! Network topology model.
//!
//! One canonical representation of the experiment graph, fed by two input
//! adapters: the graph form (`nodes`/`links`) and the flat form
//! (`routers`). Validation runs at construction so that every shape
//! violation surfaces before any external action.

pub mod connections;
pub mod types;

pub use connections::{connect_targets, router_peers, PeerView};
pub use types::{Endpoint, Link, LinkMode, NodeSpec, Placement, Role, TopologyError};

use crate::config::{NetworkDocument, NodeConfig, RouterConfig, ZidConfig};
use std::collections::HashSet;

/// The parsed node/link graph. Nodes keep declaration order; links are
/// immutable and read-only for the whole run.
#[derive(Debug, Clone)]
pub struct Topology {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<Link>,
}

impl Topology {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Build the canonical topology from the graph form (`nodes`/`links`).
    pub fn from_graph_document(doc: &NetworkDocument) -> Result<Self, TopologyError> {
        let mut nodes = Vec::new();
        if let Some(node_configs) = &doc.nodes {
            for (id, config) in node_configs {
                nodes.push(graph_node(id, config)?);
            }
        }
        let links = doc
            .links
            .iter()
            .flatten()
            .map(|link| Link {
                a: link.a.clone(),
                a_idx: link.a_idx,
                b: link.b.clone(),
                b_idx: link.b_idx,
                cap: link.cap,
            })
            .collect();

        let topology = Topology { nodes, links };
        topology.validate()?;
        Ok(topology)
    }

    /// Build the canonical topology from the flat form (`routers`).
    pub fn from_flat_document(doc: &NetworkDocument) -> Result<Self, TopologyError> {
        let mut nodes = Vec::new();
        if let Some(router_configs) = &doc.routers {
            for (id, config) in router_configs {
                nodes.push(flat_router(id, config)?);
            }
        }
        let topology = Topology {
            nodes,
            links: Vec::new(),
        };
        topology.validate()?;
        Ok(topology)
    }

    /// Structural validation: unique node ids, link references resolve to
    /// existing nodes and in-range endpoint indices, connect targets exist.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(TopologyError::DuplicateNode(node.id.clone()));
            }
        }

        for link in &self.links {
            for (id, index) in [(&link.a, link.a_idx), (&link.b, link.b_idx)] {
                let node = self
                    .node(id)
                    .ok_or_else(|| TopologyError::UnknownNode(id.clone()))?;
                if index >= node.listen_endpoints.len() {
                    return Err(TopologyError::EndpointIndexOutOfRange {
                        node: id.clone(),
                        index,
                        count: node.listen_endpoints.len(),
                    });
                }
            }
        }

        for node in &self.nodes {
            for target in &node.connect {
                if self.node(target).is_none() {
                    return Err(TopologyError::UnknownConnectTarget {
                        node: node.id.clone(),
                        target: target.clone(),
                    });
                }
            }
            if node.mode == Some(LinkMode::Listen) && node.listen_endpoints.is_empty() {
                return Err(TopologyError::NoListenEndpoint(node.id.clone()));
            }
        }

        Ok(())
    }
}

fn graph_node(id: &str, config: &NodeConfig) -> Result<NodeSpec, TopologyError> {
    let role = match &config.role {
        Some(role) => Role::parse(id, role)?,
        None => Role::Router,
    };
    Ok(NodeSpec {
        id: id.to_string(),
        role,
        zid: zid_value(id, config.zid.as_ref())?,
        listen_endpoints: parse_endpoints(config.listen_endpoints.iter())?,
        volume: config.volume.clone(),
        placement: Placement::Local,
        containerized: true,
        mode: None,
        connect: Vec::new(),
    })
}

fn flat_router(id: &str, config: &RouterConfig) -> Result<NodeSpec, TopologyError> {
    let endpoints = config
        .listen_endpoint
        .as_ref()
        .map(|value| value.to_vec())
        .unwrap_or_default();
    // Listen is the default behavior when no mode is declared.
    let mode = match &config.mode {
        Some(mode) => LinkMode::parse(id, mode)?,
        None => LinkMode::Listen,
    };
    let placement = match &config.ssh {
        Some(host) => Placement::Remote { host: host.clone() },
        None => Placement::Local,
    };
    Ok(NodeSpec {
        id: id.to_string(),
        role: Role::Router,
        zid: zid_value(id, config.zid.as_ref())?,
        listen_endpoints: parse_endpoints(endpoints.iter())?,
        volume: config.volume.clone(),
        placement,
        containerized: config.docker.unwrap_or(true),
        mode: Some(mode),
        connect: config.connect.clone().unwrap_or_default(),
    })
}

fn zid_value(id: &str, config: Option<&ZidConfig>) -> Result<Option<String>, TopologyError> {
    match config {
        Some(zid) if zid.set => match &zid.value {
            Some(value) => Ok(Some(value.clone())),
            None => Err(TopologyError::MissingZidValue(id.to_string())),
        },
        _ => Ok(None),
    }
}

fn parse_endpoints<'a, I>(descriptors: I) -> Result<Vec<Endpoint>, TopologyError>
where
    I: Iterator<Item = &'a String>,
{
    descriptors.map(|descriptor| descriptor.parse()).collect()
}
