//! Core topology data types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

/// Topology shape violations, raised before any external action runs.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),
    #[error("link references unknown node '{0}'")]
    UnknownNode(String),
    #[error("link endpoint index {index} out of range for node '{node}' ({count} endpoint(s))")]
    EndpointIndexOutOfRange {
        node: String,
        index: usize,
        count: usize,
    },
    #[error("invalid endpoint '{0}': expected transport/host:port")]
    InvalidEndpoint(String),
    #[error("unknown role '{role}' for node '{node}'")]
    UnknownRole { node: String, role: String },
    #[error("unknown mode '{mode}' for router '{node}' (expected listen or connect)")]
    UnknownMode { node: String, mode: String },
    #[error("node '{0}' declares zid as set but provides no value")]
    MissingZidValue(String),
    #[error("capacity link requires a fixed zid on peer '{0}'")]
    PeerZidRequired(String),
    #[error("router '{node}' connects to unknown target '{target}'")]
    UnknownConnectTarget { node: String, target: String },
    #[error("connect target '{0}' has no listen endpoint")]
    TargetHasNoEndpoint(String),
    #[error("listen-mode router '{0}' has no listen endpoint")]
    NoListenEndpoint(String),
}

/// What a node runs inside its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Router,
    Publisher,
    Subscriber,
}

impl Role {
    pub fn parse(node: &str, role: &str) -> Result<Self, TopologyError> {
        match role {
            "router" => Ok(Role::Router),
            "pub" | "publisher" => Ok(Role::Publisher),
            "sub" | "subscriber" => Ok(Role::Subscriber),
            other => Err(TopologyError::UnknownRole {
                node: node.to_string(),
                role: other.to_string(),
            }),
        }
    }
}

/// Flat-form router behavior: advertise own endpoints, or dial out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Listen,
    Connect,
}

impl LinkMode {
    pub fn parse(node: &str, mode: &str) -> Result<Self, TopologyError> {
        match mode {
            "listen" => Ok(LinkMode::Listen),
            "connect" => Ok(LinkMode::Connect),
            other => Err(TopologyError::UnknownMode {
                node: node.to_string(),
                mode: other.to_string(),
            }),
        }
    }
}

/// Where a node's session and runtime environment live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Local,
    Remote { host: String },
}

impl Placement {
    pub fn is_local(&self) -> bool {
        matches!(self, Placement::Local)
    }

    pub fn is_remote(&self) -> bool {
        !self.is_local()
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Local => write!(f, "local"),
            Placement::Remote { host } => write!(f, "{host}"),
        }
    }
}

/// A transport/address/port triple a node listens on or dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub transport: String,
    pub host: String,
    pub port: u16,
}

fn endpoint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-z][a-z0-9]*)/([^:/\s]+):(\d+)$").expect("endpoint regex"))
}

impl FromStr for Endpoint {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = endpoint_regex()
            .captures(s)
            .ok_or_else(|| TopologyError::InvalidEndpoint(s.to_string()))?;
        let port = captures[3]
            .parse::<u16>()
            .map_err(|_| TopologyError::InvalidEndpoint(s.to_string()))?;
        Ok(Endpoint {
            transport: captures[1].to_string(),
            host: captures[2].to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.transport, self.host, self.port)
    }
}

/// One logical participant in the experiment topology.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub role: Role,
    /// Fixed identity token, when the node is pinned to one.
    pub zid: Option<String>,
    pub listen_endpoints: Vec<Endpoint>,
    pub volume: Option<PathBuf>,
    pub placement: Placement,
    /// `false` for the flat-form `docker: false` variant, which has no
    /// container and no network-namespace concept.
    pub containerized: bool,
    pub mode: Option<LinkMode>,
    pub connect: Vec<String>,
}

impl NodeSpec {
    /// Session name and container name share one identity.
    pub fn container_name(&self) -> String {
        format!("zenohd_{}", self.id)
    }

    /// Virtual-link wiring applies only to containerized local nodes; the
    /// fabric's commands and pid resolution are host-local.
    pub fn is_wired(&self) -> bool {
        self.containerized && self.placement.is_local()
    }
}

/// A declared relationship between two node endpoints.
#[derive(Debug, Clone)]
pub struct Link {
    pub a: String,
    pub a_idx: usize,
    pub b: String,
    pub b_idx: usize,
    pub cap: Option<u64>,
}

impl Link {
    /// The opposite (node id, endpoint index) pair, when this link touches
    /// the given node.
    pub fn peer_of(&self, node_id: &str) -> Option<(&str, usize)> {
        if self.a == node_id {
            Some((&self.b, self.b_idx))
        } else if self.b == node_id {
            Some((&self.a, self.a_idx))
        } else {
            None
        }
    }
}
