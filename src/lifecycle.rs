//! Node lifecycle controller.
//!
//! Drives one node through
//! `Uninitialized → Cleaned → EnvironmentReady → Wired → Launched →
//! (Running | Failed)` and the reverse teardown to `TornDown`. Teardown
//! is safe to invoke from any state, including `Uninitialized` (the
//! pre-flight stale sweep reuses it) and after a failed launch.

use crate::fabric::LinkFabric;
use crate::orchestrator::RunContext;
use crate::session::SessionManager;
use crate::topology::{connect_targets, router_peers, LinkMode, NodeSpec, Role, Topology};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::debug;

/// Location of the experiment binaries inside the runtime environment.
pub const BINARY_ROOT: &str = "./zenoh/target/x86_64-unknown-linux-musl/fast/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Uninitialized,
    Cleaned,
    EnvironmentReady,
    Wired,
    Launched,
    Running,
    Failed,
    TornDown,
}

pub struct NodeController {
    pub node: NodeSpec,
    state: NodeState,
}

impl NodeController {
    pub fn new(node: NodeSpec) -> Self {
        Self {
            node,
            state: NodeState::Uninitialized,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Drive the node from `Uninitialized` to `Running`.
    ///
    /// Any failure aborts immediately; the orchestrator owns the rollback
    /// of previously constructed nodes.
    pub fn provision(&mut self, ctx: &RunContext) -> Result<()> {
        let sessions = ctx.sessions();
        let fabric = ctx.fabric();

        println!("Cleaning up for node {}", self.node.id);
        self.clean_stale(&sessions, &fabric);
        self.state = NodeState::Cleaned;

        sessions.open_session(&self.node)?;
        sessions.acquire_environment(&self.node, &ctx.image)?;
        // The runtime environment needs a moment to become exec-ready.
        std::thread::sleep(ctx.settle_delay);
        self.state = NodeState::EnvironmentReady;

        if self.node.is_wired() {
            for (index, endpoint) in self.node.listen_endpoints.iter().enumerate() {
                fabric
                    .wire(&self.node, index, &endpoint.host, &sessions)
                    .wrap_err_with(|| {
                        format!("failed to wire endpoint {index} of node '{}'", self.node.id)
                    })?;
            }
        } else {
            debug!(
                "Node {} has no namespace wiring (containerized: {}, placement: {})",
                self.node.id, self.node.containerized, self.node.placement
            );
        }
        self.state = NodeState::Wired;

        let argv = launch_args(&self.node, &ctx.topology)?;
        println!(
            "Launching {} {}",
            role_label(&self.node),
            self.node.container_name()
        );
        sessions.inject(&self.node, &argv)?;
        self.state = NodeState::Launched;

        match sessions.check_exit_status(&self.node) {
            Ok(()) => {
                self.state = NodeState::Running;
                Ok(())
            }
            Err(error) => {
                self.state = NodeState::Failed;
                Err(error)
            }
        }
    }

    /// Tear the node down from whatever state it is in.
    ///
    /// Every step absorbs its own failure, so one step cannot prevent the
    /// remaining ones, and the whole sequence cannot prevent other nodes'
    /// teardown.
    pub fn teardown(&mut self, ctx: &RunContext) {
        let sessions = ctx.sessions();
        let fabric = ctx.fabric();

        if self.node.placement.is_remote() {
            sessions.fetch_logs(&self.node);
        }
        sessions.kill_session(&self.node);
        if self.node.is_wired() {
            for index in 0..self.node.listen_endpoints.len() {
                fabric.unwire(&self.node, index);
            }
        }
        sessions.remove_environment(&self.node);
        if self.node.is_wired() {
            fabric.clear_namespace_links();
        }
        self.state = NodeState::TornDown;
    }

    /// Pre-flight sweep of whatever a previous run may have left behind.
    fn clean_stale(&self, sessions: &SessionManager, fabric: &LinkFabric) {
        if self.node.is_wired() {
            for index in 0..self.node.listen_endpoints.len() {
                fabric.unwire(&self.node, index);
            }
            fabric.clear_namespace_links();
        }
        sessions.ensure_clean(&self.node);
    }
}

/// Synthesize the role-specific launch argv for a node.
pub fn launch_args(node: &NodeSpec, topology: &Topology) -> Result<Vec<String>> {
    let mut argv: Vec<String> = Vec::new();

    if node.containerized {
        argv.extend(["docker", "exec", "-e", "RUST_LOG=trace", "-it"].map(String::from));
        argv.push(node.container_name());
    } else {
        argv.push("RUST_LOG=trace".to_string());
    }

    match node.role {
        Role::Publisher => argv.push(format!("{BINARY_ROOT}examples/z_pub")),
        Role::Subscriber => argv.push(format!("{BINARY_ROOT}examples/z_sub")),
        Role::Router => {
            argv.push(format!("{BINARY_ROOT}zenohd"));
            argv.push("--adminspace-permissions".to_string());
            argv.push("rw".to_string());
            if let Some(zid) = &node.zid {
                argv.push("-i".to_string());
                argv.push(zid.clone());
            }
        }
    }

    // Connect-mode routers dial out only; everyone else advertises.
    if node.mode != Some(LinkMode::Connect) {
        for endpoint in &node.listen_endpoints {
            argv.push("-l".to_string());
            argv.push(endpoint.to_string());
        }
    }

    if node.role == Role::Router {
        match node.mode {
            // Graph form: peers and capacities derive from the link list.
            None => {
                let peers = router_peers(topology, &node.id)?;
                if !peers.capacities.is_empty() {
                    let caps = serde_json::to_string(&peers.capacities)?;
                    argv.push(format!("--cfg=peer_caps:{caps}"));
                }
                for endpoint in &peers.endpoints {
                    argv.push("-e".to_string());
                    argv.push(endpoint.to_string());
                }
            }
            Some(LinkMode::Listen) => {}
            Some(LinkMode::Connect) => {
                for endpoint in connect_targets(topology, node)? {
                    argv.push("-e".to_string());
                    argv.push(endpoint.to_string());
                }
            }
        }
    }

    Ok(argv)
}

fn role_label(node: &NodeSpec) -> &'static str {
    match node.role {
        Role::Router => "router",
        Role::Publisher => "publisher",
        Role::Subscriber => "subscriber",
    }
}
