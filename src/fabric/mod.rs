//! Virtual link fabric.
//!
//! Builds and tears down the emulated network path for one endpoint of
//! one node: a tap device bridged to a veth pair whose far end lives in
//! the node's network namespace. Every artifact name derives from
//! (node id, endpoint index) alone, so cleanup can locate and remove the
//! artifacts without any runtime state, including after a crash.

use crate::topology::NodeSpec;
use crate::utils::shell::{run_best_effort, run_checked, Cmd, Executor};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{debug, info};

/// Well-known directory where namespace symlinks are published for
/// `ip netns`.
pub const NETNS_DIR: &str = "/var/run/netns";

/// Deterministic artifact names for one (node, endpoint index) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInterfaces {
    pub tap: String,
    pub bridge: String,
    pub veth_internal: String,
    pub veth_external: String,
    /// Name the external veth end takes inside the namespace.
    pub guest: String,
}

pub fn interface_names(node_id: &str, endpoint_index: usize) -> EndpointInterfaces {
    let base = format!("{node_id}_{endpoint_index}");
    EndpointInterfaces {
        tap: format!("tap_{base}"),
        bridge: format!("br_{base}"),
        veth_internal: format!("internal_{base}"),
        veth_external: format!("external_{base}"),
        guest: format!("eth{endpoint_index}"),
    }
}

/// Capability to look up a node's live runtime process id.
///
/// Wiring needs the pid to reach the node's network namespace; the
/// session manager provides it from the container runtime.
pub trait ResolveRuntimePid {
    fn resolve_runtime_pid(&self, node: &NodeSpec) -> Result<String>;
}

pub struct LinkFabric<'a> {
    executor: &'a dyn Executor,
}

impl<'a> LinkFabric<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Create the full virtual path for one endpoint, in strict order:
    /// tap → bridge → tap-on-bridge → forwarding rule → namespace symlink
    /// → veth pair → internal-on-bridge → external-into-namespace →
    /// in-namespace rename, up, address.
    pub fn wire(
        &self,
        node: &NodeSpec,
        endpoint_index: usize,
        address: &str,
        pids: &dyn ResolveRuntimePid,
    ) -> Result<()> {
        let names = interface_names(&node.id, endpoint_index);
        let (tap, bridge) = (names.tap.as_str(), names.bridge.as_str());
        let (internal, external) = (names.veth_internal.as_str(), names.veth_external.as_str());
        let guest = names.guest.as_str();
        info!(
            "Wiring endpoint {} of node {} at {}/24",
            endpoint_index, node.id, address
        );

        self.checked(Cmd::sudo("ip").args(["tuntap", "add", tap, "mode", "tap"]))
            .wrap_err("create tap device")?;
        self.checked(Cmd::sudo("ip").args(["link", "set", tap, "promisc", "on", "up"]))
            .wrap_err("bring tap up")?;

        self.checked(Cmd::sudo("ip").args(["link", "add", "name", bridge, "type", "bridge"]))
            .wrap_err("create bridge")?;
        self.checked(Cmd::sudo("ip").args(["link", "set", bridge, "up"]))
            .wrap_err("bring bridge up")?;
        self.checked(Cmd::sudo("ip").args(["link", "set", tap, "master", bridge]))
            .wrap_err("attach tap to bridge")?;

        self.checked(Cmd::sudo("iptables").args([
            "-I",
            "FORWARD",
            "-m",
            "physdev",
            "--physdev-is-bridged",
            "-i",
            bridge,
            "-j",
            "ACCEPT",
        ]))
        .wrap_err("insert forwarding rule")?;

        let pid = pids
            .resolve_runtime_pid(node)
            .wrap_err_with(|| format!("resolve runtime pid of node '{}'", node.id))?;
        self.checked(Cmd::sudo("mkdir").args(["-p", NETNS_DIR]))
            .wrap_err("create namespace directory")?;
        self.checked(
            Cmd::sudo("ln")
                .arg("-sf")
                .arg(format!("/proc/{pid}/ns/net"))
                .arg(format!("{NETNS_DIR}/{pid}")),
        )
        .wrap_err("publish network namespace")?;

        self.checked(Cmd::sudo("ip").args(["link", "add", internal, "type", "veth", "peer", "name", external]))
            .wrap_err("create veth pair")?;
        self.checked(Cmd::sudo("ip").args(["link", "set", internal, "master", bridge]))
            .wrap_err("attach veth to bridge")?;
        self.checked(Cmd::sudo("ip").args(["link", "set", internal, "up"]))
            .wrap_err("bring veth up")?;
        self.checked(Cmd::sudo("ip").args(["link", "set", external, "netns", pid.as_str()]))
            .wrap_err("move veth into namespace")?;

        self.checked(Cmd::sudo("ip").args([
            "netns",
            "exec",
            pid.as_str(),
            "ip",
            "link",
            "set",
            "dev",
            external,
            "name",
            guest,
        ]))
        .wrap_err("rename guest interface")?;
        self.checked(Cmd::sudo("ip").args(["netns", "exec", pid.as_str(), "ip", "link", "set", guest, "up"]))
            .wrap_err("bring guest interface up")?;
        let cidr = format!("{address}/24");
        self.checked(Cmd::sudo("ip").args([
            "netns",
            "exec",
            pid.as_str(),
            "ip",
            "addr",
            "add",
            cidr.as_str(),
            "dev",
            guest,
        ]))
        .wrap_err("assign guest address")?;

        Ok(())
    }

    /// Remove the virtual path for one endpoint.
    ///
    /// Every deletion is attempted regardless of individual failures, and
    /// deleting an absent artifact is a no-op, so this is safe when
    /// `wire` never ran or ran partially.
    pub fn unwire(&self, node: &NodeSpec, endpoint_index: usize) {
        let names = interface_names(&node.id, endpoint_index);
        debug!("Unwiring endpoint {} of node {}", endpoint_index, node.id);

        self.best_effort(Cmd::sudo("iptables").args([
            "-D",
            "FORWARD",
            "-m",
            "physdev",
            "--physdev-is-bridged",
            "-i",
            names.bridge.as_str(),
            "-j",
            "ACCEPT",
        ]));
        self.best_effort(Cmd::sudo("ip").args(["link", "del", names.bridge.as_str()]));
        self.best_effort(Cmd::sudo("ip").args(["link", "del", names.tap.as_str()]));
        self.best_effort(Cmd::sudo("ip").args(["link", "del", names.veth_internal.as_str()]));
        self.best_effort(Cmd::sudo("ip").args(["link", "del", names.veth_external.as_str()]));
    }

    /// Remove all published namespace symlinks.
    ///
    /// The pid (and hence the symlink name) is not stably known across
    /// relaunches, so stale symlinks are swept as one global unit.
    pub fn clear_namespace_links(&self) {
        self.best_effort(Cmd::sudo("sh").arg("-c").arg(format!("rm -f {NETNS_DIR}/*")));
    }

    fn checked(&self, cmd: Cmd) -> Result<()> {
        run_checked(self.executor, &cmd).map(|_| ())
    }

    fn best_effort(&self, cmd: Cmd) {
        run_best_effort(self.executor, &cmd);
    }
}
