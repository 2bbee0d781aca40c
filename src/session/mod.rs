//! Process session manager.
//!
//! Each node gets one isolated runtime environment (a docker container,
//! or a bare shell context for the `docker: false` variant) and one
//! persistent tmux session the launch command is injected into. Sessions
//! are fire-and-forget: the injected command persists its own exit status
//! to a well-known marker file, read back by [`SessionManager::check_exit_status`].
//! Remote placement routes every command through ssh.

use crate::config::DockerImage;
use crate::fabric::ResolveRuntimePid;
use crate::topology::{NodeSpec, Placement};
use crate::utils::shell::{run_best_effort, run_checked, shell_quote, Cmd, Executor};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// Marker file the injected command writes its exit status to.
/// One value at a time; read and deleted by the health check.
pub const EXIT_MARKER: &str = "/tmp/exit_code";

/// POSIX exit code for an interrupted process, treated as success.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Mount point of the node volume inside the container.
pub const VOLUME_MOUNT: &str = "/zenoh";

/// When the launcher itself runs nested, this variable carries the outer
/// host path prefix substituted into volume mount sources.
pub const HOST_PATH_ENV: &str = "HOST_PROJECT_DIR";

pub struct SessionManager<'a> {
    executor: &'a dyn Executor,
    run_dir: &'a Path,
    user_name: Option<&'a str>,
    default_volume: Option<&'a Path>,
}

impl<'a> SessionManager<'a> {
    pub fn new(
        executor: &'a dyn Executor,
        run_dir: &'a Path,
        user_name: Option<&'a str>,
        default_volume: Option<&'a Path>,
    ) -> Self {
        Self {
            executor,
            run_dir,
            user_name,
            default_volume,
        }
    }

    fn placed(&self, cmd: Cmd, placement: &Placement) -> Cmd {
        match placement {
            Placement::Local => cmd,
            Placement::Remote { host } => cmd.via_ssh(self.user_name, host),
        }
    }

    /// Idempotently remove any pre-existing session and runtime
    /// environment with the node's name. Never errors when absent.
    pub fn ensure_clean(&self, node: &NodeSpec) {
        let name = node.container_name();
        debug!("Removing stale session/environment for {name}");
        if node.containerized {
            run_best_effort(
                self.executor,
                &self.placed(
                    Cmd::new("docker").args(["container", "rm", "-f", name.as_str()]),
                    &node.placement,
                ),
            );
        }
        run_best_effort(
            self.executor,
            &self.placed(
                Cmd::new("tmux").args(["kill-session", "-t", name.as_str()]),
                &node.placement,
            ),
        );
    }

    /// Create the persistent named command session at the node's placement.
    pub fn open_session(&self, node: &NodeSpec) -> Result<()> {
        let name = node.container_name();
        run_checked(
            self.executor,
            &self.placed(
                Cmd::new("tmux").args(["new-session", "-d", "-s", name.as_str()]),
                &node.placement,
            ),
        )
        .wrap_err_with(|| format!("failed to open session for node '{}'", node.id))?;
        Ok(())
    }

    /// Create the node's runtime environment through its session.
    ///
    /// Containerized nodes get a detached container with no network (the
    /// fabric provides connectivity) and an optional volume mount; bare
    /// nodes only get the run directory as working directory. The line
    /// records its exit status at the marker path.
    pub fn acquire_environment(&self, node: &NodeSpec, image: &DockerImage) -> Result<()> {
        let run_dir = self.run_dir.display();
        let mut line = String::new();
        if node.containerized && image.clean_first {
            line.push_str(&format!("docker rmi {} 2>/dev/null || true && ", image.tag));
        }
        line.push_str(&format!("mkdir -p {run_dir} && cd {run_dir}"));
        if node.containerized {
            let volume_arg = match self.resolved_volume(node)? {
                Some(host_path) => format!(" -v {}:{}", host_path.display(), VOLUME_MOUNT),
                None => String::new(),
            };
            line.push_str(&format!(
                " && docker run -dit --name {} --network none --rm --entrypoint /bin/sh{} {}",
                node.container_name(),
                volume_arg,
                image.tag
            ));
        }
        line.push_str(&format!("; echo $? > {EXIT_MARKER}"));

        info!(
            "Acquiring runtime environment for {} ({})",
            node.id, node.placement
        );
        self.send_line(node, &line)
    }

    /// Inject one launch command into the node's session.
    ///
    /// The argv is shell-quoted into a single line, stdout/stderr are
    /// teed to the per-node log files, and the exit status is persisted
    /// at the marker path.
    pub fn inject(&self, node: &NodeSpec, argv: &[String]) -> Result<()> {
        let name = node.container_name();
        let command = argv
            .iter()
            .map(|token| shell_quote(token))
            .collect::<Vec<_>>()
            .join(" ");
        let line = format!(
            "{command} > >(tee ./{name}.log) 2> >(tee ./{name}_err.log >&2); echo $? > {EXIT_MARKER}"
        );
        self.send_line(node, &line)
    }

    /// Read and delete the exit-status marker.
    ///
    /// `0` and the interrupt code are success; a missing or empty marker
    /// means the launch is still running, which is also success. Anything
    /// else is a launch failure, fatal to the whole run.
    pub fn check_exit_status(&self, node: &NodeSpec) -> Result<()> {
        let read = self.executor.run(&self.placed(
            Cmd::new("cat").arg(EXIT_MARKER),
            &node.placement,
        ))?;
        run_best_effort(
            self.executor,
            &self.placed(Cmd::new("rm").args(["-f", EXIT_MARKER]), &node.placement),
        );

        if !read.success() || read.stdout.trim().is_empty() {
            debug!("No exit marker for {}; launch still running", node.id);
            return Ok(());
        }
        let code: i32 = read.stdout.trim().parse().wrap_err_with(|| {
            format!(
                "unreadable exit marker for node '{}': {:?}",
                node.id,
                read.stdout.trim()
            )
        })?;
        match code {
            0 | INTERRUPT_EXIT_CODE => {
                debug!("Node {} launch reported exit code {code}", node.id);
                Ok(())
            }
            _ => bail!(
                "node '{}' on {} failed to launch (exit code {code})",
                node.id,
                node.placement
            ),
        }
    }

    /// Kill the node's session, absorbing failure when absent.
    pub fn kill_session(&self, node: &NodeSpec) {
        let name = node.container_name();
        run_best_effort(
            self.executor,
            &self.placed(
                Cmd::new("tmux").args(["kill-session", "-t", name.as_str()]),
                &node.placement,
            ),
        );
    }

    /// Remove the node's runtime environment, absorbing failure when absent.
    pub fn remove_environment(&self, node: &NodeSpec) {
        if !node.containerized {
            return;
        }
        let name = node.container_name();
        run_best_effort(
            self.executor,
            &self.placed(
                Cmd::new("docker").args(["container", "rm", "-f", name.as_str()]),
                &node.placement,
            ),
        );
    }

    /// Transfer a remote node's log files back into the local run
    /// directory. Best-effort; local nodes are a no-op.
    pub fn fetch_logs(&self, node: &NodeSpec) {
        let Placement::Remote { host } = &node.placement else {
            return;
        };
        let name = node.container_name();
        let target = match self.user_name {
            Some(user) => format!("{user}@{host}"),
            None => host.clone(),
        };
        let source = format!("{}:{}/{}*.log", target, self.run_dir.display(), name);
        let dest = format!("{}/", self.run_dir.display());
        info!("Fetching logs of {} from {}", node.id, host);
        run_best_effort(
            self.executor,
            &Cmd::new("rsync").args(["-az", source.as_str(), dest.as_str()]),
        );
    }

    fn send_line(&self, node: &NodeSpec, line: &str) -> Result<()> {
        let name = node.container_name();
        run_checked(
            self.executor,
            &self.placed(
                Cmd::new("tmux").args(["send-keys", "-t", name.as_str(), line, "C-m"]),
                &node.placement,
            ),
        )
        .wrap_err_with(|| format!("failed to inject command into session '{name}'"))?;
        Ok(())
    }

    fn resolved_volume(&self, node: &NodeSpec) -> Result<Option<PathBuf>> {
        let Some(volume) = node.volume.as_deref().or(self.default_volume) else {
            return Ok(None);
        };
        let host_path = std::path::absolute(volume)
            .wrap_err_with(|| format!("failed to resolve volume path '{}'", volume.display()))?;
        remap_for_nested_host(&host_path).map(Some)
    }
}

impl ResolveRuntimePid for SessionManager<'_> {
    fn resolve_runtime_pid(&self, node: &NodeSpec) -> Result<String> {
        let name = node.container_name();
        let output = run_checked(
            self.executor,
            &self.placed(
                Cmd::new("docker")
                    .args(["inspect", "--format", "{{ .State.Pid }}"])
                    .arg(name.as_str()),
                &node.placement,
            ),
        )
        .wrap_err_with(|| format!("failed to inspect container '{name}'"))?;
        let pid = output.stdout.trim().to_string();
        if pid.is_empty() || !pid.chars().all(|c| c.is_ascii_digit()) {
            bail!("container '{name}' reported no usable pid: {pid:?}");
        }
        Ok(pid)
    }
}

/// Substitute the outer host path prefix into a volume mount source when
/// running nested (the docker socket resolves paths on the outer host).
fn remap_for_nested_host(host_path: &Path) -> Result<PathBuf> {
    let Ok(outer_prefix) = std::env::var(HOST_PATH_ENV) else {
        return Ok(host_path.to_path_buf());
    };
    let project_dir = std::path::absolute(std::env::current_dir()?.join(".."))?;
    match host_path.strip_prefix(&project_dir) {
        Ok(rest) => Ok(PathBuf::from(outer_prefix).join(rest)),
        Err(_) => Ok(host_path.to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingExecutor;
    use crate::topology::Role;
    use crate::utils::shell::ExecOutput;

    fn manager<'a>(executor: &'a RecordingExecutor, run_dir: &'a Path) -> SessionManager<'a> {
        SessionManager::new(executor, run_dir, Some("alice"), None)
    }

    fn node(id: &str, placement: Placement, containerized: bool) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            role: Role::Router,
            zid: None,
            listen_endpoints: vec!["tcp/10.0.1.1:7447".parse().unwrap()],
            volume: None,
            placement,
            containerized,
            mode: None,
            connect: Vec::new(),
        }
    }

    #[test]
    fn test_acquire_environment_builds_docker_run_line() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo/2026-01-01_00:00:00");
        let sessions = manager(&executor, &run_dir);
        let image = DockerImage {
            tag: "testbed:latest".into(),
            clean_first: false,
        };
        sessions
            .acquire_environment(&node("r0", Placement::Local, true), &image)
            .unwrap();

        let commands = executor.commands();
        assert_eq!(commands.len(), 1);
        let line = &commands[0];
        assert!(line.starts_with("tmux send-keys -t zenohd_r0"));
        assert!(line.contains("mkdir -p experiment_data/demo/2026-01-01_00:00:00"));
        assert!(line.contains(
            "docker run -dit --name zenohd_r0 --network none --rm --entrypoint /bin/sh testbed:latest"
        ));
        assert!(line.contains(&format!("echo $? > {EXIT_MARKER}")));
        assert!(!line.contains("docker rmi"));
    }

    #[test]
    fn test_acquire_environment_clean_first_removes_image() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        let image = DockerImage {
            tag: "testbed:latest".into(),
            clean_first: true,
        };
        sessions
            .acquire_environment(&node("r0", Placement::Local, true), &image)
            .unwrap();
        assert!(executor.commands()[0].contains("docker rmi testbed:latest"));
    }

    #[test]
    fn test_bare_node_gets_only_working_directory() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        let image = DockerImage {
            tag: "testbed:latest".into(),
            clean_first: true,
        };
        sessions
            .acquire_environment(&node("r0", Placement::Local, false), &image)
            .unwrap();
        let line = &executor.commands()[0];
        assert!(line.contains("mkdir -p experiment_data/demo && cd experiment_data/demo"));
        assert!(!line.contains("docker"));
    }

    #[test]
    fn test_inject_redirects_logs_and_persists_exit_status() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        let argv: Vec<String> = vec!["./zenohd".into(), "-l".into(), "tcp/10.0.1.1:7447".into()];
        sessions
            .inject(&node("r0", Placement::Local, true), &argv)
            .unwrap();

        let line = &executor.commands()[0];
        assert!(line.contains("./zenohd -l tcp/10.0.1.1:7447"));
        assert!(line.contains("> >(tee ./zenohd_r0.log)"));
        assert!(line.contains("2> >(tee ./zenohd_r0_err.log >&2)"));
        assert!(line.contains(&format!("echo $? > {EXIT_MARKER}")));
    }

    #[test]
    fn test_remote_commands_go_through_ssh() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        let remote = node(
            "r0",
            Placement::Remote {
                host: "host1".into(),
            },
            true,
        );
        sessions.open_session(&remote).unwrap();
        assert!(executor.commands()[0].starts_with("ssh alice@host1 "));
        assert!(executor.commands()[0].contains("tmux new-session -d -s zenohd_r0"));
    }

    #[test]
    fn test_check_exit_status_success_codes() {
        let run_dir = PathBuf::from("experiment_data/demo");
        for marker in ["0", "130", ""] {
            let executor = RecordingExecutor::new();
            executor.respond("cat /tmp/exit_code", ExecOutput::ok(marker));
            let sessions = manager(&executor, &run_dir);
            assert!(
                sessions
                    .check_exit_status(&node("r0", Placement::Local, true))
                    .is_ok(),
                "marker {marker:?} should be success"
            );
            // Marker is deleted after the read.
            assert_eq!(executor.count_matching("rm -f /tmp/exit_code"), 1);
        }
    }

    #[test]
    fn test_check_exit_status_failure_is_fatal() {
        let executor = RecordingExecutor::new();
        executor.respond("cat /tmp/exit_code", ExecOutput::ok("137\n"));
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        let error = sessions
            .check_exit_status(&node("r0", Placement::Local, true))
            .unwrap_err();
        assert!(error.to_string().contains("exit code 137"));
        assert_eq!(executor.count_matching("rm -f /tmp/exit_code"), 1);
    }

    #[test]
    fn test_resolve_runtime_pid_trims_inspect_output() {
        let executor = RecordingExecutor::new();
        executor.respond("docker inspect", ExecOutput::ok("4242\n"));
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        let pid = sessions
            .resolve_runtime_pid(&node("r0", Placement::Local, true))
            .unwrap();
        assert_eq!(pid, "4242");
    }

    #[test]
    fn test_resolve_runtime_pid_rejects_garbage() {
        let executor = RecordingExecutor::new();
        executor.respond("docker inspect", ExecOutput::ok("<no value>"));
        let run_dir = PathBuf::from("experiment_data/demo");
        let sessions = manager(&executor, &run_dir);
        assert!(sessions
            .resolve_runtime_pid(&node("r0", Placement::Local, true))
            .is_err());
    }

    #[test]
    fn test_fetch_logs_is_noop_for_local_nodes() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo");
        manager(&executor, &run_dir).fetch_logs(&node("r0", Placement::Local, true));
        assert!(executor.commands().is_empty());
    }

    #[test]
    fn test_fetch_logs_rsyncs_from_remote() {
        let executor = RecordingExecutor::new();
        let run_dir = PathBuf::from("experiment_data/demo");
        let remote = node(
            "r0",
            Placement::Remote {
                host: "host1".into(),
            },
            true,
        );
        manager(&executor, &run_dir).fetch_logs(&remote);
        let line = &executor.commands()[0];
        assert!(line.starts_with("rsync -az alice@host1:experiment_data/demo/zenohd_r0*.log"));
    }
}
