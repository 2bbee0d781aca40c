//! Experiment orchestrator.
//!
//! Owns the run context (no ambient globals), constructs one lifecycle
//! controller per node in declared order, rolls back on construction
//! failure, and drives coordinated teardown when an interrupt or
//! terminate signal arrives. The signal handler only flips an atomic
//! flag; the supervising loop observes it and runs the same teardown
//! path used everywhere else.

use crate::config::{DockerImage, DocumentForm, NetworkDocument};
use crate::fabric::LinkFabric;
use crate::lifecycle::NodeController;
use crate::session::SessionManager;
use crate::topology::Topology;
use crate::utils::shell::Executor;
use chrono::Local;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Root of all per-run working directories.
pub const EXPERIMENT_DATA_DIR: &str = "experiment_data";

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Everything a lifecycle controller needs, passed explicitly.
pub struct RunContext {
    pub topology: Topology,
    pub image: DockerImage,
    pub user_name: Option<String>,
    pub default_volume: Option<PathBuf>,
    pub run_dir: PathBuf,
    pub settle_delay: Duration,
    pub executor: Box<dyn Executor>,
    pub process_group: libc::pid_t,
}

impl RunContext {
    pub fn new(
        document: &NetworkDocument,
        topology: Topology,
        form: DocumentForm,
        executor: Box<dyn Executor>,
    ) -> Result<Self> {
        let run_dir = run_directory(&document.experiment, form);
        std::fs::create_dir_all(&run_dir)
            .wrap_err_with(|| format!("failed to create run directory '{}'", run_dir.display()))?;
        info!("Run directory: {}", run_dir.display());
        Ok(Self {
            topology,
            image: document.docker_image.clone(),
            user_name: document.user_name.clone(),
            default_volume: document.volume.clone(),
            run_dir,
            settle_delay: document.settle_delay.unwrap_or(DEFAULT_SETTLE_DELAY),
            executor,
            process_group: unsafe { libc::getpgrp() },
        })
    }

    pub fn sessions(&self) -> SessionManager<'_> {
        SessionManager::new(
            self.executor.as_ref(),
            &self.run_dir,
            self.user_name.as_deref(),
            self.default_volume.as_deref(),
        )
    }

    pub fn fabric(&self) -> LinkFabric<'_> {
        LinkFabric::new(self.executor.as_ref())
    }
}

/// Compute the run-scoped working directory.
///
/// Graph-form runs are timestamped so repeated runs of one experiment
/// stay apart; flat-form runs reuse one directory per experiment.
pub fn run_directory(experiment: &str, form: DocumentForm) -> PathBuf {
    let base = PathBuf::from(EXPERIMENT_DATA_DIR).join(experiment);
    match form {
        DocumentForm::Graph => base.join(Local::now().format("%Y-%m-%d_%H:%M:%S").to_string()),
        DocumentForm::Flat => base,
    }
}

pub struct Orchestrator {
    ctx: RunContext,
    controllers: Vec<NodeController>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            controllers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn controllers(&self) -> &[NodeController] {
        &self.controllers
    }

    /// Construct one lifecycle controller per node, in declared order.
    ///
    /// Returns `Ok(false)` when a shutdown signal interrupted
    /// provisioning. On a provisioning error, every already-constructed
    /// controller is torn down before the error propagates; the failing
    /// node itself is not (the next run's pre-flight sweep covers its
    /// leavings).
    pub fn provision_all(&mut self) -> Result<bool> {
        for node in self.ctx.topology.nodes.clone() {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Shutdown requested; aborting provisioning");
                return Ok(false);
            }
            let mut controller = NodeController::new(node);
            if let Err(error) = controller.provision(&self.ctx) {
                warn!(
                    "Provisioning failed for node {}; rolling back {} node(s)",
                    controller.node.id,
                    self.controllers.len()
                );
                self.teardown_all();
                return Err(error);
            }
            self.controllers.push(controller);
        }
        Ok(true)
    }

    /// Tear down every constructed controller, in construction order.
    ///
    /// Teardown steps are individually best-effort, so one node's failure
    /// cannot block the remaining nodes.
    pub fn teardown_all(&mut self) {
        let ctx = &self.ctx;
        for controller in &mut self.controllers {
            controller.teardown(ctx);
            println!("Cleaned up node {}", controller.node.id);
        }
    }

    /// The cancellation flag signal handlers flip.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Provision everything, block until a signal, tear everything down,
    /// then terminate the whole process group so no child session or
    /// process survives the launcher.
    pub fn run(mut self) -> Result<()> {
        let signal_ids = self.install_signal_handlers()?;

        if self.provision_all()? {
            println!("All nodes have been launched.");
            self.wait_for_shutdown();
            println!("\nReceived termination signal, leaving...");
        }

        self.teardown_all();
        restore_default_disposition(signal_ids);

        info!("Terminating process group {}", self.ctx.process_group);
        unsafe {
            libc::killpg(self.ctx.process_group, SIGTERM);
        }
        std::process::exit(0);
    }

    fn install_signal_handlers(&self) -> Result<Vec<SigId>> {
        let mut ids = Vec::new();
        for signal in [SIGINT, SIGTERM] {
            ids.push(
                signal_hook::flag::register(signal, Arc::clone(&self.shutdown))
                    .wrap_err("failed to install signal handler")?,
            );
        }
        Ok(ids)
    }

    fn wait_for_shutdown(&self) {
        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(SIGNAL_POLL_INTERVAL);
        }
    }
}

fn restore_default_disposition(signal_ids: Vec<SigId>) {
    for id in signal_ids {
        signal_hook::low_level::unregister(id);
    }
    unsafe {
        libc::signal(SIGINT, libc::SIG_DFL);
        libc::signal(SIGTERM, libc::SIG_DFL);
    }
}
