//! # Netbed - Topology-driven provisioning for network-experiment testbeds
//!
//! This library provisions and tears down small distributed
//! network-experiment testbeds: a set of logical nodes (routers,
//! publishers, subscribers), each running inside an isolated container
//! and tmux session, interconnected according to a declared topology,
//! with optional emulated point-to-point links and optional remote (ssh)
//! placement.
//!
//! ## Overview
//!
//! A relaxed-JSON configuration document declares the experiment graph.
//! The orchestrator turns it into an ordered sequence of session-isolated
//! launches, per-link virtual network wiring, and a deterministic,
//! idempotent teardown that succeeds even when a launch failed partway
//! through.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `config`: configuration document schema and relaxed-JSON loading
//! - `topology`: canonical node/link model, input adapters, peer derivation
//! - `fabric`: virtual link fabric (tap, bridge, veth, network namespace)
//! - `session`: container environments, tmux sessions, exit-status markers
//! - `lifecycle`: per-node provisioning state machine and launch commands
//! - `orchestrator`: run context, rollback, signal-driven global teardown
//! - `utils`: structured shell commands and the execution seam
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use netbed::config::{self, DocumentForm};
//! use netbed::orchestrator::{Orchestrator, RunContext};
//! use netbed::topology::Topology;
//! use netbed::utils::shell::ShellExecutor;
//!
//! let document = config::load_document("NETWORK_CONFIG.json5".as_ref())?;
//! let topology = Topology::from_graph_document(&document)?;
//! let ctx = RunContext::new(&document, topology, DocumentForm::Graph, Box::new(ShellExecutor))?;
//! Orchestrator::new(ctx).run()?;
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Run-time flow uses `color_eyre` results with context; configuration
//! and topology shape violations are typed `thiserror` enums raised
//! before any external command runs. Teardown never propagates errors:
//! every step is contained so cleanup always runs to completion.

pub mod config;
pub mod fabric;
pub mod lifecycle;
pub mod orchestrator;
pub mod session;
pub mod test_helpers;
pub mod topology;
pub mod utils;
