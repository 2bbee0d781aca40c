//! Flat-form deployment: a plain list of routers, each in listen or
//! connect mode, optionally placed on a remote host over ssh.

use clap::Parser;
use color_eyre::eyre::bail;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use netbed::config::{self, DocumentForm, DEFAULT_CONFIG_FILE};
use netbed::orchestrator::{Orchestrator, RunContext};
use netbed::topology::Topology;
use netbed::utils::shell::ShellExecutor;

/// Deploy a flat list of routers, locally or over ssh
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the experiment configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Starting router deployment");
    info!("Configuration file: {:?}", args.config);

    let document = config::load_document(&args.config)?;
    if document.form()? != DocumentForm::Flat {
        bail!(
            "'{}' uses the graph 'nodes'/'links' form; run netbed instead",
            args.config.display()
        );
    }

    let topology = Topology::from_flat_document(&document)?;
    info!(
        "Loaded deployment '{}' with {} router(s)",
        document.experiment,
        topology.nodes.len()
    );

    let ctx = RunContext::new(
        &document,
        topology,
        DocumentForm::Flat,
        Box::new(ShellExecutor),
    )?;
    Orchestrator::new(ctx).run()
}
