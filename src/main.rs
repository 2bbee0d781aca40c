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

/// Launch a network-experiment topology of containerized nodes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the experiment configuration document
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    info!("Starting netbed experiment launcher");
    info!("Configuration file: {:?}", args.config);

    let document = config::load_document(&args.config)?;
    if document.form()? != DocumentForm::Graph {
        bail!(
            "'{}' uses the flat 'routers' form; run router-deploy instead",
            args.config.display()
        );
    }

    let topology = Topology::from_graph_document(&document)?;
    info!(
        "Loaded topology '{}' with {} node(s) and {} link(s)",
        document.experiment,
        topology.nodes.len(),
        topology.links.len()
    );

    let ctx = RunContext::new(
        &document,
        topology,
        DocumentForm::Graph,
        Box::new(ShellExecutor),
    )?;
    Orchestrator::new(ctx).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_well_known_config() {
        let args = Args::parse_from(["netbed"]);
        assert_eq!(args.config, PathBuf::from("NETWORK_CONFIG.json5"));
    }

    #[test]
    fn test_cli_accepts_config_override() {
        let args = Args::parse_from(["netbed", "--config", "lab.json5"]);
        assert_eq!(args.config, PathBuf::from("lab.json5"));
    }
}
