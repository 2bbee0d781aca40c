//! Experiment configuration document.
//!
//! The document is relaxed JSON (comments and trailing commas accepted)
//! and comes in two forms: the graph form (`nodes` + `links`) and the
//! flat form (`routers`). Both share the experiment header fields; the
//! topology adapters in [`crate::topology`] turn either form into the
//! canonical model.

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use indexmap::IndexMap;
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default document name, resolved against the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "NETWORK_CONFIG.json5";

/// Document shape violations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration must declare either 'nodes' or 'routers'")]
    MissingTopologySection,
    #[error("configuration declares both 'nodes' and 'routers'; pick one form")]
    AmbiguousForm,
    #[error("'links' requires the 'nodes' section")]
    LinksWithoutNodes,
}

/// Which of the two configuration schemas a document uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentForm {
    /// `nodes` + `links`: local containerized topology with virtual links.
    Graph,
    /// `routers`: mode-driven deployment, optionally remote over ssh.
    Flat,
}

/// Top-level configuration document.
#[derive(Debug, Deserialize)]
pub struct NetworkDocument {
    pub experiment: String,
    pub docker_image: DockerImage,
    #[serde(default)]
    pub user_name: Option<String>,
    /// Document-level default volume, overridable per node.
    #[serde(default)]
    pub volume: Option<PathBuf>,
    /// Wait after environment creation before assuming exec-readiness.
    #[serde(default, with = "humantime_serde")]
    pub settle_delay: Option<Duration>,
    #[serde(default)]
    pub nodes: Option<IndexMap<String, NodeConfig>>,
    #[serde(default)]
    pub links: Option<Vec<LinkConfig>>,
    #[serde(default)]
    pub routers: Option<IndexMap<String, RouterConfig>>,
}

impl NetworkDocument {
    pub fn form(&self) -> Result<DocumentForm, ConfigError> {
        match (&self.nodes, &self.routers) {
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousForm),
            (Some(_), None) => Ok(DocumentForm::Graph),
            (None, Some(_)) => {
                if self.links.is_some() {
                    Err(ConfigError::LinksWithoutNodes)
                } else {
                    Ok(DocumentForm::Flat)
                }
            }
            (None, None) => Err(ConfigError::MissingTopologySection),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerImage {
    pub tag: String,
    /// Remove the image before the run so a fresh pull happens.
    #[serde(default)]
    pub clean_first: bool,
}

/// `{set, value}` identity-token declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct ZidConfig {
    pub set: bool,
    #[serde(default)]
    pub value: Option<String>,
}

/// Graph-form node object.
#[derive(Debug, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub zid: Option<ZidConfig>,
    pub listen_endpoints: Vec<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub volume: Option<PathBuf>,
}

/// Graph-form link object.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub a_idx: usize,
    pub b: String,
    pub b_idx: usize,
    #[serde(default)]
    pub cap: Option<u64>,
}

/// A field that accepts a single string or a list of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value.clone()],
            OneOrMany::Many(values) => values.clone(),
        }
    }
}

/// Flat-form router object.
#[derive(Debug, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub zid: Option<ZidConfig>,
    #[serde(default)]
    pub listen_endpoint: Option<OneOrMany>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub docker: Option<bool>,
    #[serde(default)]
    pub ssh: Option<String>,
    #[serde(default)]
    pub connect: Option<Vec<String>>,
    #[serde(default)]
    pub volume: Option<PathBuf>,
}

/// Parse a relaxed-JSON document.
pub fn parse_document(text: &str) -> Result<NetworkDocument> {
    let value = jsonc_parser::parse_to_serde_value(text, &jsonc_parser::ParseOptions::default())
        .map_err(|error| eyre!("configuration is not valid relaxed JSON: {error}"))?
        .ok_or_else(|| eyre!("configuration document is empty"))?;
    let document: NetworkDocument =
        serde_json::from_value(value).wrap_err("configuration does not match the expected schema")?;
    document.form()?;
    Ok(document)
}

/// Load and parse the configuration document from a file.
pub fn load_document(path: &Path) -> Result<NetworkDocument> {
    info!("Loading configuration from: {:?}", path);
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read configuration '{}'", path.display()))?;
    parse_document(&text).wrap_err_with(|| format!("in configuration '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_relaxed_json_is_accepted() {
        let document = parse_document(
            r#"{
            // experiment header
            "experiment": "demo",
            "docker_image": { "tag": "testbed:latest", "clean_first": true },
            "user_name": "alice",
            "settle_delay": "250ms",
            "nodes": {
                "r0": { "listen_endpoints": ["tcp/10.0.1.1:7447"], },
            },
            "links": [],
        }"#,
        )
        .unwrap();
        assert_eq!(document.experiment, "demo");
        assert!(document.docker_image.clean_first);
        assert_eq!(document.settle_delay, Some(Duration::from_millis(250)));
        assert_eq!(document.form().unwrap(), DocumentForm::Graph);
    }

    #[test]
    fn test_node_order_is_preserved() {
        let document = parse_document(
            r#"{
            "experiment": "demo",
            "docker_image": { "tag": "t" },
            "nodes": {
                "zeta": { "listen_endpoints": [] },
                "alpha": { "listen_endpoints": [] },
                "mu": { "listen_endpoints": [] }
            }
        }"#,
        )
        .unwrap();
        let ids: Vec<&String> = document.nodes.as_ref().unwrap().keys().collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mu"]);
    }

    #[test]
    fn test_flat_form_with_one_or_many_endpoints() {
        let document = parse_document(
            r#"{
            "experiment": "demo",
            "docker_image": { "tag": "t" },
            "routers": {
                "a": { "mode": "listen", "listen_endpoint": "tcp/10.0.0.1:7447" },
                "b": { "mode": "listen",
                       "listen_endpoint": ["tcp/10.0.0.2:7447", "udp/10.0.0.2:7448"] }
            }
        }"#,
        )
        .unwrap();
        assert_eq!(document.form().unwrap(), DocumentForm::Flat);
        let routers = document.routers.as_ref().unwrap();
        assert_eq!(
            routers["a"].listen_endpoint.as_ref().unwrap().to_vec(),
            vec!["tcp/10.0.0.1:7447"]
        );
        assert_eq!(routers["b"].listen_endpoint.as_ref().unwrap().to_vec().len(), 2);
    }

    #[test]
    fn test_both_forms_is_ambiguous() {
        let result = parse_document(
            r#"{
            "experiment": "demo",
            "docker_image": { "tag": "t" },
            "nodes": {},
            "routers": {}
        }"#,
        );
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("pick one form"));
    }

    #[test]
    fn test_missing_topology_section_is_rejected() {
        let result = parse_document(
            r#"{ "experiment": "demo", "docker_image": { "tag": "t" } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_document_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
            "experiment": "filetest",
            "docker_image": {{ "tag": "t" }},
            "routers": {{ "a": {{ "mode": "listen", "listen_endpoint": "tcp/10.0.0.1:7447" }} }}
        }}"#
        )
        .unwrap();
        let document = load_document(file.path()).unwrap();
        assert_eq!(document.experiment, "filetest");
    }

    #[test]
    fn test_load_document_missing_file_fails() {
        assert!(load_document(Path::new("/nonexistent/NETWORK_CONFIG.json5")).is_err());
    }
}
