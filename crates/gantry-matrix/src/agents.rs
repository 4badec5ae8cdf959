//! Build agent catalog and host selection for matrix configurations.

use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::debug;

const BUILTIN_CATALOG: &str = include_str!("../data/agents.yaml");

/// Parallelism used for hosts that do not specify one.
pub const DEFAULT_BUILD_PARALLELISM: u32 = 2;

/// A build agent and the labels (software/hardware features) it provides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHost {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Whether the CI matrix job has this host on its node axis.
    #[serde(default)]
    pub matrix: bool,
    #[serde(default)]
    pub parallelism: Option<u32>,
    /// gcc to use for the C++ standard library with other compilers.
    #[serde(default)]
    pub default_gcc: Option<String>,
    /// Shell prefix that sets up the toolchain environment on this host.
    #[serde(default)]
    pub environment_subshell: Option<String>,
}

/// All agents that matrix builds know about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCatalog {
    /// Plain label that builds needing no special features run on.
    pub default_label: String,
    /// Names that are node labels rather than individual hosts.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub hosts: Vec<AgentHost>,
    #[serde(default)]
    pub special_groups: Vec<BTreeSet<String>>,
}

impl AgentCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let catalog: AgentCatalog = serde_yaml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("invalid agent catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load a catalog from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    fn validate(&self) -> Result<()> {
        let names: BTreeSet<&str> = self.hosts.iter().map(|h| h.name.as_str()).collect();
        if names.len() != self.hosts.len() {
            return Err(Error::Configuration(
                "agent catalog lists a host more than once".to_string(),
            ));
        }
        for group in &self.special_groups {
            if let Some(unknown) = group.iter().find(|h| !names.contains(h.as_str())) {
                return Err(Error::Configuration(format!(
                    "special host group refers to unknown host {}",
                    unknown
                )));
            }
        }
        Ok(())
    }

    pub fn host(&self, name: &str) -> Option<&AgentHost> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn is_label(&self, name: &str) -> bool {
        self.labels.contains(name)
    }

    pub fn is_matrix_host(&self, name: &str) -> bool {
        self.host(name).is_some_and(|h| h.matrix)
    }

    pub fn default_build_parallelism(&self, name: &str) -> u32 {
        self.host(name)
            .and_then(|h| h.parallelism)
            .unwrap_or(DEFAULT_BUILD_PARALLELISM)
    }

    pub fn default_gcc_for_libstdcxx(&self, name: &str) -> Option<&str> {
        self.host(name).and_then(|h| h.default_gcc.as_deref())
    }

    pub fn environment_subshell(&self, name: &str) -> Option<&str> {
        self.host(name).and_then(|h| h.environment_subshell.as_deref())
    }

    /// Select a host (or the default label) that can build with `labels`.
    pub fn pick_host(&self, labels: &BTreeSet<String>) -> Option<String> {
        if labels.is_empty() {
            return Some(self.default_label.clone());
        }

        let mut candidates: Vec<&str> = self
            .hosts
            .iter()
            .filter(|h| labels.is_subset(&h.labels))
            .map(|h| h.name.as_str())
            .collect();
        if candidates.is_empty() {
            return None;
        }

        // TODO: balance hosts across the whole matrix instead of picking
        // per configuration.
        for group in &self.special_groups {
            if candidates.iter().all(|c| group.contains(*c)) {
                break;
            }
            candidates.retain(|c| !group.contains(*c));
        }

        let picked = candidates.first().map(|c| c.to_string());
        debug!(labels = ?labels, host = ?picked, "Picked build host");
        picked
    }
}
