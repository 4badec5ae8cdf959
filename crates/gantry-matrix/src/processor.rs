//! Preparing a matrix description from a configuration file.

use crate::agents::AgentCatalog;
use crate::axis::options_axis;
use crate::config::{BuildInputResolver, read_matrix_configs};
use crate::options::{OptionHandler, default_handlers, remove_host_options, required_labels, validate_options};
use async_trait::async_trait;
use gantry_core::ports::MatrixProcessor;
use gantry_core::{BuildConfig, Error, MatrixDescription, Result};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Assigns build hosts to configurations.
pub struct HostSelector {
    catalog: Arc<AgentCatalog>,
    handlers: Vec<OptionHandler>,
}

impl HostSelector {
    pub fn new(catalog: Arc<AgentCatalog>) -> Self {
        Self {
            catalog,
            handlers: default_handlers(),
        }
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// Replace host options with the selected host and required labels.
    ///
    /// Returns failure reasons for configurations no agent can build.
    pub fn select_build_hosts(&self, configs: &mut [BuildConfig]) -> Result<Vec<String>> {
        let mut unassigned = Vec::new();
        for config in configs.iter_mut() {
            config.opts = remove_host_options(&config.opts);
            config.labels = required_labels(&self.handlers, &config.opts)?;
            config.host = self.catalog.pick_host(&config.labels);
            if config.host.is_none() {
                let reason = format!(
                    "no build agent supports this combination: {}",
                    config.opts_string()
                );
                warn!(%reason);
                unassigned.push(reason);
            }
        }
        Ok(unassigned)
    }

    /// Check that every configuration will be executed by the matrix job.
    pub fn check_matrix_configs(&self, configs: &[BuildConfig]) -> Result<()> {
        for config in configs {
            if let Some(host) = &config.host {
                if !self.catalog.is_label(host) && !self.catalog.is_matrix_host(host) {
                    return Err(Error::Configuration(format!(
                        "non-matrix agent would execute this combination: {}",
                        config.opts_string()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Reject unknown and conflicting options.
    pub fn check_options(&self, configs: &[BuildConfig]) -> Result<()> {
        for config in configs {
            validate_options(&self.handlers, &config.opts)?;
        }
        Ok(())
    }
}

/// [`MatrixProcessor`] reading matrix files from the build workspace.
pub struct MatrixConfigProcessor {
    resolver: BuildInputResolver,
    selector: HostSelector,
    strict_options: bool,
}

impl MatrixConfigProcessor {
    pub fn new(resolver: BuildInputResolver, catalog: Arc<AgentCatalog>) -> Self {
        Self {
            resolver,
            selector: HostSelector::new(catalog),
            strict_options: false,
        }
    }

    /// Also fail on options that no handler recognizes.
    pub fn with_strict_options(mut self, strict: bool) -> Self {
        self.strict_options = strict;
        self
    }

    /// Build a description from already parsed configurations.
    pub fn describe(&self, mut configs: Vec<BuildConfig>) -> Result<MatrixDescription> {
        if self.strict_options {
            self.selector.check_options(&configs)?;
        }
        let unassigned = self.selector.select_build_hosts(&mut configs)?;
        if !unassigned.is_empty() {
            return Err(Error::Configuration(unassigned.join("\n")));
        }
        self.selector.check_matrix_configs(&configs)?;
        let as_axis = options_axis(&configs, self.selector.catalog());
        Ok(MatrixDescription { configs, as_axis })
    }
}

#[async_trait]
impl MatrixProcessor for MatrixConfigProcessor {
    #[instrument(skip(self))]
    async fn process_matrix_configs(&self, path: &str) -> Result<MatrixDescription> {
        let input = self.resolver.resolve(path, Some(".txt"));
        let configs = read_matrix_configs(&input).await?;
        let description = self.describe(configs)?;
        info!(
            file = %input.display(),
            configs = description.len(),
            "Prepared build matrix"
        );
        Ok(description)
    }
}
