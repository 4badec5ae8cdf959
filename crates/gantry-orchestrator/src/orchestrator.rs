//! The matrix build orchestrator.

use gantry_core::ports::{BuildReporter, BuildSetup, MatrixBuilder, MatrixProcessor, ReviewPoster};
use gantry_core::{Error, MatrixBuildOutcome, MatrixDescription, Project, Result};
use std::sync::Arc;
use tracing::{info, instrument};

/// Handles to everything the orchestrator delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub setup: Arc<dyn BuildSetup>,
    pub processor: Arc<dyn MatrixProcessor>,
    pub builder: Arc<dyn MatrixBuilder>,
    pub reporter: Arc<dyn BuildReporter>,
    pub reviewer: Arc<dyn ReviewPoster>,
}

/// Loads matrix descriptions and runs matrix builds with them.
///
/// The orchestrator only sequences calls; the collaborators do the work.
pub struct MatrixOrchestrator {
    collaborators: Collaborators,
    project: Project,
    matrix: Option<MatrixDescription>,
}

impl MatrixOrchestrator {
    /// Initialize build revisions for `project` and check it out.
    #[instrument(skip(collaborators))]
    pub async fn load(collaborators: Collaborators, project: Project) -> Result<Self> {
        collaborators.setup.init_build_revisions(project).await?;
        collaborators.setup.checkout_default_project().await?;
        info!(%project, "Build initialized");
        Ok(Self {
            collaborators,
            project,
            matrix: None,
        })
    }

    pub fn project(&self) -> Project {
        self.project
    }

    /// The most recently loaded matrix description.
    pub fn matrix(&self) -> Option<&MatrixDescription> {
        self.matrix.as_ref()
    }

    /// Parse a matrix configuration file and keep the result for later
    /// builds, replacing any earlier description.
    #[instrument(skip(self))]
    pub async fn process_matrix_configs(&mut self, path: &str) -> Result<&MatrixDescription> {
        let description = self
            .collaborators
            .processor
            .process_matrix_configs(path)
            .await?;
        info!(configs = description.len(), "Loaded matrix");
        Ok(self.matrix.insert(description))
    }

    /// Run `job_name` with the loaded matrix and report its outcome.
    ///
    /// The result is combined into the current build, the status processed,
    /// a summary added and the build URL posted for review, in that order.
    #[instrument(skip(self))]
    pub async fn do_matrix_build(&self, job_name: &str) -> Result<MatrixBuildOutcome> {
        let matrix = self.matrix.as_ref().ok_or(Error::MatrixNotLoaded)?;
        let c = &self.collaborators;

        let outcome = c.builder.do_matrix_build(job_name, matrix).await?;
        c.reporter
            .combine_result_to_current_build(outcome.build.result)
            .await?;
        c.reporter.process_releng_status(&outcome.status).await?;
        c.reporter.add_summary_for_matrix(&outcome).await?;
        c.reviewer.post_review(&outcome.build.absolute_url).await?;

        info!(
            job = job_name,
            url = %outcome.build.absolute_url,
            result = %outcome.build.result,
            "Matrix build reported"
        );
        Ok(outcome)
    }
}
