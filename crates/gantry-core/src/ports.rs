//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the matrix build orchestrator
//! and the collaborators that do the actual work.

use crate::Result;
use crate::matrix::{MatrixBuildOutcome, MatrixDescription, RelengStatus};
use crate::project::Project;
use crate::result::BuildResult;
use async_trait::async_trait;

/// Process-wide build setup performed once before any matrix work.
#[async_trait]
pub trait BuildSetup: Send + Sync {
    /// Resolve and remember the revisions of all projects for this build,
    /// with `project` as the default project.
    async fn init_build_revisions(&self, project: Project) -> Result<()>;

    /// Check out the default project into the workspace.
    async fn checkout_default_project(&self) -> Result<()>;
}

/// Turns a matrix configuration file into a matrix description.
#[async_trait]
pub trait MatrixProcessor: Send + Sync {
    async fn process_matrix_configs(&self, path: &str) -> Result<MatrixDescription>;
}

/// Runs a matrix job on the CI server.
#[async_trait]
pub trait MatrixBuilder: Send + Sync {
    async fn do_matrix_build(
        &self,
        job_name: &str,
        matrix: &MatrixDescription,
    ) -> Result<MatrixBuildOutcome>;
}

/// Sinks reporting into the currently running build.
#[async_trait]
pub trait BuildReporter: Send + Sync {
    /// Merge a result into the overall outcome of the current build.
    async fn combine_result_to_current_build(&self, result: BuildResult) -> Result<()>;

    /// Handle a release-engineering status (result and reasons).
    async fn process_releng_status(&self, status: &RelengStatus) -> Result<()>;

    /// Generate a summary of a finished matrix build.
    async fn add_summary_for_matrix(&self, outcome: &MatrixBuildOutcome) -> Result<()>;
}

/// Posts a code-review comment referencing a build.
#[async_trait]
pub trait ReviewPoster: Send + Sync {
    async fn post_review(&self, url: &str) -> Result<()>;
}
