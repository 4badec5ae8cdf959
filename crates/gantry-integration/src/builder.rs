//! Matrix builds run as Jenkins jobs.

use crate::jenkins::JenkinsClient;
use crate::projects::ProjectSetup;
use async_trait::async_trait;
use gantry_core::ports::MatrixBuilder;
use gantry_core::{
    BuildResult, MatrixBuildOutcome, MatrixDescription, Result, StatusReporter, TriggeredBuild,
};
use gantry_matrix::process_matrix_failures;
use std::sync::Arc;
use tracing::{info, instrument};

/// Name of the matrix axis parameter of the matrix jobs.
pub const OPTIONS_PARAMETER: &str = "OPTIONS";

/// [`MatrixBuilder`] triggering a parameterized Jenkins matrix job.
pub struct JenkinsMatrixBuilder {
    client: Arc<JenkinsClient>,
    setup: Option<Arc<ProjectSetup>>,
}

impl JenkinsMatrixBuilder {
    pub fn new(client: Arc<JenkinsClient>) -> Self {
        Self {
            client,
            setup: None,
        }
    }

    /// Pass the revisions known to `setup` to the triggered job.
    pub fn with_revisions(mut self, setup: Arc<ProjectSetup>) -> Self {
        self.setup = Some(setup);
        self
    }

    /// Build parameters: the matrix axis plus refspec and hash of every
    /// known project.
    pub async fn parameters(&self, matrix: &MatrixDescription) -> Vec<(String, String)> {
        let mut params = vec![(OPTIONS_PARAMETER.to_string(), matrix.as_axis.clone())];
        if let Some(setup) = &self.setup {
            for revision in setup.revisions().await {
                params.push((revision.refspec_env, revision.refspec));
                if let Some(hash) = revision.hash {
                    params.push((revision.hash_env, hash));
                }
            }
        }
        params
    }
}

#[async_trait]
impl MatrixBuilder for JenkinsMatrixBuilder {
    #[instrument(skip(self, matrix), fields(configs = matrix.len()))]
    async fn do_matrix_build(
        &self,
        job_name: &str,
        matrix: &MatrixDescription,
    ) -> Result<MatrixBuildOutcome> {
        let params = self.parameters(matrix).await;
        let queue_url = self.client.trigger_build(job_name, &params).await?;
        let started = self.client.wait_for_start(job_name, &queue_url).await?;
        let (result, number) = self
            .client
            .wait_for_completion(job_name, &started.url)
            .await?;
        let build_info = self.client.query_matrix_build(&started.url).await?;

        let mut status = StatusReporter::new();
        if result == BuildResult::Aborted {
            status.mark_aborted();
        }
        let runs = process_matrix_failures(&matrix.configs, build_info, &mut status);
        status.set_return_value(serde_json::to_value(&runs)?);
        let status = status.finish();

        info!(
            job = job_name,
            number,
            %result,
            status = %status.result,
            "Matrix build finished"
        );
        Ok(MatrixBuildOutcome {
            build: TriggeredBuild {
                result,
                absolute_url: started.url,
                number: Some(number),
            },
            status,
        })
    }
}
