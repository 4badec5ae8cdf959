//! State of the build this process runs in.

use crate::summary::render_matrix_summary;
use async_trait::async_trait;
use gantry_core::ports::BuildReporter;
use gantry_core::{BuildResult, MatrixBuildOutcome, RelengStatus, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// File the summaries are appended to inside the summary directory.
pub const SUMMARY_FILE: &str = "matrix-summary.md";

/// Accumulated outcome of the current build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CurrentBuildState {
    pub result: BuildResult,
    pub reasons: Vec<String>,
    pub summaries: Vec<String>,
    /// Last processed status that carried a return value.
    pub last_status: Option<RelengStatus>,
}

impl CurrentBuildState {
    /// The state as a status, for the status file.
    pub fn to_status(&self) -> RelengStatus {
        RelengStatus {
            result: self.result,
            reason: (!self.reasons.is_empty()).then(|| self.reasons.join("\n")),
            return_value: self
                .last_status
                .as_ref()
                .and_then(|status| status.return_value.clone()),
        }
    }
}

/// [`BuildReporter`] collecting results in memory.
#[derive(Default)]
pub struct CurrentBuild {
    state: Mutex<CurrentBuildState>,
    summary_dir: Option<PathBuf>,
}

impl CurrentBuild {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also append summaries to [`SUMMARY_FILE`] in `dir`.
    pub fn with_summary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.summary_dir = Some(dir.into());
        self
    }

    pub fn snapshot(&self) -> CurrentBuildState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn result(&self) -> BuildResult {
        self.snapshot().result
    }

    /// Fail the build with `reason`, keeping everything reported so far.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(|state| {
            state.result = state.result.combine(BuildResult::Failure);
            state.reasons.push(reason);
        });
    }

    fn update<F: FnOnce(&mut CurrentBuildState)>(&self, f: F) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }

    async fn append_summary(&self, summary: &str) -> Result<()> {
        let Some(dir) = &self.summary_dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(SUMMARY_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(summary.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        info!(path = %path.display(), "Wrote matrix summary");
        Ok(())
    }
}

#[async_trait]
impl BuildReporter for CurrentBuild {
    async fn combine_result_to_current_build(&self, result: BuildResult) -> Result<()> {
        self.update(|state| state.result = state.result.combine(result));
        Ok(())
    }

    async fn process_releng_status(&self, status: &RelengStatus) -> Result<()> {
        if !status.result.is_success() {
            warn!(
                result = %status.result,
                reason = status.reason.as_deref().unwrap_or(""),
                "Build step did not succeed"
            );
        }
        self.update(|state| {
            state.result = state.result.combine(status.result);
            if let Some(reason) = &status.reason {
                state.reasons.extend(reason.lines().map(str::to_string));
            }
            if status.return_value.is_some() {
                state.last_status = Some(status.clone());
            }
        });
        Ok(())
    }

    async fn add_summary_for_matrix(&self, outcome: &MatrixBuildOutcome) -> Result<()> {
        let summary = render_matrix_summary(outcome, chrono::Utc::now());
        self.append_summary(&summary).await?;
        self.update(|state| state.summaries.push(summary));
        Ok(())
    }
}
