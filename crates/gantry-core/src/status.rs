//! Tracking of failures during a build.

use crate::matrix::RelengStatus;
use crate::result::BuildResult;

/// Collects failure and instability reasons and turns them into a
/// [`RelengStatus`] at the end of a build step.
#[derive(Debug, Default)]
pub struct StatusReporter {
    failed: bool,
    aborted: bool,
    reasons: Vec<String>,
    return_value: Option<serde_json::Value>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the build failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failed = true;
        self.reasons.push(reason.into());
    }

    /// Marks the build unstable.
    pub fn mark_unstable(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    pub fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    pub fn set_return_value(&mut self, value: serde_json::Value) {
        self.return_value = Some(value);
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    pub fn result(&self) -> BuildResult {
        if self.aborted {
            BuildResult::Aborted
        } else if self.failed {
            BuildResult::Failure
        } else if !self.reasons.is_empty() {
            BuildResult::Unstable
        } else {
            BuildResult::Success
        }
    }

    pub fn finish(self) -> RelengStatus {
        let result = self.result();
        let reason = if self.aborted || self.reasons.is_empty() {
            None
        } else {
            Some(self.reasons.join("\n"))
        };
        RelengStatus {
            result,
            reason,
            return_value: self.return_value,
        }
    }
}
