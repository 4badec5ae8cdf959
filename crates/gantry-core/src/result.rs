//! Build result values as reported by the CI server.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a build, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildResult {
    #[default]
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl BuildResult {
    /// Combines two results, keeping the worse one.
    pub fn combine(self, other: BuildResult) -> BuildResult {
        self.max(other)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BuildResult::Success)
    }

    pub fn is_unstable(&self) -> bool {
        matches!(self, BuildResult::Unstable)
    }

    pub fn is_not_built(&self) -> bool {
        matches!(self, BuildResult::NotBuilt)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, BuildResult::Aborted)
    }

    /// Whether a build with this result should fail the calling process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BuildResult::Failure | BuildResult::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildResult::Success => "SUCCESS",
            BuildResult::Unstable => "UNSTABLE",
            BuildResult::Failure => "FAILURE",
            BuildResult::NotBuilt => "NOT_BUILT",
            BuildResult::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildResult {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Ok(BuildResult::Success),
            "UNSTABLE" => Ok(BuildResult::Unstable),
            "FAILURE" => Ok(BuildResult::Failure),
            "NOT_BUILT" => Ok(BuildResult::NotBuilt),
            "ABORTED" => Ok(BuildResult::Aborted),
            _ => Err(Error::UnknownValue {
                kind: "BuildResult",
                value: s.to_string(),
            }),
        }
    }
}
