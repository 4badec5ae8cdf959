//! Matrix build types shared between the orchestrator and its collaborators.

use crate::result::BuildResult;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// One configuration (one line of a matrix file) and the host chosen for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub opts: Vec<String>,
    pub host: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_labels",
        deserialize_with = "deserialize_labels"
    )]
    pub labels: BTreeSet<String>,
}

impl BuildConfig {
    pub fn new(opts: Vec<String>) -> Self {
        Self {
            opts,
            host: None,
            labels: BTreeSet::new(),
        }
    }

    /// Options joined the way they are shown in logs and reports.
    pub fn opts_string(&self) -> String {
        self.opts.join(" ")
    }
}

fn serialize_labels<S: Serializer>(labels: &BTreeSet<String>, s: S) -> Result<S::Ok, S::Error> {
    let joined = labels.iter().map(String::as_str).collect::<Vec<_>>().join(" && ");
    s.serialize_str(&joined)
}

fn deserialize_labels<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<String>, D::Error> {
    let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
    Ok(raw
        .split("&&")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parsed matrix configuration file.
///
/// Produced by a [`crate::ports::MatrixProcessor`] and handed back unchanged
/// to a [`crate::ports::MatrixBuilder`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDescription {
    pub configs: Vec<BuildConfig>,
    /// All configurations encoded as a single axis value for the CI server.
    pub as_axis: String,
}

impl MatrixDescription {
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Result of a single matrix configuration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRunInfo {
    pub opts: Vec<String>,
    pub host: Option<String>,
    pub result: BuildResult,
    pub url: Option<String>,
}

impl MatrixRunInfo {
    pub fn opts_string(&self) -> String {
        self.opts.join(" ")
    }
}

/// The build started on the CI server for a matrix job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredBuild {
    pub result: BuildResult,
    pub absolute_url: String,
    #[serde(default)]
    pub number: Option<u64>,
}

/// Status produced by release-engineering processing of a build.
///
/// This is also the format of the JSON status file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelengStatus {
    pub result: BuildResult,
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
}

impl RelengStatus {
    /// Runs reported in the return value, if it carries a run list.
    pub fn runs(&self) -> Vec<MatrixRunInfo> {
        self.return_value
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }
}

/// Everything a matrix build produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixBuildOutcome {
    pub build: TriggeredBuild,
    pub status: RelengStatus,
}
