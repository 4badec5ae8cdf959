//! Builds requested from Gerrit review comments.
//!
//! A reviewer asks for builds with a `[JENKINS]` paragraph in a comment,
//! e.g. `[JENKINS] cross-verify 1234 coverage`. The request is turned into
//! a list of builds for the on-demand pipeline, and the results of those
//! builds are summarized back into the triggering build afterwards.

use crate::gerrit::{GerritIntegration, RefSpec};
use crate::projects::{BuildRevision, ProjectSetup};
use gantry_core::ports::MatrixProcessor;
use gantry_core::{BuildResult, Error, MatrixDescription, Project, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, info, instrument};

/// Kind of build the on-demand pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildKind {
    ClangAnalyzer,
    Coverage,
    Documentation,
    SourcePackage,
    RegtestPackage,
    Matrix,
    Release,
    Uncrustify,
    RegressiontestsUpdate,
    UpdateRegtestHash,
}

impl BuildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildKind::ClangAnalyzer => "clang-analyzer",
            BuildKind::Coverage => "coverage",
            BuildKind::Documentation => "documentation",
            BuildKind::SourcePackage => "source-package",
            BuildKind::RegtestPackage => "regtest-package",
            BuildKind::Matrix => "matrix",
            BuildKind::Release => "release",
            BuildKind::Uncrustify => "uncrustify",
            BuildKind::RegressiontestsUpdate => "regressiontests-update",
            BuildKind::UpdateRegtestHash => "update-regtest-hash",
        }
    }
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build requested in a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedBuild {
    #[serde(rename = "type")]
    pub kind: BuildKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Matrix file of a matrix build, replaced by `matrix` once processed.
    #[serde(rename = "matrix-file", default, skip_serializing_if = "Option::is_none")]
    pub matrix_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixDescription>,
    /// Release build without the `-dev` version suffix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_flag: Option<bool>,
}

impl RequestedBuild {
    pub fn new(kind: BuildKind) -> Self {
        Self {
            kind,
            desc: None,
            matrix_file: None,
            matrix: None,
            release_flag: None,
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn matrix(desc: impl Into<String>, matrix_file: impl Into<String>) -> Self {
        let mut build = Self::new(BuildKind::Matrix).with_desc(desc);
        build.matrix_file = Some(matrix_file.into());
        build
    }
}

/// The other change of a cross-verify request, which gets review comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossVerifyInfo {
    pub change: u64,
    pub patchset: u64,
}

/// What the on-demand pipeline should do for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnDemandActions {
    pub builds: Vec<RequestedBuild>,
    pub revisions: Vec<BuildRevision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gerrit_info: Option<CrossVerifyInfo>,
}

fn is_release_branch(token: &str) -> bool {
    token
        .strip_prefix("release-")
        .is_some_and(|year| year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()))
}

/// Parses an on-demand request and applies its refspec overrides.
pub struct RequestParser<'a> {
    gerrit: &'a GerritIntegration,
    setup: &'a ProjectSetup,
    triggering_project: Option<Project>,
    branch: Option<String>,
    branch_projects: BTreeSet<Project>,
    cross_verify: Option<CrossVerifyInfo>,
    builds: Vec<RequestedBuild>,
    default_builds: Vec<RequestedBuild>,
}

impl<'a> RequestParser<'a> {
    pub fn new(gerrit: &'a GerritIntegration, setup: &'a ProjectSetup) -> Result<Self> {
        let triggering_project = gerrit.triggering_project()?;
        let mut branch_projects = BTreeSet::from([Project::Gromacs, Project::Regressiontests]);
        let mut branch = None;
        if let Some(project) = triggering_project {
            if branch_projects.remove(&project) {
                branch = gerrit.triggering_branch();
            }
        }
        Ok(Self {
            gerrit,
            setup,
            triggering_project,
            branch,
            branch_projects,
            cross_verify: None,
            builds: Vec::new(),
            default_builds: Vec::new(),
        })
    }

    #[instrument(skip(self))]
    pub async fn parse(&mut self, request: &str) -> Result<()> {
        let mut tokens = request.split_whitespace().map(str::to_ascii_lowercase);
        let Some(first) = tokens.next() else {
            return Err(Error::Build("Empty on-demand request".to_string()));
        };
        let mut tokens: Vec<String> = if first == "cross-verify" {
            let target = tokens
                .next()
                .ok_or_else(|| Error::Build("cross-verify needs a change".to_string()))?;
            self.parse_cross_verify(&target).await?;
            tokens.collect()
        } else if is_release_branch(&first) {
            self.process_release_branch(&first)?;
            tokens.collect()
        } else {
            std::iter::once(first).chain(tokens).collect()
        };
        tokens.reverse();

        while let Some(token) = tokens.pop() {
            match token.as_str() {
                "quiet" => self.cross_verify = None,
                "clang-analyzer" => self.builds.push(RequestedBuild::new(BuildKind::ClangAnalyzer)),
                "coverage" => self.builds.push(RequestedBuild::new(BuildKind::Coverage)),
                "documentation" => self.builds.push(RequestedBuild::new(BuildKind::Documentation)),
                "package" => {
                    let project = self.triggering_project.unwrap_or(Project::Releng);
                    if matches!(project, Project::Gromacs | Project::Releng) {
                        self.builds.push(RequestedBuild::new(BuildKind::SourcePackage));
                    }
                    if matches!(project, Project::Regressiontests | Project::Releng) {
                        self.builds.push(RequestedBuild::new(BuildKind::RegtestPackage));
                    }
                }
                "weekly" | "nightly" | "post-submit" | "pre-submit" => {
                    let matrix_file = format!("{}-matrix", token);
                    self.builds.push(RequestedBuild::matrix(token.as_str(), matrix_file));
                }
                "regtest-package" => self.builds.push(RequestedBuild::new(BuildKind::RegtestPackage)),
                "release" => {
                    let no_dev = tokens.last().is_some_and(|t| t == "no-dev");
                    if no_dev {
                        tokens.pop();
                    }
                    let mut build = RequestedBuild::new(BuildKind::Release);
                    build.release_flag = Some(no_dev);
                    self.builds.push(build);
                }
                "uncrustify" => self.builds.push(RequestedBuild::new(BuildKind::Uncrustify)),
                "update" => {
                    // Allowed from releng so that the job itself can be tested.
                    if self.triggering_project == Some(Project::Gromacs) {
                        return Err(Error::Build(
                            "Update only makes sense for regressiontests changes".to_string(),
                        ));
                    }
                    self.builds
                        .push(RequestedBuild::new(BuildKind::RegressiontestsUpdate));
                }
                "update-regtest-hash" => {
                    self.builds.push(RequestedBuild::new(BuildKind::UpdateRegtestHash))
                }
                _ => return Err(Error::Build(format!("Unknown request: {}", request))),
            }
        }
        Ok(())
    }

    async fn parse_cross_verify(&mut self, target: &str) -> Result<()> {
        let change = self.gerrit.query_change(target, true).await?;
        let project = change.project;
        if self.triggering_project == Some(project) {
            return Err(Error::Build(
                "Cross-verify is not possible with another change from the same repository"
                    .to_string(),
            ));
        }
        if project == Project::Releng {
            return Err(Error::Build(
                "Cross-verify with releng changes should be initiated from the releng change"
                    .to_string(),
            ));
        }
        if self.branch.is_none() {
            self.branch = Some(change.branch.clone());
        }
        self.branch_projects.remove(&project);
        self.setup
            .override_refspec(project, change.refspec.clone())
            .await?;
        debug!(%project, refspec = %change.refspec, "Cross-verifying with change");

        self.default_builds = vec![RequestedBuild::matrix("cross-verify", "pre-submit-matrix")];
        if matches!(self.triggering_project, None | Some(Project::Releng)) {
            self.default_builds.extend([
                RequestedBuild::new(BuildKind::ClangAnalyzer).with_desc("cross-verify"),
                RequestedBuild::new(BuildKind::Documentation).with_desc("cross-verify"),
                RequestedBuild::new(BuildKind::Uncrustify).with_desc("cross-verify"),
            ]);
        }
        if self.triggering_project.is_some() && change.is_open {
            self.cross_verify = Some(CrossVerifyInfo {
                change: change.number,
                patchset: change.patch_number,
            });
        }
        Ok(())
    }

    fn process_release_branch(&mut self, branch: &str) -> Result<()> {
        if self
            .triggering_project
            .is_some_and(|project| project != Project::Releng)
        {
            return Err(Error::Build(
                "Release branch verification only makes sense for releng changes".to_string(),
            ));
        }
        self.branch = Some(branch.to_string());
        self.default_builds = vec![
            RequestedBuild::matrix(branch, "pre-submit-matrix"),
            RequestedBuild::new(BuildKind::ClangAnalyzer).with_desc(branch),
            RequestedBuild::new(BuildKind::Documentation).with_desc(branch),
            RequestedBuild::new(BuildKind::Uncrustify).with_desc(branch),
        ];
        Ok(())
    }

    /// Finish the request: pin branch projects, prepare matrices and
    /// announce a cross-verify build on the other change.
    pub async fn into_actions(self, processor: &dyn MatrixProcessor) -> Result<OnDemandActions> {
        if let Some(branch) = &self.branch {
            for project in &self.branch_projects {
                self.setup
                    .override_refspec(*project, RefSpec::for_branch(branch))
                    .await?;
            }
        }
        let mut builds = if self.builds.is_empty() {
            self.default_builds
        } else {
            self.builds
        };
        for build in builds.iter_mut().filter(|b| b.kind == BuildKind::Matrix) {
            self.setup.checkout_project(Project::Gromacs).await?;
            if let Some(matrix_file) = build.matrix_file.take() {
                build.matrix = Some(processor.process_matrix_configs(&matrix_file).await?);
            }
        }
        let revisions = self.setup.build_revisions().await?;
        if let Some(info) = self.cross_verify {
            self.gerrit
                .post_cross_verify_start(info.change, info.patchset)
                .await?;
        }
        info!(builds = builds.len(), "Prepared on-demand builds");
        Ok(OnDemandActions {
            builds,
            revisions,
            gerrit_info: self.cross_verify,
        })
    }
}

/// Turn the comment that triggered the build into on-demand actions.
pub async fn actions_from_triggering_comment(
    gerrit: &GerritIntegration,
    setup: &ProjectSetup,
    processor: &dyn MatrixProcessor,
) -> Result<OnDemandActions> {
    let request = gerrit
        .triggering_comment()?
        .ok_or_else(|| Error::Build("No on-demand request in the triggering comment".to_string()))?;
    info!(%request, "Processing on-demand request");
    let mut parser = RequestParser::new(gerrit, setup)?;
    parser.parse(&request).await?;
    parser.into_actions(processor).await
}

/// Result of one on-demand build, as collected by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub result: BuildResult,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
}

impl BuildReport {
    fn reason(&self) -> Option<&str> {
        self.reason
            .as_deref()
            .map(str::trim_end)
            .filter(|r| !r.is_empty())
    }

    fn url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.is_empty())
    }

    fn with_desc(&self, text: &str) -> String {
        match self.desc.as_deref().filter(|d| !d.is_empty()) {
            Some(desc) if !text.is_empty() => format!("{} ({})", text, desc),
            _ => text.to_string(),
        }
    }

    fn title(&self) -> String {
        let text = self
            .url()
            .or(self.title.as_deref())
            .unwrap_or_default();
        self.with_desc(text)
    }

    /// `TITLE: RESULT`, followed by the reason in a `<<<`/`>>>` block.
    pub fn message(&self) -> String {
        let mut message = format!("{}: {}", self.title(), self.result);
        if let Some(reason) = self.reason() {
            message.push_str(&format!(" <<<\n{}\n>>>", reason));
        }
        message
    }
}

/// Input of the post-build step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostBuildInput {
    pub builds: Vec<BuildReport>,
    #[serde(default)]
    pub gerrit_info: Option<CrossVerifyInfo>,
}

/// What the triggering build shows after the on-demand builds finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBuildSummary {
    pub url: Option<String>,
    pub message: Option<String>,
}

/// Summarize finished on-demand builds and report a cross-verify result.
#[instrument(skip_all, fields(builds = input.builds.len()))]
pub async fn do_post_build(
    gerrit: &GerritIntegration,
    input: &PostBuildInput,
) -> Result<PostBuildSummary> {
    let messages: Vec<String> = input.builds.iter().map(BuildReport::message).collect();
    let summary = match input.builds.as_slice() {
        [build] => PostBuildSummary {
            url: build.url().map(|url| build.with_desc(url)),
            message: build.reason().map(str::to_string),
        },
        [] => PostBuildSummary::default(),
        _ => PostBuildSummary {
            url: None,
            message: Some(messages.join("\n")),
        },
    };
    if let Some(info) = input.gerrit_info {
        gerrit
            .post_cross_verify_finish(info.change, info.patchset, &messages)
            .await?;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report(url: Option<&str>, result: BuildResult, reason: Option<&str>) -> BuildReport {
        BuildReport {
            title: Some("Coverage".to_string()),
            url: url.map(str::to_string),
            result,
            reason: reason.map(str::to_string),
            desc: None,
        }
    }

    #[test]
    fn test_release_branch_token() {
        assert!(is_release_branch("release-2018"));
        assert!(!is_release_branch("release-18"));
        assert!(!is_release_branch("release-20x8"));
        assert!(!is_release_branch("release"));
    }

    #[test]
    fn test_build_message() {
        let build = report(Some("http://ci/job/Coverage/7/"), BuildResult::Success, None);
        assert_eq!(build.message(), "http://ci/job/Coverage/7/: SUCCESS");

        let mut build = report(None, BuildResult::Failure, Some("Compilation failed\n"));
        build.desc = Some("cross-verify".to_string());
        assert_eq!(
            build.message(),
            "Coverage (cross-verify): FAILURE <<<\nCompilation failed\n>>>"
        );
    }

    #[test]
    fn test_requested_build_format() {
        let mut build = RequestedBuild::new(BuildKind::Release);
        build.release_flag = Some(true);
        assert_eq!(
            serde_json::to_value(&build).unwrap(),
            serde_json::json!({"type": "release", "release_flag": true})
        );
        assert_eq!(
            serde_json::to_value(RequestedBuild::matrix("nightly", "nightly-matrix")).unwrap(),
            serde_json::json!({
                "type": "matrix",
                "desc": "nightly",
                "matrix-file": "nightly-matrix"
            })
        );
    }
}
