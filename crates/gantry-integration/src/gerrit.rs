//! Gerrit access over ssh and Gerrit Trigger build parameters.

use crate::command::{CommandRunner, args};
use crate::env::BuildEnv;
use async_trait::async_trait;
use base64::Engine;
use gantry_core::ports::ReviewPoster;
use gantry_core::{Error, Project, Result};
use gantry_matrix::axis::shell_quote;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument};

/// A git refspec used to check out a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    value: String,
    remote: String,
    /// Branch, for `refs/heads/BRANCH`.
    pub branch: Option<String>,
    /// Change number, for `refs/changes/NN/CHANGE/PATCH`.
    pub change_number: Option<u64>,
}

impl RefSpec {
    pub fn new(value: impl Into<String>) -> Self {
        Self::with_remote_hash(value, None::<String>)
    }

    /// A refspec whose commit at the remote is already known.
    pub fn with_remote_hash(value: impl Into<String>, remote_hash: Option<impl Into<String>>) -> Self {
        let value = value.into();
        let remote = match remote_hash.map(Into::into) {
            Some(hash) if !hash.is_empty() => hash,
            _ => value.clone(),
        };
        let mut branch = None;
        let mut change_number = None;
        if let Some(rest) = value.strip_prefix("refs/changes/") {
            change_number = rest.split('/').nth(1).and_then(|n| n.parse().ok());
        } else if let Some(rest) = value.strip_prefix("refs/heads/") {
            branch = rest.split('/').next().map(str::to_string);
        }
        Self {
            value,
            remote,
            branch,
            change_number,
        }
    }

    pub fn for_branch(branch: &str) -> Self {
        Self::new(format!("refs/heads/{}", branch))
    }

    /// `HEAD` leaves the working tree alone; used for testing.
    pub fn is_no_op(&self) -> bool {
        self.value == "HEAD"
    }

    /// Whether the refspec names a fixed commit on the remote.
    pub fn is_static(&self) -> bool {
        self.value.starts_with("refs/changes/")
    }

    /// Ref passed to `git fetch`.
    pub fn fetch(&self) -> &str {
        &self.value
    }

    /// Ref passed to `git checkout` after the fetch.
    pub fn checkout(&self) -> &str {
        if self.remote == self.value {
            "FETCH_HEAD"
        } else {
            &self.remote
        }
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn de_number<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    match NumberOrString::deserialize(d)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PatchSetData {
    #[serde(deserialize_with = "de_number")]
    number: u64,
    #[serde(rename = "ref")]
    git_ref: String,
    revision: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChangeData {
    project: String,
    branch: String,
    #[serde(deserialize_with = "de_number")]
    number: u64,
    subject: String,
    url: String,
    #[serde(default)]
    open: bool,
    #[serde(rename = "currentPatchSet")]
    current_patch_set: PatchSetData,
}

/// A change as reported by `gerrit query`.
#[derive(Debug, Clone)]
pub struct GerritChange {
    pub project: Project,
    pub branch: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub is_open: bool,
    pub patch_number: u64,
    pub refspec: RefSpec,
}

impl GerritChange {
    pub fn from_json(line: &str) -> Result<Self> {
        let data: ChangeData = serde_json::from_str(line)?;
        Ok(Self {
            project: data.project.parse()?,
            branch: data.branch,
            number: data.number,
            title: data.subject,
            url: data.url,
            is_open: data.open,
            patch_number: data.current_patch_set.number,
            refspec: RefSpec::with_remote_hash(
                data.current_patch_set.git_ref,
                Some(data.current_patch_set.revision),
            ),
        })
    }
}

/// A `[JENKINS]` paragraph in a review comment.
static JENKINS_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\n\n)\[JENKINS\]\s*((?:.+\n)*(?:.+))(?:\n\n|\n?$)")
        .expect("request pattern is valid")
});

/// Extract the request from the text of a review comment.
pub fn parse_comment_request(comment: &str) -> Option<String> {
    JENKINS_REQUEST
        .captures(comment)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Connection settings for the Gerrit server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GerritConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl Default for GerritConfig {
    fn default() -> Self {
        Self {
            host: "gerrit.gromacs.org".to_string(),
            port: 29418,
            user: "jenkins".to_string(),
        }
    }
}

/// Gerrit ssh commands plus the Gerrit Trigger parameters of this build.
pub struct GerritIntegration {
    config: GerritConfig,
    env: Arc<BuildEnv>,
    runner: Arc<dyn CommandRunner>,
}

impl GerritIntegration {
    pub fn new(config: GerritConfig, env: Arc<BuildEnv>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            env,
            runner,
        }
    }

    fn ssh_target(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    fn ssh_gerrit_cmd(&self, name: &str) -> Vec<String> {
        args([
            "ssh".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
            self.ssh_target(),
            "gerrit".to_string(),
            name.to_string(),
        ])
    }

    /// URL for git to access `project`.
    pub fn git_url(&self, project: Project) -> String {
        format!(
            "ssh://{}:{}/{}.git",
            self.ssh_target(),
            self.config.port,
            project
        )
    }

    /// Hash of `refspec` on the server.
    #[instrument(skip(self))]
    pub async fn remote_hash(&self, project: Project, refspec: &RefSpec) -> Result<String> {
        let cmd = args(["git", "ls-remote", self.git_url(project).as_str(), refspec.fetch()]);
        let output = self.runner.check_output(&cmd, None).await?;
        let mut words = output.split_whitespace();
        match (words.next(), words.next()) {
            (Some(hash), Some(_)) => Ok(hash.to_string()),
            _ => Err(Error::Build(format!(
                "failed to find refspec {} for {}",
                refspec, project
            ))),
        }
    }

    /// Project whose change triggered the build.
    pub fn triggering_project(&self) -> Result<Option<Project>> {
        self.env
            .get("GERRIT_PROJECT")
            .map(str::parse::<Project>)
            .transpose()
    }

    pub fn triggering_refspec(&self) -> Result<RefSpec> {
        self.env
            .get("GERRIT_REFSPEC")
            .map(RefSpec::new)
            .ok_or_else(|| Error::Configuration("GERRIT_REFSPEC not set".to_string()))
    }

    pub fn triggering_branch(&self) -> Option<String> {
        self.env.get("GERRIT_BRANCH").map(str::to_string)
    }

    /// Change and patch set numbers of the triggering change.
    pub fn triggering_change(&self) -> Result<Option<(u64, u64)>> {
        let (Some(change), Some(patchset)) = (
            self.env.get("GERRIT_CHANGE_NUMBER"),
            self.env.get("GERRIT_PATCHSET_NUMBER"),
        ) else {
            return Ok(None);
        };
        let parse = |name: &str, value: &str| {
            value.parse::<u64>().map_err(|_| {
                Error::Configuration(format!("invalid {}: {}", name, value))
            })
        };
        Ok(Some((
            parse("GERRIT_CHANGE_NUMBER", change)?,
            parse("GERRIT_PATCHSET_NUMBER", patchset)?,
        )))
    }

    pub fn triggering_change_url(&self) -> Option<&str> {
        self.env.get("GERRIT_CHANGE_URL")
    }

    /// Request in the comment that triggered the build.
    ///
    /// Gerrit Trigger passes the comment base64-encoded; the request is the
    /// paragraph starting with `[JENKINS]`. Manually started builds pass
    /// the request as is in `MANUAL_COMMENT_TEXT`.
    pub fn triggering_comment(&self) -> Result<Option<String>> {
        if let Some(encoded) = self.env.get("GERRIT_EVENT_COMMENT_TEXT") {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::Gerrit(format!("invalid comment text: {}", e)))?;
            let text = String::from_utf8_lossy(&bytes);
            return Ok(parse_comment_request(&text));
        }
        Ok(self.env.get("MANUAL_COMMENT_TEXT").map(str::to_string))
    }

    fn cross_verify_subject(&self) -> Result<String> {
        Ok(format!(
            "Cross-verify with {} (patch set {})",
            self.env.require("GERRIT_CHANGE_URL")?,
            self.env.require("GERRIT_PATCHSET_NUMBER")?
        ))
    }

    /// Tell the cross-verified change that a build is running for it.
    pub async fn post_cross_verify_start(&self, change: u64, patchset: u64) -> Result<()> {
        let message = format!(
            "{} running at {}",
            self.cross_verify_subject()?,
            self.env.require("BUILD_URL")?
        );
        self.post_review(change, patchset, &message).await
    }

    /// Report the results of a cross-verify build to the other change.
    pub async fn post_cross_verify_finish(
        &self,
        change: u64,
        patchset: u64,
        build_messages: &[String],
    ) -> Result<()> {
        let message = format!(
            "{} finished\n\n{}",
            self.cross_verify_subject()?,
            build_messages.join("\n\n")
        );
        self.post_review(change, patchset, &message).await
    }

    /// Run `gerrit query` and return the first matching change.
    #[instrument(skip(self))]
    pub async fn query_change(&self, query: &str, expect_unique: bool) -> Result<GerritChange> {
        let mut cmd = self.ssh_gerrit_cmd("query");
        cmd.extend(args(["--format=JSON", "--current-patch-set", "--", query]));
        let output = self.runner.check_output(&cmd, None).await?;
        let lines: Vec<&str> = output.lines().collect();
        // The last line is a statistics record.
        if lines.len() < 2 {
            return Err(Error::Build(format!("{} does not match any change", query)));
        }
        if lines.len() > 2 && expect_unique {
            return Err(Error::Build(format!(
                "{} does not identify a unique change",
                query
            )));
        }
        GerritChange::from_json(lines[0])
    }

    /// Post a review comment to a patch set.
    #[instrument(skip(self, message))]
    pub async fn post_review(&self, change: u64, patchset: u64, message: &str) -> Result<()> {
        let mut cmd = self.ssh_gerrit_cmd("review");
        // ssh passes the words to a remote shell.
        cmd.extend(args([
            format!("{},{}", change, patchset),
            "-m".to_string(),
            shell_quote(message),
        ]));
        debug!(change, patchset, "Posting review");
        self.runner.check_call(&cmd, None).await
    }
}

/// [`ReviewPoster`] commenting on the change that triggered the build.
pub struct GerritReviewPoster {
    gerrit: Arc<GerritIntegration>,
    prefix: String,
}

impl GerritReviewPoster {
    pub fn new(gerrit: Arc<GerritIntegration>) -> Self {
        Self {
            gerrit,
            prefix: "Matrix build".to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn message(&self, url: &str) -> String {
        format!("{}: {}", self.prefix, url)
    }
}

#[async_trait]
impl ReviewPoster for GerritReviewPoster {
    async fn post_review(&self, url: &str) -> Result<()> {
        let Some((change, patchset)) = self.gerrit.triggering_change()? else {
            info!(url, "Build not triggered from Gerrit, not posting a review");
            return Ok(());
        };
        self.gerrit
            .post_review(change, patchset, &self.message(url))
            .await?;
        info!(change, patchset, url, "Posted matrix build to Gerrit");
        Ok(())
    }
}
