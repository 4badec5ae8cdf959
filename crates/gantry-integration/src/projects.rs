//! Project refspecs and git checkouts in the build workspace.

use crate::command::{CommandRunner, args};
use crate::env::BuildEnv;
use crate::gerrit::{GerritIntegration, RefSpec};
use async_trait::async_trait;
use gantry_core::ports::BuildSetup;
use gantry_core::{Error, Project, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Revision of one project used in the build, as passed to downstream jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRevision {
    pub project: Project,
    pub branch: Option<String>,
    pub build_branch_label: Option<String>,
    pub refspec: String,
    pub hash: Option<String>,
    pub title: Option<String>,
    pub refspec_env: String,
    pub hash_env: String,
}

/// State of a project taking part in the build.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub project: Project,
    pub branch: Option<String>,
    pub refspec: Option<RefSpec>,
    pub head_hash: Option<String>,
    pub head_title: Option<String>,
    /// Hash of the refspec on the Gerrit server.
    pub remote_hash: Option<String>,
    pub is_checked_out: bool,
}

impl ProjectInfo {
    fn new(project: Project, refspec: Option<RefSpec>) -> Self {
        let branch = refspec.as_ref().and_then(|r| r.branch.clone());
        Self {
            project,
            branch,
            refspec,
            head_hash: None,
            head_title: None,
            remote_hash: None,
            is_checked_out: false,
        }
    }

    fn set_branch(&mut self, branch: Option<String>) {
        if self.branch.is_none() {
            self.branch = branch;
        }
    }

    fn override_refspec(&mut self, refspec: RefSpec) {
        if refspec.branch.is_some() {
            self.branch = refspec.branch.clone();
        }
        self.refspec = Some(refspec);
    }

    /// Branch name as used in build labels: `release-2016` becomes `2016`.
    pub fn build_branch_label(&self) -> Option<String> {
        self.branch.as_deref().map(|branch| {
            branch
                .strip_prefix("release-")
                .unwrap_or(branch)
                .to_string()
        })
    }

    pub fn has_correct_hash(&self) -> bool {
        self.head_hash == self.remote_hash
    }

    pub fn to_revision(&self) -> BuildRevision {
        BuildRevision {
            project: self.project,
            branch: self.branch.clone(),
            build_branch_label: self.build_branch_label(),
            refspec: self
                .refspec
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            hash: self.head_hash.clone(),
            title: self.head_title.clone(),
            refspec_env: self.project.refspec_env(),
            hash_env: self.project.hash_env(),
        }
    }
}

/// Tracks which revision of each project the build uses and checks projects
/// out on demand.
///
/// Projects are known when `<PROJECT>_REFSPEC` is set (`auto` resolves the
/// refspec from the branch being built). The releng project and
/// `CHECKOUT_PROJECT` are checked out by the CI job before any of this runs;
/// the project that triggered the build is fetched on checkout.
pub struct ProjectsManager {
    workspace: PathBuf,
    env: Arc<BuildEnv>,
    gerrit: Arc<GerritIntegration>,
    runner: Arc<dyn CommandRunner>,
    projects: BTreeMap<Project, ProjectInfo>,
    branch: Option<String>,
}

impl ProjectsManager {
    #[instrument(skip_all, fields(workspace = %workspace.as_ref().display()))]
    pub async fn init(
        workspace: impl AsRef<Path>,
        env: Arc<BuildEnv>,
        gerrit: Arc<GerritIntegration>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let mut manager = Self {
            workspace: workspace.as_ref().to_path_buf(),
            env,
            gerrit,
            runner,
            projects: BTreeMap::new(),
            branch: None,
        };
        manager.init_projects().await?;
        Ok(manager)
    }

    fn parse_refspec(&self, project: Project) -> Option<Option<RefSpec>> {
        let value = self.env.get(&project.refspec_env())?;
        if value.eq_ignore_ascii_case("auto") {
            return Some(None);
        }
        Some(Some(RefSpec::with_remote_hash(
            value,
            self.env.get(&project.hash_env()),
        )))
    }

    fn parse_checkout_project(&self) -> Result<Option<Project>> {
        self.env
            .get("CHECKOUT_PROJECT")
            .map(str::parse::<Project>)
            .transpose()
    }

    fn info_mut(&mut self, project: Project) -> &mut ProjectInfo {
        self.projects
            .entry(project)
            .or_insert_with(|| ProjectInfo::new(project, None))
    }

    async fn init_projects(&mut self) -> Result<()> {
        let mut initial = BTreeSet::from([Project::Releng]);
        for project in Project::ALL {
            if let Some(refspec) = self.parse_refspec(project) {
                self.projects.insert(project, ProjectInfo::new(project, refspec));
            }
        }

        if let Some(gerrit_project) = self.gerrit.triggering_project()? {
            let branch = self.gerrit.triggering_branch();
            let refspec = self.gerrit.triggering_refspec()?;
            let info = self.info_mut(gerrit_project);
            info.set_branch(branch.clone());
            info.override_refspec(refspec);
            if gerrit_project != Project::Releng {
                self.branch = branch;
            }
        }

        if let Some(checkout_project) = self.parse_checkout_project()? {
            if let Some(value) = self.env.get("CHECKOUT_REFSPEC") {
                let refspec =
                    RefSpec::with_remote_hash(value, self.env.get(&checkout_project.hash_env()));
                self.info_mut(checkout_project).override_refspec(refspec);
            }
            initial.insert(checkout_project);
        }

        self.info_mut(Project::Releng);
        self.resolve_missing_refspecs().await?;

        for project in initial {
            self.set_checked_out(project).await?;
        }
        Ok(())
    }

    async fn resolve_missing_refspecs(&mut self) -> Result<()> {
        let missing: Vec<Project> = self
            .projects
            .values()
            .filter(|p| p.refspec.is_none())
            .map(|p| p.project)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        if self.branch.is_none() {
            let known: Vec<Project> = self
                .projects
                .values()
                .filter(|p| p.refspec.is_some() && p.project != Project::Releng)
                .map(|p| p.project)
                .collect();
            if let [project] = known.as_slice() {
                self.ensure_branch_loaded(*project).await?;
                self.branch = self.projects[project].branch.clone();
            } else if known.len() > 1 {
                warn!(?known, "Several projects have explicit refspecs, using master for the rest");
            }
        }
        let branch = self.branch.get_or_insert_with(|| "master".to_string()).clone();
        let refspec = RefSpec::for_branch(&branch);
        for project in missing {
            debug!(%project, %refspec, "Resolved missing refspec");
            self.info_mut(project).override_refspec(refspec.clone());
        }
        Ok(())
    }

    /// Directory of `project` in the workspace.
    pub fn project_dir(&self, project: Project) -> PathBuf {
        self.workspace.join(project.as_str())
    }

    /// Title and hash of `commit` in the checkout of `project`.
    async fn commit_info(&self, project: Project, commit: &str) -> Result<Option<(String, String)>> {
        let cmd = args(["git", "rev-list", "-n1", "--format=oneline", commit, "--"]);
        let output = self
            .runner
            .check_output(&cmd, Some(&self.project_dir(project)))
            .await?;
        let line = output.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (hash, title) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        Ok(Some((title.trim().to_string(), hash.to_string())))
    }

    async fn set_checked_out(&mut self, project: Project) -> Result<()> {
        let info = self.verify_project(project, false)?.clone();
        let (head_title, head_hash) = match self.commit_info(project, "HEAD").await? {
            Some((title, hash)) => (Some(title), Some(hash)),
            None => (None, None),
        };
        let remote_hash = match &info.refspec {
            Some(refspec) if refspec.is_static() && head_hash.is_some() => {
                Some(self.gerrit.remote_hash(project, refspec).await?)
            }
            _ => head_hash.clone(),
        };
        let info = self.info_mut(project);
        info.head_title = head_title;
        info.head_hash = head_hash;
        info.remote_hash = remote_hash;
        info.is_checked_out = true;
        Ok(())
    }

    async fn ensure_branch_loaded(&mut self, project: Project) -> Result<()> {
        if self.projects[&project].branch.is_none() {
            self.load_from_gerrit(project).await?;
        }
        Ok(())
    }

    async fn load_from_gerrit(&mut self, project: Project) -> Result<()> {
        let info = self.projects[&project].clone();
        if info.head_title.is_some() && info.branch.is_some() {
            return Ok(());
        }
        let change_number = info.refspec.as_ref().and_then(|r| r.change_number);
        let change = match (change_number, &info.head_hash) {
            (Some(number), _) => Some(self.gerrit.query_change(&number.to_string(), true).await?),
            (None, Some(hash)) => Some(
                self.gerrit
                    .query_change(&format!("commit:{}", hash), false)
                    .await?,
            ),
            (None, None) => None,
        };
        if let Some(change) = change {
            let info = self.info_mut(project);
            info.head_title.get_or_insert(change.title);
            info.branch.get_or_insert(change.branch);
        }
        Ok(())
    }

    async fn load_missing_info(&mut self, project: Project) -> Result<()> {
        let info = self.projects[&project].clone();
        if !info.is_checked_out {
            if let Some(refspec) = &info.refspec {
                let hash = self.gerrit.remote_hash(project, refspec).await?;
                // The project may not be present in the workspace.
                let title = self
                    .commit_info(project, &hash)
                    .await
                    .ok()
                    .flatten()
                    .map(|(title, _)| title);
                let info = self.info_mut(project);
                info.head_hash = Some(hash.clone());
                info.remote_hash = Some(hash);
                info.head_title = title;
            }
        }
        self.load_from_gerrit(project).await
    }

    fn verify_project(&self, project: Project, expect_checkout: bool) -> Result<&ProjectInfo> {
        let info = self.projects.get(&project).ok_or_else(|| {
            Error::Configuration(format!("{} is not set", project.refspec_env()))
        })?;
        if expect_checkout && !info.is_checked_out {
            return Err(Error::ProjectNotCheckedOut(project.to_string()));
        }
        Ok(info)
    }

    pub fn project_info(&self, project: Project, expect_checkout: bool) -> Result<&ProjectInfo> {
        self.verify_project(project, expect_checkout)
    }

    pub fn override_refspec(&mut self, project: Project, refspec: RefSpec) -> Result<()> {
        self.verify_project(project, false)?;
        self.info_mut(project).override_refspec(refspec);
        Ok(())
    }

    /// Check out `project` unless that was already done for this build.
    #[instrument(skip(self))]
    pub async fn checkout_project(&mut self, project: Project) -> Result<()> {
        let info = self.verify_project(project, false)?;
        if info.is_checked_out {
            debug!(%project, "Already checked out");
            return Ok(());
        }
        let refspec = info
            .refspec
            .clone()
            .ok_or_else(|| Error::Configuration(format!("no refspec for {}", project)))?;
        if !refspec.is_no_op() {
            self.git_checkout(project, &refspec).await?;
        }
        self.set_checked_out(project).await?;
        info!(%project, %refspec, "Checked out project");
        Ok(())
    }

    async fn git_checkout(&self, project: Project, refspec: &RefSpec) -> Result<()> {
        let dir = self.project_dir(project);
        tokio::fs::create_dir_all(&dir).await?;
        let cwd = Some(dir.as_path());
        if !tokio::fs::try_exists(dir.join(".git")).await? {
            self.runner.check_call(&args(["git", "init"]), cwd).await?;
        }
        let url = self.gerrit.git_url(project);
        self.runner
            .check_call(&args(["git", "fetch", url.as_str(), refspec.fetch()]), cwd)
            .await?;
        self.runner
            .check_call(&args(["git", "checkout", "-qf", refspec.checkout()]), cwd)
            .await?;
        self.runner.check_call(&args(["git", "gc"]), cwd).await?;
        self.runner
            .check_call(&args(["git", "clean", "-ffdxq"]), cwd)
            .await
    }

    /// Table of the checked-out revisions, for the build log.
    pub fn version_table(&self) -> String {
        let rule = "-".repeat(59);
        let mut lines = vec![rule.clone(), "Building using versions:".to_string()];
        for info in self.projects.values().filter(|p| p.is_checked_out) {
            let wrong = if info.has_correct_hash() { "" } else { " (WRONG)" };
            let refspec = info
                .refspec
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            lines.push(format!(
                "{:16} {:26} {}{}",
                format!("{}:", info.project),
                refspec,
                info.head_hash.as_deref().unwrap_or(""),
                wrong
            ));
            if let Some(title) = &info.head_title {
                lines.push(format!("{:19}{}", "", title));
            }
        }
        lines.push(rule);
        lines.join("\n")
    }

    /// Fail when a checked-out project is not at the expected revision.
    pub fn check_projects(&self) -> Result<()> {
        let mut all_correct = true;
        for info in self.projects.values().filter(|p| p.is_checked_out) {
            if !info.has_correct_hash() {
                warn!(
                    project = %info.project,
                    head = ?info.head_hash,
                    expected = ?info.remote_hash,
                    "Checkout is at the wrong revision"
                );
                all_correct = false;
            }
        }
        if all_correct {
            Ok(())
        } else {
            Err(Error::Build("Checkout failed (Jenkins issue)".to_string()))
        }
    }

    /// Revisions of every known project, querying what is not known locally.
    pub async fn build_revisions(&mut self) -> Result<Vec<BuildRevision>> {
        let projects: Vec<Project> = self.projects.keys().copied().collect();
        let mut revisions = Vec::with_capacity(projects.len());
        for project in projects {
            self.load_missing_info(project).await?;
            revisions.push(self.projects[&project].to_revision());
        }
        Ok(revisions)
    }
}

struct SetupState {
    manager: ProjectsManager,
    default_project: Option<Project>,
    revisions: Vec<BuildRevision>,
}

/// [`BuildSetup`] backed by a [`ProjectsManager`].
pub struct ProjectSetup {
    state: Mutex<SetupState>,
}

impl ProjectSetup {
    pub fn new(manager: ProjectsManager) -> Self {
        Self {
            state: Mutex::new(SetupState {
                manager,
                default_project: None,
                revisions: Vec::new(),
            }),
        }
    }

    /// Revisions computed by the last `init_build_revisions`.
    pub async fn revisions(&self) -> Vec<BuildRevision> {
        self.state.lock().await.revisions.clone()
    }

    pub async fn default_project(&self) -> Option<Project> {
        self.state.lock().await.default_project
    }

    pub async fn project_dir(&self, project: Project) -> PathBuf {
        self.state.lock().await.manager.project_dir(project)
    }

    /// Build `project` from `refspec` instead of the one passed by the job.
    pub async fn override_refspec(&self, project: Project, refspec: RefSpec) -> Result<()> {
        self.state.lock().await.manager.override_refspec(project, refspec)
    }

    /// Check out `project` unless that was already done for this build.
    pub async fn checkout_project(&self, project: Project) -> Result<()> {
        self.state.lock().await.manager.checkout_project(project).await
    }

    /// Revisions of every known project, with current refspec overrides.
    pub async fn build_revisions(&self) -> Result<Vec<BuildRevision>> {
        self.state.lock().await.manager.build_revisions().await
    }
}

#[async_trait]
impl BuildSetup for ProjectSetup {
    async fn init_build_revisions(&self, project: Project) -> Result<()> {
        let mut state = self.state.lock().await;
        state.manager.verify_project(project, false)?;
        state.default_project = Some(project);
        let revisions = state.manager.build_revisions().await?;
        state.revisions = revisions;
        info!(
            default_project = %project,
            projects = state.revisions.len(),
            "Initialized build revisions"
        );
        Ok(())
    }

    async fn checkout_default_project(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let project = state.default_project.ok_or_else(|| {
            Error::Configuration("no default project has been set".to_string())
        })?;
        state.manager.checkout_project(project).await?;
        info!("\n{}", state.manager.version_table());
        state.manager.check_projects()
    }
}
