//! Command handlers.

use crate::config::{GantryConfig, OutputFormat};
use console::style;
use gantry_core::ports::{BuildSetup, MatrixProcessor};
use gantry_core::{
    BuildConfig, BuildResult, MatrixDescription, Project, RelengStatus, StatusReporter,
};
use gantry_integration::ondemand::{actions_from_triggering_comment, do_post_build};
use gantry_integration::status_file::{clear_status_file, status_file_path, write_status_file};
use gantry_integration::{
    BuildEnv, CommandRunner, DryRunRunner, GerritIntegration, GerritReviewPoster, JenkinsClient,
    JenkinsMatrixBuilder, PostBuildInput, ProcessRunner, ProjectSetup, ProjectsManager,
};
use gantry_matrix::{AgentCatalog, BuildInputResolver, MatrixConfigProcessor, process_matrix_failures};
use gantry_orchestrator::{Collaborators, CurrentBuild, MatrixOrchestrator};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Set by callers that handle the build result themselves.
const NO_PROPAGATE_FAILURE: &str = "NO_PROPAGATE_FAILURE";

/// Everything the build commands share.
pub struct Context {
    config: GantryConfig,
    workspace: PathBuf,
    env: Arc<BuildEnv>,
    runner: Arc<dyn CommandRunner>,
    gerrit: Arc<GerritIntegration>,
}

/// Build workspace: the configured one or the current directory.
fn workspace_dir(config: &GantryConfig) -> std::io::Result<PathBuf> {
    match &config.workspace {
        Some(workspace) => Ok(workspace.clone()),
        None => std::env::current_dir(),
    }
}

/// The agent catalog from `agents_file`, relative to the workspace, or the
/// built-in one.
fn load_catalog(workspace: &Path, agents_file: Option<&Path>) -> gantry_core::Result<AgentCatalog> {
    match agents_file {
        Some(path) => AgentCatalog::from_file(&workspace.join(path)),
        None => AgentCatalog::builtin(),
    }
}

impl Context {
    pub fn new(config: GantryConfig, env: BuildEnv, dry_run: bool) -> anyhow::Result<Self> {
        let runner: Arc<dyn CommandRunner> = if dry_run {
            Arc::new(DryRunRunner::new())
        } else {
            Arc::new(ProcessRunner::new())
        };
        Self::with_runner(config, env, runner)
    }

    pub fn with_runner(
        config: GantryConfig,
        env: BuildEnv,
        runner: Arc<dyn CommandRunner>,
    ) -> anyhow::Result<Self> {
        let workspace = workspace_dir(&config)?;
        let env = Arc::new(env);
        let gerrit = Arc::new(GerritIntegration::new(
            config.gerrit.clone(),
            env.clone(),
            runner.clone(),
        ));
        Ok(Self {
            config,
            workspace,
            env,
            runner,
            gerrit,
        })
    }

    async fn project_setup(&self) -> gantry_core::Result<Arc<ProjectSetup>> {
        let manager = ProjectsManager::init(
            &self.workspace,
            self.env.clone(),
            self.gerrit.clone(),
            self.runner.clone(),
        )
        .await?;
        Ok(Arc::new(ProjectSetup::new(manager)))
    }

    fn catalog(&self) -> gantry_core::Result<Arc<AgentCatalog>> {
        let catalog = load_catalog(&self.workspace, self.config.agents_file.as_deref())?;
        Ok(Arc::new(catalog))
    }

    fn processor(&self, project: Project) -> gantry_core::Result<Arc<MatrixConfigProcessor>> {
        let resolver = BuildInputResolver::new(&self.workspace, project);
        Ok(Arc::new(
            MatrixConfigProcessor::new(resolver, self.catalog()?)
                .with_strict_options(self.config.strict_options),
        ))
    }

    fn jenkins(&self) -> gantry_core::Result<Arc<JenkinsClient>> {
        Ok(Arc::new(JenkinsClient::new(&self.config.jenkins)?))
    }

    fn output_format(&self) -> OutputFormat {
        self.config.output_format
    }

    fn propagate_failure(&self) -> bool {
        !self.env.is_set(NO_PROPAGATE_FAILURE)
    }
}

/// Whether a step finishing with `result` fails the process.
pub fn fails_process(result: BuildResult, propagate_failure: bool) -> bool {
    propagate_failure && result.is_fatal()
}

/// Run a build step, turning errors into a failed status and writing the
/// status file.
pub async fn run_step<F>(ctx: &Context, step: F) -> anyhow::Result<ExitCode>
where
    F: Future<Output = gantry_core::Result<RelengStatus>>,
{
    let status_path = status_file_path(&ctx.workspace, ctx.config.status_file.as_deref());
    clear_status_file(&status_path).await?;

    let status = match step.await {
        Ok(status) => status,
        Err(e) => {
            error!(error = %e, "Build step failed");
            let mut reporter = StatusReporter::new();
            reporter.mark_failed(e.to_string());
            reporter.finish()
        }
    };
    write_status_file(&status_path, &status).await?;

    let marker = match status.result {
        BuildResult::Success => style("✓").green(),
        BuildResult::Unstable => style("!").yellow(),
        _ => style("✗").red(),
    };
    eprintln!("{} {}", marker, style(status.result).bold());
    if let Some(reason) = &status.reason {
        for line in reason.lines() {
            eprintln!("  {}", line);
        }
    }
    if fails_process(status.result, ctx.propagate_failure()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_value<T: Serialize>(format: OutputFormat, value: &T) -> gantry_core::Result<()> {
    match format {
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(value)
                .map_err(|e| gantry_core::Error::Serialization(e.to_string()))?;
            print!("{}", yaml);
        }
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn print_matrix(format: OutputFormat, matrix: &MatrixDescription) -> gantry_core::Result<()> {
    if format != OutputFormat::Table {
        return print_value(format, matrix);
    }
    for config in &matrix.configs {
        println!(
            "{:<20} {}",
            style(config.host.as_deref().unwrap_or("-")).cyan(),
            config.opts_string()
        );
    }
    println!("{} {} configurations", style("✓").green(), matrix.len());
    Ok(())
}

/// Check out the default project and prepare a build matrix.
pub async fn prepare_matrix(
    ctx: &Context,
    matrix: &str,
    project: Project,
) -> gantry_core::Result<RelengStatus> {
    let setup = ctx.project_setup().await?;
    setup.init_build_revisions(project).await?;
    setup.checkout_default_project().await?;

    let description = ctx.processor(project)?.process_matrix_configs(matrix).await?;
    print_matrix(ctx.output_format(), &description)?;

    let mut status = StatusReporter::new();
    status.set_return_value(serde_json::to_value(&description)?);
    Ok(status.finish())
}

/// Contents of a `process-results` input file.
#[derive(Debug, Deserialize)]
pub struct ResultsInput {
    pub matrix: PreparedMatrix,
    pub build_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PreparedMatrix {
    pub configs: Vec<BuildConfig>,
}

/// Where `process-results` takes the matrix and the build from.
pub enum ResultsSource {
    File(PathBuf),
    Job {
        matrix: String,
        job_name: String,
        build_number: u64,
        project: Project,
    },
}

/// Configurations and URL of the matrix build whose results are processed.
async fn load_results_matrix(
    ctx: &Context,
    jenkins: &JenkinsClient,
    source: ResultsSource,
) -> gantry_core::Result<(Vec<BuildConfig>, String)> {
    match source {
        ResultsSource::File(path) => {
            let contents = tokio::fs::read_to_string(ctx.workspace.join(path)).await?;
            let input: ResultsInput = serde_json::from_str(&contents)?;
            Ok((input.matrix.configs, input.build_url))
        }
        ResultsSource::Job {
            matrix,
            job_name,
            build_number,
            project,
        } => {
            // The matrix file lives in the project checkout.
            ctx.project_setup().await?.checkout_project(project).await?;
            let description = ctx.processor(project)?.process_matrix_configs(&matrix).await?;
            Ok((
                description.configs,
                jenkins.build_url(&job_name, build_number)?,
            ))
        }
    }
}

/// Evaluate the results of a finished matrix build.
pub async fn process_results(
    ctx: &Context,
    source: ResultsSource,
) -> gantry_core::Result<RelengStatus> {
    let jenkins = ctx.jenkins()?;
    let (configs, build_url) = load_results_matrix(ctx, &jenkins, source).await?;
    info!(url = %build_url, configs = configs.len(), "Processing matrix results");

    let build_info = jenkins.query_matrix_build(&build_url).await?;
    let mut status = StatusReporter::new();
    if build_info.is_aborted() {
        status.mark_aborted();
    }
    let runs = process_matrix_failures(&configs, build_info, &mut status);
    if ctx.output_format() == OutputFormat::Table {
        for run in &runs {
            println!(
                "{:<10} {:<16} {}",
                run.result,
                run.host.as_deref().unwrap_or("-"),
                run.opts_string()
            );
        }
    } else {
        print_value(ctx.output_format(), &runs)?;
    }
    status.set_return_value(serde_json::to_value(&runs)?);
    Ok(status.finish())
}

/// Print the revisions of all projects used by this build.
pub async fn build_revisions(ctx: &Context, project: Project) -> gantry_core::Result<RelengStatus> {
    let setup = ctx.project_setup().await?;
    setup.init_build_revisions(project).await?;
    let revisions = setup.revisions().await;

    if ctx.output_format() == OutputFormat::Table {
        for revision in &revisions {
            println!(
                "{:<16} {:<28} {}",
                style(revision.project).bold(),
                revision.refspec,
                revision.hash.as_deref().unwrap_or("-")
            );
        }
    } else {
        print_value(ctx.output_format(), &revisions)?;
    }

    let mut status = StatusReporter::new();
    status.set_return_value(serde_json::to_value(&revisions)?);
    Ok(status.finish())
}

/// Run a matrix job and report its results into this build.
pub async fn matrix_build(
    ctx: &Context,
    job: &str,
    matrix: &str,
    project: Project,
) -> gantry_core::Result<RelengStatus> {
    let setup = ctx.project_setup().await?;
    let builder = JenkinsMatrixBuilder::new(ctx.jenkins()?).with_revisions(setup.clone());
    let mut current = CurrentBuild::new();
    if let Some(dir) = &ctx.config.summary_dir {
        current = current.with_summary_dir(ctx.workspace.join(dir));
    }
    let current = Arc::new(current);

    let collaborators = Collaborators {
        setup,
        processor: ctx.processor(project)?,
        builder: Arc::new(builder),
        reporter: current.clone(),
        reviewer: Arc::new(GerritReviewPoster::new(ctx.gerrit.clone())),
    };
    let outcome = async {
        let mut orchestrator = MatrixOrchestrator::load(collaborators, project).await?;
        orchestrator.process_matrix_configs(matrix).await?;
        orchestrator.do_matrix_build(job).await
    }
    .await;

    match outcome {
        Ok(outcome) => match ctx.output_format() {
            OutputFormat::Table => {
                for summary in &current.snapshot().summaries {
                    println!("{}", summary);
                }
            }
            format => print_value(format, &outcome)?,
        },
        Err(e) => {
            // Keep what the matrix build already reported.
            error!(error = %e, "Matrix build failed");
            current.mark_failed(e.to_string());
        }
    }
    Ok(current.snapshot().to_status())
}

/// Turn the triggering review comment into the builds to run.
pub async fn ondemand_actions(ctx: &Context) -> gantry_core::Result<RelengStatus> {
    let setup = ctx.project_setup().await?;
    let processor = ctx.processor(Project::Gromacs)?;
    let actions = actions_from_triggering_comment(&ctx.gerrit, &setup, processor.as_ref()).await?;

    if ctx.output_format() == OutputFormat::Table {
        for build in &actions.builds {
            println!(
                "{:<24} {}",
                style(build.kind).bold(),
                build.desc.as_deref().unwrap_or("")
            );
        }
    } else {
        print_value(ctx.output_format(), &actions)?;
    }

    let mut status = StatusReporter::new();
    status.set_return_value(serde_json::to_value(&actions)?);
    Ok(status.finish())
}

/// Summarize finished on-demand builds.
pub async fn ondemand_post_build(ctx: &Context, input_file: &Path) -> gantry_core::Result<RelengStatus> {
    let contents = tokio::fs::read_to_string(ctx.workspace.join(input_file)).await?;
    let input: PostBuildInput = serde_json::from_str(&contents)?;
    let summary = do_post_build(&ctx.gerrit, &input).await?;

    if ctx.output_format() == OutputFormat::Table {
        if let Some(url) = &summary.url {
            println!("{}", style(url).cyan());
        }
        if let Some(message) = &summary.message {
            println!("{}", message);
        }
    } else {
        print_value(ctx.output_format(), &summary)?;
    }

    let mut status = StatusReporter::new();
    status.set_return_value(serde_json::to_value(&summary)?);
    Ok(status.finish())
}

/// List agents.
pub fn list_agents(config: &GantryConfig) -> anyhow::Result<()> {
    let catalog = load_catalog(&workspace_dir(config)?, config.agents_file.as_deref())?;

    if config.output_format != OutputFormat::Table {
        print_value(config.output_format, &catalog)?;
        return Ok(());
    }

    println!(
        "{} default label: {}",
        style("i").blue(),
        style(&catalog.default_label).bold()
    );
    for host in &catalog.hosts {
        let matrix = if host.matrix {
            style("matrix").green()
        } else {
            style("-").dim()
        };
        let labels: Vec<&str> = host.labels.iter().map(String::as_str).collect();
        println!(
            "  {:<16} {:<8} {}",
            style(&host.name).bold(),
            matrix,
            labels.join(", ")
        );
    }
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &GantryConfig) -> anyhow::Result<()> {
    println!("{}", style("Current configuration:").bold());
    println!();
    println!("  jenkins.url:       {}", config.jenkins.url);
    println!(
        "  jenkins.user:      {}",
        config.jenkins.user.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  jenkins.api_token: {}",
        if config.jenkins.api_token.is_some() {
            "********"
        } else {
            "(not set)"
        }
    );
    println!(
        "  gerrit:            {}@{}:{}",
        config.gerrit.user, config.gerrit.host, config.gerrit.port
    );
    println!(
        "  workspace:         {}",
        config
            .workspace
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(current directory)".to_string())
    );
    println!(
        "  status_file:       {}",
        config
            .status_file
            .as_deref()
            .unwrap_or(gantry_integration::status_file::DEFAULT_STATUS_FILE)
    );
    println!("  strict_options:    {}", config.strict_options);
    println!("  output_format:     {:?}", config.output_format);
    println!();
    println!(
        "  Config file: {}",
        style(GantryConfig::config_path()?.display()).dim()
    );
    Ok(())
}

/// Set configuration value.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = GantryConfig::load().unwrap_or_default();
    config.set(key, value).map_err(anyhow::Error::msg)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Error;
    use pretty_assertions::assert_eq;

    fn context(workspace: &std::path::Path, env: BuildEnv) -> Context {
        let config = GantryConfig {
            workspace: Some(workspace.to_path_buf()),
            status_file: Some("logs/status.json".to_string()),
            ..Default::default()
        };
        Context::new(config, env, true).unwrap()
    }

    #[test]
    fn test_fatal_results_fail_process() {
        assert!(!fails_process(BuildResult::Success, true));
        assert!(!fails_process(BuildResult::Unstable, true));
        assert!(fails_process(BuildResult::Failure, true));
        assert!(fails_process(BuildResult::Aborted, true));
        assert!(!fails_process(BuildResult::Failure, false));
    }

    #[tokio::test]
    async fn test_failed_step_writes_status() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), BuildEnv::new());

        run_step(&ctx, async {
            Err(Error::Build("Checkout failed (Jenkins issue)".to_string()))
        })
        .await
        .unwrap();

        let written =
            std::fs::read_to_string(dir.path().join("logs").join("status.json")).unwrap();
        let status: RelengStatus = serde_json::from_str(&written).unwrap();
        assert_eq!(status.result, BuildResult::Failure);
        assert_eq!(status.reason.as_deref(), Some("Checkout failed (Jenkins issue)"));
    }

    #[tokio::test]
    async fn test_failure_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), BuildEnv::new().with(NO_PROPAGATE_FAILURE, "1"));

        assert!(!ctx.propagate_failure());
        run_step(&ctx, async {
            Err(Error::Configuration("gcc-5 mpi: no host".to_string()))
        })
        .await
        .unwrap();
        let written =
            std::fs::read_to_string(dir.path().join("logs").join("status.json")).unwrap();
        assert!(written.contains("\"FAILURE\""));
    }

    #[tokio::test]
    async fn test_stale_status_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let status_path = dir.path().join("logs").join("status.json");
        std::fs::create_dir_all(status_path.parent().unwrap()).unwrap();
        std::fs::write(&status_path, "stale").unwrap();
        let ctx = context(dir.path(), BuildEnv::new());

        run_step(&ctx, async { Ok(RelengStatus::default()) })
            .await
            .unwrap();

        let status: RelengStatus =
            serde_json::from_str(&std::fs::read_to_string(&status_path).unwrap()).unwrap();
        assert_eq!(status.result, BuildResult::Success);
        assert_eq!(status.reason, None);
    }

    /// Answers every command with no output; checking out a project puts a
    /// matrix file into it.
    struct CheckoutWritesMatrix {
        matrix_file: PathBuf,
        calls: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CommandRunner for CheckoutWritesMatrix {
        async fn check_output(
            &self,
            cmd: &[String],
            _cwd: Option<&Path>,
        ) -> gantry_core::Result<String> {
            let line = cmd.join(" ");
            if line.starts_with("git checkout") {
                std::fs::create_dir_all(self.matrix_file.parent().unwrap()).unwrap();
                std::fs::write(&self.matrix_file, "msvc-2013\n").unwrap();
            }
            self.calls.lock().unwrap().push(line);
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_job_results_read_matrix_after_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(CheckoutWritesMatrix {
            matrix_file: dir.path().join("gromacs/admin/builds/pre-submit-matrix.txt"),
            calls: Default::default(),
        });
        let env = BuildEnv::new()
            .with("GROMACS_REFSPEC", "refs/heads/master")
            .with("RELENG_REFSPEC", "refs/heads/master");
        let config = GantryConfig {
            workspace: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let ctx = Context::with_runner(config, env, runner.clone()).unwrap();
        let jenkins = ctx.jenkins().unwrap();

        let (configs, build_url) = load_results_matrix(
            &ctx,
            &jenkins,
            ResultsSource::Job {
                matrix: "pre-submit-matrix".to_string(),
                job_name: "Matrix".to_string(),
                build_number: 4,
                project: Project::Gromacs,
            },
        )
        .await
        .unwrap();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].opts, vec!["msvc-2013"]);
        assert_eq!(configs[0].host.as_deref(), Some("bs-win2012r2"));
        assert_eq!(build_url, "http://localhost:8080/job/Matrix/4/");
        let calls = runner.calls.lock().unwrap().clone();
        assert!(calls.contains(
            &"git fetch ssh://jenkins@gerrit.gromacs.org:29418/gromacs.git refs/heads/master"
                .to_string()
        ));
    }

    #[test]
    fn test_agents_file_relative_to_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("agents.yaml"),
            "default_label: any\nhosts:\n  - name: arm01\n    matrix: true\n    labels: [gcc-9]\n",
        )
        .unwrap();
        let config = GantryConfig {
            workspace: Some(dir.path().to_path_buf()),
            agents_file: Some(PathBuf::from("agents.yaml")),
            ..Default::default()
        };

        let catalog =
            load_catalog(&workspace_dir(&config).unwrap(), config.agents_file.as_deref()).unwrap();
        assert_eq!(catalog.hosts.len(), 1);
        assert_eq!(catalog.hosts[0].name, "arm01");
        assert!(list_agents(&config).is_ok());
    }

    #[test]
    fn test_results_input_format() {
        let input: ResultsInput = serde_json::from_str(
            r#"{
                "matrix": {"configs": [{"opts": ["gcc-5"], "host": "bs_mic", "labels": "gcc-5"}]},
                "build_url": "http://ci/job/Matrix/4/"
            }"#,
        )
        .unwrap();
        assert_eq!(input.build_url, "http://ci/job/Matrix/4/");
        assert_eq!(input.matrix.configs[0].host.as_deref(), Some("bs_mic"));
    }
}
