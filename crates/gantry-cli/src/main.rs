//! Gantry CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{AgentCommands, Commands, ConfigCommands, OnDemandCommands};
use config::{GantryConfig, OutputFormat};
use gantry_integration::BuildEnv;
use handlers::{Context, ResultsSource};

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Matrix build orchestration for Jenkins and Gerrit", long_about = None)]
struct Cli {
    /// Build workspace (defaults to $WORKSPACE or the current directory)
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Log commands instead of running them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = BuildEnv::from_process();
    let mut config = GantryConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Ignoring unreadable configuration file");
        GantryConfig::default()
    });
    config.apply_env(&env);
    if let Some(workspace) = cli.workspace {
        config.workspace = Some(workspace);
    }
    if cli.json {
        config.output_format = OutputFormat::Json;
    }

    let dry_run = cli.dry_run;
    let build_context = || Context::new(config.clone(), env.clone(), dry_run);

    match cli.command {
        Commands::PrepareMatrix { matrix, project } => {
            let ctx = build_context()?;
            handlers::run_step(&ctx, handlers::prepare_matrix(&ctx, &matrix, project)).await
        }
        Commands::ProcessResults {
            input_file,
            matrix,
            job_name,
            build_number,
            project,
        } => {
            let source = match (input_file, matrix, job_name, build_number) {
                (Some(path), _, _, _) => ResultsSource::File(path),
                (None, Some(matrix), Some(job_name), Some(build_number)) => ResultsSource::Job {
                    matrix,
                    job_name,
                    build_number,
                    project,
                },
                _ => anyhow::bail!(
                    "process-results needs --input-file or --matrix, --job-name and --build-number"
                ),
            };
            let ctx = build_context()?;
            handlers::run_step(&ctx, handlers::process_results(&ctx, source)).await
        }
        Commands::BuildRevisions { project } => {
            let ctx = build_context()?;
            handlers::run_step(&ctx, handlers::build_revisions(&ctx, project)).await
        }
        Commands::MatrixBuild {
            job,
            matrix,
            project,
        } => {
            let ctx = build_context()?;
            handlers::run_step(&ctx, handlers::matrix_build(&ctx, &job, &matrix, project)).await
        }
        Commands::OnDemand { command } => {
            let ctx = build_context()?;
            match command {
                OnDemandCommands::Actions => {
                    handlers::run_step(&ctx, handlers::ondemand_actions(&ctx)).await
                }
                OnDemandCommands::PostBuild { input_file } => {
                    handlers::run_step(&ctx, handlers::ondemand_post_build(&ctx, &input_file)).await
                }
            }
        }
        Commands::Agents { command } => {
            match command {
                AgentCommands::List => handlers::list_agents(&config)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => handlers::show_config(&config)?,
                ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
