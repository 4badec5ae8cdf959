//! CLI command definitions.

use clap::Subcommand;
use gantry_core::Project;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Check out the default project and prepare a build matrix
    PrepareMatrix {
        /// Matrix file name (looked up in admin/builds/) or path
        matrix: String,

        /// Project the matrix belongs to
        #[arg(short, long, default_value = "gromacs")]
        project: Project,
    },

    /// Evaluate the results of a finished matrix build
    ProcessResults {
        /// JSON file with the prepared matrix and the build URL
        #[arg(short, long, conflicts_with_all = ["matrix", "job_name", "build_number"])]
        input_file: Option<PathBuf>,

        /// Matrix file the build was started with
        #[arg(long, requires_all = ["job_name", "build_number"])]
        matrix: Option<String>,

        /// Matrix job on the CI server
        #[arg(long)]
        job_name: Option<String>,

        /// Number of the matrix build
        #[arg(long)]
        build_number: Option<u64>,

        #[arg(short, long, default_value = "gromacs")]
        project: Project,
    },

    /// Print the revisions of all projects used by this build
    BuildRevisions {
        #[arg(short, long, default_value = "gromacs")]
        project: Project,
    },

    /// Run a matrix job and report its results into this build
    MatrixBuild {
        /// Matrix job on the CI server
        job: String,

        /// Matrix file name or path
        #[arg(short, long)]
        matrix: String,

        #[arg(short, long, default_value = "gromacs")]
        project: Project,
    },

    /// Builds requested from Gerrit review comments
    OnDemand {
        #[command(subcommand)]
        command: OnDemandCommands,
    },

    /// Inspect build agents
    Agents {
        #[command(subcommand)]
        command: AgentCommands,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum OnDemandCommands {
    /// Turn the triggering comment into the builds to run
    Actions,

    /// Summarize finished on-demand builds
    PostBuild {
        /// JSON file with the results of the builds
        #[arg(short, long)]
        input_file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum AgentCommands {
    /// List agents and their labels
    List,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set configuration value
    Set {
        /// Key
        key: String,

        /// Value
        value: String,
    },
}
