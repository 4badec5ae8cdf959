//! External systems used by Gantry builds.
//!
//! Adapters implementing the collaborator ports on top of Jenkins, Gerrit
//! and git checkouts in the build workspace, and builds requested from
//! review comments.

pub mod builder;
pub mod command;
pub mod env;
pub mod gerrit;
pub mod jenkins;
pub mod ondemand;
pub mod projects;
pub mod status_file;

pub use builder::JenkinsMatrixBuilder;
pub use command::{CommandRunner, DryRunRunner, ProcessRunner};
pub use env::BuildEnv;
pub use gerrit::{GerritConfig, GerritIntegration, GerritReviewPoster, RefSpec};
pub use jenkins::{JenkinsClient, JenkinsConfig, JenkinsError};
pub use ondemand::{OnDemandActions, PostBuildInput, PostBuildSummary};
pub use projects::{BuildRevision, ProjectInfo, ProjectSetup, ProjectsManager};
