//! Gantry Core
//!
//! Core domain types, collaborator ports, and error handling for Gantry.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used across all other crates.

pub mod error;
pub mod matrix;
pub mod ports;
pub mod project;
pub mod result;
pub mod status;

pub use error::{Error, Result};
pub use matrix::{
    BuildConfig, MatrixBuildOutcome, MatrixDescription, MatrixRunInfo, RelengStatus,
    TriggeredBuild,
};
pub use project::Project;
pub use result::BuildResult;
pub use status::StatusReporter;
