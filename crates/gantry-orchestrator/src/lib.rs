//! Matrix build orchestration for Gantry.
//!
//! [`MatrixOrchestrator`] sequences the collaborator ports from
//! `gantry-core`; [`CurrentBuild`] keeps the outcome of the running build.

pub mod current_build;
pub mod orchestrator;
pub mod summary;

pub use current_build::{CurrentBuild, CurrentBuildState};
pub use orchestrator::{Collaborators, MatrixOrchestrator};
pub use summary::render_matrix_summary;
