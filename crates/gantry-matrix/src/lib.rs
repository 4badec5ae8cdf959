//! Matrix configuration processing for Gantry.
//!
//! Reads matrix configuration files, assigns build hosts from the agent
//! catalog, encodes the matrix for the CI server, and evaluates the results
//! of finished matrix builds.

pub mod agents;
pub mod axis;
pub mod config;
pub mod options;
pub mod processor;
pub mod results;

pub use agents::{AgentCatalog, AgentHost};
pub use config::BuildInputResolver;
pub use processor::{HostSelector, MatrixConfigProcessor};
pub use results::{MatrixBuildInfo, RunData, process_matrix_failures};
