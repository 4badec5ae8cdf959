//! Error types for Gantry.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Jenkins configuration error: {0}")]
    Configuration(String),

    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("invalid build option: {0}")]
    InvalidOption(String),

    // Build errors
    #[error("{0}")]
    Build(String),

    #[error("failed to execute: {command}")]
    CommandFailed { command: String, exit_code: Option<i32> },

    #[error("accessing project {0} before checkout")]
    ProjectNotCheckedOut(String),

    // Orchestration errors
    #[error("no matrix configuration has been loaded")]
    MatrixNotLoaded,

    #[error("matrix build {job} did not finish within {seconds} seconds")]
    BuildTimeout { job: String, seconds: u64 },

    // Infrastructure errors
    #[error("CI server error: {0}")]
    Server(String),

    #[error("Gerrit error: {0}")]
    Gerrit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Whether the error comes from a bad build configuration rather than a
    /// failing build step.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::UnknownValue { .. } | Error::InvalidOption(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(Error::Configuration("x".into()).is_configuration());
        assert!(Error::InvalidOption("mpi=maybe".into()).is_configuration());
        assert!(!Error::Build("Checkout failed".into()).is_configuration());
    }

    #[test]
    fn test_command_failed_display() {
        let err = Error::CommandFailed {
            command: "git fetch".to_string(),
            exit_code: Some(128),
        };
        assert_eq!(err.to_string(), "failed to execute: git fetch");
    }
}
