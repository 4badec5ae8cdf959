//! Reading matrix configuration files.
//!
//! One configuration per line, written as shell-style words. Text from `#`
//! to the end of the line is a comment, and empty lines are skipped.

use gantry_core::{BuildConfig, Error, Project, Result};
use std::path::{Path, PathBuf};

/// Directory (inside the default project) holding named build inputs.
pub const BUILD_INPUT_DIR: &str = "admin/builds";

/// Resolves names of build input files to paths in the workspace.
#[derive(Debug, Clone)]
pub struct BuildInputResolver {
    workspace: PathBuf,
    default_project: Project,
}

impl BuildInputResolver {
    pub fn new(workspace: impl Into<PathBuf>, default_project: Project) -> Self {
        Self {
            workspace: workspace.into(),
            default_project,
        }
    }

    /// Resolve `name`, appending `extension` when it is missing.
    ///
    /// A bare name is looked up in the default project's build input
    /// directory; anything with a directory component is used as given.
    pub fn resolve(&self, name: &str, extension: Option<&str>) -> PathBuf {
        let mut name = name.to_string();
        if let Some(ext) = extension {
            if !name.ends_with(ext) {
                name.push_str(ext);
            }
        }
        let path = PathBuf::from(&name);
        if path.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
            return path;
        }
        self.workspace
            .join(self.default_project.as_str())
            .join(BUILD_INPUT_DIR)
            .join(path)
    }
}

/// Parse the contents of a matrix configuration file.
pub fn parse_matrix_configs(contents: &str) -> Result<Vec<BuildConfig>> {
    let mut configs = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let opts = shlex::split(line).ok_or_else(|| {
            Error::Configuration(format!(
                "cannot parse matrix configuration on line {}: {}",
                index + 1,
                line
            ))
        })?;
        configs.push(BuildConfig::new(opts));
    }
    Ok(configs)
}

/// Read and parse a matrix configuration file.
pub async fn read_matrix_configs(path: &Path) -> Result<Vec<BuildConfig>> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Configuration(format!(
            "cannot read matrix configuration {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_matrix_configs(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let contents = "\
# Pre-submit matrix
gcc-4.6 gpu cuda-5.0

msvc-2013   # windows
   # only a comment
clang-6 'simd=AVX_256'
";
        let configs = parse_matrix_configs(contents).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].opts, vec!["gcc-4.6", "gpu", "cuda-5.0"]);
        assert_eq!(configs[1].opts, vec!["msvc-2013"]);
        assert_eq!(configs[2].opts, vec!["clang-6", "simd=AVX_256"]);
        assert!(configs.iter().all(|c| c.host.is_none()));
    }

    #[test]
    fn test_parse_unbalanced_quote() {
        let err = parse_matrix_configs("gcc-7\nclang-6 'mpi\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_resolve_bare_name() {
        let resolver = BuildInputResolver::new("/ws", Project::Gromacs);
        assert_eq!(
            resolver.resolve("pre-submit-matrix", Some(".txt")),
            PathBuf::from("/ws/gromacs/admin/builds/pre-submit-matrix.txt")
        );
        assert_eq!(
            resolver.resolve("nightly.txt", Some(".txt")),
            PathBuf::from("/ws/gromacs/admin/builds/nightly.txt")
        );
    }

    #[test]
    fn test_resolve_path_is_kept() {
        let resolver = BuildInputResolver::new("/ws", Project::Gromacs);
        assert_eq!(
            resolver.resolve("matrices/custom", Some(".txt")),
            PathBuf::from("matrices/custom.txt")
        );
        assert_eq!(
            resolver.resolve("/tmp/m.txt", None),
            PathBuf::from("/tmp/m.txt")
        );
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let err = read_matrix_configs(Path::new("/nonexistent/matrix.txt"))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
