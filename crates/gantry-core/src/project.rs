//! Repositories taking part in a build.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A git repository/directory used in the build.
///
/// The string forms match the repository names on the Gerrit server, so git
/// URLs and checkout directories are derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Project {
    Gromacs,
    Regressiontests,
    Releng,
}

impl Project {
    /// All projects, in reporting order.
    pub const ALL: [Project; 3] = [Project::Gromacs, Project::Regressiontests, Project::Releng];

    pub fn as_str(&self) -> &'static str {
        match self {
            Project::Gromacs => "gromacs",
            Project::Regressiontests => "regressiontests",
            Project::Releng => "releng",
        }
    }

    /// Name of the environment variable carrying the refspec to build.
    pub fn refspec_env(&self) -> String {
        format!("{}_REFSPEC", self.as_str().to_ascii_uppercase())
    }

    /// Name of the environment variable carrying the expected commit hash.
    pub fn hash_env(&self) -> String {
        format!("{}_HASH", self.as_str().to_ascii_uppercase())
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Project {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Project::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownValue {
                kind: "Project",
                value: s.to_string(),
            })
    }
}
