//! CLI configuration management.

use anyhow::{Context, anyhow};
use gantry_integration::{BuildEnv, GerritConfig, JenkinsConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
///
/// Read from the user configuration directory; the CI environment
/// overrides individual values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GantryConfig {
    #[serde(default)]
    pub jenkins: JenkinsConfig,
    #[serde(default)]
    pub gerrit: GerritConfig,
    /// Build workspace; defaults to the current directory.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// Status file, relative to the workspace unless absolute.
    #[serde(default)]
    pub status_file: Option<String>,
    /// Directory matrix summaries are appended to.
    #[serde(default)]
    pub summary_dir: Option<PathBuf>,
    /// Agent catalog replacing the built-in one.
    #[serde(default)]
    pub agents_file: Option<PathBuf>,
    /// Reject options no handler recognizes.
    #[serde(default)]
    pub strict_options: bool,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(format!("Invalid value for {}: {}", key, value)),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", key, value))
}

impl GantryConfig {
    /// Load configuration from the user configuration file.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save configuration to the user configuration file.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "gantry", "gantry")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Apply the overrides the CI server passes through the environment.
    pub fn apply_env(&mut self, env: &BuildEnv) {
        if let Some(url) = env.get("JENKINS_URL") {
            self.jenkins.url = url.to_string();
        }
        if let Some(user) = env.get("JENKINS_USER") {
            self.jenkins.user = Some(user.to_string());
        }
        if let Some(token) = env.get("JENKINS_API_TOKEN") {
            self.jenkins.api_token = Some(token.to_string());
        }
        if let Some(host) = env.get("GERRIT_HOST") {
            self.gerrit.host = host.to_string();
        }
        if let Some(user) = env.get("GERRIT_USER") {
            self.gerrit.user = user.to_string();
        }
        if let Some(workspace) = env.get("WORKSPACE") {
            self.workspace = Some(PathBuf::from(workspace));
        }
        if let Some(status_file) = env.get("STATUS_FILE") {
            self.status_file = Some(status_file.to_string());
        }
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "jenkins.url" => self.jenkins.url = value.to_string(),
            "jenkins.user" => self.jenkins.user = Some(value.to_string()),
            "jenkins.api_token" => self.jenkins.api_token = Some(value.to_string()),
            "jenkins.poll_interval_secs" => {
                self.jenkins.poll_interval_secs = parse_number(key, value)?
            }
            "jenkins.timeout_secs" => self.jenkins.timeout_secs = parse_number(key, value)?,
            "gerrit.host" => self.gerrit.host = value.to_string(),
            "gerrit.port" => self.gerrit.port = parse_number(key, value)?,
            "gerrit.user" => self.gerrit.user = value.to_string(),
            "workspace" => self.workspace = Some(PathBuf::from(value)),
            "status_file" => self.status_file = Some(value.to_string()),
            "summary_dir" => self.summary_dir = Some(PathBuf::from(value)),
            "agents_file" => self.agents_file = Some(PathBuf::from(value)),
            "strict_options" => self.strict_options = parse_bool(key, value)?,
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GantryConfig::load_from(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.jenkins, JenkinsConfig::default());
        assert_eq!(config.gerrit.port, 29418);
        assert_eq!(config.output_format, OutputFormat::Table);
        assert!(!config.strict_options);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = GantryConfig::default();
        config.set("jenkins.url", "https://ci.example.org/").unwrap();
        config.set("jenkins.timeout_secs", "600").unwrap();
        config.set("strict_options", "yes").unwrap();
        config.set("output_format", "json").unwrap();
        config.save_to(&path).unwrap();

        let loaded = GantryConfig::load_from(&path).unwrap();
        assert_eq!(loaded.jenkins.url, "https://ci.example.org/");
        assert_eq!(loaded.jenkins.timeout_secs, 600);
        assert_eq!(loaded.jenkins.poll_interval_secs, 10);
        assert!(loaded.strict_options);
        assert_eq!(loaded.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "gerrit:\n  host: review.example.org\n  port: 22\n  user: ci\n").unwrap();

        let config = GantryConfig::load_from(&path).unwrap();
        assert_eq!(config.gerrit.host, "review.example.org");
        assert_eq!(config.jenkins.url, "http://localhost:8080/");
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = GantryConfig::default();
        assert_eq!(
            config.set("gerrit.port", "ssh").unwrap_err(),
            "Invalid value for gerrit.port: ssh"
        );
        assert_eq!(
            config.set("output_format", "xml").unwrap_err(),
            "Invalid output format: xml"
        );
        assert_eq!(
            config.set("api_url", "x").unwrap_err(),
            "Unknown config key: api_url"
        );
    }

    #[test]
    fn test_environment_overrides() {
        let env = BuildEnv::new()
            .with("JENKINS_URL", "http://jenkins:8080/")
            .with("JENKINS_USER", "bot")
            .with("GERRIT_USER", "")
            .with("WORKSPACE", "/var/lib/jenkins/ws")
            .with("STATUS_FILE", "logs/status.json");

        let mut config = GantryConfig::default();
        config.apply_env(&env);
        assert_eq!(config.jenkins.url, "http://jenkins:8080/");
        assert_eq!(config.jenkins.user.as_deref(), Some("bot"));
        assert_eq!(config.gerrit.user, "jenkins");
        assert_eq!(config.workspace, Some(PathBuf::from("/var/lib/jenkins/ws")));
        assert_eq!(config.status_file.as_deref(), Some("logs/status.json"));
    }
}
