//! Jenkins REST API client.

use gantry_core::{BuildResult, Error, Result};
use gantry_matrix::{MatrixBuildInfo, RunData};
use reqwest::Client;
use reqwest::header::LOCATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum JenkinsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("no queue location returned when triggering {0}")]
    MissingLocation(String),
    #[error("queued build of {0} was cancelled")]
    Cancelled(String),
}

impl From<JenkinsError> for Error {
    fn from(err: JenkinsError) -> Self {
        Error::Server(err.to_string())
    }
}

fn default_poll_interval() -> u64 {
    10
}

fn default_timeout() -> u64 {
    4 * 60 * 60
}

/// Jenkins connection and polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/".to_string(),
            user: None,
            api_token: None,
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

/// A build that has left the queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartedBuild {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct QueueItem {
    #[serde(default)]
    cancelled: bool,
    executable: Option<StartedBuild>,
}

#[derive(Debug, Deserialize)]
struct BuildState {
    #[serde(default)]
    building: bool,
    result: Option<BuildResult>,
    number: u64,
}

#[derive(Debug, Deserialize)]
struct RunRef {
    number: u64,
    url: String,
}

#[derive(Debug, Deserialize)]
struct MatrixData {
    result: Option<BuildResult>,
    number: u64,
    #[serde(default)]
    runs: Vec<RunRef>,
}

pub struct JenkinsClient {
    client: Client,
    base_url: Url,
    user: Option<String>,
    api_token: Option<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl JenkinsClient {
    pub fn new(config: &JenkinsConfig) -> Result<Self> {
        let mut base = config.url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| {
            Error::Configuration(format!("invalid Jenkins URL {}: {}", config.url, e))
        })?;
        Ok(Self {
            client: Client::new(),
            base_url,
            user: config.user.clone(),
            api_token: config.api_token.clone(),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    /// Override the polling interval (tests use sub-second intervals).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.user {
            Some(user) => req.basic_auth(user, self.api_token.as_ref()),
            None => req,
        }
    }

    /// URL of a job; `folder/job` names map to nested `job/` segments.
    pub fn job_url(&self, job: &str) -> std::result::Result<Url, JenkinsError> {
        let path: String = job
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|segment| format!("job/{}/", segment))
            .collect();
        Ok(self.base_url.join(&path)?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        tree: &str,
    ) -> std::result::Result<T, JenkinsError> {
        let api = Url::parse(&format!("{}/api/json", url.trim_end_matches('/')))?;
        let res = self
            .request(reqwest::Method::GET, api.clone())
            .query(&[("tree", tree)])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(JenkinsError::Status {
                url: api.to_string(),
                status: res.status().as_u16(),
            });
        }
        Ok(res.json().await?)
    }

    fn check_deadline(&self, job: &str, started: Instant) -> Result<()> {
        if started.elapsed() >= self.timeout {
            return Err(Error::BuildTimeout {
                job: job.to_string(),
                seconds: self.timeout.as_secs(),
            });
        }
        Ok(())
    }

    /// Queue a build of `job`; returns the URL of the queue item.
    #[instrument(skip(self, params))]
    pub async fn trigger_build(&self, job: &str, params: &[(String, String)]) -> Result<String> {
        let url = self.job_url(job)?.join("buildWithParameters").map_err(JenkinsError::from)?;
        let res = self
            .request(reqwest::Method::POST, url.clone())
            .form(params)
            .send()
            .await
            .map_err(JenkinsError::from)?;
        if !res.status().is_success() {
            return Err(JenkinsError::Status {
                url: url.to_string(),
                status: res.status().as_u16(),
            }
            .into());
        }
        let location = res
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| JenkinsError::MissingLocation(job.to_string()))?;
        let queue_url = self.base_url.join(location).map_err(JenkinsError::from)?;
        info!(queue = %queue_url, "Triggered build");
        Ok(queue_url.to_string())
    }

    /// Poll a queue item until its build starts.
    #[instrument(skip(self))]
    pub async fn wait_for_start(&self, job: &str, queue_url: &str) -> Result<StartedBuild> {
        let started = Instant::now();
        loop {
            let item: QueueItem = self
                .get_json(queue_url, "cancelled,executable[number,url]")
                .await?;
            if item.cancelled {
                return Err(JenkinsError::Cancelled(job.to_string()).into());
            }
            if let Some(build) = item.executable {
                info!(number = build.number, url = %build.url, "Build started");
                return Ok(build);
            }
            self.check_deadline(job, started)?;
            debug!("Build still queued");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll a build until it finishes; returns its result and number.
    #[instrument(skip(self))]
    pub async fn wait_for_completion(&self, job: &str, build_url: &str) -> Result<(BuildResult, u64)> {
        let started = Instant::now();
        loop {
            let state: BuildState = self.get_json(build_url, "building,result,number").await?;
            if !state.building {
                // Jenkins leaves the result empty for builds that never ran.
                let result = state.result.unwrap_or(BuildResult::NotBuilt);
                info!(number = state.number, %result, "Build finished");
                return Ok((result, state.number));
            }
            self.check_deadline(job, started)?;
            debug!(number = state.number, "Build still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Query the runs of a finished matrix build.
    ///
    /// Jenkins also lists runs of earlier builds for configurations no longer
    /// in the matrix; only runs with the build's own number are kept.
    #[instrument(skip(self))]
    pub async fn query_matrix_build(&self, build_url: &str) -> Result<MatrixBuildInfo> {
        let data: MatrixData = self.get_json(build_url, "result,number,runs[number,url]").await?;
        let mut runs = Vec::new();
        for run in data.runs.iter().filter(|r| r.number == data.number) {
            let run_data: RunData = self.get_json(&run.url, "url,result").await?;
            runs.push(run_data);
        }
        debug!(runs = runs.len(), "Queried matrix runs");
        MatrixBuildInfo::from_runs(data.result.unwrap_or(BuildResult::NotBuilt), runs)
    }

    /// URL of build `number` of `job`.
    pub fn build_url(&self, job: &str, number: u64) -> Result<String> {
        let url = self
            .job_url(job)?
            .join(&format!("{}/", number))
            .map_err(JenkinsError::from)?;
        Ok(url.to_string())
    }
}
