//! Processing of matrix build results reported by the CI server.

use gantry_core::{BuildConfig, BuildResult, Error, MatrixRunInfo, Result, StatusReporter};
use serde::Deserialize;
use tracing::{info, warn};

/// Raw result of one matrix run, as returned by the CI server API.
#[derive(Debug, Clone, Deserialize)]
pub struct RunData {
    pub url: String,
    /// Missing while the run has not finished.
    #[serde(default)]
    pub result: Option<BuildResult>,
}

/// Results of a whole matrix build.
#[derive(Debug, Clone)]
pub struct MatrixBuildInfo {
    pub result: BuildResult,
    pub runs: Vec<MatrixRunInfo>,
}

/// Extract options and host from a run URL.
///
/// The URL has one path segment `OPTIONS=<url-encoded axis value>`; the last
/// word of the decoded value selects the host (`host=NAME` or `label=NAME`,
/// possibly followed by further axes after a comma).
pub fn parse_run_url(url: &str) -> Result<(Vec<String>, Option<String>)> {
    let parts: Vec<&str> = url
        .split('/')
        .filter(|part| part.starts_with("OPTIONS="))
        .collect();
    let [part] = parts.as_slice() else {
        return Err(Error::Server(format!(
            "cannot find matrix options in run URL {}",
            url
        )));
    };
    let decoded = urlencoding::decode(&part["OPTIONS=".len()..])
        .map_err(|e| Error::Server(format!("invalid run URL {}: {}", url, e)))?;
    let mut opts: Vec<String> = decoded.split_whitespace().map(str::to_string).collect();
    let host = match opts.last() {
        Some(last) => {
            let selector = last.split(',').next().unwrap_or_default();
            selector
                .strip_prefix("host=")
                .or_else(|| selector.strip_prefix("label="))
                .map(str::to_string)
        }
        None => None,
    };
    if host.is_some() {
        opts.pop();
    }
    Ok((opts, host))
}

impl MatrixBuildInfo {
    pub fn from_runs(result: BuildResult, runs: Vec<RunData>) -> Result<Self> {
        let runs = runs
            .into_iter()
            .map(|run| {
                let (opts, host) = parse_run_url(&run.url)?;
                Ok(MatrixRunInfo {
                    opts,
                    host,
                    result: run.result.unwrap_or(BuildResult::NotBuilt),
                    url: Some(run.url),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { result, runs })
    }

    /// Order runs by the known configurations.
    ///
    /// A configuration the server has no run for becomes a `NOT_BUILT` run;
    /// runs not matching any configuration are dropped.
    pub fn merge_known_configs(&mut self, configs: &[BuildConfig]) {
        let merged = configs
            .iter()
            .map(|config| {
                match self.runs.iter().position(|run| run.opts == config.opts) {
                    Some(pos) => self.runs.swap_remove(pos),
                    None => MatrixRunInfo {
                        opts: config.opts.clone(),
                        host: config.host.clone(),
                        result: BuildResult::NotBuilt,
                        url: None,
                    },
                }
            })
            .collect();
        self.runs = merged;
    }

    pub fn is_aborted(&self) -> bool {
        self.result.is_aborted()
    }
}

/// Report failed configurations and return the list of runs.
pub fn process_matrix_failures(
    configs: &[BuildConfig],
    mut build_info: MatrixBuildInfo,
    status: &mut StatusReporter,
) -> Vec<MatrixRunInfo> {
    build_info.merge_known_configs(configs);
    for run in &build_info.runs {
        if run.result.is_success() {
            continue;
        }
        let reason = format!(
            "{} ({}): {}",
            run.opts_string(),
            run.host.as_deref().unwrap_or("unknown"),
            run.result
        );
        warn!(%reason, "Matrix configuration did not succeed");
        if run.result.is_unstable() {
            status.mark_unstable(reason);
        } else {
            status.mark_failed(reason);
        }
    }
    if !build_info.is_aborted() && build_info.runs.iter().any(|r| r.result.is_not_built()) {
        status.mark_failed(
            "Some matrix configurations were not built (likely matrix axis is missing build agents)",
        );
    }
    info!(
        runs = build_info.runs.len(),
        result = %status.result(),
        "Processed matrix results"
    );
    build_info.runs
}
