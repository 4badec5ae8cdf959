//! Markdown summaries of matrix builds.

use chrono::{DateTime, Utc};
use gantry_core::{MatrixBuildOutcome, MatrixRunInfo};
use std::fmt::Write;

fn cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn run_row(run: &MatrixRunInfo) -> String {
    let log = match &run.url {
        Some(url) => format!("[console]({}console)", ensure_slash(url)),
        None => "-".to_string(),
    };
    format!(
        "| {} | {} | {} | {} |",
        run.result,
        cell(run.host.as_deref().unwrap_or("-")),
        cell(&run.opts_string()),
        log
    )
}

fn ensure_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

/// Render a summary of `outcome`; unsuccessful runs are listed first.
pub fn render_matrix_summary(outcome: &MatrixBuildOutcome, generated_at: DateTime<Utc>) -> String {
    let build = &outcome.build;
    let mut out = String::new();
    let _ = writeln!(out, "## Matrix build {}", build.result);
    let _ = writeln!(out);
    match build.number {
        Some(number) => {
            let _ = writeln!(out, "Build: [#{}]({})", number, build.absolute_url);
        }
        None => {
            let _ = writeln!(out, "Build: <{}>", build.absolute_url);
        }
    }
    let _ = writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if let Some(reason) = &outcome.status.reason {
        let _ = writeln!(out);
        for line in reason.lines() {
            let _ = writeln!(out, "* {}", line);
        }
    }

    let mut runs = outcome.status.runs();
    if !runs.is_empty() {
        runs.sort_by_key(|run| run.result.is_success());
        let _ = writeln!(out);
        let _ = writeln!(out, "| Result | Host | Options | Log |");
        let _ = writeln!(out, "|---|---|---|---|");
        for run in &runs {
            let _ = writeln!(out, "{}", run_row(run));
        }
    }
    out
}
