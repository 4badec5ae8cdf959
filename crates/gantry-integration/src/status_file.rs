//! Status file read by the calling pipeline.

use gantry_core::{RelengStatus, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default location, relative to the workspace.
pub const DEFAULT_STATUS_FILE: &str = "logs/unsuccessful-reason.log";

/// Resolve a status file path against the workspace.
pub fn status_file_path(workspace: &Path, path: Option<&str>) -> PathBuf {
    let path = Path::new(path.unwrap_or(DEFAULT_STATUS_FILE));
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Remove a status file left over from an earlier build.
pub async fn clear_status_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Write `status` to `path`.
///
/// `.json` files get the whole status; any other file gets the reason text
/// and is not created when there is no reason.
pub async fn write_status_file(path: &Path, status: &RelengStatus) -> Result<()> {
    let contents = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::to_string_pretty(status)?
    } else {
        match &status.reason {
            Some(reason) => format!("{}\n", reason),
            None => return Ok(()),
        }
    };
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, contents).await?;
    debug!(path = %path.display(), result = %status.result, "Wrote status file");
    Ok(())
}
