use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Suffix of an in-progress output file, renamed over the destination once
/// complete
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Append `suffix` to the full file name, keeping any existing extension
/// (`bar.txt` + `.tmp` is `bar.txt.tmp`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Best-effort removal of a scratch file. Missing files are fine.
pub async fn remove_if_exists(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed scratch file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove scratch file"),
    }
}
