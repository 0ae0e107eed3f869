use std::path::{Path, PathBuf};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};
use anyhow::{Result, Context};

/// Get the last modification time of a file
pub fn modification_time(path: impl AsRef<Path>) -> Result<SystemTime> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;
    metadata.modified()
        .with_context(|| format!("Failed to read modification time for {}", path.display()))
}

/// Get the byte length of a file
pub fn file_length(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to read metadata for {}", path.display()))?;
    Ok(metadata.len())
}

/// Modification time truncated to whole seconds since the epoch.
///
/// Filesystems differ in sub-second mtime granularity, so freshness
/// comparisons are done at second precision.
pub fn mtime_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs() as i64,
        Err(err) => -(err.duration().as_secs() as i64),
    }
}

/// Render a path relative to a base directory where possible, with
/// forward slashes regardless of platform
pub fn relative_display(base: impl AsRef<Path>, path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let rendered = match path.strip_prefix(base.as_ref()) {
        Ok(relative) => relative.to_string_lossy().into_owned(),
        Err(_) => path.to_string_lossy().into_owned(),
    };
    rendered.replace('\\', "/")
}
