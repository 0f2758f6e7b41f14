//! Utility functions for file naming and telemetry formatting

use crate::error::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Longest file name (in characters) produced by [`sanitize_filename`]
const MAX_FILENAME_CHARS: usize = 180;

static UNSAFE_FILENAME_CHARS: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]+"#));

/// `path` with `_n` inserted before the extension, or `path` itself for `n == 0`
///
/// # Examples
///
/// ```
/// use media_dl::utils::numbered_path;
/// use std::path::Path;
///
/// let path = Path::new("/downloads/clip.mp4");
/// assert_eq!(numbered_path(path, 0).unwrap(), path);
/// assert_eq!(numbered_path(path, 2).unwrap(), Path::new("/downloads/clip_2.mp4"));
/// ```
pub fn numbered_path(path: &Path, n: u32) -> Result<PathBuf> {
    if n == 0 {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Other(format!("cannot extract file stem from {:?}", path)))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path
        .parent()
        .ok_or_else(|| Error::Other(format!("cannot extract parent of {:?}", path)))?;

    let new_name = match extension {
        Some(ext) => format!("{}_{}.{}", stem, n, ext),
        None => format!("{}_{}", stem, n),
    };
    Ok(parent.join(new_name))
}

/// Atomically claim a collision-free file name by suffixing `_1`, `_2`, … before the extension
///
/// The returned path exists as an empty file owned by the caller, so a concurrent claim of
/// the same name moves on to the next suffix instead of sharing it.
pub async fn reserve_unique_file(path: &Path) -> Result<PathBuf> {
    reserve_unique(path, |candidate| async move {
        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
            .map(|_| ())
    })
    .await
}

/// Atomically claim a collision-free directory name, suffixed like [`reserve_unique_file`]
pub async fn reserve_unique_dir(path: &Path) -> Result<PathBuf> {
    reserve_unique(path, |candidate| async move {
        tokio::fs::create_dir(&candidate).await
    })
    .await
}

async fn reserve_unique<F, Fut>(path: &Path, create: F) -> Result<PathBuf>
where
    F: Fn(PathBuf) -> Fut,
    Fut: std::future::Future<Output = std::io::Result<()>>,
{
    for n in 0..=MAX_RENAME_ATTEMPTS {
        let candidate = numbered_path(path, n)?;
        match create(candidate.clone()).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Err(Error::Other(format!(
        "could not find a unique name for {:?} after {} attempts",
        path, MAX_RENAME_ATTEMPTS
    )))
}

/// Make a media title safe to use as a file or directory name
///
/// Path separators and characters reserved on common filesystems become `_`, leading and
/// trailing dots and whitespace are trimmed, and the result is capped in length.
/// An unusable title falls back to `fallback`.
#[must_use]
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let replaced = match UNSAFE_FILENAME_CHARS.as_ref() {
        Ok(re) => re.replace_all(name, "_").into_owned(),
        Err(_) => name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == ' ' { c } else { '_' })
            .collect(),
    };

    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    let limited: String = trimmed.chars().take(MAX_FILENAME_CHARS).collect();
    let limited = limited.trim_end().to_string();

    if limited.is_empty() || limited.chars().all(|c| c == '_') {
        fallback.to_string()
    } else {
        limited
    }
}

/// Format remaining seconds as `MM:SS`, or `HH:MM:SS` past an hour
///
/// Unknown or negative values render as `N/A`.
#[must_use]
pub fn format_eta(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| s.is_finite() && *s >= 0.0) else {
        return "N/A".to_string();
    };
    let total = seconds as u64;
    let (hours, rem) = (total / 3600, total % 3600);
    let (minutes, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Format a transfer rate in bytes per second as kilobytes per second
#[must_use]
pub fn format_speed(bytes_per_sec: f64) -> String {
    format!("{:.2} KBps", bytes_per_sec / 1024.0)
}

/// Percentage string like `42.10%`, or `None` when the total is unknown
#[must_use]
pub fn format_percent(downloaded: u64, total: Option<u64>) -> Option<String> {
    percent_of(downloaded, total).map(|p| format!("{:.2}%", p))
}

/// Completion percentage clamped to 0..=100
#[must_use]
pub fn percent_of(downloaded: u64, total: Option<u64>) -> Option<f32> {
    let total = total.filter(|t| *t > 0)?;
    let ratio = downloaded as f64 / total as f64 * 100.0;
    Some(ratio.clamp(0.0, 100.0) as f32)
}
