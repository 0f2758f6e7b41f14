//! Parser for yt-dlp output
//!
//! The adapter asks yt-dlp to emit tab-separated machine lines through
//! `--progress-template` and `--print`; everything else it writes is free text.

use super::traits::ProgressEvent;
use crate::types::{MediaMetadata, PlaylistEntry, STANDARD_QUALITIES, DEFAULT_THUMBNAIL_URL};

/// Marker for progress lines
pub const PROGRESS_MARKER: &str = "MDL_PROGRESS";
/// Marker for postprocessing lines
pub const POSTPROCESS_MARKER: &str = "MDL_POSTPROCESS";
/// Marker for finished-file lines
pub const ARTIFACT_MARKER: &str = "MDL_ARTIFACT";

/// yt-dlp prints this for missing fields
const NA: &str = "NA";

/// `--progress-template` value producing [`PROGRESS_MARKER`] lines
pub fn progress_template() -> String {
    format!(
        "download:{}\t%(progress.status)s\t%(progress.downloaded_bytes)s\t%(progress.total_bytes)s\t%(progress.total_bytes_estimate)s\t%(progress.speed)s\t%(progress.eta)s\t%(progress.filename)s",
        PROGRESS_MARKER
    )
}

/// `--print` value producing [`POSTPROCESS_MARKER`] lines
pub fn postprocess_template() -> String {
    format!("post_process:{}\t%(id)s", POSTPROCESS_MARKER)
}

/// `--print` value producing [`ARTIFACT_MARKER`] lines
pub fn artifact_template() -> String {
    format!(
        "after_move:{}\t%(id)s\t%(title)s\t%(thumbnail)s\t%(webpage_url)s\t%(playlist_title)s\t%(duration)s\t%(filepath)s",
        ARTIFACT_MARKER
    )
}

/// A finished file reported by yt-dlp
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactLine {
    /// Site media ID
    pub id: Option<String>,
    /// Media title
    pub title: Option<String>,
    /// Remote thumbnail URL
    pub thumbnail: Option<String>,
    /// Canonical page URL
    pub webpage_url: Option<String>,
    /// Title of the playlist this entry belongs to
    pub playlist_title: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Final path of the file after postprocessing
    pub filepath: String,
}

impl ArtifactLine {
    /// Metadata carried by this line
    pub fn metadata(&self) -> MediaMetadata {
        MediaMetadata {
            title: self.title.clone().unwrap_or_default(),
            duration: self.duration,
            id: self.id.clone(),
            thumbnail: self.thumbnail.clone(),
            webpage_url: self.webpage_url.clone(),
        }
    }
}

/// One recognised line of yt-dlp output
#[derive(Debug, Clone, PartialEq)]
pub enum EngineLine {
    /// Transfer progress
    Progress(ProgressEvent),
    /// Postprocessing started
    PostProcess,
    /// A file reached its final staged location
    Artifact(ArtifactLine),
}

/// Parse one line of output; `None` for free text
pub fn parse_line(line: &str) -> Option<EngineLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.split('\t');
    match fields.next()?.trim() {
        PROGRESS_MARKER => parse_progress(fields).map(EngineLine::Progress),
        POSTPROCESS_MARKER => Some(EngineLine::PostProcess),
        ARTIFACT_MARKER => parse_artifact(line).map(EngineLine::Artifact),
        _ => None,
    }
}

fn parse_progress<'a>(mut fields: impl Iterator<Item = &'a str>) -> Option<ProgressEvent> {
    let status = fields.next()?;
    let downloaded = number(fields.next());
    let total = number(fields.next());
    let estimate = number(fields.next());
    let speed = number(fields.next());
    let eta = number(fields.next());
    let filename = text(fields.next());

    match status {
        "downloading" => Some(ProgressEvent::Downloading {
            downloaded_bytes: downloaded.map(|b| b.max(0.0) as u64).unwrap_or(0),
            total_bytes: total.or(estimate).map(|b| b.max(0.0) as u64),
            speed,
            eta,
        }),
        "finished" => Some(ProgressEvent::Finished { filename }),
        _ => None,
    }
}

fn parse_artifact(line: &str) -> Option<ArtifactLine> {
    // The path comes last so tabs inside it survive
    let mut fields = line.splitn(8, '\t');
    fields.next()?;
    let id = text(fields.next());
    let title = text(fields.next());
    let thumbnail = text(fields.next());
    let webpage_url = text(fields.next());
    let playlist_title = text(fields.next());
    let duration = number(fields.next());
    let filepath = text(fields.next())?;
    Some(ArtifactLine {
        id,
        title,
        thumbnail,
        webpage_url,
        playlist_title,
        duration,
        filepath,
    })
}

fn text(field: Option<&str>) -> Option<String> {
    let value = field?.trim();
    if value.is_empty() || value == NA {
        None
    } else {
        Some(value.to_string())
    }
}

fn number(field: Option<&str>) -> Option<f64> {
    text(field)?.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Last `ERROR:` message in yt-dlp's diagnostics, without the prefix
pub fn last_error_message<'a>(lines: impl DoubleEndedIterator<Item = &'a String>) -> Option<String> {
    lines
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:").map(|m| m.trim().to_string()))
        .filter(|m| !m.is_empty())
}

/// Extract metadata from a `yt-dlp -J` document
pub fn parse_metadata(json: &serde_json::Value) -> MediaMetadata {
    MediaMetadata {
        title: json_str(json, "title").unwrap_or_else(|| "Unknown Title".to_string()),
        duration: json.get("duration").and_then(|d| d.as_f64()),
        id: json_str(json, "id"),
        thumbnail: json_str(json, "thumbnail").or_else(|| first_thumbnail(json)),
        webpage_url: json_str(json, "webpage_url"),
    }
}

/// Extract entries from a `yt-dlp -J --flat-playlist` document
///
/// Returns `None` if the document does not describe a playlist.
pub fn parse_playlist(json: &serde_json::Value) -> Option<Vec<PlaylistEntry>> {
    if json.get("_type").and_then(|t| t.as_str()) != Some("playlist") {
        return None;
    }
    let entries = json
        .get("entries")
        .and_then(|e| e.as_array())
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let url = json_str(entry, "url").or_else(|| json_str(entry, "webpage_url"))?;
                    Some(PlaylistEntry {
                        title: json_str(entry, "title").unwrap_or_else(|| "Untitled".to_string()),
                        duration: entry.get("duration").and_then(|d| d.as_f64()).unwrap_or(0.0),
                        url,
                        thumbnail: json_str(entry, "thumbnail")
                            .or_else(|| first_thumbnail(entry))
                            .unwrap_or_else(|| DEFAULT_THUMBNAIL_URL.to_string()),
                        qualities: STANDARD_QUALITIES.iter().map(|q| q.to_string()).collect(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(entries)
}

fn json_str(json: &serde_json::Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_thumbnail(json: &serde_json::Value) -> Option<String> {
    json.get("thumbnails")?
        .as_array()?
        .iter()
        .find_map(|t| json_str(t, "url"))
}
