//! Fetch engine driving the external yt-dlp binary

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::parser::{
    EngineLine, artifact_template, last_error_message, parse_line, parse_metadata, parse_playlist,
    postprocess_template, progress_template,
};
use super::traits::{
    FetchEngine, FetchOutcome, FetchRequest, ProgressEvent, ProgressSender, StagedArtifact,
};
use crate::config::ToolsConfig;
use crate::error::{Error, FetchError};
use crate::types::{MediaMetadata, PlaylistEntry, StreamKind};

/// How long metadata queries may take
const METADATA_TIMEOUT: Duration = Duration::from_secs(60);

/// Diagnostic lines kept for error reporting
const STDERR_TAIL_LINES: usize = 20;

/// yt-dlp format selector for a quality token and stream type
///
/// A numeric quality caps the video height; anything else takes the best available.
pub fn format_selector(quality: &str, format: StreamKind) -> String {
    match format {
        StreamKind::Audio => "bestaudio[ext=m4a]/bestaudio".to_string(),
        StreamKind::Video | StreamKind::Playlist => match quality.trim().parse::<u32>() {
            Ok(height) => format!(
                "bestvideo[ext=mp4][vcodec^=avc1][height<={}]+bestaudio[ext=m4a]/best[ext=mp4]/best",
                height
            ),
            Err(_) => {
                "bestvideo[ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string()
            }
        },
    }
}

/// Fetch engine using an external `yt-dlp` binary
///
/// # Examples
///
/// ```no_run
/// use media_dl::engine::{FetchEngine, YtDlpEngine};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = YtDlpEngine::from_path().expect("yt-dlp not found in PATH");
/// let meta = engine.resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
/// println!("{}", meta.title);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    binary_path: PathBuf,
    retries: u32,
    fragment_retries: u32,
}

impl YtDlpEngine {
    /// Create an engine with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            retries: 10,
            fragment_retries: 10,
        }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path() -> Option<Self> {
        which::which("yt-dlp").ok().map(Self::new)
    }

    /// Locate the binary as configured
    pub fn from_config(tools: &ToolsConfig) -> crate::Result<Self> {
        let engine = match &tools.yt_dlp_path {
            Some(path) => Some(Self::new(path.clone())),
            None if tools.search_path => Self::from_path(),
            None => None,
        };
        engine
            .map(|e| e.with_retries(tools.retries, tools.fragment_retries))
            .ok_or_else(|| {
                Error::ExternalTool(
                    "yt-dlp not found: set yt_dlp_path or install it on PATH".to_string(),
                )
            })
    }

    /// Set the retry budgets handed to yt-dlp
    pub fn with_retries(mut self, retries: u32, fragment_retries: u32) -> Self {
        self.retries = retries;
        self.fragment_retries = fragment_retries;
        self
    }

    /// The binary this engine runs
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Full argument list for a fetch
    pub fn fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let output_template = match request.format {
            StreamKind::Playlist => format!("{}.%(playlist_index)s.%(ext)s", request.staging_stem),
            _ => format!("{}.%(ext)s", request.staging_stem),
        };

        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--progress".into(),
            "--no-warnings".into(),
            "--no-colors".into(),
            "--continue".into(),
            "--no-mtime".into(),
            "--retries".into(),
            self.retries.to_string(),
            "--fragment-retries".into(),
            self.fragment_retries.to_string(),
            "--concurrent-fragments".into(),
            "1".into(),
            "--progress-template".into(),
            progress_template(),
            "--print".into(),
            postprocess_template(),
            "--print".into(),
            artifact_template(),
            "--paths".into(),
            request.staging_dir.to_string_lossy().into_owned(),
            "--output".into(),
            output_template,
            "--format".into(),
            format_selector(&request.quality, request.format),
        ];

        match request.format {
            StreamKind::Audio => args.extend([
                "--extract-audio".into(),
                "--audio-format".into(),
                "mp3".into(),
                "--audio-quality".into(),
                "192K".into(),
                "--no-playlist".into(),
            ]),
            StreamKind::Video => args.extend([
                "--merge-output-format".into(),
                "mp4".into(),
                "--recode-video".into(),
                "mp4".into(),
                "--no-playlist".into(),
            ]),
            StreamKind::Playlist => args.extend([
                "--merge-output-format".into(),
                "mp4".into(),
                "--recode-video".into(),
                "mp4".into(),
                "--yes-playlist".into(),
                "--ignore-errors".into(),
            ]),
        }

        args.push("--".into());
        args.push(request.url.clone());
        args
    }

    async fn dump_json(&self, url: &str, extra: &[&str]) -> crate::Result<serde_json::Value> {
        let mut command = Command::new(&self.binary_path);
        command
            .args(["--dump-single-json", "--no-warnings", "--socket-timeout", "10"])
            .args(extra)
            .arg("--")
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(METADATA_TIMEOUT, command.output())
            .await
            .map_err(|_| Error::Fetch(format!("metadata lookup for {} timed out", url)))?
            .map_err(|e| Error::ExternalTool(format!("failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr: Vec<String> = String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string)
                .collect();
            let message = last_error_message(stderr.iter())
                .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
            return Err(Error::Fetch(message));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[async_trait]
impl FetchEngine for YtDlpEngine {
    async fn resolve(&self, url: &str) -> crate::Result<MediaMetadata> {
        let json = self.dump_json(url, &["--no-playlist"]).await?;
        Ok(parse_metadata(&json))
    }

    async fn playlist_entries(&self, url: &str) -> crate::Result<Vec<PlaylistEntry>> {
        let json = self.dump_json(url, &["--flat-playlist"]).await?;
        parse_playlist(&json).ok_or_else(|| Error::Fetch("not a playlist".to_string()))
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        tokio::fs::create_dir_all(&request.staging_dir)
            .await
            .map_err(|e| FetchError::Failed(format!("cannot create staging directory: {}", e)))?;

        let args = self.fetch_args(&request);
        tracing::debug!(url = %request.url, stem = %request.staging_stem, "spawning yt-dlp");

        let mut child = Command::new(&self.binary_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::Failed(format!("failed to execute yt-dlp: {}", e)))?;

        // yt-dlp prints progress to stderr in quiet mode, so both streams are scanned
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<(bool, String)>();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, false, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, true, line_tx.clone());
        }
        drop(line_tx);

        let mut collector = OutputCollector::new(&request);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(FetchError::Cancelled);
                }
                next = line_rx.recv() => match next {
                    Some((is_stderr, line)) => collector.handle(&line, is_stderr, &progress),
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(FetchError::Cancelled);
            }
            status = child.wait() => status
                .map_err(|e| FetchError::Failed(format!("failed to wait for yt-dlp: {}", e)))?,
        };

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        if !status.success() && collector.artifacts.is_empty() {
            let message = last_error_message(collector.stderr_tail.iter())
                .unwrap_or_else(|| format!("yt-dlp exited with {}", status));
            return Err(FetchError::Failed(message));
        }
        if !status.success() {
            tracing::warn!(url = %request.url, %status, "yt-dlp reported errors for some playlist entries");
        }

        collector.into_outcome()
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

fn spawn_line_reader<R>(reader: R, is_stderr: bool, tx: mpsc::UnboundedSender<(bool, String)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((is_stderr, line)).is_err() {
                break;
            }
        }
    });
}

struct OutputCollector {
    staging_dir: PathBuf,
    format: StreamKind,
    artifacts: Vec<(StagedArtifact, MediaMetadata)>,
    collection_title: Option<String>,
    stderr_tail: VecDeque<String>,
}

impl OutputCollector {
    fn new(request: &FetchRequest) -> Self {
        Self {
            staging_dir: request.staging_dir.clone(),
            format: request.format,
            artifacts: Vec::new(),
            collection_title: None,
            stderr_tail: VecDeque::with_capacity(STDERR_TAIL_LINES),
        }
    }

    fn handle(&mut self, line: &str, is_stderr: bool, progress: &ProgressSender) {
        match parse_line(line) {
            Some(EngineLine::Progress(event)) => {
                let _ = progress.send(event);
            }
            Some(EngineLine::PostProcess) => {
                let _ = progress.send(ProgressEvent::PostProcessing {
                    step: "postprocessing".to_string(),
                });
            }
            Some(EngineLine::Artifact(artifact)) => {
                if self.collection_title.is_none() {
                    self.collection_title = artifact.playlist_title.clone();
                }
                let path = PathBuf::from(&artifact.filepath);
                let path = if path.is_absolute() {
                    path
                } else {
                    self.staging_dir.join(path)
                };
                self.artifacts.push((
                    StagedArtifact {
                        path,
                        title: artifact.title.clone(),
                    },
                    artifact.metadata(),
                ));
            }
            None if is_stderr => {
                if self.stderr_tail.len() == STDERR_TAIL_LINES {
                    self.stderr_tail.pop_front();
                }
                self.stderr_tail.push_back(line.to_string());
            }
            None => tracing::trace!(line, "yt-dlp output"),
        }
    }

    fn into_outcome(self) -> Result<FetchOutcome, FetchError> {
        let Some((_, first_meta)) = self.artifacts.first() else {
            return Err(FetchError::Failed(
                "yt-dlp finished without reporting an output file".to_string(),
            ));
        };

        let mut metadata = first_meta.clone();
        let collection_title = match self.format {
            StreamKind::Playlist => {
                let title = self.collection_title.unwrap_or_else(|| metadata.title.clone());
                metadata.title = title.clone();
                Some(title)
            }
            _ => None,
        };

        Ok(FetchOutcome {
            metadata,
            collection_title,
            artifacts: self.artifacts.into_iter().map(|(a, _)| a).collect(),
        })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn request(format: StreamKind, quality: &str) -> FetchRequest {
        FetchRequest {
            url: "https://www.youtube.com/watch?v=abc".into(),
            quality: quality.into(),
            format,
            staging_dir: PathBuf::from("/tmp/staging"),
            staging_stem: "a1b2c3d4".into(),
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_format_selector_numeric_quality_caps_height() {
        assert_eq!(
            format_selector("720", StreamKind::Video),
            "bestvideo[ext=mp4][vcodec^=avc1][height<=720]+bestaudio[ext=m4a]/best[ext=mp4]/best"
        );
        assert_eq!(
            format_selector("best", StreamKind::Playlist),
            "bestvideo[ext=mp4][vcodec^=avc1]+bestaudio[ext=m4a]/best[ext=mp4]/best"
        );
        assert_eq!(
            format_selector("720", StreamKind::Audio),
            "bestaudio[ext=m4a]/bestaudio"
        );
    }

    #[test]
    fn test_video_args_stage_under_task_stem() {
        let engine = YtDlpEngine::new(PathBuf::from("yt-dlp"));
        let args = engine.fetch_args(&request(StreamKind::Video, "1080"));

        assert_eq!(value_after(&args, "--output"), Some("a1b2c3d4.%(ext)s"));
        assert_eq!(value_after(&args, "--paths"), Some("/tmp/staging"));
        assert_eq!(value_after(&args, "--recode-video"), Some("mp4"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://www.youtube.com/watch?v=abc"));
    }

    #[test]
    fn test_audio_args_extract_mp3() {
        let engine = YtDlpEngine::new(PathBuf::from("yt-dlp"));
        let args = engine.fetch_args(&request(StreamKind::Audio, "audio"));

        assert!(args.contains(&"--extract-audio".to_string()));
        assert_eq!(value_after(&args, "--audio-format"), Some("mp3"));
        assert_eq!(value_after(&args, "--audio-quality"), Some("192K"));
    }

    #[test]
    fn test_playlist_args_index_each_entry() {
        let engine = YtDlpEngine::new(PathBuf::from("yt-dlp")).with_retries(3, 4);
        let args = engine.fetch_args(&request(StreamKind::Playlist, "480"));

        assert_eq!(
            value_after(&args, "--output"),
            Some("a1b2c3d4.%(playlist_index)s.%(ext)s")
        );
        assert!(args.contains(&"--yes-playlist".to_string()));
        assert_eq!(value_after(&args, "--retries"), Some("3"));
        assert_eq!(value_after(&args, "--fragment-retries"), Some("4"));
    }

    #[test]
    fn test_from_config_prefers_explicit_path() {
        let tools = ToolsConfig {
            yt_dlp_path: Some(PathBuf::from("/opt/yt-dlp")),
            search_path: false,
            ..Default::default()
        };
        let engine = YtDlpEngine::from_config(&tools).unwrap();
        assert_eq!(engine.binary_path(), Path::new("/opt/yt-dlp"));
    }

    #[test]
    fn test_from_config_without_path_or_search_fails() {
        let tools = ToolsConfig {
            yt_dlp_path: None,
            search_path: false,
            ..Default::default()
        };
        assert!(matches!(
            YtDlpEngine::from_config(&tools),
            Err(Error::ExternalTool(_))
        ));
    }

    #[test]
    fn test_collector_builds_playlist_outcome() {
        let req = request(StreamKind::Playlist, "720");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut collector = OutputCollector::new(&req);

        collector.handle(
            "MDL_PROGRESS\tdownloading\t5\t10\tNA\tNA\tNA\tNA",
            true,
            &tx,
        );
        collector.handle("MDL_POSTPROCESS\tx", false, &tx);
        collector.handle(
            "MDL_ARTIFACT\tv1\tFirst\tNA\tNA\tMy Mix\t10\t/tmp/staging/a1b2c3d4.1.mp4",
            false,
            &tx,
        );
        collector.handle(
            "MDL_ARTIFACT\tv2\tSecond\tNA\tNA\tMy Mix\t20\ta1b2c3d4.2.mp4",
            false,
            &tx,
        );
        collector.handle("ERROR: entry 3 unavailable", true, &tx);

        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::Downloading { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProgressEvent::PostProcessing { .. }
        ));
        assert_eq!(collector.stderr_tail.len(), 1);

        let outcome = collector.into_outcome().unwrap();
        assert_eq!(outcome.collection_title.as_deref(), Some("My Mix"));
        assert_eq!(outcome.metadata.title, "My Mix");
        assert_eq!(outcome.artifacts.len(), 2);
        assert_eq!(
            outcome.artifacts[1].path,
            PathBuf::from("/tmp/staging/a1b2c3d4.2.mp4")
        );
    }

    #[test]
    fn test_collector_without_artifacts_fails() {
        let collector = OutputCollector::new(&request(StreamKind::Video, "720"));
        assert!(matches!(
            collector.into_outcome(),
            Err(FetchError::Failed(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_cancellation_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-yt-dlp");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine = YtDlpEngine::new(script);
        let mut req = request(StreamKind::Video, "720");
        req.staging_dir = dir.path().join("staging");
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), engine.fetch(req, tx, cancel))
            .await
            .expect("fetch should return promptly after cancellation");
        assert_eq!(result.unwrap_err(), FetchError::Cancelled);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_reports_last_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-yt-dlp");
        std::fs::write(
            &script,
            "#!/bin/sh\necho 'ERROR: [generic] Unsupported URL' >&2\nexit 1\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let engine = YtDlpEngine::new(script);
        let mut req = request(StreamKind::Video, "720");
        req.staging_dir = dir.path().join("staging");
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = engine.fetch(req, tx, CancellationToken::new()).await;
        assert_eq!(
            result.unwrap_err(),
            FetchError::Failed("[generic] Unsupported URL".to_string())
        );
    }
}
