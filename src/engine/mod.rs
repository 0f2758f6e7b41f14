//! Fetch engines
//!
//! The core never talks to a media site itself. Metadata resolution, byte transfer and
//! postprocessing go through the [`FetchEngine`] trait, so the downloader can run against
//! the real tool or a scripted fake.
//!
//! - [`YtDlpEngine`]: drives the external `yt-dlp` binary as a child process
//!
//! ## Usage
//!
//! ```no_run
//! use media_dl::engine::{FetchEngine, FetchRequest, YtDlpEngine};
//! use media_dl::types::StreamKind;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = YtDlpEngine::from_path().expect("yt-dlp not found");
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! let request = FetchRequest {
//!     url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
//!     quality: "720".into(),
//!     format: StreamKind::Video,
//!     staging_dir: "./temp_downloads".into(),
//!     staging_stem: "a1b2c3d4".into(),
//! };
//! let outcome = engine.fetch(request, tx, CancellationToken::new()).await?;
//! println!("staged {:?}", outcome.artifacts);
//! # Ok(())
//! # }
//! ```

use regex::Regex;
use std::sync::LazyLock;

mod cli;
pub mod parser;
mod traits;

pub use cli::{YtDlpEngine, format_selector};
pub use traits::{
    FetchEngine, FetchOutcome, FetchRequest, ProgressEvent, ProgressReceiver, ProgressSender,
    StagedArtifact,
};

static PLAYLIST_URL: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:[a-z0-9-]+\.)*(?:youtube\.com|youtu\.be)/playlist(?:[/?#]|$)")
});

/// Whether `url` points at a playlist page rather than a single video
///
/// A watch URL that merely carries a `list=` parameter counts as a single video.
pub fn is_playlist_url(url: &str) -> bool {
    match PLAYLIST_URL.as_ref() {
        Ok(re) => re.is_match(url.trim()),
        Err(_) => url.contains("youtube.com/playlist") || url.contains("youtu.be/playlist"),
    }
}
