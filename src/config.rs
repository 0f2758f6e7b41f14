//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Download behavior configuration (directories, concurrency, timing)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Directory finished artifacts are moved into (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Staging directory for in-flight transfers (default: "./temp_downloads")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Directory cached preview images are stored in (default: "./thumbnails")
    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,

    /// Maximum concurrent workers (default: 4)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Progress persistence and cancellation checkpoint interval (default: 500ms)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub progress_interval: Duration,

    /// How long a delete waits for the worker to exit (default: 200ms)
    #[serde(default = "default_delete_grace_period", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub delete_grace_period: Duration,

    /// How long delete-all waits for workers to exit (default: 500ms)
    #[serde(default = "default_bulk_delete_grace_period", with = "duration_ms_serde")]
    #[schema(value_type = u64)]
    pub bulk_delete_grace_period: Duration,

    /// Upper bound on waiting for workers during shutdown (default: 30s)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub shutdown_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            temp_dir: default_temp_dir(),
            thumbnail_dir: default_thumbnail_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            progress_interval: default_progress_interval(),
            delete_grace_period: default_delete_grace_period(),
            bulk_delete_grace_period: default_bulk_delete_grace_period(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// External tool configuration (yt-dlp)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub yt_dlp_path: Option<PathBuf>,

    /// Whether to search PATH for yt-dlp if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Transfer retries handed to yt-dlp (default: 10)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Fragment retries handed to yt-dlp (default: 10)
    #[serde(default = "default_retries")]
    pub fragment_retries: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: None,
            search_path: true,
            retries: default_retries(),
            fragment_retries: default_retries(),
        }
    }
}

/// Task state persistence
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// Task document path (default: "./tasks.json")
    #[serde(default = "default_tasks_path")]
    pub tasks_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            tasks_path: default_tasks_path(),
        }
    }
}

/// Connectivity health monitor configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthConfig {
    /// Run the monitor at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URL probed with a HEAD request (default: "https://www.google.com")
    #[serde(default = "default_probe_url")]
    pub probe_url: String,

    /// Time between probes (default: 5 seconds)
    #[serde(default = "default_health_interval", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub interval: Duration,

    /// Per-probe timeout (default: 3 seconds)
    #[serde(default = "default_health_timeout", with = "duration_serde")]
    #[schema(value_type = u64)]
    pub timeout: Duration,

    /// Consecutive failed probes before active work is paused (default: 3)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_url: default_probe_url(),
            interval: default_health_interval(),
            timeout: default_health_timeout(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// API and external server integration configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct ServerIntegrationConfig {
    /// REST API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:3452)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Main configuration for MediaDownloader
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) - directories, concurrency, timing
/// - [`tools`](ToolsConfig) - yt-dlp location and retry policy
/// - [`persistence`](PersistenceConfig) - task document location
/// - [`health`](HealthConfig) - connectivity monitor
/// - [`server`](ServerIntegrationConfig) - REST API
///
/// `download`, `tools` and `server` are flattened, so their fields sit at the top level
/// of the serialized form.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// External tool settings
    #[serde(flatten)]
    pub tools: ToolsConfig,

    /// Task state storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Connectivity monitor
    #[serde(default)]
    pub health: HealthConfig,

    /// API and external server integration
    #[serde(flatten)]
    pub server: ServerIntegrationConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Temporary directory
    pub fn temp_dir(&self) -> &PathBuf {
        &self.download.temp_dir
    }

    /// Thumbnail cache directory
    pub fn thumbnail_dir(&self) -> &PathBuf {
        &self.download.thumbnail_dir
    }

    /// Reject settings the downloader cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "max_concurrent_downloads must be at least 1".into(),
                key: Some("max_concurrent_downloads".into()),
            });
        }
        if self.download.progress_interval.is_zero() {
            return Err(Error::Config {
                message: "progress_interval must be non-zero".into(),
                key: Some("progress_interval".into()),
            });
        }
        if self.health.enabled {
            if self.health.failure_threshold == 0 {
                return Err(Error::Config {
                    message: "failure_threshold must be at least 1".into(),
                    key: Some("health.failure_threshold".into()),
                });
            }
            if self.health.interval.is_zero() {
                return Err(Error::Config {
                    message: "health interval must be non-zero".into(),
                    key: Some("health.interval".into()),
                });
            }
            url::Url::parse(&self.health.probe_url).map_err(|e| Error::Config {
                message: format!("invalid probe_url: {}", e),
                key: Some("health.probe_url".into()),
            })?;
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp_downloads")
}

fn default_thumbnail_dir() -> PathBuf {
    PathBuf::from("./thumbnails")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_delete_grace_period() -> Duration {
    Duration::from_millis(200)
}

fn default_bulk_delete_grace_period() -> Duration {
    Duration::from_millis(500)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retries() -> u32 {
    10
}

fn default_tasks_path() -> PathBuf {
    PathBuf::from("./tasks.json")
}

fn default_probe_url() -> String {
    "https://www.google.com".to_string()
}

fn default_health_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3452))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
