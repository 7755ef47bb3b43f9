use crate::error::{CaptureError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the capture client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// Storage service connection
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the storage service
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// File-backed local cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
}

/// External transcoder
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    /// ffmpeg binary, resolved through PATH when not absolute
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
}

/// Watch tracking policy
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Seconds of active playback between periodic watch samples
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from(".recorder-cache")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_watch_interval_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            watch_interval_secs: default_watch_interval_secs(),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from `config/capture` and `CAPTURE__*` variables
    pub fn load() -> Result<Self> {
        let config: CaptureConfig = config::Config::builder()
            .add_source(config::File::with_name("config/capture").required(false))
            // CAPTURE__SERVER__BASE_URL -> server.base_url
            .add_source(
                config::Environment::with_prefix("CAPTURE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            return Err(CaptureError::Configuration(
                "server.base_url must not be empty".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(CaptureError::Configuration(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        if self.tracking.watch_interval_secs == 0 {
            return Err(CaptureError::Configuration(
                "tracking.watch_interval_secs must be positive".to_string(),
            ));
        }
        if self.transcoder.ffmpeg_path.as_os_str().is_empty() {
            return Err(CaptureError::Configuration(
                "transcoder.ffmpeg_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.tracking.watch_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.watch_interval(), Duration::from_secs(5));
        assert_eq!(config.server.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_validate_rejects_empty_base_url() {
        let mut config = CaptureConfig::default();
        config.server.base_url = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(CaptureError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = CaptureConfig::default();
        config.tracking.watch_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_ffmpeg_path() {
        let mut config = CaptureConfig::default();
        config.transcoder.ffmpeg_path = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
