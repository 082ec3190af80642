//! Client configuration
//!
//! A `ClientConfig` is built in code with the `with_*` setters, deserialized
//! from a config file, or loaded from `TELEMETRY_*` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TelemetryError, TelemetryResult};

/// Default analytics endpoint
pub const DEFAULT_SERVER_URL: &str = "https://api.mixpanel.com";

/// Configuration for one client instance (one project token)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Project token; also keys the persisted state
    pub token: String,
    /// Base URL requests are POSTed to
    pub server_url: String,
    /// Seconds between periodic flushes; 0 turns the timer off
    pub flush_interval_secs: u64,
    /// Flush when the host app enters the background
    pub flush_on_background: bool,
    /// Root directory for persisted state; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Capacity of each queue before FIFO eviction
    pub max_queue_size: usize,
    /// Records per network request
    pub batch_size: usize,
    /// Upper bound on batches sent per store in one cycle
    pub max_batches_per_cycle: usize,
    /// Deadline for a single request, in milliseconds
    pub request_timeout_ms: u64,
    /// Journal entries written before a queue journal is compacted
    pub compact_threshold: usize,
    /// Host-supplied device identifier used as the default distinct id
    pub device_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            flush_interval_secs: 60,
            flush_on_background: true,
            data_dir: None,
            max_queue_size: 500,
            batch_size: 50,
            max_batches_per_cycle: 100,
            request_timeout_ms: 30_000,
            compact_threshold: 1000,
            device_id: None,
        }
    }
}

impl ClientConfig {
    /// Config for a token with every other field defaulted
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }

    /// Load from environment variables
    ///
    /// Required:
    /// - `TELEMETRY_TOKEN`
    ///
    /// Optional:
    /// - `TELEMETRY_SERVER_URL`
    /// - `TELEMETRY_FLUSH_INTERVAL` (seconds)
    /// - `TELEMETRY_DATA_DIR` (relative paths resolve against the cwd)
    /// - `TELEMETRY_FLUSH_ON_BACKGROUND` (`true`/`false`)
    /// - `TELEMETRY_REQUEST_TIMEOUT_MS`
    pub fn from_env() -> TelemetryResult<Self> {
        let token = env::var("TELEMETRY_TOKEN")
            .map_err(|_| TelemetryError::Config("TELEMETRY_TOKEN is not set".to_string()))?;
        let mut config = Self::new(token);

        if let Ok(url) = env::var("TELEMETRY_SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(raw) = env::var("TELEMETRY_FLUSH_INTERVAL") {
            config.flush_interval_secs = parse_env("TELEMETRY_FLUSH_INTERVAL", &raw)?;
        }
        if let Ok(raw) = env::var("TELEMETRY_FLUSH_ON_BACKGROUND") {
            config.flush_on_background = parse_env("TELEMETRY_FLUSH_ON_BACKGROUND", &raw)?;
        }
        if let Ok(raw) = env::var("TELEMETRY_REQUEST_TIMEOUT_MS") {
            config.request_timeout_ms = parse_env("TELEMETRY_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Ok(dir) = env::var("TELEMETRY_DATA_DIR") {
            let path = PathBuf::from(dir);
            config.data_dir = Some(if path.is_absolute() {
                path
            } else {
                env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(path)
            });
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_secs = interval.as_secs();
        self
    }

    pub fn with_flush_on_background(mut self, enabled: bool) -> Self {
        self.flush_on_background = enabled;
        self
    }

    pub fn with_data_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_max_batches_per_cycle(mut self, count: usize) -> Self {
        self.max_batches_per_cycle = count;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Periodic flush interval, `None` when disabled
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Directory holding this token's persisted state
    pub fn state_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(urlencoding::encode(&self.token).as_ref()))
    }

    /// Reject configurations the client cannot run with
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.token.trim().is_empty() {
            return Err(TelemetryError::Config("token must not be empty".to_string()));
        }
        // would name data_dir itself or its parent as the state directory
        if matches!(self.token.as_str(), "." | "..") {
            return Err(TelemetryError::Config(format!(
                "token {:?} is not usable as a state directory name",
                self.token
            )));
        }
        if self.server_url.trim().is_empty() {
            return Err(TelemetryError::Config("server_url must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TelemetryError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(TelemetryError::Config("max_queue_size must be at least 1".to_string()));
        }
        if self.max_batches_per_cycle == 0 {
            return Err(TelemetryError::Config(
                "max_batches_per_cycle must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(TelemetryError::Config("request_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> TelemetryResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| TelemetryError::Config(format!("{} has an invalid value: {:?}", name, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("tok");
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.flush_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.batch_size, 50);
        assert!(config.flush_on_background);
        assert!(config.state_dir().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_disables_timer() {
        let config = ClientConfig::new("tok").with_flush_interval(Duration::ZERO);
        assert_eq!(config.flush_interval(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("t").with_batch_size(0).validate().is_err());
        assert!(ClientConfig::new("t").with_max_queue_size(0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dot_tokens() {
        assert!(ClientConfig::new(".").validate().is_err());
        assert!(ClientConfig::new("..").validate().is_err());
        assert!(ClientConfig::new("..tok").validate().is_ok());
    }

    #[test]
    fn test_state_dir_is_keyed_by_token() {
        let config = ClientConfig::new("a/b").with_data_dir("/var/lib/app");
        assert_eq!(config.state_dir(), Some(PathBuf::from("/var/lib/app/a%2Fb")));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"token":"abc","flush_interval_secs":0}"#).unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.flush_interval(), None);
        assert_eq!(config.max_queue_size, 500);
    }
}
