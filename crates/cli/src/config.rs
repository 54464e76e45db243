use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use fluxstudio_fal::queue::DEFAULT_QUEUE_URL;
use fluxstudio_fal::{FalQueueConfig, RetryConfig};
use fluxstudio_storage::history::DEFAULT_HISTORY_CAP;
use fluxstudio_storage::HistoryConfig;

/// A malformed configuration variable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{var} must be {expected}, got '{value}'")]
pub struct ConfigError {
    pub var: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Studio configuration loaded from environment variables.
///
/// All fields have defaults suitable for local use.
#[derive(Debug, Clone)]
pub struct StudioConfig {
    /// fal.ai API key from `FAL_KEY`, used when none is stored.
    pub fal_key: Option<String>,
    /// Queue base URL (default: `https://queue.fal.run`).
    pub queue_url: String,
    /// Directory holding history and settings (default: `.fluxstudio`).
    pub data_dir: PathBuf,
    /// History cap (default: `50`); `None` when set to `0`.
    pub history_cap: Option<usize>,
    /// Per-HTTP-request timeout in seconds (default: `120`).
    pub request_timeout_secs: u64,
    /// Queue status poll interval in milliseconds (default: `500`).
    pub poll_interval_ms: u64,
    /// Longest wait for a queued request in seconds (default: `600`).
    pub poll_timeout_secs: u64,
    /// Total generation attempts, the first included (default: `3`).
    pub retry_max_attempts: u32,
    /// Linear backoff unit in milliseconds (default: `1000`).
    pub retry_base_delay_ms: u64,
}

impl StudioConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `FAL_KEY`              | unset                   |
    /// | `FAL_QUEUE_URL`        | `https://queue.fal.run` |
    /// | `FLUXSTUDIO_DATA_DIR`  | `.fluxstudio`           |
    /// | `HISTORY_CAP`          | `50` (`0` = unlimited)  |
    /// | `REQUEST_TIMEOUT_SECS` | `120`                   |
    /// | `POLL_INTERVAL_MS`     | `500`                   |
    /// | `POLL_TIMEOUT_SECS`    | `600`                   |
    /// | `RETRY_MAX_ATTEMPTS`   | `3`                     |
    /// | `RETRY_BASE_DELAY_MS`  | `1000`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let fal_key = lookup("FAL_KEY")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let queue_url = lookup("FAL_QUEUE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_QUEUE_URL.to_string());

        let data_dir = lookup("FLUXSTUDIO_DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".fluxstudio"));

        let history_cap: usize = parse_var(
            &lookup,
            "HISTORY_CAP",
            DEFAULT_HISTORY_CAP,
            "a non-negative integer",
        )?;

        let request_timeout_secs: u64 =
            parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 120, "a whole number of seconds")?;

        let poll_interval_ms: u64 =
            parse_var(&lookup, "POLL_INTERVAL_MS", 500, "a whole number of milliseconds")?;

        let poll_timeout_secs: u64 =
            parse_var(&lookup, "POLL_TIMEOUT_SECS", 600, "a whole number of seconds")?;

        let retry_max_attempts: u32 =
            parse_var(&lookup, "RETRY_MAX_ATTEMPTS", 3, "a positive integer")?;
        if retry_max_attempts == 0 {
            return Err(ConfigError {
                var: "RETRY_MAX_ATTEMPTS",
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }

        let retry_base_delay_ms: u64 = parse_var(
            &lookup,
            "RETRY_BASE_DELAY_MS",
            1000,
            "a whole number of milliseconds",
        )?;

        Ok(Self {
            fal_key,
            queue_url,
            data_dir,
            history_cap: Some(history_cap).filter(|cap| *cap > 0),
            request_timeout_secs,
            poll_interval_ms,
            poll_timeout_secs,
            retry_max_attempts,
            retry_base_delay_ms,
        })
    }

    pub fn queue_config(&self) -> FalQueueConfig {
        FalQueueConfig {
            queue_url: self.queue_url.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            poll_timeout: Duration::from_secs(self.poll_timeout_secs),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn history_config(&self) -> HistoryConfig {
        HistoryConfig::default().with_cap(self.history_cap)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError {
            var,
            expected,
            value: raw,
        }),
    }
}
