//! Feed configuration.
//!
//! The endpoint URL is the only required input. Timing constants default to a
//! 3 s reconnect delay and 5 consecutive attempts and can be compressed for tests.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::error::{RetryPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};

pub const ENV_URL: &str = "TXWATCH_WS_URL";
pub const ENV_RECONNECT_DELAY_MS: &str = "TXWATCH_RECONNECT_DELAY_MS";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "TXWATCH_MAX_RECONNECT_ATTEMPTS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "TXWATCH_CONNECT_TIMEOUT_MS";

/// Live feed configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// WebSocket endpoint URL
    #[serde(default)]
    pub url: String,

    /// Delay before each automatic reconnection attempt
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Consecutive automatic attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Upper bound for a single connection handshake
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_millis() as u64
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl FeedConfig {
    /// Configuration for `url` with default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables (and `.env` when present)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup(ENV_URL)
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("{} not set in environment or .env", ENV_URL))?;

        let mut config = Self::new(url.trim());
        if let Some(delay) = parse_var::<u64>(&lookup, ENV_RECONNECT_DELAY_MS)? {
            config.reconnect_delay_ms = delay;
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_MAX_RECONNECT_ATTEMPTS)? {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(timeout) = parse_var::<u64>(&lookup, ENV_CONNECT_TIMEOUT_MS)? {
            config.connect_timeout_ms = timeout;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Reconnect policy derived from the timing fields
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: self.reconnect_delay(),
        }
    }

    /// Check that the endpoint is a usable WebSocket URL
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("Invalid feed URL: {:?}", self.url))?;
        match url.scheme() {
            "ws" | "wss" => Ok(()),
            other => bail!("Feed URL must use ws or wss, got {}", other),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = FeedConfig::default();
        assert!(config.url.is_empty());
        assert_eq!(config.reconnect_delay(), Duration::from_millis(3_000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_from_vars_requires_url() {
        let env = vars(&[]);
        let err = FeedConfig::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_URL));
    }

    #[test]
    fn test_from_vars_overrides() {
        let env = vars(&[
            (ENV_URL, " wss://feed.example.com/live "),
            (ENV_RECONNECT_DELAY_MS, "250"),
            (ENV_MAX_RECONNECT_ATTEMPTS, "2"),
        ]);
        let config = FeedConfig::from_vars(|k| env.get(k).cloned()).unwrap();

        assert_eq!(config.url, "wss://feed.example.com/live");
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.max_reconnect_attempts, 2);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_vars_rejects_garbage_numbers() {
        let env = vars(&[(ENV_URL, "ws://localhost/ws"), (ENV_MAX_RECONNECT_ATTEMPTS, "many")]);
        let err = FeedConfig::from_vars(|k| env.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_RECONNECT_ATTEMPTS));
    }

    #[test]
    fn test_validate_scheme() {
        assert!(FeedConfig::new("ws://127.0.0.1:3000/ws").validate().is_ok());
        assert!(FeedConfig::new("https://example.com").validate().is_err());
        assert!(FeedConfig::new("").validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "url = \"ws://localhost:3000/ws\"").unwrap();
        writeln!(file, "reconnect_delay_ms = 50").unwrap();

        let config = FeedConfig::from_file(file.path()).unwrap();
        assert_eq!(config.url, "ws://localhost:3000/ws");
        assert_eq!(config.reconnect_delay_ms, 50);
        assert_eq!(config.max_reconnect_attempts, 5);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = FeedConfig::new("ws://x")
            .with_reconnect_delay(Duration::from_millis(10))
            .with_max_reconnect_attempts(3);
        let policy = config.retry_policy();
        assert_eq!(policy.delay, Duration::from_millis(10));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
