//! Configuration management for chatflow services.
//!
//! The bot reads a single configuration file at `~/.chatflow/config.json`.
//! A missing file is not an error; defaults apply.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (see below)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PORT` → server.port
//! - `CHATFLOW_HOST` → server.host
//! - `BOOKING_API_URL` (or `NEXT_PUBLIC_API_URL`) → booking.api_url
//! - `CHATFLOW_CONCURRENCY_LIMIT` → queue.concurrency_limit
//! - `CHATFLOW_QUEUE_TIMEOUT_MS` → queue.timeout_ms
//! - `CHATFLOW_QUEUE_CAPACITY` → queue.queue_capacity
//! - `OUTBOUND_ENDPOINT` → outbound.endpoint
//! - `OUTBOUND_TOKEN` → outbound.token
//! - `CHATFLOW_LOG_LEVEL` → observability.log_level
//! - `CHATFLOW_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chatflow"),
        |dirs| dirs.home_dir().join(".chatflow"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Server
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port. Default: 3008
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3008
}

// ============================================================================
// Queue
// ============================================================================

/// Dispatcher queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of conversations executing a step at once
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Per-step execution budget in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of admitted jobs waiting to run, across all conversations
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            timeout_ms: default_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl QueueConfig {
    /// Per-step timeout as a `Duration`.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_concurrency_limit() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_queue_capacity() -> usize {
    1_000
}

// ============================================================================
// Session
// ============================================================================

/// Session lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a conversation's session and open flow are dropped.
    /// `None` keeps waiting prompts forever.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: Option<u64>,

    /// How often the idle sweeper runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SessionConfig {
    /// Idle timeout as a `Duration`, if configured.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

fn default_idle_timeout_secs() -> Option<u64> {
    Some(1_800)
}

fn default_sweep_interval_secs() -> u64 {
    60
}

// ============================================================================
// External services
// ============================================================================

/// Booking API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Base URL of the booking API (e.g. "https://app.example.com")
    #[serde(default)]
    pub api_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_booking_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            request_timeout_secs: default_booking_timeout_secs(),
        }
    }
}

fn default_booking_timeout_secs() -> u64 {
    10
}

/// Outbound relay configuration.
///
/// When no endpoint is set the bot runs in dry-run mode and only records
/// the messages it would have sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Relay endpoint receiving `{to, type, ...}` JSON posts
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token for the relay
    #[serde(default)]
    pub token: Option<String>,

    /// Text sent to a contact when a step fails talking to an external service
    #[serde(default = "default_apology_text")]
    pub apology_text: String,
}

fn default_apology_text() -> String {
    "⚠️ Sorry, something went wrong. Please try again later.".into()
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            apology_text: default_apology_text(),
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub booking: BookingConfig,

    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Contact ids blocked at startup
    #[serde(default)]
    pub blacklist: Vec<String>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides, then validate.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (environment, tests).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(host) = lookup("CHATFLOW_HOST") {
            self.server.host = host;
        }

        if let Some(url) = lookup("BOOKING_API_URL").or_else(|| lookup("NEXT_PUBLIC_API_URL")) {
            self.booking.api_url = Some(url);
        }

        if let Some(limit) = lookup("CHATFLOW_CONCURRENCY_LIMIT").and_then(|v| v.parse().ok()) {
            self.queue.concurrency_limit = limit;
        }
        if let Some(timeout) = lookup("CHATFLOW_QUEUE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.queue.timeout_ms = timeout;
        }
        if let Some(capacity) = lookup("CHATFLOW_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            self.queue.queue_capacity = capacity;
        }

        if let Some(endpoint) = lookup("OUTBOUND_ENDPOINT") {
            self.outbound.endpoint = Some(endpoint);
        }
        if let Some(token) = lookup("OUTBOUND_TOKEN") {
            self.outbound.token = Some(token);
        }

        if let Some(level) = lookup("CHATFLOW_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("CHATFLOW_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Reject settings the dispatcher cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.queue.concurrency_limit == 0 {
            return Err(Error::Config("queue.concurrency_limit must be at least 1".into()));
        }
        if self.queue.timeout_ms == 0 {
            return Err(Error::Config("queue.timeout_ms must be greater than 0".into()));
        }
        if self.queue.queue_capacity == 0 {
            return Err(Error::Config("queue.queue_capacity must be at least 1".into()));
        }
        if self.session.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "session.sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if let Some(url) = &self.booking.api_url {
            url::Url::parse(url)
                .map_err(|e| Error::Config(format!("booking.api_url is not a valid URL: {e}")))?;
        }
        if let Some(url) = &self.outbound.endpoint {
            url::Url::parse(url)
                .map_err(|e| Error::Config(format!("outbound.endpoint is not a valid URL: {e}")))?;
        }
        Ok(())
    }

    /// Socket address string for the HTTP server.
    pub fn bind_address(&self) -> String {
        if self.server.host.contains(':') {
            format!("[{}]:{}", self.server.host, self.server.port)
        } else {
            format!("{}:{}", self.server.host, self.server.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3008);
        assert_eq!(config.queue.concurrency_limit, 10);
        assert_eq!(config.queue.timeout_ms, 20_000);
        assert_eq!(config.queue.step_timeout(), Duration::from_secs(20));
        assert_eq!(config.session.idle_timeout(), Some(Duration::from_secs(1_800)));
        assert!(config.booking.api_url.is_none());
        assert!(config.blacklist.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "queue": { "concurrency_limit": 3 }, "observability": { "level": "debug" } }"#,
        )
        .unwrap();
        assert_eq!(config.queue.concurrency_limit, 3);
        assert_eq!(config.queue.timeout_ms, 20_000);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.server.port, 3008);
    }

    #[test]
    fn test_apology_text_defaults_without_outbound_section() {
        let expected = default_apology_text();
        assert!(!expected.is_empty());

        assert_eq!(Config::default().outbound.apology_text, expected);
        assert_eq!(OutboundConfig::default().apology_text, expected);

        let empty: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.outbound.apology_text, expected);

        let no_text: Config =
            serde_json::from_str(r#"{ "outbound": { "endpoint": "http://relay.local" } }"#).unwrap();
        assert_eq!(no_text.outbound.apology_text, expected);
    }

    #[test]
    fn test_bind_address() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".into();
        config.server.port = 8080;
        assert_eq!(config.bind_address(), "127.0.0.1:8080");

        config.server.host = "::1".into();
        assert_eq!(config.bind_address(), "[::1]:8080");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ "server": {{ "port": 4000 }}, "blacklist": ["34600111222"] }}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.blacklist, vec!["34600111222".to_string()]);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("PORT", "8080"),
            ("NEXT_PUBLIC_API_URL", "http://localhost:3000"),
            ("CHATFLOW_CONCURRENCY_LIMIT", "4"),
            ("CHATFLOW_QUEUE_TIMEOUT_MS", "500"),
            ("OUTBOUND_TOKEN", "secret"),
        ]));

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.booking.api_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.queue.concurrency_limit, 4);
        assert_eq!(config.queue.timeout_ms, 500);
        assert_eq!(config.outbound.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_booking_url_prefers_explicit_variable() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("BOOKING_API_URL", "http://booking.local"),
            ("NEXT_PUBLIC_API_URL", "http://legacy.local"),
        ]));
        assert_eq!(config.booking.api_url.as_deref(), Some("http://booking.local"));
    }

    #[test]
    fn test_invalid_override_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[("PORT", "not-a-port")]));
        assert_eq!(config.server.port, 3008);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.queue.concurrency_limit = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.queue.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = Config::default();
        config.booking.api_url = Some("not a url".into());
        assert!(config.validate().is_err());
    }
}
