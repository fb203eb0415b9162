//! Configuration management for the message relay.

use std::{sync::Arc, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    client::ClientConfig,
    connectivity::MonitorConfig,
    error::{DeliveryError, Result},
};

const CONFIG_FILE: &str = "relay.toml";

/// Shared handle to the live configuration.
///
/// The capture pass and the retry scheduler read through this handle at use
/// time, so key and endpoint changes apply to queued work without a
/// restart.
pub type SharedConfig = Arc<RwLock<RelayConfig>>;

/// Complete relay configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority)
/// 2. Configuration file (`relay.toml`)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    // Signing and endpoint
    /// HMAC-SHA256 key used to sign outbound payloads.
    ///
    /// Environment variable: `SIGNING_KEY`
    #[serde(default = "default_signing_key", alias = "SIGNING_KEY")]
    pub signing_key: String,
    /// Webhook URL deliveries are posted to.
    ///
    /// Environment variable: `ENDPOINT_URL`
    #[serde(default = "default_endpoint_url", alias = "ENDPOINT_URL")]
    pub endpoint_url: String,
    /// Identifier of this relay carried in the `receiver` payload field.
    ///
    /// Environment variable: `RECEIVER`
    #[serde(default, alias = "RECEIVER")]
    pub receiver: String,

    // Capture
    /// Comma-separated list of senders whose messages are forwarded.
    ///
    /// Environment variable: `ALLOW_LIST`
    #[serde(default, alias = "ALLOW_LIST")]
    pub allow_list: String,
    /// How many recent messages a backlog scan re-examines.
    ///
    /// Environment variable: `BACKLOG_WINDOW`
    #[serde(default = "default_backlog_window", alias = "BACKLOG_WINDOW")]
    pub backlog_window: usize,
    /// Maximum fingerprints remembered for dedup.
    ///
    /// Environment variable: `DEDUP_CAPACITY`
    #[serde(default = "default_dedup_capacity", alias = "DEDUP_CAPACITY")]
    pub dedup_capacity: usize,

    // Retry
    /// Retry passes a queued delivery survives while the network is online.
    ///
    /// Environment variable: `RETRY_LIMIT`
    #[serde(default = "default_retry_limit", alias = "RETRY_LIMIT")]
    pub retry_limit: u32,
    /// Seconds between retry passes.
    ///
    /// Environment variable: `RETRY_INTERVAL_SECONDS`
    #[serde(default = "default_retry_interval", alias = "RETRY_INTERVAL_SECONDS")]
    pub retry_interval_seconds: u64,
    /// HTTP request timeout in milliseconds.
    ///
    /// Environment variable: `DELIVERY_TIMEOUT_MS`
    #[serde(default = "default_timeout_ms", alias = "DELIVERY_TIMEOUT_MS")]
    pub delivery_timeout_ms: u64,

    // Connectivity
    /// Address probed to judge reachability.
    ///
    /// Environment variable: `PROBE_ADDR`
    #[serde(default = "default_probe_addr", alias = "PROBE_ADDR")]
    pub probe_addr: String,
    /// Seconds between reachability probes.
    ///
    /// Environment variable: `PROBE_INTERVAL_SECONDS`
    #[serde(default = "default_probe_interval", alias = "PROBE_INTERVAL_SECONDS")]
    pub probe_interval_seconds: u64,
    /// Probe deadline in milliseconds.
    ///
    /// Environment variable: `PROBE_TIMEOUT_MS`
    #[serde(default = "default_probe_timeout_ms", alias = "PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: u64,

    // Storage
    /// Directory holding the embedded database.
    ///
    /// Environment variable: `DATA_DIR`
    #[serde(default = "default_data_dir", alias = "DATA_DIR")]
    pub data_dir: String,
    /// JSON-lines spool file scanned for backlog messages.
    ///
    /// Environment variable: `SPOOL_PATH`
    #[serde(default = "default_spool_path", alias = "SPOOL_PATH")]
    pub spool_path: String,

    // Logging
    /// Log level configuration.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl RelayConfig {
    /// Load configuration from defaults, config file, and environment
    /// variable overrides.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment
            .extract()
            .map_err(|e| DeliveryError::configuration(format!("failed to load: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Wraps the configuration in a shared read-write handle.
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Senders whose messages are forwarded. Empty list forwards nothing.
    pub fn allowed_senders(&self) -> Vec<String> {
        self.allow_list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    /// Per-request delivery timeout.
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    /// Time between retry passes.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    /// Convert to HTTP client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig { default_timeout: self.delivery_timeout(), ..ClientConfig::default() }
    }

    /// Convert to connectivity monitor configuration.
    pub fn to_monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            probe_addr: self.probe_addr.clone(),
            probe_interval: Duration::from_secs(self.probe_interval_seconds),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.signing_key.is_empty() {
            return Err(DeliveryError::configuration("signing_key must not be empty"));
        }

        if !self.endpoint_url.starts_with("http://") && !self.endpoint_url.starts_with("https://")
        {
            return Err(DeliveryError::configuration(format!(
                "endpoint_url must be an http(s) URL, got {:?}",
                self.endpoint_url
            )));
        }

        if self.retry_limit == 0 {
            return Err(DeliveryError::configuration("retry_limit must be greater than 0"));
        }

        if self.retry_interval_seconds == 0 {
            return Err(DeliveryError::configuration(
                "retry_interval_seconds must be greater than 0",
            ));
        }

        if self.delivery_timeout_ms == 0 {
            return Err(DeliveryError::configuration(
                "delivery_timeout_ms must be greater than 0",
            ));
        }

        if self.backlog_window == 0 {
            return Err(DeliveryError::configuration("backlog_window must be greater than 0"));
        }

        if self.dedup_capacity == 0 {
            return Err(DeliveryError::configuration("dedup_capacity must be greater than 0"));
        }

        if self.probe_addr.is_empty() {
            return Err(DeliveryError::configuration("probe_addr must not be empty"));
        }

        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            signing_key: default_signing_key(),
            endpoint_url: default_endpoint_url(),
            receiver: String::new(),
            allow_list: String::new(),
            backlog_window: default_backlog_window(),
            dedup_capacity: default_dedup_capacity(),
            retry_limit: default_retry_limit(),
            retry_interval_seconds: default_retry_interval(),
            delivery_timeout_ms: default_timeout_ms(),
            probe_addr: default_probe_addr(),
            probe_interval_seconds: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout_ms(),
            data_dir: default_data_dir(),
            spool_path: default_spool_path(),
            rust_log: default_log_level(),
        }
    }
}

fn default_signing_key() -> String {
    "123123123".to_string()
}

fn default_endpoint_url() -> String {
    "https://api-v2.moneyhoney.io/v2/team/automation".to_string()
}

fn default_backlog_window() -> usize {
    50
}

fn default_dedup_capacity() -> usize {
    4096
}

fn default_retry_limit() -> u32 {
    5
}

fn default_retry_interval() -> u64 {
    15
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_probe_addr() -> String {
    "8.8.8.8:53".to_string()
}

fn default_probe_interval() -> u64 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

fn default_data_dir() -> String {
    "relay-data".to_string()
}

fn default_spool_path() -> String {
    "messages.jsonl".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.retry_interval_seconds, 15);
        assert_eq!(config.probe_addr, "8.8.8.8:53");
    }

    #[test]
    fn allow_list_parses_comma_separated_senders() {
        let config = RelayConfig {
            allow_list: "+79990000001, +79990000002 ,,900".to_string(),
            ..RelayConfig::default()
        };
        assert_eq!(config.allowed_senders(), vec!["+79990000001", "+79990000002", "900"]);
    }

    #[test]
    fn empty_allow_list_yields_no_senders() {
        assert!(RelayConfig::default().allowed_senders().is_empty());
    }

    #[test]
    fn invalid_config_validation_fails() {
        let mut config = RelayConfig::default();
        config.signing_key = String::new();
        assert!(config.validate().is_err());

        config = RelayConfig::default();
        config.endpoint_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        config = RelayConfig::default();
        config.retry_limit = 0;
        assert!(config.validate().is_err());

        config = RelayConfig::default();
        config.backlog_window = 0;
        assert!(config.validate().is_err());

        config = RelayConfig::default();
        config.dedup_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn conversions_carry_timeouts() {
        let config = RelayConfig {
            delivery_timeout_ms: 5000,
            probe_timeout_ms: 700,
            probe_interval_seconds: 3,
            ..RelayConfig::default()
        };

        assert_eq!(config.to_client_config().default_timeout, Duration::from_secs(5));
        let monitor = config.to_monitor_config();
        assert_eq!(monitor.probe_timeout, Duration::from_millis(700));
        assert_eq!(monitor.probe_interval, Duration::from_secs(3));
    }
}
