//! Configuration management with serde serialization/deserialization
//!
//! Settings are read from an optional JSON file, then overridden from the
//! environment and finally from command-line flags.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for the capture coordinator
///
/// # Examples
///
/// ```rust
/// use capture_coordinator::Config;
///
/// let config = Config::default();
/// assert_eq!(config.broker.request_key, "queue:requests");
///
/// let config = Config {
///     max_lines: 50,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection and list names
    pub broker: BrokerConfig,

    /// Where seeds are kept between processes
    pub store: StoreConfig,

    /// Prefix of archival URLs (default: `https://wayback.webarchiv.cz/wayback/`)
    ///
    /// The capture timestamp and the captured URL are appended to it.
    pub archive_base_url: String,

    /// Longest accepted seed URL in bytes (default: 64 KiB)
    ///
    /// Crawls of very long URLs tend to fail.
    pub max_url_length: usize,

    /// Most URLs accepted in one submission (default: 20)
    pub max_lines: usize,

    /// Require an explicit scheme on submitted URLs (default: false)
    pub strict_urls: bool,

    /// Result listener behaviour
    pub listener: ListenerConfig,

    /// Address for the Prometheus scrape endpoint (default: disabled)
    pub metrics_addr: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            store: StoreConfig::default(),
            archive_base_url: "https://wayback.webarchiv.cz/wayback/".to_string(),
            max_url_length: 64 << 10,
            max_lines: 20,
            strict_urls: false,
            listener: ListenerConfig::default(),
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Apply `BROKER_URL`, or `VALKEY_ADDR`/`VALKEY_PORT`, and `ARCHIVE_BASE_URL`.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("BROKER_URL") {
            self.broker.url = url;
        } else if lookup("VALKEY_ADDR").is_some() || lookup("VALKEY_PORT").is_some() {
            let addr = lookup("VALKEY_ADDR").unwrap_or_else(|| "localhost".to_string());
            let port = lookup("VALKEY_PORT").unwrap_or_else(|| "6379".to_string());
            self.broker.url = format!("redis://{addr}:{port}");
        }
        if let Some(base) = lookup("ARCHIVE_BASE_URL") {
            self.archive_base_url = base;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.broker.url.is_empty() {
            return Err("Broker URL must not be empty".to_string());
        }
        if self.broker.request_key.is_empty() || self.broker.result_key.is_empty() {
            return Err("Broker list keys must not be empty".to_string());
        }
        if self.broker.unmatched_key.is_empty() {
            return Err("Unmatched result list key must not be empty".to_string());
        }
        let keys = [&self.broker.request_key, &self.broker.result_key, &self.broker.unmatched_key];
        if keys[0] == keys[1] || keys[0] == keys[2] || keys[1] == keys[2] {
            return Err("Request, result and unmatched lists must be different keys".to_string());
        }
        if self.store.key_prefix.is_empty() {
            return Err("Seed store key prefix must not be empty".to_string());
        }
        if !self.archive_base_url.ends_with('/') {
            return Err("Archive base URL must end with '/'".to_string());
        }
        if self.max_url_length == 0 {
            return Err("Max URL length must be greater than 0".to_string());
        }
        if self.max_lines == 0 {
            return Err("Max lines must be greater than 0".to_string());
        }
        if self.listener.retry.max_attempts == 0 {
            return Err("Listener retry attempts must be greater than 0".to_string());
        }
        if self.listener.retry.multiplier < 1.0 {
            return Err("Listener retry multiplier must be at least 1.0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Connection URL (default: `redis://localhost:6379`)
    pub url: String,

    /// List the crawler reads capture requests from
    pub request_key: String,

    /// List the crawler writes capture results to
    pub result_key: String,

    /// List holding results this service could not apply
    pub unmatched_key: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            request_key: "queue:requests".to_string(),
            result_key: "queue:results".to_string(),
            unmatched_key: "queue:results:unmatched".to_string(),
        }
    }
}

/// Seed storage shared by every coordinator process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL (default: the broker URL)
    pub url: Option<String>,

    /// Prefix of seed and group keys (default: `capture:`)
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: "capture:".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn url_or<'a>(&'a self, broker: &'a BrokerConfig) -> &'a str {
        self.url.as_deref().unwrap_or(&broker.url)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// How long one result poll waits (default: 5 seconds)
    ///
    /// Shutdown is noticed between polls. Zero waits forever, in which case
    /// the listener only stops once a result arrives or the broker
    /// connection closes.
    pub poll_timeout: Duration,

    /// Backoff after failed polls. `max_attempts` consecutive failures stop
    /// the listener.
    pub retry: RetryConfig,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(5),
            retry: RetryConfig {
                max_attempts: 10,
                initial_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential delay before retry number `attempt` (zero based), capped
    /// at `max_delay`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay.min(u64::MAX as f64) as u64);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}
