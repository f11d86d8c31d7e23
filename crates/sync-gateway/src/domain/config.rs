//! Gateway configuration with validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upstream messaging API
    pub upstream: UpstreamConfig,
    /// Reverse-proxy listener
    pub proxy: ProxyConfig,
    /// Webhook listener and its public URL
    pub callback: CallbackConfig,
    /// Admin server (localhost only by default)
    pub admin: AdminConfig,
    /// Overall wait for a resolved status
    pub wait: WaitConfig,
    /// Status polling
    pub poll: PollConfig,
    /// Body size limits
    pub limits: LimitsConfig,
    /// Orphaned entry sweep
    pub sweep: SweepConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("upstream.base_url", &self.upstream.base_url)?;
        validate_http_url("callback.base_url", &self.callback.base_url)?;

        let mut addrs = vec![self.proxy_addr(), self.callback_addr()];
        if self.admin.enabled {
            addrs.push(self.admin_addr());
        }
        // Port 0 asks the OS for a free port, so it never collides
        addrs.retain(|addr| addr.port() != 0);
        let unique: HashSet<_> = addrs.iter().collect();
        if unique.len() != addrs.len() {
            return Err(ConfigError::DuplicatePorts);
        }

        if self.wait.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "wait.timeout cannot be 0".into(),
            ));
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "poll.interval cannot be 0".into(),
            ));
        }
        if self.poll.max_attempts == 0 {
            return Err(ConfigError::InvalidLimit(
                "poll.max_attempts cannot be 0".into(),
            ));
        }
        if self.limits.max_request_size == 0 || self.limits.max_response_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "body size limits cannot be 0".into(),
            ));
        }
        if self.sweep.max_age <= self.max_entry_lifetime() {
            return Err(ConfigError::InvalidTimeout(format!(
                "sweep.max_age ({}ms) must exceed upstream.request_timeout + wait.timeout ({}ms)",
                self.sweep.max_age.as_millis(),
                self.max_entry_lifetime().as_millis()
            )));
        }

        Ok(())
    }

    /// Longest a live send can hold its correlation entry: the entry is
    /// registered before forwarding, so the upstream call counts too.
    pub fn max_entry_lifetime(&self) -> Duration {
        self.upstream
            .request_timeout
            .saturating_add(self.wait.timeout)
    }

    /// Reverse-proxy bind address
    pub fn proxy_addr(&self) -> SocketAddr {
        SocketAddr::new(self.proxy.host, self.proxy.port)
    }

    /// Webhook listener bind address
    pub fn callback_addr(&self) -> SocketAddr {
        SocketAddr::new(self.callback.host, self.callback.port)
    }

    /// Admin server bind address
    pub fn admin_addr(&self) -> SocketAddr {
        SocketAddr::new(self.admin.host, self.admin.port)
    }
}

fn validate_http_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be an http(s) URL, got {url:?}"
        )))
    }
}

/// Upstream messaging API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL every non-intercepted request is forwarded to
    pub base_url: String,
    /// Connect timeout for forwarded requests
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Whole-request timeout for forwarded requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.plivo.com".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamConfig {
    /// Base URL without trailing slash
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Reverse-proxy listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: IpAddr,
    /// Port (default: 8090)
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8090,
        }
    }
}

/// Webhook listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Externally reachable URL of the callback listener
    pub base_url: String,
    pub host: IpAddr,
    /// Port (default: 8091)
    pub port: u16,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8091".to_string(),
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8091,
        }
    }
}

impl CallbackConfig {
    /// Notification URL for one correlation key.
    pub fn url_for(&self, key: impl std::fmt::Display) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

/// Admin server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bind address (localhost only by default)
    pub host: IpAddr,
    /// Port (default: 8092)
    pub port: u16,
    /// Enable admin server
    pub enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8092,
            enabled: true,
        }
    }
}

/// Overall deadline of the webhook/poll race
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

/// Status polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Attempt budget per send
    pub max_attempts: u32,
    /// Delay between attempts
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Kept short: polling competes with the overall wait deadline
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(6),
        }
    }
}

/// Request limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max buffered send-request body in bytes (default: 1MB)
    pub max_request_size: usize,
    /// Max buffered upstream response body in bytes (default: 1MB)
    pub max_response_size: usize,
    /// Max webhook body in bytes (default: 64KB)
    pub max_callback_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            max_response_size: 1024 * 1024,
            max_callback_size: 64 * 1024,
        }
    }
}

/// Orphaned correlation entry sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Entries older than this are evicted. Must exceed
    /// `upstream.request_timeout + wait.timeout`.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_age: Duration::from_secs(60),
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset
    pub level: String,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Multiple listeners on the same address
    #[error("duplicate listen addresses configured")]
    DuplicatePorts,
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"500ms"`, `"10s"`, `"2m"`, or plain seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or("invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
