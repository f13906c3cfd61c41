//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: REQUEST_AUDIT_, nested keys separated by `__`)
//! 2. Current working directory: ./config.toml
//! 3. XDG config directory: ~/.config/request-audit/{service_name}/config.toml
//! 4. System directory: /etc/request-audit/{service_name}/config.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::severity::SeverityLevel;

const ENV_PREFIX: &str = "REQUEST_AUDIT_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,

    /// Interceptor behaviour
    #[serde(default)]
    pub audit: AuditConfig,

    /// Request data collection
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Rate limit windows
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Severity classification thresholds
    #[serde(default)]
    pub thresholds: SeverityThresholds,

    /// External notification endpoints
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Log sink selection
    #[serde(default)]
    pub sinks: SinkConfig,

    /// Redis configuration (optional)
    #[serde(default)]
    pub redis: Option<RedisConfig>,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name, stamped on every record
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Interceptor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable auditing (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Routes that bypass the pipeline (default: ["/health", "/ready", "/metrics"])
    #[serde(default = "default_excluded_routes")]
    pub excluded_routes: Vec<String>,

    /// Upper bound on handler runtime; exceeding it is audited as a 504
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            excluded_routes: default_excluded_routes(),
            handler_timeout_ms: None,
        }
    }
}

impl AuditConfig {
    /// Handler timeout as a Duration
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

/// Data collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Proxy headers probed for the client address, highest priority first
    #[serde(default = "default_ip_headers")]
    pub ip_headers: Vec<String>,

    /// Cookie carrying the session id
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Query parameters whose values are replaced with `[REDACTED]`
    #[serde(default = "default_redacted_query_params")]
    pub redacted_query_params: Vec<String>,

    /// How often the background sampler refreshes the process memory reading
    #[serde(default = "default_memory_sample_interval_ms")]
    pub memory_sample_interval_ms: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ip_headers: default_ip_headers(),
            session_cookie: default_session_cookie(),
            redacted_query_params: default_redacted_query_params(),
            memory_sample_interval_ms: default_memory_sample_interval_ms(),
        }
    }
}

impl CollectorConfig {
    /// Memory sample interval as a Duration
    pub fn memory_sample_interval(&self) -> Duration {
        Duration::from_millis(self.memory_sample_interval_ms)
    }
}

/// A fixed rate limit window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Window length in seconds
    pub window_duration: u64,

    /// Requests allowed per window before it counts as exceeded
    pub max_requests: u64,
}

impl RateLimitWindow {
    /// Create a window
    pub fn new(window_duration: u64, max_requests: u64) -> Self {
        Self {
            window_duration,
            max_requests,
        }
    }

    /// Window length as a Duration
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.window_duration)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Windows evaluated on every request
    #[serde(default = "default_windows")]
    pub windows: Vec<RateLimitWindow>,

    /// Upper bound on a single counter store round trip
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            windows: default_windows(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimitConfig {
    /// Store timeout as a Duration
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Thresholds driving the severity cascade
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeverityThresholds {
    /// Emergency when the violation count exceeds `emergency_multiplier * 100`
    #[serde(default = "default_emergency_multiplier")]
    pub emergency_multiplier: u64,

    /// Alert when the violation count exceeds `alert_multiplier * 50`
    #[serde(default = "default_alert_multiplier")]
    pub alert_multiplier: u64,

    #[serde(default = "default_emergency_response_ms")]
    pub emergency_response_ms: u64,

    /// Applies to 500/502/503/504 responses only
    #[serde(default = "default_critical_error_response_ms")]
    pub critical_error_response_ms: u64,

    #[serde(default = "default_alert_response_ms")]
    pub alert_response_ms: u64,

    #[serde(default = "default_critical_response_ms")]
    pub critical_response_ms: u64,

    #[serde(default = "default_critical_memory_mb")]
    pub critical_memory_mb: f64,

    #[serde(default = "default_warning_response_ms")]
    pub warning_response_ms: u64,

    #[serde(default = "default_warning_memory_mb")]
    pub warning_memory_mb: f64,

    /// Path segments that mark administrative routes
    #[serde(default = "default_admin_path_segments")]
    pub admin_path_segments: Vec<String>,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            emergency_multiplier: default_emergency_multiplier(),
            alert_multiplier: default_alert_multiplier(),
            emergency_response_ms: default_emergency_response_ms(),
            critical_error_response_ms: default_critical_error_response_ms(),
            alert_response_ms: default_alert_response_ms(),
            critical_response_ms: default_critical_response_ms(),
            critical_memory_mb: default_critical_memory_mb(),
            warning_response_ms: default_warning_response_ms(),
            warning_memory_mb: default_warning_memory_mb(),
            admin_path_segments: default_admin_path_segments(),
        }
    }
}

/// A notification destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Destination URL for POST requests
    pub url: String,

    /// Additional headers (e.g. `Authorization`)
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EndpointConfig {
    /// Endpoint without extra headers
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }
}

/// Escalation channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Enable notifications (default: true; inert without endpoints)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shared fallback endpoint
    #[serde(default)]
    pub default_endpoint: Option<EndpointConfig>,

    /// Dedicated endpoints keyed by severity level
    #[serde(default)]
    pub endpoints: HashMap<SeverityLevel, EndpointConfig>,

    /// HTTP timeout for a single delivery attempt
    #[serde(default = "default_notification_timeout")]
    pub timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_endpoint: None,
            endpoints: HashMap::new(),
            timeout_secs: default_notification_timeout(),
        }
    }
}

impl NotificationConfig {
    /// Endpoint for a level: the dedicated one, else the shared fallback
    pub fn endpoint_for(&self, level: SeverityLevel) -> Option<&EndpointConfig> {
        self.endpoints
            .get(&level)
            .or(self.default_endpoint.as_ref())
    }

    /// Whether any delivery can happen at all
    pub fn is_active(&self) -> bool {
        self.enabled && (self.default_endpoint.is_some() || !self.endpoints.is_empty())
    }

    /// Delivery timeout as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which sink backend receives audit entries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Emit entries as `tracing` events
    #[default]
    Tracing,
    /// Send entries as RFC 5424 syslog messages
    Syslog,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Backend for every channel
    #[serde(default)]
    pub kind: SinkKind,

    /// Syslog settings (used when `kind = "syslog"`)
    #[serde(default)]
    pub syslog: SyslogConfig,

    /// Upper bound on a single sink write; a slower write is dropped
    #[serde(default = "default_sink_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            syslog: SyslogConfig::default(),
            write_timeout_ms: default_sink_write_timeout_ms(),
        }
    }
}

impl SinkConfig {
    /// Write timeout as a Duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Syslog export configuration (RFC 5424)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyslogConfig {
    /// Transport protocol: "udp" or "tcp"
    #[serde(default = "default_syslog_transport")]
    pub transport: String,

    /// Syslog server address
    #[serde(default = "default_syslog_address")]
    pub address: String,

    /// Syslog facility code (default: 13 = audit)
    #[serde(default = "default_syslog_facility")]
    pub facility: u8,

    /// Application name in syslog messages
    #[serde(default)]
    pub app_name: Option<String>,
}

impl Default for SyslogConfig {
    fn default() -> Self {
        Self {
            transport: default_syslog_transport(),
            address: default_syslog_address(),
            facility: default_syslog_facility(),
            app_name: None,
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (redis://host:port)
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: usize,

    /// Maximum retry attempts for establishing Redis connection
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between retry attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Whether Redis is optional (fall back to the in-memory store)
    #[serde(default = "default_false")]
    pub optional: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_excluded_routes() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/metrics".to_string(),
    ]
}

fn default_ip_headers() -> Vec<String> {
    [
        "cf-connecting-ip",
        "true-client-ip",
        "x-client-ip",
        "x-forwarded-for",
        "x-real-ip",
        "x-forwarded",
        "x-cluster-client-ip",
        "forwarded-for",
        "forwarded",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect()
}

fn default_session_cookie() -> String {
    "session".to_string()
}

fn default_redacted_query_params() -> Vec<String> {
    ["password", "password_confirmation", "token", "api_key", "secret"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_memory_sample_interval_ms() -> u64 {
    1_000
}

fn default_windows() -> Vec<RateLimitWindow> {
    vec![RateLimitWindow::new(60, 60), RateLimitWindow::new(3600, 1000)]
}

fn default_store_timeout_ms() -> u64 {
    250
}

fn default_emergency_multiplier() -> u64 {
    10
}

fn default_alert_multiplier() -> u64 {
    5
}

fn default_emergency_response_ms() -> u64 {
    30_000
}

fn default_critical_error_response_ms() -> u64 {
    10_000
}

fn default_alert_response_ms() -> u64 {
    15_000
}

fn default_critical_response_ms() -> u64 {
    5_000
}

fn default_critical_memory_mb() -> f64 {
    512.0
}

fn default_warning_response_ms() -> u64 {
    2_000
}

fn default_warning_memory_mb() -> f64 {
    256.0
}

fn default_admin_path_segments() -> Vec<String> {
    vec!["admin".to_string()]
}

fn default_notification_timeout() -> u64 {
    5
}

fn default_sink_write_timeout_ms() -> u64 {
    1_000
}

fn default_syslog_transport() -> String {
    "udp".to_string()
}

fn default_syslog_address() -> String {
    "127.0.0.1:514".to_string()
}

fn default_syslog_facility() -> u8 {
    13 // log_audit
}

fn default_redis_max_connections() -> usize {
    20
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    2
}

impl Config {
    /// Load configuration from all sources
    ///
    /// The service name is inferred from the binary name.
    pub fn load() -> Result<Self> {
        let service_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "request-audit".to_string());

        Self::load_for_service(&service_name)
    }

    /// Load configuration for a specific service name
    pub fn load_for_service(service_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(service_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Bypasses XDG and system directories; environment variables still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that no counter store can honour
    ///
    /// A zero-length window would expire immediately in memory but be
    /// clamped to one second by Redis.
    pub fn validate(&self) -> Result<()> {
        if let Some(window) = self
            .rate_limit
            .windows
            .iter()
            .find(|w| w.window_duration == 0)
        {
            return Err(figment::Error::from(format!(
                "rate_limit.windows: window_duration must be at least 1 second (max_requests = {})",
                window.max_requests
            ))
            .into());
        }
        Ok(())
    }

    /// Config file candidates, highest priority first
    fn find_config_paths(service_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("request-audit");
        let config_file_path = Path::new(service_name).join("config.toml");
        if let Some(path) = xdg_dirs.find_config_file(&config_file_path) {
            paths.push(path);
        }

        paths.push(
            PathBuf::from("/etc/request-audit")
                .join(service_name)
                .join("config.toml"),
        );

        paths
    }

    /// Redis URL, if configured
    pub fn redis_url(&self) -> Option<&str> {
        self.redis.as_ref().map(|r| r.url.as_str())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "request-audit".to_string(),
                log_level: default_log_level(),
            },
            audit: AuditConfig::default(),
            collector: CollectorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            thresholds: SeverityThresholds::default(),
            notifications: NotificationConfig::default(),
            sinks: SinkConfig::default(),
            redis: None,
        }
    }
}
