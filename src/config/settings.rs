use serde::Deserialize;

/// Top-level configuration for the protection layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP server configuration
    pub server: ServerSettings,
    /// Remote store (Redis) configuration
    pub redis: RedisSettings,
    /// Protection subsystem configuration
    pub protection: ProtectionSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
    /// Metrics exposition configuration
    pub metrics: MetricsSettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Port to listen on
    pub port: u16,
    /// Run mode, `release` or `debug`
    pub mode: String,
}

/// Remote store configuration. An empty host disables the remote store and
/// the service runs purely in-memory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub db: i64,
}

impl RedisSettings {
    /// Whether a remote store is configured at all.
    pub fn enabled(&self) -> bool {
        !self.host.is_empty()
    }

    /// Build the Redis connection URL from the individual fields.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

/// Per-subsystem protection configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProtectionSettings {
    pub rate_limit: RateLimitSettings,
    pub ip_blacklist: IpBlacklistSettings,
    pub ip_whitelist: IpWhitelistSettings,
    pub request_filter: RequestFilterSettings,
    pub monitoring: MonitoringSettings,
    pub health_check: HealthCheckSettings,
}

/// Rate limiter parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sustained request budget per minute
    pub requests_per_minute: u32,
    /// Immediately available burst of the token bucket
    pub burst_size: u32,
    /// Sliding window size in seconds for the distributed limiter
    pub window_size: u64,
}

/// Blacklist behavior, including automatic promotion.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpBlacklistSettings {
    pub enabled: bool,
    /// Observed request count above which a key is auto-promoted
    pub auto_blacklist_threshold: u64,
    /// Lease applied to automatic blacklist entries, in seconds
    pub blacklist_duration: u64,
    /// Keys blacklisted at startup
    pub ips: Vec<String>,
}

/// Whitelist seed entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpWhitelistSettings {
    pub enabled: bool,
    pub ips: Vec<String>,
}

/// Request filter parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestFilterSettings {
    pub enabled: bool,
    /// Maximum accepted request body size in bytes
    pub max_request_size: u64,
    /// Headers whose values are scanned for malicious patterns
    pub suspicious_headers: Vec<String>,
    /// Case-insensitive regexes matched against the User-Agent
    pub blocked_user_agents: Vec<String>,
}

/// Traffic monitor parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub enabled: bool,
    /// Per-key request count above which an alert is emitted
    pub alert_threshold: u64,
    pub sample_rate: f64,
}

/// Health checker parameters, in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthCheckSettings {
    pub enabled: bool,
    pub timeout: u64,
    pub check_interval: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
    /// Optional log file; stderr when unset
    pub file: Option<String>,
}

/// Prometheus exposition configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            redis: RedisSettings::default(),
            protection: ProtectionSettings::default(),
            logging: LoggingSettings::default(),
            metrics: MetricsSettings::default(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080, mode: "release".to_string() }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self { host: String::new(), port: 6379, password: String::new(), db: 0 }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { requests_per_minute: 100, burst_size: 20, window_size: 60 }
    }
}

impl Default for IpBlacklistSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_blacklist_threshold: 1000,
            blacklist_duration: 3600,
            ips: Vec::new(),
        }
    }
}

impl Default for IpWhitelistSettings {
    fn default() -> Self {
        Self { enabled: true, ips: Vec::new() }
    }
}

impl Default for RequestFilterSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_request_size: 1_048_576,
            suspicious_headers: vec![
                "x-forwarded-host".to_string(),
                "x-original-url".to_string(),
                "x-rewrite-url".to_string(),
            ],
            blocked_user_agents: Vec::new(),
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self { enabled: true, alert_threshold: 1000, sample_rate: 1.0 }
    }
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self { enabled: true, timeout: 5, check_interval: 30 }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string(), file: None }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: false, port: 9090, path: "/metrics".to_string() }
    }
}

impl Settings {
    /// Load configuration from a YAML file plus `EDGE_GUARD_`-prefixed
    /// environment variable overrides (`EDGE_GUARD_SERVER__PORT=9000`).
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("EDGE_GUARD").separator("__"));

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.protection.rate_limit.requests_per_minute, 100);
        assert_eq!(settings.protection.request_filter.max_request_size, 1_048_576);
        assert!(!settings.redis.enabled());
    }

    #[test]
    fn redis_url_formats() {
        let mut redis = RedisSettings {
            host: "cache.internal".to_string(),
            port: 6380,
            password: String::new(),
            db: 2,
        };
        assert_eq!(redis.url(), "redis://cache.internal:6380/2");

        redis.password = "hunter2".to_string();
        assert_eq!(redis.url(), "redis://:hunter2@cache.internal:6380/2");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load("definitely-missing-config").expect("load");
        assert_eq!(settings.server.port, 8080);
    }
}
