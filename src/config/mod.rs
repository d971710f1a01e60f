//! Configuration management for the protection layer.
//! Settings are loaded from a YAML file with environment variable overrides.

mod settings;

pub use settings::{
    HealthCheckSettings, IpBlacklistSettings, IpWhitelistSettings, LoggingSettings,
    MetricsSettings, MonitoringSettings, ProtectionSettings, RateLimitSettings, RedisSettings,
    RequestFilterSettings, ServerSettings, Settings,
};
