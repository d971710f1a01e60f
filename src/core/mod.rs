//! Core functionality for the protection layer: the request-decision
//! pipeline and the stateful subsystems it depends on.

mod botnet;
mod health;
mod metrics;
mod monitor;
mod pipeline;
mod rate_limiter;
mod reputation;
mod request_filter;
mod store;

pub use botnet::{BotnetAnalysis, BotnetDetector};
pub use health::{
    CheckResult, CircuitBreaker, CircuitState, CustomHealthCheck, HealthCheck, HealthChecker,
    HealthStatus, HealthSummary, HttpHealthCheck, MemoryHealthCheck,
};
pub use metrics::ProtectionMetrics;
pub use monitor::{Alert, AlertSeverity, AlertType, KeyStats, TrafficMonitor, TrafficStats};
pub use pipeline::{Decision, Denial, DenyCode, Pipeline, RequestMeta};
pub use rate_limiter::{RateLimiter, SlidingWindowLimiter, TokenBucketLimiter};
pub use reputation::{BlacklistedKey, EntrySource, ReputationStore};
pub use request_filter::{FilterResult, RequestFilter};
pub use store::RemoteStore;
