use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::core::botnet::BotnetDetector;
use crate::core::monitor::TrafficMonitor;
use crate::core::rate_limiter::RateLimiter;
use crate::core::reputation::{EntrySource, ReputationStore};
use crate::core::request_filter::RequestFilter;
use crate::core::store::RemoteStore;
use crate::utils::log_botnet_detection;

/// Framework-independent view of one inbound request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    /// Raw (still percent-encoded) query string, without the `?`
    pub query: String,
    /// Header names lowercased; values in arrival order
    pub headers: HashMap<String, Vec<String>>,
    pub content_length: u64,
    /// Peer address with the port already stripped
    pub remote_addr: String,
    pub received_at: Instant,
}

impl RequestMeta {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        remote_addr: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query: String::new(),
            headers: HashMap::new(),
            content_length: 0,
            remote_addr: remote_addr.into(),
            received_at: Instant::now(),
        }
    }

    /// Append a header value; names are lowercased.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_lowercase())
            .or_default()
            .push(value.to_string());
    }

    /// First value of a header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// Client key used for rate limiting and reputation: first
    /// `X-Forwarded-For` element, then `X-Real-IP`, then the peer address.
    /// Never fails; the raw peer address is the terminal fallback.
    pub fn client_key(&self) -> String {
        if let Some(forwarded) = self.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }

        if let Some(real_ip) = self.header("x-real-ip") {
            let real_ip = real_ip.trim();
            if !real_ip.is_empty() {
                return real_ip.to_string();
            }
        }

        self.remote_addr.clone()
    }
}

/// Stable denial tokens surfaced in response bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyCode {
    BlockedIp,
    RateLimited,
    Filtered,
    BotnetDetected,
}

impl DenyCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyCode::BlockedIp => "BLOCKED_IP",
            DenyCode::RateLimited => "RATE_LIMITED",
            DenyCode::Filtered => "FILTERED",
            DenyCode::BotnetDetected => "BOTNET_DETECTED",
        }
    }
}

/// A rejected request with everything the wire envelope needs.
#[derive(Debug, Clone)]
pub struct Denial {
    pub code: DenyCode,
    pub status: u16,
    pub error: String,
    pub reason: Option<String>,
    pub confidence: Option<f64>,
    pub indicators: Option<Vec<String>>,
}

impl Denial {
    fn new(code: DenyCode, status: u16, error: &str) -> Self {
        Self {
            code,
            status,
            error: error.to_string(),
            reason: None,
            confidence: None,
            indicators: None,
        }
    }
}

/// Outcome of the protection pipeline for one request.
#[derive(Debug, Clone)]
pub enum Decision {
    Allow {
        /// Whitelisted keys bypass every stage
        whitelisted: bool,
        /// The remote store was unreachable and at least one stage failed open
        degraded: bool,
    },
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Orchestrates the protection stages in a fixed order, short-circuiting on
/// the first denial. Stateless across calls; all shared state lives in the
/// subsystems.
///
/// Ordering: reputation is an O(1) lookup and the most specific signal, so
/// it runs first; rate limiting precedes filtering so floods cannot amortize
/// the regex cost; behavioral scoring is the most expensive and runs last.
pub struct Pipeline {
    reputation: Arc<ReputationStore>,
    limiter: Arc<ArcSwap<Box<dyn RateLimiter>>>,
    filter: Arc<RequestFilter>,
    detector: Arc<BotnetDetector>,
    monitor: Arc<TrafficMonitor>,
    store: Option<RemoteStore>,
    blacklist_enabled: bool,
    whitelist_enabled: bool,
    filter_enabled: bool,
    blacklist_lease: Duration,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reputation: Arc<ReputationStore>,
        limiter: Arc<ArcSwap<Box<dyn RateLimiter>>>,
        filter: Arc<RequestFilter>,
        detector: Arc<BotnetDetector>,
        monitor: Arc<TrafficMonitor>,
        store: Option<RemoteStore>,
        blacklist_enabled: bool,
        whitelist_enabled: bool,
        filter_enabled: bool,
        blacklist_lease: Duration,
    ) -> Self {
        Self {
            reputation,
            limiter,
            filter,
            detector,
            monitor,
            store,
            blacklist_enabled,
            whitelist_enabled,
            filter_enabled,
            blacklist_lease,
        }
    }

    fn degraded(&self) -> bool {
        self.store.as_ref().is_some_and(RemoteStore::is_degraded)
    }

    /// Run the decision stages for one request.
    pub async fn check(&self, meta: &RequestMeta) -> Decision {
        let key = meta.client_key();

        // Stage 1: reputation. Whitelisted keys skip everything else.
        if self.whitelist_enabled && self.reputation.is_whitelisted(&key).await {
            return Decision::Allow { whitelisted: true, degraded: self.degraded() };
        }
        if self.blacklist_enabled && self.reputation.is_blacklisted(&key).await {
            tracing::warn!(key = %key, "request blocked, key blacklisted");
            return Decision::Deny(Denial::new(DenyCode::BlockedIp, 403, "Access denied"));
        }

        // Stage 2: rate limit. On denial, consider promoting the key.
        let limiter = self.limiter.load_full();
        if !limiter.allow(&key).await {
            let observed = self.monitor.request_count(&key) + 1;
            if self.reputation.should_auto_blacklist(&key, observed).await {
                if let Err(err) = self
                    .reputation
                    .blacklist(&key, Some(self.blacklist_lease), EntrySource::Auto)
                    .await
                {
                    tracing::error!(key = %key, error = %err, "auto-blacklist failed");
                } else {
                    tracing::info!(key = %key, observed = observed, "auto-blacklisted key");
                }
            }
            return Decision::Deny(Denial::new(DenyCode::RateLimited, 429, "Rate limit exceeded"));
        }

        // Stage 3: request filter.
        if self.filter_enabled {
            let result = self.filter.check(meta, &key);
            if result.should_log {
                tracing::info!(
                    key = %key,
                    reason = %result.reason,
                    risk_score = result.risk_score,
                    "request flagged by filter",
                );
            }
            if !result.allowed {
                tracing::warn!(
                    key = %key,
                    reason = %result.reason,
                    risk_score = result.risk_score,
                    "request blocked by filter",
                );
                let mut denial = Denial::new(DenyCode::Filtered, 400, "Request blocked");
                denial.reason = Some(result.reason);
                return Decision::Deny(denial);
            }
        }

        // Stage 4: behavioral analysis.
        let analysis = self.detector.analyze(
            &key,
            meta.user_agent().unwrap_or_default(),
            &meta.path,
            meta.received_at.elapsed(),
        );
        if analysis.is_botnet {
            log_botnet_detection(&key, analysis.confidence, analysis.risk_score);
            if analysis.confidence > 0.8 {
                if let Err(err) = self
                    .reputation
                    .blacklist(&key, Some(self.blacklist_lease), EntrySource::Auto)
                    .await
                {
                    tracing::error!(key = %key, error = %err, "botnet auto-blacklist failed");
                }
            }
            let mut denial =
                Denial::new(DenyCode::BotnetDetected, 403, "Access denied - botnet detected");
            denial.confidence = Some(analysis.confidence);
            denial.indicators = Some(analysis.indicators);
            return Decision::Deny(denial);
        }

        Decision::Allow { whitelisted: false, degraded: self.degraded() }
    }

    /// Record the outcome of a request, allowed or denied, into the monitor.
    pub fn record_outcome(&self, key: &str, meta: &RequestMeta, status: u16, latency: Duration) {
        self.monitor.record(key, status, latency);
        tracing::debug!(
            key = %key,
            method = %meta.method,
            path = %meta.path,
            status = status,
            latency_ms = latency.as_millis() as u64,
            "request completed",
        );
    }
}
