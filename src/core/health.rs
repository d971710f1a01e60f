use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::utils::{ProtectionError, ProtectionResult};

/// A single registered health check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self) -> ProtectionResult<()>;
    /// Critical checks take the overall status to `critical` on failure.
    fn is_critical(&self) -> bool;
}

/// Result of running one check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub status: String,
    pub message: String,
    pub duration_ms: u64,
    pub is_critical: bool,
}

/// Aggregated health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub checks: HashMap<String, CheckResult>,
    pub summary: HealthSummary,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSummary {
    pub total_checks: usize,
    pub healthy_checks: usize,
    pub unhealthy_checks: usize,
    pub critical_failures: usize,
}

/// Circuit breaker state machine guarding one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
}

/// Trips open after consecutive failures, probes in half-open after the
/// timeout, closes again after consecutive successes.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    success_threshold: u32,
    timeout: Duration,
    half_open_max_calls: u32,
}

impl CircuitBreaker {
    fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure: None,
            }),
            failure_threshold: 3,
            success_threshold: 2,
            timeout,
            half_open_max_calls: 3,
        }
    }

    fn can_execute(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .last_failure
                .is_some_and(|at| at.elapsed() > self.timeout),
            CircuitState::HalfOpen => inner.half_open_calls < self.half_open_max_calls,
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.success_count = 0;
        inner.half_open_calls = 0;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => inner.state = CircuitState::Open,
            _ => {}
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;
        inner.failure_count = 0;
        inner.half_open_calls += 1;

        if inner.state == CircuitState::HalfOpen && inner.success_count >= self.success_threshold {
            inner.state = CircuitState::Closed;
            inner.half_open_calls = 0;
        }
    }

    /// Move open breakers to half-open once the timeout has passed.
    fn tick(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open
            && inner.last_failure.is_some_and(|at| at.elapsed() > self.timeout)
        {
            inner.state = CircuitState::HalfOpen;
            inner.half_open_calls = 0;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    fn snapshot(&self) -> serde_json::Value {
        let inner = self.inner.lock();
        json!({
            "state": inner.state.as_str(),
            "failure_count": inner.failure_count,
            "success_count": inner.success_count,
            "half_open_calls": inner.half_open_calls,
        })
    }
}

/// Runs registered health checks behind per-check circuit breakers.
pub struct HealthChecker {
    checks: Vec<Box<dyn HealthCheck>>,
    breakers: HashMap<String, CircuitBreaker>,
    timeout: Duration,
    check_interval: Duration,
}

impl HealthChecker {
    pub fn new(check_interval: Duration, timeout: Duration) -> Self {
        Self {
            checks: Vec::new(),
            breakers: HashMap::new(),
            timeout,
            check_interval,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Register a check; a dedicated circuit breaker is created for it.
    pub fn register(&mut self, check: Box<dyn HealthCheck>) {
        self.breakers
            .insert(check.name().to_string(), CircuitBreaker::new(self.timeout));
        self.checks.push(check);
    }

    /// Run every registered check and aggregate the results.
    pub async fn status(&self) -> HealthStatus {
        let mut status = HealthStatus {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            checks: HashMap::new(),
            summary: HealthSummary::default(),
        };

        for check in &self.checks {
            let result = self.run_check(check.as_ref()).await;
            status.summary.total_checks += 1;
            if result.status == "healthy" {
                status.summary.healthy_checks += 1;
            } else {
                status.summary.unhealthy_checks += 1;
                if result.is_critical {
                    status.summary.critical_failures += 1;
                }
            }
            status.checks.insert(result.name.clone(), result);
        }

        if status.summary.critical_failures > 0 {
            status.status = "critical".to_string();
        } else if status.summary.unhealthy_checks > 0 {
            status.status = "degraded".to_string();
        }

        status
    }

    async fn run_check(&self, check: &dyn HealthCheck) -> CheckResult {
        let started = Instant::now();
        let mut result = CheckResult {
            name: check.name().to_string(),
            status: String::new(),
            message: String::new(),
            duration_ms: 0,
            is_critical: check.is_critical(),
        };

        let Some(breaker) = self.breakers.get(check.name()) else {
            result.status = "error".to_string();
            result.message = "circuit breaker not found".to_string();
            return result;
        };

        if !breaker.can_execute() {
            result.status = "circuit_open".to_string();
            result.message = format!("circuit breaker is {}", breaker.state().as_str());
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let outcome = tokio::time::timeout(self.timeout, check.check()).await;
        result.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                breaker.record_success();
                result.status = "healthy".to_string();
                result.message = "OK".to_string();
            }
            Ok(Err(err)) => {
                breaker.record_failure();
                result.status = "unhealthy".to_string();
                result.message = err.to_string();
            }
            Err(_) => {
                breaker.record_failure();
                result.status = "unhealthy".to_string();
                result.message = format!("check timed out after {:?}", self.timeout);
            }
        }

        result
    }

    /// Advance open breakers toward half-open. Driven by the background tick.
    pub fn tick_breakers(&self) {
        for breaker in self.breakers.values() {
            breaker.tick();
        }
    }

    /// Per-check circuit breaker states for the management API.
    pub fn circuit_breaker_status(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect();
        serde_json::Value::Object(map)
    }
}

type CheckFn =
    Box<dyn Fn() -> Pin<Box<dyn Future<Output = ProtectionResult<()>> + Send>> + Send + Sync>;

/// Health check backed by an arbitrary async closure.
pub struct CustomHealthCheck {
    name: String,
    check_fn: CheckFn,
    critical: bool,
}

impl CustomHealthCheck {
    pub fn new(
        name: impl Into<String>,
        check_fn: impl Fn() -> Pin<Box<dyn Future<Output = ProtectionResult<()>> + Send>>
            + Send
            + Sync
            + 'static,
        critical: bool,
    ) -> Self {
        Self {
            name: name.into(),
            check_fn: Box::new(check_fn),
            critical,
        }
    }
}

#[async_trait]
impl HealthCheck for CustomHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProtectionResult<()> {
        (self.check_fn)().await
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}

/// Memory usage check. Currently a stub that always succeeds; kept as an
/// extension point for a real allocator-stats probe.
pub struct MemoryHealthCheck {
    name: String,
    #[allow(dead_code)]
    max_usage_mb: u64,
    critical: bool,
}

impl MemoryHealthCheck {
    pub fn new(name: impl Into<String>, max_usage_mb: u64, critical: bool) -> Self {
        Self { name: name.into(), max_usage_mb, critical }
    }
}

#[async_trait]
impl HealthCheck for MemoryHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProtectionResult<()> {
        Ok(())
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}

/// Checks that an HTTP endpoint answers below 400.
pub struct HttpHealthCheck {
    name: String,
    url: String,
    client: reqwest::Client,
    critical: bool,
}

impl HttpHealthCheck {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
        critical: bool,
    ) -> ProtectionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProtectionError::Internal(err.to_string()))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
            critical,
        })
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProtectionResult<()> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| ProtectionError::Internal(format!("HTTP request failed: {err}")))?;

        if response.status().as_u16() >= 400 {
            return Err(ProtectionError::Internal(format!(
                "HTTP status {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn is_critical(&self) -> bool {
        self.critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_healthy_aggregates_healthy() {
        let mut checker = HealthChecker::new(Duration::from_secs(30), Duration::from_secs(1));
        checker.register(Box::new(MemoryHealthCheck::new("memory", 1024, true)));
        checker.register(Box::new(CustomHealthCheck::new(
            "uptime",
            || Box::pin(async { Ok(()) }),
            false,
        )));

        let status = checker.status().await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.summary.total_checks, 2);
        assert_eq!(status.summary.healthy_checks, 2);
    }

    #[tokio::test]
    async fn non_critical_failure_degrades() {
        let mut checker = HealthChecker::new(Duration::from_secs(30), Duration::from_secs(1));
        checker.register(Box::new(CustomHealthCheck::new(
            "flaky",
            || Box::pin(async { Err(ProtectionError::Internal("down".into())) }),
            false,
        )));

        let status = checker.status().await;
        assert_eq!(status.status, "degraded");
        assert_eq!(status.summary.unhealthy_checks, 1);
        assert_eq!(status.summary.critical_failures, 0);
    }

    #[tokio::test]
    async fn critical_failure_is_critical() {
        let mut checker = HealthChecker::new(Duration::from_secs(30), Duration::from_secs(1));
        checker.register(Box::new(CustomHealthCheck::new(
            "store",
            || Box::pin(async { Err(ProtectionError::Internal("down".into())) }),
            true,
        )));

        let status = checker.status().await;
        assert_eq!(status.status, "critical");
        assert_eq!(status.summary.critical_failures, 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_three_failures() {
        let mut checker = HealthChecker::new(Duration::from_secs(30), Duration::from_secs(5));
        checker.register(Box::new(CustomHealthCheck::new(
            "failing",
            || Box::pin(async { Err(ProtectionError::Internal("down".into())) }),
            false,
        )));

        for _ in 0..3 {
            checker.status().await;
        }

        let breaker = checker.breakers.get("failing").expect("breaker");
        assert_eq!(breaker.state(), CircuitState::Open);

        // While open and inside the timeout, the check is skipped.
        let status = checker.status().await;
        assert_eq!(status.checks["failing"].status, "circuit_open");
    }

    #[test]
    fn breaker_recovers_through_half_open() {
        let breaker = CircuitBreaker::new(Duration::from_millis(5));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));
        breaker.tick();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(Duration::from_millis(5));
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(10));
        breaker.tick();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn breaker_status_is_serializable() {
        let mut checker = HealthChecker::new(Duration::from_secs(30), Duration::from_secs(1));
        checker.register(Box::new(MemoryHealthCheck::new("memory", 1024, true)));
        checker.status().await;

        let value = checker.circuit_breaker_status();
        assert_eq!(value["memory"]["state"], "closed");
    }
}
