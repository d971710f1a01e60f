use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::config::Settings;
use crate::core::{
    Alert, AlertType, BotnetDetector, CustomHealthCheck, HealthChecker, MemoryHealthCheck,
    Pipeline, ProtectionMetrics, RateLimiter, RemoteStore, ReputationStore, RequestFilter,
    SlidingWindowLimiter, TokenBucketLimiter, TrafficMonitor,
};
use crate::utils::{ProtectionError, ProtectionResult};

/// Per-operation deadline for remote store calls.
const STORE_OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Sweep cadence for all expiring state.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Gauge refresh cadence.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Wires the protection subsystems together and owns their lifecycles:
/// limiter swap handle, background sweeper, alert handler and health ticks.
pub struct ProtectionService {
    settings: Settings,
    reputation: Arc<ReputationStore>,
    limiter: Arc<ArcSwap<Box<dyn RateLimiter>>>,
    filter: Arc<RequestFilter>,
    detector: Arc<BotnetDetector>,
    monitor: Arc<TrafficMonitor>,
    health: Arc<HealthChecker>,
    metrics: Arc<ProtectionMetrics>,
    pipeline: Pipeline,
    store: Option<RemoteStore>,
    started_at: Instant,
    started_at_utc: chrono::DateTime<chrono::Utc>,
    shutdown_tx: watch::Sender<bool>,
}

impl ProtectionService {
    /// Build the service from settings. Connects to the remote store when
    /// configured; a failed connection degrades to in-memory mode rather
    /// than aborting startup.
    pub async fn new(settings: Settings) -> ProtectionResult<Arc<Self>> {
        let store = if settings.redis.enabled() {
            match RemoteStore::connect(&settings.redis, STORE_OP_TIMEOUT).await {
                Ok(store) => {
                    tracing::info!(host = %settings.redis.host, "remote store connected");
                    Some(store)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "remote store unavailable, running in-memory");
                    None
                }
            }
        } else {
            tracing::info!("remote store disabled, running in-memory");
            None
        };

        let metrics = Arc::new(ProtectionMetrics::new());

        let reputation = Arc::new(ReputationStore::new(
            store.clone(),
            settings.protection.ip_blacklist.enabled,
            settings.protection.ip_blacklist.auto_blacklist_threshold,
        ));
        Self::seed_reputation(&reputation, &settings).await;

        let limiter = Arc::new(ArcSwap::from_pointee(Self::build_limiter(
            &settings,
            store.clone(),
        )));

        let filter = Arc::new(RequestFilter::new(
            settings.protection.request_filter.max_request_size,
            &settings.protection.request_filter.suspicious_headers,
            &settings.protection.request_filter.blocked_user_agents,
        ));

        let detector = Arc::new(BotnetDetector::new(0.8, Duration::from_secs(60)));

        let monitor = Arc::new(TrafficMonitor::new(
            settings.protection.monitoring.alert_threshold,
            metrics.clone(),
        ));

        let health = Arc::new(Self::build_health_checker(&settings, store.clone()));

        let pipeline = Pipeline::new(
            reputation.clone(),
            limiter.clone(),
            filter.clone(),
            detector.clone(),
            monitor.clone(),
            store.clone(),
            settings.protection.ip_blacklist.enabled,
            settings.protection.ip_whitelist.enabled,
            settings.protection.request_filter.enabled,
            Duration::from_secs(settings.protection.ip_blacklist.blacklist_duration),
        );

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            settings,
            reputation,
            limiter,
            filter,
            detector,
            monitor,
            health,
            metrics,
            pipeline,
            store,
            started_at: Instant::now(),
            started_at_utc: chrono::Utc::now(),
            shutdown_tx,
        }))
    }

    async fn seed_reputation(reputation: &ReputationStore, settings: &Settings) {
        for ip in &settings.protection.ip_whitelist.ips {
            if let Err(err) = reputation.whitelist(ip).await {
                tracing::warn!(ip = %ip, error = %err, "failed to seed whitelist entry");
            }
        }
        let lease = Duration::from_secs(settings.protection.ip_blacklist.blacklist_duration);
        for ip in &settings.protection.ip_blacklist.ips {
            if let Err(err) = reputation
                .blacklist(ip, Some(lease), crate::core::EntrySource::Manual)
                .await
            {
                tracing::warn!(ip = %ip, error = %err, "failed to seed blacklist entry");
            }
        }
    }

    fn build_limiter(settings: &Settings, store: Option<RemoteStore>) -> Box<dyn RateLimiter> {
        let rate_limit = &settings.protection.rate_limit;
        match store {
            Some(store) => {
                tracing::info!("using distributed sliding-window rate limiter");
                Box::new(SlidingWindowLimiter::new(
                    store,
                    rate_limit.requests_per_minute,
                    Duration::from_secs(rate_limit.window_size),
                ))
            }
            None => {
                tracing::info!("using local token-bucket rate limiter");
                Box::new(TokenBucketLimiter::new(
                    rate_limit.requests_per_minute,
                    rate_limit.burst_size,
                ))
            }
        }
    }

    fn build_health_checker(settings: &Settings, store: Option<RemoteStore>) -> HealthChecker {
        let hc = &settings.protection.health_check;
        let mut checker = HealthChecker::new(
            Duration::from_secs(hc.check_interval.max(1)),
            Duration::from_secs(hc.timeout.max(1)),
        );

        if let Some(store) = store {
            checker.register(Box::new(CustomHealthCheck::new(
                "redis",
                move || {
                    let store = store.clone();
                    Box::pin(async move { store.ping().await })
                },
                false,
            )));
        }

        checker.register(Box::new(MemoryHealthCheck::new("memory", 1024, true)));

        let started = Instant::now();
        checker.register(Box::new(CustomHealthCheck::new(
            "uptime",
            move || {
                Box::pin(async move {
                    if started.elapsed() < Duration::from_secs(60) {
                        return Err(ProtectionError::Internal(
                            "service recently started".to_string(),
                        ));
                    }
                    Ok(())
                })
            },
            false,
        )));

        checker
    }

    /// Spawn the background tasks: alert handler, expiry sweeper, gauge
    /// refresher and circuit-breaker ticks. All of them stop on shutdown.
    pub fn start_background_tasks(self: &Arc<Self>) {
        if self.settings.protection.monitoring.enabled {
            if let Some(alerts) = self.monitor.take_alerts() {
                tokio::spawn(Self::alert_handler(
                    alerts,
                    self.reputation.clone(),
                    Duration::from_secs(self.settings.protection.ip_blacklist.blacklist_duration),
                    self.shutdown_tx.subscribe(),
                ));
            }
        }

        tokio::spawn(Self::sweeper(Arc::clone(self), self.shutdown_tx.subscribe()));
        tokio::spawn(Self::stats_refresher(Arc::clone(self), self.shutdown_tx.subscribe()));
        if self.settings.protection.health_check.enabled {
            tokio::spawn(Self::health_ticker(Arc::clone(self), self.shutdown_tx.subscribe()));
        }
    }

    /// Signal every background task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn alert_handler(
        mut alerts: tokio::sync::mpsc::Receiver<Alert>,
        reputation: Arc<ReputationStore>,
        lease: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                maybe_alert = alerts.recv() => {
                    let Some(alert) = maybe_alert else { break };
                    tracing::warn!(
                        alert_type = ?alert.alert_type,
                        severity = ?alert.severity,
                        key = ?alert.key,
                        message = %alert.message,
                        "traffic alert received",
                    );

                    if alert.alert_type == AlertType::HighRequestRate {
                        if let Some(key) = &alert.key {
                            match reputation
                                .blacklist(key, Some(lease), crate::core::EntrySource::Auto)
                                .await
                            {
                                Ok(()) => {
                                    tracing::info!(key = %key, "auto-blacklisted after alert");
                                }
                                Err(err) => {
                                    tracing::error!(key = %key, error = %err, "alert blacklist failed");
                                }
                            }
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn sweeper(service: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await; // first tick fires immediately
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    service.reputation.sweep();
                    service.filter.sweep();
                    service.detector.sweep();
                    service.limiter.load().sweep();
                    service.monitor.sweep(Duration::from_secs(3600));
                    tracing::debug!(event = "sweep_completed");
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn stats_refresher(service: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => service.monitor.refresh_metrics(),
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn health_ticker(service: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(service.health.check_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => service.health.tick_breakers(),
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Replace the rate limiter parameters atomically. In-flight calls see
    /// the old limiter or the new one, never a mix.
    pub fn update_rate_limit(&self, requests_per_minute: u32, burst_size: u32) -> ProtectionResult<()> {
        if requests_per_minute == 0 {
            return Err(ProtectionError::InvalidValue(
                "requests_per_minute must be at least 1".to_string(),
            ));
        }
        if burst_size == 0 {
            return Err(ProtectionError::InvalidValue(
                "burst_size must be at least 1".to_string(),
            ));
        }

        let limiter: Box<dyn RateLimiter> = match &self.store {
            Some(store) => Box::new(SlidingWindowLimiter::new(
                store.clone(),
                requests_per_minute,
                Duration::from_secs(self.settings.protection.rate_limit.window_size),
            )),
            None => Box::new(TokenBucketLimiter::new(requests_per_minute, burst_size)),
        };
        self.limiter.store(Arc::new(limiter));

        tracing::info!(
            requests_per_minute = requests_per_minute,
            burst_size = burst_size,
            "rate limit configuration updated",
        );
        Ok(())
    }

    /// Current limiter introspection for the management API.
    pub fn rate_limit_config(&self) -> serde_json::Value {
        let limiter = self.limiter.load();
        let mut config = serde_json::json!({
            "requests_per_minute": limiter.limit(),
            "burst_size": limiter.burst(),
        });
        if let Some(window) = limiter.window_seconds() {
            config["window_seconds"] = serde_json::json!(window);
        }
        config
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    pub fn monitor(&self) -> &TrafficMonitor {
        &self.monitor
    }

    pub fn health(&self) -> &HealthChecker {
        &self.health
    }

    pub fn metrics(&self) -> Arc<ProtectionMetrics> {
        self.metrics.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.started_at_utc
    }
}
