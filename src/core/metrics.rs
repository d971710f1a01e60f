use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Prometheus metrics for the protection layer.
///
/// Owns its registry; every service instance carries its own so nothing is
/// registered through process-global state. Exposed series:
/// `ddos_protection_requests_total`, `ddos_protection_response_time_seconds`,
/// `ddos_protection_errors_total`, `ddos_protection_active_connections`,
/// `ddos_protection_requests_per_minute`.
pub struct ProtectionMetrics {
    registry: Registry,
    requests: Counter,
    response_time: Histogram,
    errors: Counter,
    active_connections: Gauge,
    requests_per_minute: Gauge<f64, AtomicU64>,
}

impl ProtectionMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests = Counter::default();
        registry.register(
            "ddos_protection_requests",
            "Total number of requests processed",
            requests.clone(),
        );

        // 1ms .. ~8s exponential buckets
        let response_time = Histogram::new(exponential_buckets(0.001, 2.0, 14));
        registry.register(
            "ddos_protection_response_time_seconds",
            "Response time histogram",
            response_time.clone(),
        );

        let errors = Counter::default();
        registry.register(
            "ddos_protection_errors",
            "Total number of errors",
            errors.clone(),
        );

        let active_connections = Gauge::default();
        registry.register(
            "ddos_protection_active_connections",
            "Number of active connections",
            active_connections.clone(),
        );

        let requests_per_minute = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "ddos_protection_requests_per_minute",
            "Current requests per minute",
            requests_per_minute.clone(),
        );

        Self {
            registry,
            requests,
            response_time,
            errors,
            active_connections,
            requests_per_minute,
        }
    }

    pub fn record_request(&self, response_time_secs: f64, is_error: bool) {
        self.requests.inc();
        self.response_time.observe(response_time_secs);
        if is_error {
            self.errors.inc();
        }
    }

    pub fn set_active_connections(&self, count: i64) {
        self.active_connections.set(count);
    }

    pub fn set_requests_per_minute(&self, rate: f64) {
        self.requests_per_minute.set(rate);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests.get()
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

impl Default for ProtectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProtectionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectionMetrics")
            .field("requests_total", &self.requests.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_contains_all_series() {
        let metrics = ProtectionMetrics::new();
        metrics.record_request(0.012, false);
        metrics.record_request(0.250, true);
        metrics.set_active_connections(3);
        metrics.set_requests_per_minute(120.0);

        let out = metrics.encode().expect("encode");
        assert!(out.contains("ddos_protection_requests_total 2"));
        assert!(out.contains("ddos_protection_errors_total 1"));
        assert!(out.contains("ddos_protection_active_connections 3"));
        assert!(out.contains("ddos_protection_requests_per_minute"));
        assert!(out.contains("ddos_protection_response_time_seconds"));
    }

    #[test]
    fn registries_are_independent() {
        let a = ProtectionMetrics::new();
        let b = ProtectionMetrics::new();
        a.record_request(0.001, false);

        assert_eq!(a.requests_total(), 1);
        assert_eq!(b.requests_total(), 0);
    }
}
