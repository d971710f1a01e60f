use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::metrics::ProtectionMetrics;

/// Ring capacity for per-key response-time samples.
const RING_CAPACITY: usize = 100;

/// Bounded alert queue depth; producers drop on overflow.
const ALERT_QUEUE_DEPTH: usize = 100;

/// Alert emitted by the traffic monitor.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighRequestRate,
    SuspiciousResponseTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
}

/// Aggregate traffic statistics for the management API.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficStats {
    pub total_requests: u64,
    pub unique_keys: usize,
    #[serde(rename = "avg_response_time")]
    pub avg_response_time_ms: u64,
    /// Percentage of requests with status >= 400
    pub error_rate: f64,
    pub top_keys: Vec<KeyStats>,
    pub requests_per_minute: f64,
}

/// Per-key statistics.
#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub key: String,
    pub request_count: u64,
    pub avg_response_time_ms: u64,
    pub error_count: u64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct KeyRecord {
    requests: u64,
    errors: u64,
    response_times: VecDeque<Duration>,
    last_seen: Option<DateTime<Utc>>,
}

impl KeyRecord {
    fn avg_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_times.iter().sum();
        total / self.response_times.len() as u32
    }
}

/// Per-key counters and the alert stream.
///
/// Recording never blocks the request path: the alert channel is bounded and
/// new alerts are dropped when it is full.
pub struct TrafficMonitor {
    records: RwLock<HashMap<String, KeyRecord>>,
    alert_threshold: u64,
    started_at: Instant,
    metrics: Arc<ProtectionMetrics>,
    alert_tx: mpsc::Sender<Alert>,
    alert_rx: Mutex<Option<mpsc::Receiver<Alert>>>,
}

impl TrafficMonitor {
    pub fn new(alert_threshold: u64, metrics: Arc<ProtectionMetrics>) -> Self {
        let (alert_tx, alert_rx) = mpsc::channel(ALERT_QUEUE_DEPTH);
        Self {
            records: RwLock::new(HashMap::new()),
            alert_threshold,
            started_at: Instant::now(),
            metrics,
            alert_tx,
            alert_rx: Mutex::new(Some(alert_rx)),
        }
    }

    /// Take the consumer end of the alert stream. Yields `Some` exactly once.
    pub fn take_alerts(&self) -> Option<mpsc::Receiver<Alert>> {
        self.alert_rx.lock().take()
    }

    /// Record one completed (or denied) request outcome.
    pub fn record(&self, key: &str, status: u16, response_time: Duration) {
        let is_error = status >= 400;
        let (request_count, avg) = {
            let mut records = self.records.write();
            let record = records.entry(key.to_string()).or_default();
            record.requests += 1;
            record.last_seen = Some(Utc::now());
            if is_error {
                record.errors += 1;
            }
            if record.response_times.len() == RING_CAPACITY {
                record.response_times.pop_front();
            }
            record.response_times.push_back(response_time);
            (record.requests, record.avg_response_time())
        };

        self.metrics.record_request(response_time.as_secs_f64(), is_error);

        self.check_alerts(key, request_count, avg);
    }

    /// Observed request count for a key, denials included.
    pub fn request_count(&self, key: &str) -> u64 {
        self.records.read().get(key).map(|r| r.requests).unwrap_or(0)
    }

    fn check_alerts(&self, key: &str, request_count: u64, avg: Duration) {
        if request_count > self.alert_threshold {
            self.emit(Alert {
                alert_type: AlertType::HighRequestRate,
                severity: AlertSeverity::Warning,
                message: format!("High request rate detected for {key}: {request_count} requests"),
                timestamp: Utc::now(),
                key: Some(key.to_string()),
                request_count: Some(request_count),
                avg_response_time_ms: None,
            });
        }

        let samples = self
            .records
            .read()
            .get(key)
            .map(|r| r.response_times.len())
            .unwrap_or(0);
        if samples > 10 && avg < Duration::from_millis(10) {
            self.emit(Alert {
                alert_type: AlertType::SuspiciousResponseTime,
                severity: AlertSeverity::Info,
                message: format!("Suspiciously fast responses for {key}: {avg:?} average"),
                timestamp: Utc::now(),
                key: Some(key.to_string()),
                request_count: None,
                avg_response_time_ms: Some(avg.as_millis() as u64),
            });
        }
    }

    fn emit(&self, alert: Alert) {
        // Monitoring must not backpressure the request path.
        if self.alert_tx.try_send(alert).is_err() {
            tracing::debug!(event = "alert_dropped", "alert queue full");
        }
    }

    /// Aggregate statistics snapshot, top keys sorted by request count.
    pub fn stats(&self) -> TrafficStats {
        let records = self.records.read();

        let mut total_requests = 0u64;
        let mut total_errors = 0u64;
        let mut total_response = Duration::ZERO;
        let mut total_samples = 0u64;
        let mut top_keys = Vec::with_capacity(records.len());

        for (key, record) in records.iter() {
            total_requests += record.requests;
            total_errors += record.errors;
            for sample in &record.response_times {
                total_response += *sample;
                total_samples += 1;
            }
            top_keys.push(KeyStats {
                key: key.clone(),
                request_count: record.requests,
                avg_response_time_ms: record.avg_response_time().as_millis() as u64,
                error_count: record.errors,
                last_seen: record.last_seen.unwrap_or_else(Utc::now),
            });
        }

        top_keys.sort_by(|a, b| b.request_count.cmp(&a.request_count));
        top_keys.truncate(10);

        let avg_response_time_ms = if total_samples > 0 {
            (total_response / total_samples as u32).as_millis() as u64
        } else {
            0
        };
        let error_rate = if total_requests > 0 {
            total_errors as f64 / total_requests as f64 * 100.0
        } else {
            0.0
        };
        let minutes = self.started_at.elapsed().as_secs_f64() / 60.0;
        let requests_per_minute = total_requests as f64 / minutes.max(1.0 / 60.0);

        TrafficStats {
            total_requests,
            unique_keys: records.len(),
            avg_response_time_ms,
            error_rate,
            top_keys,
            requests_per_minute,
        }
    }

    /// Refresh the exported gauges from the current snapshot.
    pub fn refresh_metrics(&self) {
        let stats = self.stats();
        self.metrics.set_active_connections(stats.unique_keys as i64);
        self.metrics.set_requests_per_minute(stats.requests_per_minute);
    }

    /// Drop keys not seen within `max_idle`. Called from the sweeper.
    pub fn sweep(&self, max_idle: Duration) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(max_idle.as_millis() as i64);
        self.records
            .write()
            .retain(|_, record| record.last_seen.is_some_and(|seen| seen > cutoff));
    }
}
