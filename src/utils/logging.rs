use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;
use crate::utils::ProtectionResult;

/// Initialize the logging system from the `logging` configuration section.
///
/// `RUST_LOG` takes precedence over the configured level. When a log file is
/// configured, output goes there instead of stderr.
pub fn init_logging(settings: &LoggingSettings) -> ProtectionResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match (settings.format.as_str(), settings.file.as_deref()) {
        ("json", Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.json().with_writer(Arc::new(file)).init();
        }
        ("json", None) => builder.json().init(),
        (_, Some(path)) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_writer(Arc::new(file)).init();
        }
        (_, None) => builder.init(),
    }

    Ok(())
}

/// Log a rate limit decision for a client key.
pub fn log_rate_limit(key: &str, exceeded: bool) {
    if exceeded {
        tracing::warn!(key = %key, event = "rate_limit_exceeded");
    } else {
        tracing::debug!(key = %key, event = "rate_limit_check");
    }
}

/// Log a reputation store mutation.
pub fn log_reputation_event(event: &str, key: &str, detail: Option<&str>) {
    tracing::info!(key = %key, event = %event, detail = ?detail);
}

/// Log a botnet detection hit.
pub fn log_botnet_detection(key: &str, confidence: f64, risk_score: u32) {
    tracing::warn!(
        key = %key,
        confidence = %confidence,
        risk_score = %risk_score,
        event = "botnet_detected",
    );
}

/// Log a degraded-store condition on the request path.
pub fn log_degraded(component: &str, detail: &str) {
    tracing::warn!(component = %component, detail = %detail, event = "store_degraded");
}
