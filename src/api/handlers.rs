use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::api::error::{ApiError, ApiResult};
use crate::core::EntrySource;
use crate::service::ProtectionService;
use crate::utils::ProtectionError;

/// Validate an operator-supplied key as an IP address.
fn parse_ip(ip: &str) -> ApiResult<()> {
    ip.parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| ApiError(ProtectionError::InvalidKey(ip.to_string())))
}

fn body_error(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": rejection.body_text(), "code": "INVALID_BODY" })),
    )
        .into_response()
}

/// `GET /health`: unconditional liveness.
pub async fn health_basic() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

/// `GET /health/detailed`: aggregated checks, 503 only when critical.
pub async fn health_detailed(State(service): State<Arc<ProtectionService>>) -> Response {
    let status = service.health().status().await;
    let http_status = if status.status == "critical" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (http_status, Json(status)).into_response()
}

/// `GET /api/v1/status`
pub async fn service_status(State(service): State<Arc<ProtectionService>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "operational",
        "timestamp": Utc::now(),
        "started_at": service.started_at(),
        "uptime_seconds": service.uptime().as_secs(),
    }))
}

/// `GET /api/v1/stats`
pub async fn traffic_stats(State(service): State<Arc<ProtectionService>>) -> Response {
    Json(service.monitor().stats()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct BlacklistRequest {
    pub ip: String,
    /// Lease in seconds; the configured default lease applies when omitted
    pub duration: Option<u64>,
}

/// `POST /api/v1/ip/blacklist`
pub async fn blacklist_add(
    State(service): State<Arc<ProtectionService>>,
    body: Result<Json<BlacklistRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return body_error(rejection),
    };

    match blacklist_add_inner(&service, &request).await {
        Ok(()) => Json(json!({ "message": "IP blacklisted successfully" })).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn blacklist_add_inner(
    service: &ProtectionService,
    request: &BlacklistRequest,
) -> ApiResult<()> {
    parse_ip(&request.ip)?;
    let lease = request
        .duration
        .unwrap_or(service.settings().protection.ip_blacklist.blacklist_duration);
    service
        .reputation()
        .blacklist(&request.ip, Some(Duration::from_secs(lease)), EntrySource::Manual)
        .await?;
    Ok(())
}

/// `DELETE /api/v1/ip/blacklist/{ip}`
pub async fn blacklist_remove(
    State(service): State<Arc<ProtectionService>>,
    Path(ip): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    service.reputation().remove_blacklist(&ip).await?;
    Ok(Json(json!({ "message": "IP removed from blacklist" })))
}

/// `GET /api/v1/ip/blacklist`
pub async fn blacklist_list(State(service): State<Arc<ProtectionService>>) -> Json<serde_json::Value> {
    Json(json!({ "blacklisted": service.reputation().list_blacklisted() }))
}

#[derive(Debug, Deserialize)]
pub struct WhitelistRequest {
    pub ip: String,
}

/// `POST /api/v1/ip/whitelist`
pub async fn whitelist_add(
    State(service): State<Arc<ProtectionService>>,
    body: Result<Json<WhitelistRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return body_error(rejection),
    };

    if let Err(err) = parse_ip(&request.ip) {
        return err.into_response();
    }
    match service.reputation().whitelist(&request.ip).await {
        Ok(()) => Json(json!({ "message": "IP whitelisted successfully" })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// `DELETE /api/v1/ip/whitelist/{ip}`
pub async fn whitelist_remove(
    State(service): State<Arc<ProtectionService>>,
    Path(ip): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    service.reputation().remove_whitelist(&ip).await?;
    Ok(Json(json!({ "message": "IP removed from whitelist" })))
}

/// `GET /api/v1/ip/whitelist`
pub async fn whitelist_list(State(service): State<Arc<ProtectionService>>) -> Json<serde_json::Value> {
    Json(json!({ "whitelisted": service.reputation().list_whitelisted() }))
}

/// `GET /api/v1/config/rate-limits`
pub async fn rate_limit_config(State(service): State<Arc<ProtectionService>>) -> Json<serde_json::Value> {
    Json(service.rate_limit_config())
}

#[derive(Debug, Deserialize)]
pub struct RateLimitUpdate {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

/// `PUT /api/v1/config/rate-limits`
pub async fn rate_limit_update(
    State(service): State<Arc<ProtectionService>>,
    body: Result<Json<RateLimitUpdate>, JsonRejection>,
) -> Response {
    let Json(update) = match body {
        Ok(body) => body,
        Err(rejection) => return body_error(rejection),
    };

    match service.update_rate_limit(update.requests_per_minute, update.burst_size) {
        Ok(()) => Json(json!({ "message": "Rate limit configuration updated" })).into_response(),
        Err(err) => ApiError(err).into_response(),
    }
}

/// `GET /api/v1/circuit-breakers/`
pub async fn circuit_breakers(State(service): State<Arc<ProtectionService>>) -> Json<serde_json::Value> {
    Json(service.health().circuit_breaker_status())
}

/// `GET /metrics` exposition.
pub async fn metrics_exposition(State(service): State<Arc<ProtectionService>>) -> Response {
    match service.metrics().encode() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encoding failed: {err}"),
        )
            .into_response(),
    }
}

/// Demo target handlers driven by the protection layer.
pub mod demo {
    use super::*;

    pub async fn index() -> Json<serde_json::Value> {
        Json(json!({
            "message": "Welcome to the protection layer demo",
            "timestamp": Utc::now(),
        }))
    }

    pub async fn slow() -> Json<serde_json::Value> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Json(json!({ "message": "This is a slow endpoint", "duration": "2 seconds" }))
    }

    pub async fn error() -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "This endpoint always returns an error" })),
        )
            .into_response()
    }

    pub async fn echo(body: Result<Json<serde_json::Value>, JsonRejection>) -> Response {
        match body {
            Ok(Json(value)) => Json(json!({
                "message": "Echo endpoint",
                "received": value,
                "timestamp": Utc::now(),
            }))
            .into_response(),
            Err(rejection) => super::body_error(rejection),
        }
    }
}

/// JSON 404 fallback.
pub async fn not_found(uri: axum::http::Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not found", "path": uri.path() })),
    )
        .into_response()
}
