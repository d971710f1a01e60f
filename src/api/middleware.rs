use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{Decision, Denial, RequestMeta};
use crate::service::ProtectionService;

/// Build the framework-independent request view from an axum request.
fn request_meta(req: &Request) -> RequestMeta {
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();

    let mut meta = RequestMeta::new(req.method().as_str(), req.uri().path(), remote_addr);
    meta.query = req.uri().query().unwrap_or_default().to_string();
    meta.content_length = req
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    for (name, value) in req.headers() {
        meta.set_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }

    meta
}

fn denial_response(denial: &Denial) -> Response {
    let mut body = json!({
        "error": denial.error,
        "code": denial.code.as_str(),
    });
    if let Some(reason) = &denial.reason {
        body["reason"] = json!(reason);
    }
    if let Some(confidence) = denial.confidence {
        body["confidence"] = json!(confidence);
    }
    if let Some(indicators) = &denial.indicators {
        body["indicators"] = json!(indicators);
    }

    let status = StatusCode::from_u16(denial.status).unwrap_or(StatusCode::FORBIDDEN);
    (status, Json(body)).into_response()
}

/// Protection middleware: every request on a protected route runs through
/// the decision pipeline; outcomes, denials included, are recorded.
pub async fn protection_middleware(
    State(service): State<Arc<ProtectionService>>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let meta = request_meta(&req);
    let key = meta.client_key();
    let request_id = Uuid::new_v4();

    let span = tracing::info_span!(
        "request",
        %request_id,
        key = %key,
        method = %meta.method,
        path = %meta.path,
    );

    async move {
        match service.pipeline().check(&meta).await {
            Decision::Allow { whitelisted, degraded } => {
                if degraded {
                    tracing::warn!(key = %key, "admitted while remote store degraded");
                }
                if whitelisted {
                    tracing::debug!(key = %key, "whitelisted key bypassed protection stages");
                }
                let response = next.run(req).await;
                service
                    .pipeline()
                    .record_outcome(&key, &meta, response.status().as_u16(), started.elapsed());
                response
            }
            Decision::Deny(denial) => {
                service
                    .pipeline()
                    .record_outcome(&key, &meta, denial.status, started.elapsed());
                denial_response(&denial)
            }
        }
    }
    .instrument(span)
    .await
}
