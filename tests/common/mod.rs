#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;

use edge_guard::api::create_router;
use edge_guard::config::Settings;
use edge_guard::ProtectionService;

/// Whitelisted operator address used by management API tests.
pub const ADMIN_IP: &str = "10.10.10.10";

pub const BROWSER_UA: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36";

/// Settings with limits generous enough that the tests drive only the
/// behavior under test. The operator address is whitelisted.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.protection.rate_limit.requests_per_minute = 600_000;
    settings.protection.rate_limit.burst_size = 10_000;
    settings.protection.ip_whitelist.ips = vec![ADMIN_IP.to_string()];
    settings
}

pub async fn test_router(settings: Settings) -> (Arc<ProtectionService>, Router) {
    let service = ProtectionService::new(settings).await.expect("build service");
    let router = create_router(service.clone());
    (service, router)
}

/// GET request attributed to `ip` with a browser User-Agent.
pub fn get_as(path: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("x-forwarded-for", ip)
        .header("user-agent", BROWSER_UA)
        .body(Body::empty())
        .expect("request")
}

/// JSON request attributed to `ip`.
pub fn json_request(method: &str, path: &str, ip: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("x-forwarded-for", ip)
        .header("user-agent", BROWSER_UA)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// Random documentation-range address so tests cannot collide on state.
pub fn random_ip() -> String {
    format!("192.0.2.{}", rand::random::<u8>())
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
