mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::util::ServiceExt;

use common::{body_json, get_as, json_request, test_router, test_settings, ADMIN_IP};

#[tokio::test]
async fn health_is_unconditional() {
    let (_service, router) = test_router(test_settings()).await;

    let response = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body.get("timestamp").is_some());
}

#[tokio::test]
async fn detailed_health_reports_checks_and_summary() {
    let (_service, router) = test_router(test_settings()).await;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health/detailed")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    // The uptime check fails right after startup; non-critical failures
    // still answer 200 with a degraded status.
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert!(body["checks"]["memory"]["status"].is_string());
    assert!(body["summary"]["total_checks"].as_u64().expect("summary") >= 2);
}

#[tokio::test]
async fn blacklist_lifecycle_through_the_api() {
    let (_service, router) = test_router(test_settings()).await;
    let victim = "203.0.113.10";

    // The address starts out usable.
    let response = router.clone().oneshot(get_as("/demo/", victim)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // Blacklist it.
    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/ip/blacklist",
            ADMIN_IP,
            serde_json::json!({ "ip": victim, "duration": 600 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // It shows up in the listing with an expiry.
    let response = router
        .clone()
        .oneshot(get_as("/api/v1/ip/blacklist", ADMIN_IP))
        .await
        .expect("response");
    let body = body_json(response).await;
    let listed = body["blacklisted"].as_array().expect("list");
    assert!(listed.iter().any(|e| e["key"] == victim && e["expires_at"].is_string()));

    // Its traffic is now refused.
    let response = router.clone().oneshot(get_as("/demo/", victim)).await.expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "BLOCKED_IP");

    // Remove and verify traffic flows again.
    let response = router
        .clone()
        .oneshot(json_request(
            "DELETE",
            &format!("/api/v1/ip/blacklist/{victim}"),
            ADMIN_IP,
            serde_json::json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router.clone().oneshot(get_as("/demo/", victim)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn blacklist_rejects_invalid_ip() {
    let (_service, router) = test_router(test_settings()).await;

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/ip/blacklist",
            ADMIN_IP,
            serde_json::json!({ "ip": "not-an-ip" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_KEY");
}

#[tokio::test]
async fn blacklist_rejects_malformed_body() {
    let (_service, router) = test_router(test_settings()).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/ip/blacklist")
        .header("x-forwarded-for", ADMIN_IP)
        .header("user-agent", common::BROWSER_UA)
        .header("content-type", "application/json")
        .body(Body::from("{\"ip\": "))
        .expect("request");

    let response = router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_BODY");
}

#[tokio::test]
async fn blacklisting_whitelisted_ip_conflicts() {
    let mut settings = test_settings();
    settings.protection.ip_whitelist.ips.push("198.51.100.9".to_string());
    let (_service, router) = test_router(settings).await;

    let response = router
        .oneshot(json_request(
            "POST",
            "/api/v1/ip/blacklist",
            ADMIN_IP,
            serde_json::json!({ "ip": "198.51.100.9" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "CONFLICT_WHITELISTED");
}

#[tokio::test]
async fn whitelist_add_and_remove() {
    let (service, router) = test_router(test_settings()).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/ip/whitelist",
            ADMIN_IP,
            serde_json::json!({ "ip": "203.0.113.11" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(service.reputation().is_whitelisted("203.0.113.11").await);

    let response = router
        .clone()
        .oneshot(get_as("/api/v1/ip/whitelist", ADMIN_IP))
        .await
        .expect("response");
    let body = body_json(response).await;
    assert!(body["whitelisted"]
        .as_array()
        .expect("list")
        .iter()
        .any(|e| e == "203.0.113.11"));

    let response = router
        .clone()
        .oneshot(json_request(
            "DELETE",
            "/api/v1/ip/whitelist/203.0.113.11",
            ADMIN_IP,
            serde_json::json!({}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!service.reputation().is_whitelisted("203.0.113.11").await);
}

#[tokio::test]
async fn rate_limit_config_round_trip() {
    let (_service, router) = test_router(test_settings()).await;

    let response = router
        .clone()
        .oneshot(get_as("/api/v1/config/rate-limits", ADMIN_IP))
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["requests_per_minute"], 600_000);
    assert_eq!(body["burst_size"], 10_000);

    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/config/rate-limits",
            ADMIN_IP,
            serde_json::json!({ "requests_per_minute": 120, "burst_size": 30 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .clone()
        .oneshot(get_as("/api/v1/config/rate-limits", ADMIN_IP))
        .await
        .expect("response");
    let body = body_json(response).await;
    assert_eq!(body["requests_per_minute"], 120);
    assert_eq!(body["burst_size"], 30);
}

#[tokio::test]
async fn invalid_rate_limit_update_keeps_old_config() {
    let (_service, router) = test_router(test_settings()).await;

    let response = router
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/v1/config/rate-limits",
            ADMIN_IP,
            serde_json::json!({ "requests_per_minute": 0, "burst_size": 30 }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_VALUE");

    let response = router
        .clone()
        .oneshot(get_as("/api/v1/config/rate-limits", ADMIN_IP))
        .await
        .expect("response");
    assert_eq!(body_json(response).await["requests_per_minute"], 600_000);
}

#[tokio::test]
async fn stats_endpoint_reports_traffic() {
    let (_service, router) = test_router(test_settings()).await;

    for _ in 0..3 {
        router
            .clone()
            .oneshot(get_as("/demo/", "203.0.113.12"))
            .await
            .expect("response");
    }

    let response = router
        .clone()
        .oneshot(get_as("/api/v1/stats", ADMIN_IP))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["total_requests"].as_u64().expect("total") >= 3);
    assert!(body["unique_keys"].as_u64().expect("unique") >= 1);
    assert!(body.get("requests_per_minute").is_some());
    assert!(body.get("error_rate").is_some());
}

#[tokio::test]
async fn circuit_breaker_state_is_exposed() {
    let (service, router) = test_router(test_settings()).await;
    // Run the checks once so the breakers have history.
    service.health().status().await;

    let response = router
        .oneshot(get_as("/api/v1/circuit-breakers/", ADMIN_IP))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["memory"]["state"], "closed");
    assert!(body["uptime"]["failure_count"].is_number());
}

#[tokio::test]
async fn unknown_route_returns_json_404() {
    let (_service, router) = test_router(test_settings()).await;

    let response = router
        .oneshot(get_as("/definitely/not/here", ADMIN_IP))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await;
    assert_eq!(body["error"], "Not found");
    assert_eq!(body["path"], "/definitely/not/here");
}
