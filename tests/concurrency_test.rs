mod common;

use axum::http::StatusCode;
use tower::util::ServiceExt;

use common::{get_as, random_ip, test_router, test_settings};

/// Concurrent traffic from many keys is admitted independently and every
/// outcome lands in the monitor.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_keys_do_not_interfere() {
    let (service, router) = test_router(test_settings()).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let router = router.clone();
        let ip = random_ip();
        handles.push(tokio::spawn(async move {
            let mut ok = 0usize;
            for _ in 0..10 {
                let response = router
                    .clone()
                    .oneshot(get_as("/demo/", &ip))
                    .await
                    .expect("response");
                if response.status() == StatusCode::OK {
                    ok += 1;
                }
            }
            ok
        }));
    }

    let mut admitted = 0usize;
    for handle in handles {
        admitted += handle.await.expect("task");
    }

    // Limits are generous in the test settings, so everything is admitted.
    assert_eq!(admitted, 160);
    assert!(service.monitor().stats().total_requests >= 160);
}

/// One key hammered concurrently is capped at its burst; concurrent calls
/// never over-admit.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_burst_is_not_over_admitted() {
    let mut settings = test_settings();
    settings.protection.rate_limit.requests_per_minute = 60;
    settings.protection.rate_limit.burst_size = 10;
    let (_service, router) = test_router(settings).await;

    let mut handles = Vec::new();
    for _ in 0..15 {
        let router = router.clone();
        handles.push(tokio::spawn(async move {
            let response = router
                .oneshot(get_as("/demo/", "192.0.2.200"))
                .await
                .expect("response");
            response.status() == StatusCode::OK
        }));
    }

    let mut admitted = 0usize;
    for handle in handles {
        if handle.await.expect("task") {
            admitted += 1;
        }
    }

    // Exactly the burst, with one grace admission in case a refill tick
    // lands inside the test run.
    assert!((10..=11).contains(&admitted), "admitted {admitted}");
}
