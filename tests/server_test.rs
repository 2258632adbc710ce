//! Config-driven startup and graceful shutdown.

mod common;

use std::time::{Duration, Instant};

use axum::http::StatusCode;

use switchyard::config::{parse_config, ListenerConfig};
use switchyard::lifecycle::build_router;
use switchyard::{named, Router};

#[tokio::test]
async fn test_gateway_from_config() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let config = parse_config(&format!(
        r#"
        [[proxies]]
        pattern = "/api/*path"
        methods = ["GET"]
        balancer = "weighted"

        [[proxies.targets]]
        name = "a"
        url = "http://{a}"
        weight = 1.0

        [[proxies.targets]]
        name = "b"
        url = "http://{b}"
        weight = 0.0

        [[proxies.rewrite]]
        from = "/api/*"
        to = "/$1"
        "#
    ))
    .unwrap();

    let server = common::spawn_router(build_router(&config).unwrap()).await;
    let client = common::client();

    for _ in 0..5 {
        let res = client.get(server.url("/api/items")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("x-request-id"));
        // Zero weight is never picked.
        assert_eq!(res.text().await.unwrap(), "a GET /items");
    }

    let res = client.post(server.url("/api/items")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_in_flight_request_finishes_during_drain() {
    let router = Router::new();
    router.get("/slow", [named("slow", |ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ctx.text(StatusCode::OK, "done");
        })
    })]);
    let server = common::spawn_router(router).await;

    let request = tokio::spawn(common::client().get(server.url("/slow")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.stop().await.unwrap();
    let res = request.await.unwrap().unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "done");
}

#[tokio::test]
async fn test_drain_deadline_cancels_handlers() {
    let router = Router::new();
    router.get("/wait", [named("wait", |ctx| {
        Box::pin(async move {
            let token = ctx.cancellation().clone();
            token.cancelled().await;
            ctx.text(StatusCode::SERVICE_UNAVAILABLE, "cancelled");
        })
    })]);
    let config = ListenerConfig {
        shutdown_timeout_secs: 1,
        ..ListenerConfig::default()
    };
    let server = common::spawn_router_with(router, config).await;

    let request = tokio::spawn(common::client().get(server.url("/wait")).send());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    server.stop().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "stopped before the deadline: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "drain overran: {elapsed:?}");

    if let Ok(Ok(res)) = request.await {
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
