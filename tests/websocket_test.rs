//! WebSocket tunnelling through the proxy.

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use switchyard::config::ListenerConfig;
use switchyard::{proxy, BalancerKind, ProxyTarget, Router, RouterOptions};

async fn ws_router() -> Router {
    let backend = common::start_ws_echo_backend().await;
    let (lb, _) = BalancerKind::RoundRobin.build_with([
        ProxyTarget::new("echo", &format!("ws://{backend}")).unwrap(),
    ]);
    let router = Router::with_default_middleware(RouterOptions::default());
    router.get("/ws", [proxy(lb)]);
    router
}

fn short_drain() -> ListenerConfig {
    ListenerConfig {
        shutdown_timeout_secs: 1,
        ..ListenerConfig::default()
    }
}

#[tokio::test]
async fn test_echo_through_tunnel() {
    let server = common::spawn_router_with(ws_router().await, short_drain()).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 101);

    ws.send(Message::text("hello")).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_text().unwrap(), "hello");

    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(&reply.into_data()[..], &[1u8, 2, 3][..]);

    ws.close(None).await.unwrap();
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_plain_request_to_ws_target_is_forwarded() {
    let server = common::spawn_router_with(ws_router().await, short_drain()).await;

    // Not an upgrade: forwarded as plain HTTP, which the echo server rejects.
    let res = common::client().get(server.url("/ws")).send().await.unwrap();
    assert!(res.status().is_client_error() || res.status().is_server_error());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_tunnel() {
    let server = common::spawn_router_with(ws_router().await, short_drain()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", server.addr))
        .await
        .unwrap();
    ws.send(Message::text("ping")).await.unwrap();
    let _ = ws.next().await;

    server.stop().await.unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("tunnel stayed open after shutdown");
    assert!(matches!(next, None | Some(Err(_)) | Some(Ok(Message::Close(_)))));
}
