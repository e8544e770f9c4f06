//! Token checks on the real router.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use sessionlink_server::{router, AppState, ServerConfig};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TOKEN: &str = "s3cret";

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ServerConfig {
        auth_token: Some(TOKEN.to_string()),
        ..ServerConfig::default()
    };
    let state = Arc::new(AppState::new(config));
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn health_needs_no_token() {
    let addr = start_server().await;
    let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn api_requires_the_token() {
    let addr = start_server().await;
    let http = reqwest::Client::new();
    let url = format!("http://{addr}/api/sessions");

    let status = |r: reqwest::Response| r.status().as_u16();

    assert_eq!(status(http.get(&url).send().await.unwrap()), 401);
    assert_eq!(
        status(http.get(&url).bearer_auth("wrong").send().await.unwrap()),
        401
    );
    assert_eq!(
        status(http.get(&url).bearer_auth(TOKEN).send().await.unwrap()),
        200
    );
    assert_eq!(
        status(http.get(format!("{url}?token={TOKEN}")).send().await.unwrap()),
        200
    );
    // A stale header does not hide a valid query token.
    assert_eq!(
        status(
            http.get(format!("{url}?token={TOKEN}"))
                .bearer_auth("stale")
                .send()
                .await
                .unwrap()
        ),
        200
    );

    let claim = http
        .post(format!("http://{addr}/api/feedback/claim"))
        .json(&serde_json::json!({"session_id": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(claim.status(), 401);
}

#[tokio::test]
async fn websockets_accept_the_query_token() {
    let addr = start_server().await;

    assert!(connect_async(format!("ws://{addr}/ws/daemon")).await.is_err());

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/daemon?token={TOKEN}"))
        .await
        .unwrap();
    match ws.next().await {
        Some(Ok(Message::Text(text))) => {
            let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
            assert_eq!(frame["type"], "registered");
        }
        other => panic!("expected registered, got {other:?}"),
    }
}
