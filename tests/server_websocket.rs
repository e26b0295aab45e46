use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use transcription_bridge::auth::DevTokenVerifier;
use transcription_bridge::config::ConfigSet;
use transcription_bridge::metrics::BridgeMetrics;
use transcription_bridge::recognition::MockRecognitionBackend;
use transcription_bridge::server::run_with_listener;
use transcription_bridge::session::BridgeContext;

fn context() -> Arc<BridgeContext> {
    let config = ConfigSet::load_from_dir("config").expect("cfg");
    Arc::new(BridgeContext::new(
        &config,
        Arc::new(MockRecognitionBackend::default()),
        Arc::new(DevTokenVerifier),
        BridgeMetrics::new().expect("metrics"),
    ))
}

#[tokio::test]
#[ignore]
async fn websocket_session_streams_and_closes_normally() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = run_with_listener(listener, "/ws/transcribe", context()).await;
    });

    let (mut ws, _resp) = connect_async(format!("ws://{}/ws/transcribe", addr))
        .await
        .expect("connect ok");

    ws.send(Message::Text(r#"{"token":"u-1:alice@example.com"}"#.into()))
        .await
        .expect("send init");
    for _ in 0..5 {
        ws.send(Message::Binary(vec![0u8; 3200])).await.expect("send audio");
    }
    ws.send(Message::Text(r#"{"type":"stop"}"#.into())).await.expect("send stop");

    let mut types = Vec::new();
    let mut close_code = None;
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(txt)) => {
                let value: serde_json::Value = serde_json::from_str(&txt).expect("json");
                types.push(value["type"].as_str().unwrap_or_default().to_string());
            }
            Ok(Message::Close(frame)) => {
                close_code = frame.map(|f| u16::from(f.code));
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    assert_eq!(types.first().map(String::as_str), Some("ready"));
    assert!(types.iter().any(|t| t == "transcript"));
    assert!(!types.iter().any(|t| t == "error"));
    assert_eq!(close_code, Some(1000));
}

#[tokio::test]
#[ignore]
async fn websocket_without_token_gets_auth_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = run_with_listener(listener, "/ws/transcribe", context()).await;
    });

    let (mut ws, _resp) = connect_async(format!("ws://{}/ws/transcribe", addr))
        .await
        .expect("connect ok");
    ws.send(Message::Text("{}".into())).await.expect("send init");

    match ws.next().await {
        Some(Ok(Message::Text(txt))) => assert!(txt.contains("\"type\":\"error\"")),
        other => panic!("expected error message, got {other:?}"),
    }
    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected close frame, got {other:?}"),
    }
}
