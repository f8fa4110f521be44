//! Live Update Channel over a real loopback socket.

mod support;

use futures::{SinkExt, StreamExt};
use mmdr_api::{ApiConfig, LiveConfig, RenderReply, ServerMessage};
use mmdr_core::{CacheStatus, Format};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use support::{BACKEND_SVG, TestApp};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn fast_live() -> LiveConfig {
    LiveConfig::default().with_cadence(Duration::from_millis(10), Duration::from_millis(20))
}

async fn start(app: &TestApp) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    client
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next application message, skipping control frames.
async fn recv(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn recv_reply(client: &mut Client) -> RenderReply {
    match recv(client).await {
        ServerMessage::RenderResult(reply) => reply,
        other => panic!("expected render-result, got {:?}", other),
    }
}

/// Wait for the server to drop the connection.
async fn expect_closed(client: &mut Client, within: Duration) {
    let closed = tokio::time::timeout(within, async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection still open");
}

#[tokio::test]
async fn test_ping_pong() {
    let app = TestApp::new(ApiConfig::default().with_live(fast_live()));
    let mut client = connect(start(&app).await).await;

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, ServerMessage::Pong);
    assert_eq!(app.state.sessions.len(), 1);
}

#[tokio::test]
async fn test_render_immediately_after_connect() {
    let app = TestApp::new(ApiConfig::default().with_live(fast_live()));
    let mut client = connect(start(&app).await).await;

    send(
        &mut client,
        json!({"type": "render", "mermaid": "graph TD\nA-->B", "format": "svg", "theme": "dark"}),
    )
    .await;
    let reply = recv_reply(&mut client).await;

    assert_eq!(reply.error, None);
    assert_eq!(reply.format, Some(Format::Svg));
    assert_eq!(reply.cache, Some(CacheStatus::Miss));
    assert_eq!(reply.svg.as_deref(), Some(BACKEND_SVG));
    assert_eq!(reply.width, Some(800));
    assert_eq!(reply.cache_key.map(|k| k.len()), Some(64));

    // Same diagram as PNG is derived from the cached SVG.
    send(&mut client, json!({"type": "render", "mermaid": "graph TD\nA-->B", "theme": "dark"})).await;
    let reply = recv_reply(&mut client).await;
    assert_eq!(reply.cache, Some(CacheStatus::HitDerived));
    assert!(reply.png_base64.is_some());
    assert_eq!(app.script.renders(), 1);
}

#[tokio::test]
async fn test_burst_is_coalesced_into_one_render() {
    let live = LiveConfig::default().with_cadence(Duration::from_millis(100), Duration::from_millis(250));
    let app = TestApp::new(ApiConfig::default().with_live(live));
    let mut client = connect(start(&app).await).await;

    for source in ["graph TD\nA", "graph TD\nA-->B", "graph TD\nA-->B-->C"] {
        send(&mut client, json!({"type": "render", "mermaid": source, "format": "svg"})).await;
    }

    let reply = recv_reply(&mut client).await;
    assert_eq!(reply.error, None);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(app.script.renders(), 1);
    assert_eq!(app.script.sources(), vec!["graph TD\nA-->B-->C".to_string()]);
}

#[tokio::test]
async fn test_spaced_commands_within_interval_render_once() {
    let live = LiveConfig::default().with_cadence(Duration::from_millis(100), Duration::from_millis(400));
    let app = TestApp::new(ApiConfig::default().with_live(live));
    let mut client = connect(start(&app).await).await;

    for source in ["graph TD\nA", "graph TD\nA-->B", "graph TD\nA-->B-->C"] {
        send(&mut client, json!({"type": "render", "mermaid": source, "format": "svg"})).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
    }

    let reply = recv_reply(&mut client).await;
    assert_eq!(reply.error, None);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(app.script.renders(), 1);
    assert_eq!(app.script.sources(), vec!["graph TD\nA-->B-->C".to_string()]);
}

#[tokio::test]
async fn test_rejections_keep_the_channel_open() {
    let live = LiveConfig {
        max_diagram_chars: 20,
        max_frame_bytes: 256,
        ..fast_live()
    };
    let app = TestApp::new(ApiConfig::default().with_live(live));
    let mut client = connect(start(&app).await).await;

    send(&mut client, json!({"type": "render"})).await;
    assert_eq!(recv_reply(&mut client).await.error.as_deref(), Some("mermaid code missing"));

    send(&mut client, json!({"type": "render", "mermaid": "graph TD\nA-->B-->C-->D-->E"})).await;
    assert_eq!(recv_reply(&mut client).await.error.as_deref(), Some("diagram too large"));

    send(&mut client, json!({"type": "render", "mermaid": "x".repeat(300)})).await;
    assert!(matches!(recv(&mut client).await, ServerMessage::Error { .. }));

    client.send(Message::Text("not json".into())).await.unwrap();
    match recv(&mut client).await {
        ServerMessage::Error { message } => assert!(message.starts_with("Invalid message")),
        other => panic!("expected error, got {:?}", other),
    }

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, ServerMessage::Pong);
    assert_eq!(app.script.renders(), 0);
}

#[tokio::test]
async fn test_backend_error_is_pushed_back() {
    let app = TestApp::new(ApiConfig::default().with_live(fast_live()));
    app.script.fail_renders_with("Lexical error on line 1");
    let mut client = connect(start(&app).await).await;

    send(&mut client, json!({"type": "render", "mermaid": "graph ??"})).await;
    let reply = recv_reply(&mut client).await;
    assert_eq!(
        reply.error.as_deref(),
        Some("Failed to convert mermaid to PNG: Lexical error on line 1")
    );

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, ServerMessage::Pong);
}

#[tokio::test]
async fn test_idle_session_is_terminated() {
    let live = fast_live()
        .with_ping_interval(Duration::ZERO)
        .with_idle_close(Duration::from_millis(200));
    let app = TestApp::new(ApiConfig::default().with_live(live));
    let (_stop, stop_rx) = watch::channel(false);
    let _tasks = app.state.spawn_background(stop_rx);
    let mut client = connect(start(&app).await).await;

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, ServerMessage::Pong);

    expect_closed(&mut client, Duration::from_secs(3)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.state.sessions.len(), 0);
}

#[tokio::test]
async fn test_unresponsive_session_is_terminated() {
    let live = fast_live()
        .with_ping_interval(Duration::from_millis(100))
        .with_idle_close(Duration::ZERO);
    let app = TestApp::new(ApiConfig::default().with_live(live));
    let (_stop, stop_rx) = watch::channel(false);
    let _tasks = app.state.spawn_background(stop_rx);
    let mut client = connect(start(&app).await).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(app.state.sessions.len(), 1);

    // Not polling the client means no pongs are sent.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(app.state.sessions.len(), 0);
    expect_closed(&mut client, Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_responsive_session_survives_pings() {
    let live = fast_live()
        .with_ping_interval(Duration::from_millis(100))
        .with_idle_close(Duration::ZERO);
    let app = TestApp::new(ApiConfig::default().with_live(live));
    let (_stop, stop_rx) = watch::channel(false);
    let _tasks = app.state.spawn_background(stop_rx);
    let mut client = connect(start(&app).await).await;

    // Polling answers pings automatically.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(600);
    while tokio::time::Instant::now() < deadline {
        let _ = tokio::time::timeout(Duration::from_millis(20), client.next()).await;
    }

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv(&mut client).await, ServerMessage::Pong);
    assert_eq!(app.state.sessions.len(), 1);
}
