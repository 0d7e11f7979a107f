//! End-to-end checks of [`meshsock_client::Socket`] against a real
//! `meshsock-server` bound to an OS-assigned port, mirroring the
//! server-side scenarios in `meshsock-server/tests/scenarios.rs` from the
//! client's point of view.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use meshsock_adapter::MemoryAdapter;
use meshsock_client::{ClientConfig, ClientReply, EventHandler, Socket};
use meshsock_core::{PeerHandle, ReplyFn};
use meshsock_server::{Server, ServerConfig};
use serde_json::Value;

type ServerBoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

async fn start_server(mut config: ServerConfig) -> (Arc<Server>, String) {
    config.host = "127.0.0.1".to_string();
    let server = Server::new(config, Arc::new(MemoryAdapter::new())).unwrap();
    let addr = server.listen().await.unwrap();
    (server, format!("ws://{addr}/"))
}

#[tokio::test]
async fn emit_with_ack_round_trips_through_a_real_server() {
    let (server, url) = start_server(ServerConfig::default()).await;
    server
        .on(
            "ask",
            Arc::new(|_peer: PeerHandle, data: Value, reply: Option<ReplyFn>| -> ServerBoxFuture {
                Box::pin(async move {
                    reply.expect("callbackId set").call(serde_json::json!({"a": data["q"]})).await;
                })
            }),
        )
        .await;

    let client = Socket::connect(ClientConfig {
        url,
        ..Default::default()
    })
    .await
    .expect("connect");

    let reply = client.emit_with_ack("ask", serde_json::json!({"q": "hi"})).await.unwrap();
    assert_eq!(reply["a"], "hi");
}

#[tokio::test]
async fn broadcast_reaches_the_client() {
    let (server, url) = start_server(ServerConfig::default()).await;

    let client = Socket::connect(ClientConfig {
        url,
        ..Default::default()
    })
    .await
    .expect("connect");

    let received: Arc<tokio::sync::Mutex<Option<Value>>> = Arc::new(tokio::sync::Mutex::new(None));
    let received_for_handler = received.clone();
    let handler: EventHandler = Arc::new(move |data: Value, _reply: Option<ClientReply>| {
        let received = received_for_handler.clone();
        Box::pin(async move {
            *received.lock().await = Some(data);
        })
    });
    client.on("note", handler).await;

    // Wait for the connection to register before broadcasting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connection_count(), 1);

    server.broadcast("note", serde_json::json!({"n": 7}), None).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(received.lock().await.clone(), Some(serde_json::json!({"n": 7})));
}

#[tokio::test]
async fn chunked_upload_reaches_the_server_as_one_event() {
    let received: Arc<tokio::sync::Mutex<Vec<Value>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let (server, url) = start_server(ServerConfig::default()).await;

    let received_for_handler = received.clone();
    server
        .on(
            "file-upload",
            Arc::new(move |_peer: PeerHandle, data: Value, _reply: Option<ReplyFn>| -> ServerBoxFuture {
                let received = received_for_handler.clone();
                Box::pin(async move {
                    received.lock().await.push(data);
                })
            }),
        )
        .await;

    let client = Socket::connect(ClientConfig {
        url,
        ..Default::default()
    })
    .await
    .expect("connect");

    let total = 150 * 1024;
    let buffer: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
    client.upload_file("f.bin", &buffer, 64 * 1024).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let events = received.lock().await;
    assert_eq!(events.len(), 1, "exactly one file-upload event");
    assert_eq!(events[0]["fileSize"], total);
}

#[tokio::test]
async fn encrypted_emit_is_decrypted_transparently_by_the_server() {
    let mut config = ServerConfig::default();
    config.encryption = Some(meshsock_server::config::EncryptionSettings {
        key: vec![9u8; 32],
        algorithm: "aes-256-gcm".to_string(),
        enabled: true,
        cache_size: 100,
        cache_ttl_ms: 60_000,
    });
    let (server, url) = start_server(config).await;

    let received: Arc<tokio::sync::Mutex<Option<Value>>> = Arc::new(tokio::sync::Mutex::new(None));
    let received_for_handler = received.clone();
    server
        .on(
            "chat",
            Arc::new(move |_peer: PeerHandle, data: Value, _reply: Option<ReplyFn>| -> ServerBoxFuture {
                let received = received_for_handler.clone();
                Box::pin(async move {
                    *received.lock().await = Some(data);
                })
            }),
        )
        .await;

    let client = Socket::connect(ClientConfig {
        url,
        encryption: Some(meshsock_crypto::EncryptionConfig {
            key: vec![9u8; 32],
            algorithm: Some(meshsock_crypto::Algorithm::parse("aes-256-gcm").unwrap()),
            enabled: true,
            cache_size: 100,
            cache_ttl: Duration::from_millis(60_000),
        }),
        ..Default::default()
    })
    .await
    .expect("connect");

    client.emit("chat", serde_json::json!({"msg": "secret"})).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let got = received.lock().await.clone();
    assert_eq!(got, Some(serde_json::json!({"msg": "secret"})));
}

/// The client never replies to a ping; the server's heartbeat timeout
/// disconnects it, and the client observes this through `on_disconnect`.
#[tokio::test]
async fn server_heartbeat_timeout_is_observed_as_a_disconnect() {
    let mut config = ServerConfig::default();
    config.ping_interval_ms = 200;
    config.ping_timeout_ms = 400;
    let (_server, url) = start_server(config).await;

    // A socket that never answers pings: built directly against the raw
    // transport so we can withhold pongs, bypassing the SDK's own
    // (correct) automatic pong reply.
    let (mut raw, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    use futures::StreamExt;
    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match raw.next().await {
                Some(Ok(tokio_tungstenite::tungstenite::Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

/// The SDK socket itself does answer pings, so it never gets dropped for
/// heartbeat timeout — this exercises `on_disconnect`/reconnect the other
/// way: the server is told to close the connection outright, and the
/// client's driver loop is expected to notice, fire `on_disconnect`, and
/// reconnect on its own using the default backoff.
#[tokio::test]
async fn socket_reconnects_after_server_drops_the_connection() {
    let (server, url) = start_server(ServerConfig::default()).await;
    let client = Socket::connect(ClientConfig {
        url,
        reconnect: meshsock_client::ReconnectConfig::new(5, Duration::from_millis(50), Duration::from_millis(200), 0.0),
        ..Default::default()
    })
    .await
    .expect("connect");

    let disconnected = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let disconnected_for_listener = disconnected.clone();
    client.on_disconnect(move |_reason| {
        disconnected_for_listener.store(true, std::sync::atomic::Ordering::Release);
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.connection_count(), 1);
    server.close().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while !disconnected.load(std::sync::atomic::Ordering::Acquire) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("on_disconnect should fire");

    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("socket should reconnect on its own");
}
