//! End-to-end scenarios driven through real WebSocket connections
//! (`tokio-tungstenite`) against a server bound to an OS-assigned port.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use meshsock_adapter::MemoryAdapter;
use meshsock_core::{PeerHandle, ReplyFn};
use meshsock_server::{Server, ServerConfig};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

async fn start_server(mut config: ServerConfig) -> (Arc<Server>, String) {
    config.host = "127.0.0.1".to_string();
    let server = Server::new(config, Arc::new(MemoryAdapter::new())).unwrap();
    let addr = server.listen().await.unwrap();
    (server, format!("ws://{addr}/"))
}

async fn connect(url: &str) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let (stream, _) = connect_async(url).await.expect("client connect");
    stream
}

#[tokio::test]
async fn echo_with_callback() {
    let (server, url) = start_server(ServerConfig::default()).await;

    server
        .on(
            "ask",
            Arc::new(|_peer: PeerHandle, data: Value, reply: Option<ReplyFn>| -> BoxFuture {
                Box::pin(async move {
                    let reply = reply.expect("callbackId was set");
                    reply.call(serde_json::json!({"a": data["q"]})).await;
                })
            }),
        )
        .await;

    let mut client = connect(&url).await;
    client
        .send(Message::Text(
            r#"{"type":"event","event":"ask","data":{"q":"hi"},"callbackId":"c1"}"#.into(),
        ))
        .await
        .unwrap();

    let reply = client.next().await.unwrap().unwrap();
    let Message::Text(text) = reply else { panic!("expected text frame") };
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["type"], "callback");
    assert_eq!(parsed["callbackId"], "c1");
    assert_eq!(parsed["data"]["a"], "hi");
}

#[tokio::test]
async fn room_fanout_excludes_sender() {
    let (server, url) = start_server(ServerConfig::default()).await;

    let connected_ids: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let ids_for_listener = connected_ids.clone();
    server
        .on_connection(Box::new(move |peer_id: &str| {
            ids_for_listener.lock().unwrap().push(peer_id.to_string());
        }))
        .await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let peer_ids = connected_ids.lock().unwrap().clone();
    assert_eq!(peer_ids.len(), 3);

    for id in &peer_ids {
        server.join_room(id, "room-x").await;
    }

    let sender = &peer_ids[0];
    server
        .emit_to_room("room-x", "m", serde_json::json!({"n": 1}), Some(sender.as_str()))
        .await;

    // The two non-sending connections each observe the event.
    for client in [&mut b, &mut c] {
        let msg = tokio::time::timeout(Duration::from_millis(500), client.next())
            .await
            .expect("event within timeout")
            .unwrap()
            .unwrap();
        let Message::Text(text) = msg else { panic!("expected text frame") };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["event"], "m");
        assert_eq!(parsed["data"]["n"], 1);
    }

    // The sender sees nothing within a short window.
    let nothing = tokio::time::timeout(Duration::from_millis(200), a.next()).await;
    assert!(nothing.is_err(), "sender should not observe its own room emit");
}

#[tokio::test]
async fn encrypted_exchange_and_verbatim_binary() {
    let mut config = ServerConfig::default();
    config.encryption = Some(meshsock_server::config::EncryptionSettings {
        key: vec![7u8; 32],
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
            Arc::new(move |_peer: PeerHandle, data: Value, _reply: Option<ReplyFn>| -> BoxFuture {
                let received = received_for_handler.clone();
                Box::pin(async move {
                    *received.lock().await = Some(data);
                })
            }),
        )
        .await;

    let mut client = connect(&url).await;

    // Encrypt client-side with the same key/algorithm the server is
    // configured with, the way a real client would.
    let mut client_encryption = meshsock_crypto::Encryption::new(meshsock_crypto::EncryptionConfig {
        key: vec![7u8; 32],
        algorithm: Some(meshsock_crypto::Algorithm::parse("aes-256-gcm").unwrap()),
        enabled: true,
        cache_size: 100,
        cache_ttl: Duration::from_millis(60_000),
    })
    .unwrap();
    let envelope = serde_json::json!({"type": "event", "event": "chat", "data": {"msg": "secret"}}).to_string();
    let ciphertext = client_encryption.encrypt(&envelope).unwrap();
    client.send(Message::Text(ciphertext.into())).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let got = received.lock().await.clone();
    assert_eq!(got, Some(serde_json::json!({"msg": "secret"})));

    // A binary frame is passed through untouched; no decryption attempted.
    client.send(Message::Binary(vec![1, 2, 3, 4, 5])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn chunked_upload_reassembles_exactly_once() {
    let received: Arc<tokio::sync::Mutex<Vec<Value>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let (server, url) = start_server(ServerConfig::default()).await;

    let received_for_handler = received.clone();
    server
        .on(
            "file-upload",
            Arc::new(move |_peer: PeerHandle, data: Value, _reply: Option<ReplyFn>| -> BoxFuture {
                let received = received_for_handler.clone();
                Box::pin(async move {
                    received.lock().await.push(data);
                })
            }),
        )
        .await;

    let mut client = connect(&url).await;

    let total = 150 * 1024;
    let buffer: Vec<u8> = (0..total).map(|i| (i % 256) as u8).collect();
    let chunks: Vec<&[u8]> = vec![&buffer[0..64 * 1024], &buffer[64 * 1024..128 * 1024], &buffer[128 * 1024..total]];

    for (idx, chunk) in chunks.iter().enumerate() {
        let meta = serde_json::json!({
            "uploadId": "u1",
            "fileName": "f.bin",
            "fileSize": total,
            "chunkIndex": idx,
            "totalChunks": chunks.len(),
            "chunkSize": chunk.len(),
        });
        client
            .send(Message::Text(
                serde_json::json!({"type": "event", "event": "file-chunk", "data": meta}).to_string().into(),
            ))
            .await
            .unwrap();
        client.send(Message::Binary(chunk.to_vec())).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let events = received.lock().await;
    assert_eq!(events.len(), 1, "exactly one file-upload event");
    assert_eq!(events[0]["fileSize"], total);
    let bytes: Vec<u8> = events[0]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap() as u8)
        .collect();
    assert_eq!(bytes, buffer);
}

#[tokio::test]
async fn heartbeat_timeout_drops_unresponsive_peer() {
    let mut config = ServerConfig::default();
    config.ping_interval_ms = 200;
    config.ping_timeout_ms = 400;
    let (server, url) = start_server(config).await;

    let mut client = connect(&url).await;

    // Never reply to pings; just wait for the server to give up and close.
    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "server should close within 1s of a missed pong");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connection_count(), 0);
}

/// Requires a Redis instance reachable at `REDIS_URL` (default
/// `redis://127.0.0.1:6379`); not run in CI by default.
#[tokio::test]
#[ignore]
async fn cross_server_room_broadcast_via_redis() {
    use meshsock_adapter::{RedisAdapter, RedisAdapterConfig};

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let prefix = format!("meshsock-test-{}", std::process::id());

    let adapter1 = RedisAdapter::connect(RedisAdapterConfig {
        url: url.clone(),
        prefix: prefix.clone(),
        heartbeat_interval: Duration::from_secs(5),
    })
    .await
    .expect("connect to redis for s1");
    let adapter2 = RedisAdapter::connect(RedisAdapterConfig {
        url,
        prefix,
        heartbeat_interval: Duration::from_secs(5),
    })
    .await
    .expect("connect to redis for s2");

    let mut config1 = ServerConfig::default();
    config1.host = "127.0.0.1".to_string();
    let server1 = Server::new(config1, Arc::new(adapter1)).unwrap();
    let addr1 = server1.listen().await.unwrap();

    let mut config2 = ServerConfig::default();
    config2.host = "127.0.0.1".to_string();
    let server2 = Server::new(config2, Arc::new(adapter2)).unwrap();
    let addr2 = server2.listen().await.unwrap();

    let connected1: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let connected1_for_listener = connected1.clone();
    server1
        .on_connection(Box::new(move |peer_id: &str| {
            connected1_for_listener.lock().unwrap().push(peer_id.to_string());
        }))
        .await;
    let connected2: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let connected2_for_listener = connected2.clone();
    server2
        .on_connection(Box::new(move |peer_id: &str| {
            connected2_for_listener.lock().unwrap().push(peer_id.to_string());
        }))
        .await;

    let mut a = connect(&format!("ws://{addr1}/")).await;
    let mut b = connect(&format!("ws://{addr2}/")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let a_id = connected1.lock().unwrap()[0].clone();
    server1.join_room(&a_id, "room-y").await;
    let b_id = connected2.lock().unwrap()[0].clone();
    server2.join_room(&b_id, "room-y").await;

    server1
        .emit_to_room("room-y", "m", serde_json::json!({"k": 1}), Some(a_id.as_str()))
        .await;

    let msg = tokio::time::timeout(Duration::from_secs(2), b.next())
        .await
        .expect("b observes the relayed event")
        .unwrap()
        .unwrap();
    let Message::Text(text) = msg else { panic!("expected text frame") };
    let parsed: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed["event"], "m");
    assert_eq!(parsed["data"]["k"], 1);

    let nothing = tokio::time::timeout(Duration::from_millis(200), a.next()).await;
    assert!(nothing.is_err(), "the sender itself observes nothing");
}
