//! Redis-backed adapter: room membership as TTL'd keys, relay over pub/sub.
//!
//! Grounded in the same connection-manager-over-`redis::Client` style used
//! by the file-cache example in the retrieval pack: one multiplexed
//! connection for ordinary commands, one dedicated connection subscribed to
//! channels (a subscribed connection cannot issue other commands).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::{Adapter, AdapterError, RelayCallback, RelayMessage, Result};

/// Default key/channel prefix, matching the spec's own default adapter naming.
pub const DEFAULT_PREFIX: &str = "ws";

fn broadcast_channel(prefix: &str) -> String {
    format!("{prefix}:broadcast")
}

fn room_channel_pattern(prefix: &str) -> String {
    format!("{prefix}:room:*")
}

fn room_channel(prefix: &str, room: &str) -> String {
    format!("{prefix}:room:{room}")
}

fn room_members_key(prefix: &str, room: &str, peer_id: &str) -> String {
    format!("{prefix}:room:{room}:{peer_id}")
}

fn peer_rooms_key(prefix: &str, peer_id: &str) -> String {
    format!("{prefix}:peer:{peer_id}:rooms")
}

fn server_key(prefix: &str, server_id: &str) -> String {
    format!("{prefix}:servers:{server_id}")
}

#[derive(Debug, Serialize, Deserialize)]
struct RelayEnvelope {
    server_id: String,
    message: RelayMessage,
}

/// Configuration for [`RedisAdapter::connect`].
#[derive(Debug, Clone)]
pub struct RedisAdapterConfig {
    /// Redis connection URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// Key/channel prefix; defaults to [`DEFAULT_PREFIX`] (`"ws"`).
    pub prefix: String,
    /// Heartbeat interval driving TTL renewal; room/server keys expire at `3 * heartbeat_interval`.
    pub heartbeat_interval: Duration,
}

impl Default for RedisAdapterConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

struct Subscription {
    callback: RelayCallback,
    task: JoinHandle<()>,
}

/// Cross-instance adapter backed by Redis keyspace ops and pub/sub.
pub struct RedisAdapter {
    client: redis::Client,
    conn: Mutex<MultiplexedConnection>,
    server_id: Mutex<String>,
    prefix: String,
    ttl_seconds: i64,
    heartbeat_interval: Duration,
    subscription: Mutex<Option<Subscription>>,
}

impl RedisAdapter {
    /// Open the command connection; the pub/sub connection is opened lazily on `subscribe`.
    pub async fn connect(config: RedisAdapterConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            conn: Mutex::new(conn),
            server_id: Mutex::new(String::new()),
            prefix: config.prefix,
            ttl_seconds: 3 * config.heartbeat_interval.as_secs() as i64,
            heartbeat_interval: config.heartbeat_interval,
            subscription: Mutex::new(None),
        })
    }

    async fn current_server_id(&self) -> String {
        self.server_id.lock().await.clone()
    }
}

#[async_trait]
impl Adapter for RedisAdapter {
    async fn init(&self, server_id: &str) -> Result<()> {
        *self.server_id.lock().await = server_id.to_string();
        self.register_server().await
    }

    async fn close(&self) -> Result<()> {
        self.unsubscribe().await?;
        self.unregister_server().await
    }

    async fn add_peer_to_room(&self, peer_id: &str, room: &str) -> Result<()> {
        let server_id = self.current_server_id().await;
        let mut conn = self.conn.lock().await;
        let () = conn
            .set_ex(
                room_members_key(&self.prefix, room, peer_id),
                &server_id,
                self.ttl_seconds as u64,
            )
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;

        let rooms_key = peer_rooms_key(&self.prefix, peer_id);
        let raw: Option<String> = conn
            .get(&rooms_key)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        let mut rooms: Vec<String> = raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        if !rooms.iter().any(|r| r == room) {
            rooms.push(room.to_string());
        }
        let encoded = serde_json::to_string(&rooms)?;
        let () = conn
            .set_ex(&rooms_key, encoded, self.ttl_seconds as u64)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn remove_peer_from_room(&self, peer_id: &str, room: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .del(room_members_key(&self.prefix, room, peer_id))
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;

        let rooms_key = peer_rooms_key(&self.prefix, peer_id);
        let raw: Option<String> = conn
            .get(&rooms_key)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        let mut rooms: Vec<String> = raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        rooms.retain(|r| r != room);
        if rooms.is_empty() {
            let _: () = conn
                .del(&rooms_key)
                .await
                .map_err(|e| AdapterError::Backend(e.to_string()))?;
        } else {
            let encoded = serde_json::to_string(&rooms)?;
            let () = conn
                .set_ex(&rooms_key, encoded, self.ttl_seconds as u64)
                .await
                .map_err(|e| AdapterError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn remove_peer_from_all_rooms(&self, peer_id: &str) -> Result<()> {
        let rooms = self.rooms_for_peer(peer_id).await?;
        for room in rooms {
            self.remove_peer_from_room(peer_id, &room).await?;
        }
        Ok(())
    }

    async fn peers_in_room(&self, room: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let pattern = format!("{}:room:{}:*", self.prefix, room);
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        let key_prefix = format!("{}:room:{}:", self.prefix, room);
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&key_prefix).map(|s| s.to_string()))
            .collect())
    }

    async fn rooms_for_peer(&self, peer_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .get(peer_rooms_key(&self.prefix, peer_id))
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(raw
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default())
    }

    async fn broadcast(&self, message: RelayMessage) -> Result<()> {
        let envelope = RelayEnvelope {
            server_id: self.current_server_id().await,
            message,
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .publish(broadcast_channel(&self.prefix), payload)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn broadcast_to_room(&self, room: &str, message: RelayMessage) -> Result<()> {
        let envelope = RelayEnvelope {
            server_id: self.current_server_id().await,
            message,
        };
        let payload = serde_json::to_string(&envelope)?;
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .publish(room_channel(&self.prefix, room), payload)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, callback: RelayCallback) -> Result<()> {
        let mut guard = self.subscription.lock().await;
        if let Some(existing) = guard.take() {
            existing.task.abort();
        }

        let client = self.client.clone();
        let self_id = self.current_server_id().await;
        let broadcast_channel = broadcast_channel(&self.prefix);
        let room_pattern = room_channel_pattern(&self.prefix);
        let cb = callback.clone();
        let task = tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!(error = %e, "redis adapter: failed to open pub/sub connection");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&broadcast_channel).await {
                tracing::error!(error = %e, "redis adapter: subscribe to broadcast channel failed");
                return;
            }
            if let Err(e) = pubsub.psubscribe(&room_pattern).await {
                tracing::error!(error = %e, "redis adapter: psubscribe to room channels failed");
                return;
            }

            let mut stream = pubsub.on_message();
            use futures::StreamExt;
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "redis adapter: malformed pub/sub payload");
                        continue;
                    }
                };
                let envelope: RelayEnvelope = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        tracing::warn!(error = %e, "redis adapter: undecodable relay envelope");
                        continue;
                    }
                };
                if envelope.server_id == self_id {
                    continue;
                }
                cb(envelope.message);
            }
        });

        *guard = Some(Subscription { callback, task });
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        let mut guard = self.subscription.lock().await;
        if let Some(sub) = guard.take() {
            sub.task.abort();
        }
        Ok(())
    }

    async fn server_ids(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().await;
        let pattern = format!("{}:servers:*", self.prefix);
        let keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        let key_prefix = format!("{}:servers:", self.prefix);
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&key_prefix).map(|s| s.to_string()))
            .collect())
    }

    async fn register_server(&self) -> Result<()> {
        let server_id = self.current_server_id().await;
        let mut conn = self.conn.lock().await;
        let () = conn
            .set_ex(server_key(&self.prefix, &server_id), "1", self.ttl_seconds as u64)
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn unregister_server(&self) -> Result<()> {
        let server_id = self.current_server_id().await;
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .del(server_key(&self.prefix, &server_id))
            .await
            .map_err(|e| AdapterError::Backend(e.to_string()))?;
        Ok(())
    }
}

/// Spawns a periodic task renewing this server's and its rooms' TTLs every
/// `heartbeat_interval`, so soft state doesn't expire while the server is
/// still alive.
pub fn spawn_ttl_renewal(adapter: Arc<RedisAdapter>) -> JoinHandle<()> {
    let interval = adapter.heartbeat_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = adapter.register_server().await {
                tracing::warn!(error = %e, "redis adapter: TTL renewal failed");
            }
        }
    })
}
