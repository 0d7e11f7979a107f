//! Cross-instance room membership sync and broadcast relay for meshsock.
//!
//! A server instance is fully functional with the in-process [`memory::MemoryAdapter`];
//! the [`redis::RedisAdapter`] and [`mongo::MongoAdapter`] let a fleet of instances
//! share room membership and relay broadcasts to each other's locally-connected peers.

#![forbid(unsafe_code)]

pub mod error;
pub mod memory;
pub mod mongo;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{AdapterError, Result};
pub use memory::MemoryAdapter;
pub use mongo::{MongoAdapter, MongoAdapterConfig};
pub use redis::{RedisAdapter, RedisAdapterConfig};

/// A broadcast relayed through an adapter: either server-wide or scoped to a
/// single room, with an optional peer excluded (typically the sender).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Event name.
    pub event: String,
    /// Event payload.
    pub data: Value,
    /// Room the message is scoped to, or `None` for a server-wide broadcast.
    pub room: Option<String>,
    /// Peer id to skip when fanning out locally (the originating sender).
    pub except_peer_id: Option<String>,
}

/// Callback invoked for every relayed message received from another server.
/// The adapter has already filtered out messages originating from `self`.
pub type RelayCallback = Arc<dyn Fn(RelayMessage) + Send + Sync>;

/// Cross-instance room membership and broadcast relay.
///
/// Implementations own their own connection lifecycle: [`Adapter::init`] opens
/// it, [`Adapter::close`] tears it down. All other methods may be called
/// freely in between. Errors from this trait are expected to be logged by the
/// caller and never treated as fatal to the connection that triggered them.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Open backing connections and register this server instance under `server_id`.
    async fn init(&self, server_id: &str) -> Result<()>;

    /// Tear down backing connections and unregister this server instance.
    async fn close(&self) -> Result<()>;

    /// Record that `peer_id` joined `room`.
    async fn add_peer_to_room(&self, peer_id: &str, room: &str) -> Result<()>;

    /// Record that `peer_id` left `room`.
    async fn remove_peer_from_room(&self, peer_id: &str, room: &str) -> Result<()>;

    /// Record that `peer_id` left every room it was in.
    async fn remove_peer_from_all_rooms(&self, peer_id: &str) -> Result<()>;

    /// All peer ids (across every instance) currently in `room`.
    async fn peers_in_room(&self, room: &str) -> Result<Vec<String>>;

    /// All rooms (across every instance) that `peer_id` currently belongs to.
    async fn rooms_for_peer(&self, peer_id: &str) -> Result<Vec<String>>;

    /// Relay `message` to every other server instance, server-wide.
    async fn broadcast(&self, message: RelayMessage) -> Result<()>;

    /// Relay `message` to every other server instance, scoped to `room`.
    async fn broadcast_to_room(&self, room: &str, message: RelayMessage) -> Result<()>;

    /// Register the callback invoked for messages relayed from other instances.
    /// Only one subscription is active at a time; a later call replaces the former.
    async fn subscribe(&self, callback: RelayCallback) -> Result<()>;

    /// Stop delivering to the subscribed callback.
    async fn unsubscribe(&self) -> Result<()>;

    /// Ids of every server instance currently registered, including self.
    async fn server_ids(&self) -> Result<Vec<String>>;

    /// Re-announce this server instance's liveness (renew its TTL/heartbeat record).
    async fn register_server(&self) -> Result<()>;

    /// Remove this server instance's liveness record ahead of a graceful shutdown.
    async fn unregister_server(&self) -> Result<()>;
}
