//! Peer, room, namespace and heartbeat primitives underlying a meshsock
//! server: the connection lifecycle pieces described independently of any
//! particular transport or adapter backing.

#![forbid(unsafe_code)]

pub mod error;
pub mod heartbeat;
pub mod namespace;
pub mod peer;
pub mod room;
pub mod upload;

pub use error::{CoreError, Result};
pub use heartbeat::{spawn_heartbeat, BatchHeartbeatManager, HeartbeatHandle};
pub use namespace::{Middleware, MiddlewareResult, Namespace, NamespaceRegistry};
pub use peer::{ConnState, Handshake, OutboundFrame, Peer, PeerEvent, PeerHandle, ReplyFn, SharedCodec};
pub use room::RoomIndex;
pub use upload::{FileChunkMeta, Upload};

/// A fresh, server-instance-unique peer id.
pub fn new_peer_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A fresh server instance id, `"server-<uuid>"`.
pub fn new_server_id() -> String {
    format!("server-{}", uuid::Uuid::new_v4())
}
