//! Client SDK for a meshsock server: a reconnecting WebSocket socket that
//! shares [`meshsock_protocol`]'s [`Envelope`]/[`MessageCodec`] with the
//! server so wire compatibility is structural rather than duplicated.

#![forbid(unsafe_code)]

pub mod error;
pub mod reconnect;
pub mod socket;
pub mod upload;

pub use error::{ClientError, Result};
pub use meshsock_protocol::{Envelope, MessageCodec};
pub use reconnect::ReconnectConfig;
pub use socket::{ClientConfig, ClientReply, EventHandler, Socket};
pub use upload::{plan_upload, ChunkFrame, DEFAULT_CHUNK_SIZE};
