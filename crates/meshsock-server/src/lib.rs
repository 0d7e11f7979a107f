//! Real-time bidirectional messaging server: rooms, namespaces,
//! transparent encryption and pluggable cross-instance adapters, built on
//! [`meshsock_core`]'s connection primitives and [`meshsock_adapter`]'s
//! relay contract.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod server;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{ServerError, UpgradeRejection};
pub use server::{EventHandler, Server};
