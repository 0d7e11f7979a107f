//! Errors raised by the client socket: transport failures, protocol-level
//! rejections, and the ack/connect bookkeeping layered on top of them.

use thiserror::Error;

/// Errors from `meshsock-client`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying WebSocket transport failed.
    #[error(transparent)]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// Envelope encoding/decoding failure.
    #[error(transparent)]
    Protocol(#[from] meshsock_protocol::ProtocolError),
    /// Encryption configuration was invalid.
    #[error(transparent)]
    Encryption(#[from] meshsock_crypto::CryptoError),
    /// `emit`/`send_binary`/`upload_file` was called after the socket gave
    /// up reconnecting (its driver task has exited).
    #[error("socket is not connected")]
    NotConnected,
    /// An `emit_with_ack` call's correlated reply did not arrive before
    /// its deadline.
    #[error("no ack received within the configured timeout")]
    AckTimeout,
    /// The initial connect attempt exhausted `reconnect.max_retries`.
    #[error("failed to connect after exhausting retries: {0}")]
    ConnectFailed(String),
}

/// Convenience alias for this crate's `Result`.
pub type Result<T> = std::result::Result<T, ClientError>;
