//! Errors raised by the peer/room/namespace primitives.

use thiserror::Error;

/// Errors from `meshsock-core`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The named room has no such member, or the peer is not a member.
    #[error("peer {peer} is not in room {room}")]
    NotInRoom {
        /// Offending peer id.
        peer: String,
        /// Offending room name.
        room: String,
    },
    /// A file-chunk frame referenced an unknown or already-completed upload.
    #[error("no pending upload {0}")]
    UnknownUpload(String),
    /// A chunk was appended to an upload whose count does not match the
    /// declared `totalChunks`.
    #[error("chunk index {index} out of range for upload {upload_id} (total {total})")]
    ChunkOutOfRange {
        /// Upload the chunk was addressed to.
        upload_id: String,
        /// Chunk index that was rejected.
        index: usize,
        /// Declared total chunk count.
        total: usize,
    },
    /// Encoding/decoding failure surfaced from the protocol layer.
    #[error(transparent)]
    Protocol(#[from] meshsock_protocol::ProtocolError),
}

/// Convenience alias for this crate's `Result`.
pub type Result<T> = std::result::Result<T, CoreError>;
