//! Chunked binary file-upload reassembly (`file-chunk` metadata frames
//! followed by binary frames).

use std::collections::HashMap;
use std::time::Instant;

/// Inactivity timeout after which an in-progress upload is abandoned.
pub const UPLOAD_INACTIVITY_TIMEOUT_SECS: u64 = 30;

/// Metadata carried by a `file-chunk` event frame.
///
/// Shared verbatim with `meshsock-client`'s uploader so both ends agree on
/// the wire shape by construction rather than by convention.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkMeta {
    /// Correlates this chunk (and its sibling metadata frames) to one upload.
    pub upload_id: String,
    /// Original file name, as reported by the sender.
    pub file_name: String,
    /// Total declared size of the reassembled file, in bytes.
    pub file_size: u64,
    /// Zero-based index of this chunk.
    pub chunk_index: usize,
    /// Total number of chunks the sender will send.
    pub total_chunks: usize,
    /// Size of this particular chunk, in bytes (informational).
    pub chunk_size: usize,
}

/// One in-progress upload, owned by the [`crate::Peer`] that is receiving it.
pub struct Upload {
    /// Opaque id correlating chunk metadata to binary frames.
    pub upload_id: String,
    /// Original file name.
    pub file_name: String,
    /// Declared total byte length.
    pub total_bytes: u64,
    /// Declared total chunk count.
    pub total_chunks: usize,
    /// Chunks received so far, keyed by index.
    received: HashMap<usize, Vec<u8>>,
    /// When this upload (or its most recent chunk) was last touched.
    last_activity: Instant,
}

impl Upload {
    /// Start tracking a new upload from its `chunkIndex == 0` metadata frame.
    pub fn new(meta: &FileChunkMeta) -> Self {
        Self {
            upload_id: meta.upload_id.clone(),
            file_name: meta.file_name.clone(),
            total_bytes: meta.file_size,
            total_chunks: meta.total_chunks,
            received: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    /// Refresh the inactivity timer; called on every `file-chunk` metadata
    /// frame belonging to this upload.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Whether this upload has been idle longer than
    /// [`UPLOAD_INACTIVITY_TIMEOUT_SECS`].
    pub fn is_stale(&self) -> bool {
        self.last_activity.elapsed().as_secs() >= UPLOAD_INACTIVITY_TIMEOUT_SECS
    }

    /// Number of chunks received so far.
    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    /// Append a chunk at `index`. Returns `true` if this completes the
    /// upload (`received_count == total_chunks`).
    pub fn append_chunk(&mut self, index: usize, bytes: Vec<u8>) -> bool {
        self.received.insert(index, bytes);
        self.touch();
        self.received_count() == self.total_chunks
    }

    /// Concatenate chunks `0..total_chunks` in index order. Returns `None`
    /// if any index in that range is missing.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.total_bytes as usize);
        for i in 0..self.total_chunks {
            out.extend_from_slice(self.received.get(&i)?);
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(total_chunks: usize, file_size: u64) -> FileChunkMeta {
        FileChunkMeta {
            upload_id: "u1".into(),
            file_name: "f.bin".into(),
            file_size,
            chunk_index: 0,
            total_chunks,
            chunk_size: 0,
        }
    }

    #[test]
    fn completes_and_assembles_in_order() {
        let mut upload = Upload::new(&meta(3, 9));
        assert!(!upload.append_chunk(1, vec![4, 5, 6]));
        assert!(!upload.append_chunk(0, vec![1, 2, 3]));
        assert!(upload.append_chunk(2, vec![7, 8, 9]));
        assert_eq!(upload.assemble().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn missing_chunk_fails_assembly() {
        let mut upload = Upload::new(&meta(3, 9));
        upload.append_chunk(0, vec![1, 2, 3]);
        upload.append_chunk(2, vec![7, 8, 9]);
        assert!(upload.assemble().is_none());
    }

    #[test]
    fn touch_resets_staleness() {
        let mut upload = Upload::new(&meta(2, 4));
        assert!(!upload.is_stale());
        upload.touch();
        assert!(!upload.is_stale());
    }
}
