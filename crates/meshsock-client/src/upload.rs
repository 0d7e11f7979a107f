//! Chunked file upload: splits a buffer into `file-chunk` metadata/binary
//! frame pairs matching `meshsock-core`'s [`FileChunkMeta`] shape exactly,
//! so the server's own reassembly code is exercised unchanged.

use meshsock_core::FileChunkMeta;
use meshsock_protocol::Envelope;

/// Default chunk size: 64 KiB, matching the chunking used in the reference
/// end-to-end upload scenario.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// One `(metadata envelope, binary payload)` pair to send back-to-back.
pub struct ChunkFrame {
    /// The `file-chunk` event envelope to send first.
    pub meta: Envelope,
    /// The binary frame to send immediately after it.
    pub bytes: Vec<u8>,
}

/// Split `bytes` into `chunk_size`-sized pieces and build the
/// metadata/binary frame pairs an uploader sends, in order.
///
/// `chunk_size` of 0 is treated as [`DEFAULT_CHUNK_SIZE`]. A zero-length
/// `bytes` still produces exactly one chunk (size 0) so the server always
/// sees at least one `chunkIndex == 0` frame to start the upload.
pub fn plan_upload(upload_id: &str, file_name: &str, bytes: &[u8], chunk_size: usize) -> Vec<ChunkFrame> {
    let chunk_size = if chunk_size == 0 { DEFAULT_CHUNK_SIZE } else { chunk_size };
    let file_size = bytes.len() as u64;

    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[][..]]
    } else {
        bytes.chunks(chunk_size).collect()
    };
    let total_chunks = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(chunk_index, chunk)| {
            let meta = FileChunkMeta {
                upload_id: upload_id.to_string(),
                file_name: file_name.to_string(),
                file_size,
                chunk_index,
                total_chunks,
                chunk_size: chunk.len(),
            };
            let data = serde_json::to_value(&meta).expect("FileChunkMeta always serializes");
            ChunkFrame {
                meta: Envelope::event("file-chunk", data),
                bytes: chunk.to_vec(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_expected_chunk_count_and_sizes() {
        let bytes = vec![0u8; 150 * 1024];
        let frames = plan_upload("u1", "f.bin", &bytes, 64 * 1024);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].bytes.len(), 64 * 1024);
        assert_eq!(frames[1].bytes.len(), 64 * 1024);
        assert_eq!(frames[2].bytes.len(), 150 * 1024 - 2 * 64 * 1024);
    }

    #[test]
    fn metadata_matches_server_chunk_meta_shape() {
        let bytes = vec![1u8, 2, 3, 4, 5, 6];
        let frames = plan_upload("u1", "f.bin", &bytes, 3);
        assert_eq!(frames.len(), 2);
        let data = frames[0].meta.data.clone().unwrap();
        assert_eq!(data["uploadId"], "u1");
        assert_eq!(data["fileName"], "f.bin");
        assert_eq!(data["fileSize"], 6);
        assert_eq!(data["chunkIndex"], 0);
        assert_eq!(data["totalChunks"], 2);
        assert_eq!(data["chunkSize"], 3);
    }

    #[test]
    fn empty_buffer_still_produces_one_chunk() {
        let frames = plan_upload("u1", "empty.bin", &[], 64 * 1024);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes.len(), 0);
    }
}
