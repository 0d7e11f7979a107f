//! One WebSocket-attached client: connection state, the emit/callback
//! surface, the send state machine, and upload reassembly.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use meshsock_crypto::Encryption;
use meshsock_protocol::cache::MessageCache;
use meshsock_protocol::{Envelope, MessageCodec};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};

use crate::error::{CoreError, Result};
use crate::upload::{FileChunkMeta, Upload};

/// Connection lifecycle. Terminal state is [`ConnState::Disconnected`]; a
/// new connection always gets a new [`Peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    /// Upgrade accepted, socket not yet reported open by the transport.
    Connecting = 0,
    /// Socket open; frames may be sent and received.
    Connected = 1,
    /// Socket closed or `disconnect()` called.
    Disconnected = 2,
}

impl From<u8> for ConnState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnState::Connecting,
            1 => ConnState::Connected,
            _ => ConnState::Disconnected,
        }
    }
}

/// A frame queued for the transport layer to actually write to the socket.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// A text (JSON, possibly encrypted) frame.
    Text(String),
    /// A raw binary frame.
    Binary(Vec<u8>),
    /// Ask the transport to close the socket with the given human-readable
    /// reason (used by heartbeat timeout and explicit disconnect).
    Close(String),
}

/// Handshake data captured at upgrade time, made available unchanged to
/// middleware and listeners.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    /// Raw query string.
    pub query: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Remote socket address, if known.
    pub remote_addr: Option<SocketAddr>,
    /// Request URL/path.
    pub url: String,
}

/// Cheaply cloneable handle to a peer's outbound channel and liveness
/// state. This is what other peers, [`crate::room::RoomIndex`], and the
/// heartbeat managers hold; the full [`Peer`] (callback table, uploads) is
/// owned exclusively by the task running its receive loop.
#[derive(Clone)]
pub struct PeerHandle {
    id: Arc<str>,
    tx: mpsc::Sender<OutboundFrame>,
    state: Arc<AtomicU8>,
    last_pong_millis: Arc<AtomicU64>,
    pong_notify: Arc<Notify>,
}

impl PeerHandle {
    /// This peer's opaque id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the peer is in the `Connected` state.
    pub fn is_connected(&self) -> bool {
        ConnState::from(self.state.load(Ordering::Acquire)) == ConnState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ConnState {
        self.state.load(Ordering::Acquire).into()
    }

    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Send already-serialized text, following the send state machine: if
    /// connected, write; if connecting or disconnected, drop silently
    /// (reconnect semantics are the client's concern; the bounded channel
    /// itself absorbs the brief window between accept and open).
    pub async fn send_raw(&self, text: String) {
        if self.state() == ConnState::Disconnected {
            return;
        }
        let _ = self.tx.send(OutboundFrame::Text(text)).await;
    }

    /// Send a raw binary frame.
    pub async fn send_binary(&self, bytes: Vec<u8>) {
        if self.state() == ConnState::Disconnected {
            return;
        }
        let _ = self.tx.send(OutboundFrame::Binary(bytes)).await;
    }

    /// Emit a named event with no callback correlation (fire-and-forget).
    /// Serializes with no encryption/cache — callers that need those pass
    /// an already-serialized string to [`PeerHandle::send_raw`] instead
    /// (this is what [`crate::room::RoomIndex::emit_to_room`] does, since
    /// it serializes once and reuses the string across many peers).
    pub async fn emit(&self, event: &str, data: Value) {
        let envelope = Envelope::event(event, data);
        if let Ok(text) = MessageCodec::serialize(&envelope, None) {
            self.send_raw(text).await;
        }
    }

    /// Ask the transport to close this peer's socket. Idempotent: once
    /// disconnected, further calls are no-ops.
    pub async fn request_disconnect(&self, reason: &str) {
        if self.state() == ConnState::Disconnected {
            return;
        }
        self.set_state(ConnState::Disconnected);
        let _ = self.tx.send(OutboundFrame::Close(reason.to_string())).await;
    }

    /// Record that a `pong` was received, for heartbeat liveness tracking.
    pub fn record_pong(&self) {
        self.last_pong_millis.store(now_millis(), Ordering::Relaxed);
        self.pong_notify.notify_waiters();
    }

    /// Milliseconds since the last recorded `pong` (or since creation, if
    /// none has arrived yet).
    pub fn millis_since_last_pong(&self) -> u64 {
        now_millis().saturating_sub(self.last_pong_millis.load(Ordering::Relaxed))
    }

    /// Resolve once a `pong` is recorded after this call.
    pub async fn wait_for_pong(&self) {
        self.pong_notify.notified().await;
    }
}

fn now_millis() -> u64 {
    // Monotonic-enough for heartbeat comparison purposes within one process
    // lifetime; avoids pulling in a wall-clock dependency for a liveness
    // check that only ever compares against itself.
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64
}

/// One-shot reply correlation slot for a request carrying `callbackId`.
type CallbackSlot = Box<dyn FnOnce(Value) + Send>;

/// Result of dispatching one inbound frame, handed to the namespace/server
/// listener-dispatch layer.
pub enum PeerEvent {
    /// A named event frame, optionally expecting a reply.
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        data: Value,
        /// Present iff the inbound envelope carried a `callbackId`.
        reply: Option<ReplyFn>,
    },
    /// A completed file upload.
    FileUpload {
        /// Correlating upload id.
        upload_id: String,
        /// Original file name.
        file_name: String,
        /// Declared total size.
        file_size: u64,
        /// Reassembled bytes.
        bytes: Vec<u8>,
    },
    /// An upload that could not complete (missing chunk at timeout).
    FileUploadError {
        /// Correlating upload id.
        upload_id: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A reply was delivered to a previously-registered callback; no
    /// further listener dispatch is needed.
    CallbackDelivered,
    /// Heartbeat frames are handled internally and produce no event.
    Heartbeat,
    /// A codec-level or listener-level error.
    Error(String),
}

/// Call exactly once to send a `{type: callback, callbackId, data}` reply.
pub struct ReplyFn {
    peer: PeerHandle,
    callback_id: String,
}

impl ReplyFn {
    /// Send the reply.
    pub async fn call(self, data: Value) {
        let envelope = Envelope::callback(self.callback_id, data);
        if let Ok(text) = MessageCodec::serialize(&envelope, None) {
            self.peer.send_raw(text).await;
        }
    }
}

/// Shared serialization context (encryption + message cache), owned by the
/// server and passed by reference into [`Peer`] and
/// [`crate::room::RoomIndex`] operations that need to serialize.
pub struct SharedCodec {
    /// Configured encryption, if any. `None` means encryption disabled.
    pub encryption: Option<Mutex<Encryption>>,
    /// Serialized-envelope cache, if configured.
    pub cache: Option<Mutex<MessageCache>>,
}

impl SharedCodec {
    /// No encryption, no cache.
    pub fn disabled() -> Self {
        Self {
            encryption: None,
            cache: None,
        }
    }

    fn serialize(&self, envelope: &Envelope) -> Result<String> {
        let mut enc_guard = self.encryption.as_ref().map(|m| m.lock().expect("encryption poisoned"));
        Ok(MessageCodec::serialize(envelope, enc_guard.as_deref_mut())?)
    }
}

/// One WebSocket connection: owns everything the receive loop needs —
/// callback correlation table, in-progress uploads, handshake data.
pub struct Peer {
    handle: PeerHandle,
    /// Upgrade-time handshake data.
    pub handshake: Handshake,
    /// User-owned data map, free for application code to populate.
    pub data: serde_json::Map<String, Value>,
    callbacks: HashMap<String, CallbackSlot>,
    pending_uploads: HashMap<String, Upload>,
    pending_binary_upload_id: Option<String>,
}

impl Peer {
    /// Create a new peer in the `Connecting` state, returning it alongside
    /// its handle and the receiver the transport layer should drain to
    /// actually write frames to the socket.
    pub fn new(id: impl Into<String>, handshake: Handshake) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(256);
        let handle = PeerHandle {
            id: Arc::from(id.into()),
            tx,
            state: Arc::new(AtomicU8::new(ConnState::Connecting as u8)),
            last_pong_millis: Arc::new(AtomicU64::new(0)),
            pong_notify: Arc::new(Notify::new()),
        };
        (
            Self {
                handle,
                handshake,
                data: serde_json::Map::new(),
                callbacks: HashMap::new(),
                pending_uploads: HashMap::new(),
                pending_binary_upload_id: None,
            },
            rx,
        )
    }

    /// This peer's id.
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    /// A cloneable handle to this peer.
    pub fn handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Mark the underlying socket open. Stamps a pong so heartbeat liveness
    /// starts counting from connect time rather than from process start.
    pub fn mark_connected(&self) {
        self.handle.set_state(ConnState::Connected);
        self.handle.record_pong();
    }

    /// Emit `event` with `data`, registering a one-shot callback if `cb` is
    /// given. Binary payloads are not representable in JSON `data`; callers
    /// with binary content should use [`PeerHandle::send_binary`] directly
    /// and must not pass a callback (mirrors the source's `ignore cb`).
    pub async fn emit(
        &mut self,
        codec: &SharedCodec,
        event: &str,
        data: Value,
        cb: Option<CallbackSlot>,
    ) -> Result<()> {
        let envelope = if let Some(cb) = cb {
            let callback_id = uuid::Uuid::new_v4().to_string();
            self.callbacks.insert(callback_id.clone(), cb);
            Envelope::event_with_callback(event, data, callback_id)
        } else {
            Envelope::event(event, data)
        };
        let text = codec.serialize(&envelope)?;
        self.handle.send_raw(text).await;
        Ok(())
    }

    /// Dispatch one inbound, already-parsed [`Envelope`] (the caller has
    /// run it through [`MessageCodec::parse`]).
    pub fn dispatch(&mut self, envelope: Envelope) -> PeerEvent {
        use meshsock_protocol::EnvelopeType as T;
        match envelope.kind {
            T::Ping => {
                // Pong is sent by the caller (transport owns the socket);
                // we only surface that a ping was seen.
                PeerEvent::Heartbeat
            }
            T::Pong => {
                self.handle.record_pong();
                PeerEvent::Heartbeat
            }
            T::Callback => {
                let Some(callback_id) = envelope.callback_id else {
                    return PeerEvent::Error("callback envelope missing callbackId".into());
                };
                if let Some(slot) = self.callbacks.remove(&callback_id) {
                    slot(envelope.data.unwrap_or(Value::Null));
                    PeerEvent::CallbackDelivered
                } else {
                    PeerEvent::Error(format!("no pending callback {callback_id}"))
                }
            }
            T::Error => PeerEvent::Error(
                envelope
                    .data
                    .and_then(|d| d.as_str().map(str::to_string))
                    .unwrap_or_else(|| "codec error".to_string()),
            ),
            T::Binary => self.dispatch_binary(envelope),
            T::Event => self.dispatch_event(envelope),
        }
    }

    fn dispatch_event(&mut self, envelope: Envelope) -> PeerEvent {
        let Some(name) = envelope.event else {
            return PeerEvent::Error("event envelope missing event name".into());
        };
        let data = envelope.data.unwrap_or(Value::Null);

        if name == "file-chunk" {
            return match serde_json::from_value::<FileChunkMeta>(data) {
                Ok(meta) => {
                    if meta.chunk_index == 0 {
                        self.pending_uploads.insert(meta.upload_id.clone(), Upload::new(&meta));
                    } else if let Some(upload) = self.pending_uploads.get_mut(&meta.upload_id) {
                        upload.touch();
                    }
                    self.pending_binary_upload_id = Some(meta.upload_id);
                    PeerEvent::Heartbeat
                }
                Err(e) => PeerEvent::Error(format!("invalid file-chunk metadata: {e}")),
            };
        }

        let reply = envelope.callback_id.map(|callback_id| ReplyFn {
            peer: self.handle.clone(),
            callback_id,
        });
        PeerEvent::Event { name, data, reply }
    }

    fn dispatch_binary(&mut self, envelope: Envelope) -> PeerEvent {
        let bytes: Vec<u8> = match envelope.data {
            Some(Value::Array(arr)) => arr
                .into_iter()
                .filter_map(|v| v.as_u64().map(|n| n as u8))
                .collect(),
            _ => Vec::new(),
        };

        let Some(upload_id) = self.pending_binary_upload_id.take() else {
            return PeerEvent::Event {
                name: "binary".to_string(),
                data: Value::Array(bytes.into_iter().map(|b| Value::Number(b.into())).collect()),
                reply: None,
            };
        };

        let Some(upload) = self.pending_uploads.get_mut(&upload_id) else {
            return PeerEvent::Error(format!("no pending upload {upload_id}"));
        };

        let next_index = upload.received_count();
        let complete = upload.append_chunk(next_index, bytes);
        if !complete {
            return PeerEvent::Heartbeat;
        }

        let upload = self.pending_uploads.remove(&upload_id).expect("just checked");
        match upload.assemble() {
            Some(bytes) => PeerEvent::FileUpload {
                file_size: upload.total_bytes,
                file_name: upload.file_name,
                upload_id,
                bytes,
            },
            None => PeerEvent::FileUploadError {
                upload_id,
                reason: "missing chunk at completion".to_string(),
            },
        }
    }

    /// Sweep uploads idle longer than their inactivity timeout, returning
    /// the ids and reasons for any abandoned.
    pub fn sweep_stale_uploads(&mut self) -> Vec<(String, String)> {
        let stale: Vec<String> = self
            .pending_uploads
            .iter()
            .filter(|(_, u)| u.is_stale())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.pending_uploads.remove(id);
        }
        stale
            .into_iter()
            .map(|id| (id, "upload inactivity timeout".to_string()))
            .collect()
    }

    /// Idempotent teardown: clears callback/upload state and marks the
    /// connection disconnected. Room removal and transport close are the
    /// caller's responsibility (it holds the [`crate::room::RoomIndex`]
    /// and the socket), consistent with the Adapter/Server owning
    /// cross-cutting cleanup.
    pub async fn disconnect(&mut self, reason: &str) {
        if self.handle.state() == ConnState::Disconnected {
            return;
        }
        self.callbacks.clear();
        self.pending_uploads.clear();
        self.pending_binary_upload_id = None;
        self.handle.request_disconnect(reason).await;
    }
}

/// Resolve a peer's liveness for the batch heartbeat manager without
/// requiring a timer per peer.
pub fn is_heartbeat_expired(handle: &PeerHandle, ping_timeout: Duration) -> bool {
    handle.millis_since_last_pong() as u128 > ping_timeout.as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_callback_serializes_plain_event() {
        let (mut peer, mut rx) = Peer::new("p1", Handshake::default());
        peer.mark_connected();
        let codec = SharedCodec::disabled();
        peer.emit(&codec, "chat", serde_json::json!({"msg": "hi"})).await.unwrap();
        match rx.recv().await.unwrap() {
            OutboundFrame::Text(t) => assert!(t.contains("\"event\":\"chat\"")),
            _ => panic!("expected text frame"),
        }
    }

    #[test]
    fn dispatch_pong_updates_liveness() {
        let (mut peer, _rx) = Peer::new("p1", Handshake::default());
        let before = peer.handle.millis_since_last_pong();
        std::thread::sleep(Duration::from_millis(5));
        let event = peer.dispatch(Envelope::pong());
        assert!(matches!(event, PeerEvent::Heartbeat));
        assert!(peer.handle.millis_since_last_pong() < before + 5);
    }

    #[test]
    fn callback_delivered_exactly_once() {
        let (mut peer, _rx) = Peer::new("p1", Handshake::default());
        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        peer.callbacks.insert(
            "cb1".to_string(),
            Box::new(move |_data| {
                delivered_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let reply = Envelope::callback("cb1", Value::Null);
        assert!(matches!(peer.dispatch(reply), PeerEvent::CallbackDelivered));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        // A second reply with the same id has nothing to deliver to.
        let reply_again = Envelope::callback("cb1", Value::Null);
        assert!(matches!(peer.dispatch(reply_again), PeerEvent::Error(_)));
    }

    #[test]
    fn chunked_upload_reassembles_in_order() {
        let (mut peer, _rx) = Peer::new("p1", Handshake::default());

        let meta = |idx: usize| {
            Envelope::event(
                "file-chunk",
                serde_json::json!({
                    "uploadId": "u1",
                    "fileName": "f.bin",
                    "fileSize": 6,
                    "chunkIndex": idx,
                    "totalChunks": 2,
                    "chunkSize": 3,
                }),
            )
        };
        let binary = |bytes: Vec<u8>| Envelope::binary(bytes);

        assert!(matches!(peer.dispatch(meta(0)), PeerEvent::Heartbeat));
        assert!(matches!(peer.dispatch(binary(vec![1, 2, 3])), PeerEvent::Heartbeat));
        assert!(matches!(peer.dispatch(meta(1)), PeerEvent::Heartbeat));
        match peer.dispatch(binary(vec![4, 5, 6])) {
            PeerEvent::FileUpload { bytes, file_size, .. } => {
                assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
                assert_eq!(file_size, 6);
            }
            _ => panic!("expected completed upload"),
        }
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut peer, mut rx) = Peer::new("p1", Handshake::default());
        peer.mark_connected();
        peer.disconnect("bye").await;
        peer.disconnect("bye again").await;
        // Only one Close frame should have been queued.
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Close(_))));
        rx.close();
        assert!(rx.recv().await.is_none());
    }
}
