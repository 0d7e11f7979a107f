//! The client socket: connects over `tokio-tungstenite`, runs a
//! reconnect-with-backoff driver loop, and exposes the same event-emitter
//! shape as the server side of the connection — `on`/`emit`/ack callbacks
//! — over the shared [`Envelope`]/[`MessageCodec`] wire format.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use meshsock_crypto::Encryption;
use meshsock_protocol::{Envelope, EnvelopeType, Frame, MessageCodec};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::reconnect::ReconnectConfig;
use crate::upload::plan_upload;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A handler invoked for every inbound event. `reply` is present iff the
/// server's envelope carried a `callbackId` expecting an ack.
pub type EventHandler = Arc<dyn Fn(Value, Option<ClientReply>) -> BoxFuture<'static> + Send + Sync>;

/// Configuration for a [`Socket::connect`] call.
pub struct ClientConfig {
    /// The `ws://` or `wss://` URL to connect to.
    pub url: String,
    /// Reconnect/backoff behavior.
    pub reconnect: ReconnectConfig,
    /// Transparent payload encryption, if the server requires it. Must
    /// match the server's key and algorithm exactly.
    pub encryption: Option<meshsock_crypto::EncryptionConfig>,
    /// Bound on the number of outbound sends buffered while disconnected
    /// or mid-reconnect.
    pub queue_capacity: usize,
    /// How long [`Socket::emit_with_ack`] waits for a correlated reply.
    pub ack_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            reconnect: ReconnectConfig::default(),
            encryption: None,
            queue_capacity: 1024,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

/// Connection lifecycle, mirroring the server's `ConnState` shape for the
/// same three-state send-or-drop decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum SocketState {
    Connecting = 0,
    Connected = 1,
    Closed = 2,
}

impl From<u8> for SocketState {
    fn from(v: u8) -> Self {
        match v {
            0 => SocketState::Connecting,
            1 => SocketState::Connected,
            _ => SocketState::Closed,
        }
    }
}

/// Call exactly once to send a `{type: callback, callbackId, data}` reply
/// to an event the server sent expecting an ack.
pub struct ClientReply {
    outbound: mpsc::Sender<OutboundItem>,
    callback_id: String,
}

impl ClientReply {
    /// Send the reply.
    pub async fn call(self, data: Value) {
        let _ = self
            .outbound
            .send(OutboundItem::Envelope(Envelope::callback(self.callback_id, data)))
            .await;
    }
}

enum OutboundItem {
    Envelope(Envelope),
    Binary(Vec<u8>),
    Close,
}

type CallbackSlot = oneshot::Sender<Value>;

/// A reconnecting client socket. Cheap to clone; every clone shares the
/// same outbound queue, listener table and connection state.
pub struct Socket {
    outbound_tx: mpsc::Sender<OutboundItem>,
    state: Arc<AtomicU8>,
    listeners: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    callbacks: Arc<Mutex<HashMap<String, CallbackSlot>>>,
    connect_listeners: Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>>,
    disconnect_listeners: Arc<Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>>,
    ack_timeout: Duration,
}

impl Socket {
    /// Connect to `config.url`, spawning the reconnect driver in the
    /// background. Resolves once the first connection attempt succeeds;
    /// returns an error only if the initial attempt (and its retries, per
    /// `config.reconnect`) are all exhausted.
    pub async fn connect(config: ClientConfig) -> Result<Arc<Self>> {
        let encryption = match config.encryption {
            Some(cfg) => Some(Mutex::new(Encryption::new(cfg)?)),
            None => None,
        };
        let encryption = Arc::new(encryption);

        let (outbound_tx, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let state = Arc::new(AtomicU8::new(SocketState::Connecting as u8));
        let listeners: Arc<RwLock<HashMap<String, Vec<EventHandler>>>> = Arc::new(RwLock::new(HashMap::new()));
        let callbacks: Arc<Mutex<HashMap<String, CallbackSlot>>> = Arc::new(Mutex::new(HashMap::new()));
        let connect_listeners: Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>> = Arc::new(Mutex::new(Vec::new()));
        let disconnect_listeners: Arc<Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>> = Arc::new(Mutex::new(Vec::new()));

        let socket = Arc::new(Self {
            outbound_tx: outbound_tx.clone(),
            state: state.clone(),
            listeners: listeners.clone(),
            callbacks: callbacks.clone(),
            connect_listeners: connect_listeners.clone(),
            disconnect_listeners: disconnect_listeners.clone(),
            ack_timeout: config.ack_timeout,
        });

        let first_connect = connect_async(&config.url).await;
        let stream = match first_connect {
            Ok((stream, _)) => stream,
            Err(e) => return Err(ClientError::ConnectFailed(e.to_string())),
        };
        state.store(SocketState::Connected as u8, Ordering::Release);
        fire_connect(&connect_listeners);

        tokio::spawn(run_driver(
            config.url,
            config.reconnect,
            stream,
            outbound_tx,
            outbound_rx,
            state,
            listeners,
            callbacks,
            connect_listeners,
            disconnect_listeners,
            encryption,
        ));

        Ok(socket)
    }

    /// Register a listener for `event`. Multiple listeners for the same
    /// event all run, in registration order.
    pub async fn on(&self, event: impl Into<String>, handler: EventHandler) {
        self.listeners.write().expect("listeners poisoned").entry(event.into()).or_default().push(handler);
    }

    /// Register a listener fired once the socket (re)connects.
    pub fn on_connect(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.connect_listeners.lock().expect("poisoned").push(Box::new(listener));
    }

    /// Register a listener fired whenever the socket disconnects, with a
    /// human-readable reason.
    pub fn on_disconnect(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.disconnect_listeners.lock().expect("poisoned").push(Box::new(listener));
    }

    /// Whether the socket currently holds an open connection.
    pub fn is_connected(&self) -> bool {
        SocketState::from(self.state.load(Ordering::Acquire)) == SocketState::Connected
    }

    /// Emit a named event with no reply expected.
    pub async fn emit(&self, event: impl Into<String>, data: Value) -> Result<()> {
        self.send_envelope(Envelope::event(event, data)).await
    }

    /// Emit a named event and wait for the server's correlated callback
    /// reply, up to `ack_timeout`.
    pub async fn emit_with_ack(&self, event: impl Into<String>, data: Value) -> Result<Value> {
        let callback_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.callbacks.lock().expect("poisoned").insert(callback_id.clone(), tx);

        if let Err(e) = self
            .send_envelope(Envelope::event_with_callback(event, data, callback_id.clone()))
            .await
        {
            self.callbacks.lock().expect("poisoned").remove(&callback_id);
            return Err(e);
        }

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => {
                self.callbacks.lock().expect("poisoned").remove(&callback_id);
                Err(ClientError::AckTimeout)
            }
        }
    }

    /// Send a raw binary frame.
    pub async fn send_binary(&self, bytes: Vec<u8>) -> Result<()> {
        self.outbound_tx
            .send(OutboundItem::Binary(bytes))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Send `bytes` as a chunked upload: a `file-chunk` metadata frame
    /// immediately followed by a binary frame, repeated per chunk.
    pub async fn upload_file(&self, file_name: &str, bytes: &[u8], chunk_size: usize) -> Result<()> {
        let upload_id = uuid::Uuid::new_v4().to_string();
        for frame in plan_upload(&upload_id, file_name, bytes, chunk_size) {
            self.send_envelope(frame.meta).await?;
            self.send_binary(frame.bytes).await?;
        }
        Ok(())
    }

    /// Close the socket for good: the driver task will not attempt to
    /// reconnect after this.
    pub async fn close(&self) {
        self.state.store(SocketState::Closed as u8, Ordering::Release);
        drop(self.outbound_tx.send(OutboundItem::Close).await);
    }

    async fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        self.outbound_tx
            .send(OutboundItem::Envelope(envelope))
            .await
            .map_err(|_| ClientError::NotConnected)
    }
}

fn fire_connect(listeners: &Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>>) {
    for listener in listeners.lock().expect("poisoned").iter() {
        listener();
    }
}

fn fire_disconnect(listeners: &Arc<Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>>, reason: &str) {
    for listener in listeners.lock().expect("poisoned").iter() {
        listener(reason);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_driver(
    url: String,
    reconnect: ReconnectConfig,
    mut stream: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outbound_tx_for_replies: mpsc::Sender<OutboundItem>,
    mut outbound_rx: mpsc::Receiver<OutboundItem>,
    state: Arc<AtomicU8>,
    listeners: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    callbacks: Arc<Mutex<HashMap<String, CallbackSlot>>>,
    connect_listeners: Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>>,
    disconnect_listeners: Arc<Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>>,
    encryption: Arc<Option<Mutex<Encryption>>>,
) {
    let mut attempt: u32 = 0;

    loop {
        let disconnect_reason = run_connection(
            &mut stream,
            &mut outbound_rx,
            &outbound_tx_for_replies,
            &listeners,
            &callbacks,
            &encryption,
        )
        .await;

        if SocketState::from(state.load(Ordering::Acquire)) == SocketState::Closed {
            fire_disconnect(&disconnect_listeners, "closed");
            return;
        }

        state.store(SocketState::Connecting as u8, Ordering::Release);
        fire_disconnect(&disconnect_listeners, &disconnect_reason);

        let reconnected = loop {
            if reconnect.exhausted(attempt) {
                warn!(attempts = attempt, "socket: giving up reconnecting");
                break None;
            }
            let backoff = reconnect.backoff_for_attempt(attempt);
            attempt += 1;
            debug!(attempt, backoff_ms = backoff.as_millis() as u64, "socket: reconnecting");
            tokio::time::sleep(backoff).await;

            match connect_async(&url).await {
                Ok((new_stream, _)) => break Some(new_stream),
                Err(e) if !ReconnectConfig::is_transient(&e) => {
                    warn!(error = %e, "socket: non-transient connect failure, giving up");
                    break None;
                }
                Err(e) => {
                    debug!(error = %e, "socket: reconnect attempt failed");
                    continue;
                }
            }
        };

        match reconnected {
            Some(new_stream) => {
                stream = new_stream;
                attempt = 0;
                state.store(SocketState::Connected as u8, Ordering::Release);
                fire_connect(&connect_listeners);
            }
            None => {
                state.store(SocketState::Closed as u8, Ordering::Release);
                return;
            }
        }
    }
}

/// Run one live connection's read/write loop until it drops, returning a
/// human-readable disconnect reason.
async fn run_connection(
    stream: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outbound_rx: &mut mpsc::Receiver<OutboundItem>,
    outbound_tx: &mpsc::Sender<OutboundItem>,
    listeners: &Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    callbacks: &Arc<Mutex<HashMap<String, CallbackSlot>>>,
    encryption: &Arc<Option<Mutex<Encryption>>>,
) -> String {
    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(Frame::Text(text.to_string()), stream, outbound_tx, listeners, callbacks, encryption).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        handle_inbound(Frame::Binary(bytes.to_vec()), stream, outbound_tx, listeners, callbacks, encryption).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return "connection closed".to_string(),
                    Some(Err(e)) => return e.to_string(),
                }
            }
            item = outbound_rx.recv() => {
                match item {
                    Some(OutboundItem::Envelope(envelope)) => {
                        let text = match serialize_envelope(&envelope, encryption) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(error = %e, "socket: failed to serialize outbound envelope");
                                continue;
                            }
                        };
                        if stream.send(Message::Text(text.into())).await.is_err() {
                            return "write failed".to_string();
                        }
                    }
                    Some(OutboundItem::Binary(bytes)) => {
                        if stream.send(Message::Binary(bytes)).await.is_err() {
                            return "write failed".to_string();
                        }
                    }
                    Some(OutboundItem::Close) => {
                        let _ = stream.send(Message::Close(None)).await;
                        return "closed locally".to_string();
                    }
                    None => return "socket closed locally".to_string(),
                }
            }
        }
    }
}

async fn handle_inbound(
    frame: Frame,
    stream: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    outbound_tx: &mpsc::Sender<OutboundItem>,
    listeners: &Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    callbacks: &Arc<Mutex<HashMap<String, CallbackSlot>>>,
    encryption: &Arc<Option<Mutex<Encryption>>>,
) {
    let envelope = parse_frame(frame, encryption);

    match envelope.kind {
        EnvelopeType::Ping => {
            if let Ok(text) = serialize_envelope(&Envelope::pong(), encryption) {
                let _ = stream.send(Message::Text(text.into())).await;
            }
        }
        EnvelopeType::Pong => {}
        EnvelopeType::Callback => {
            let Some(callback_id) = envelope.callback_id else { return };
            if let Some(slot) = callbacks.lock().expect("poisoned").remove(&callback_id) {
                let _ = slot.send(envelope.data.unwrap_or(Value::Null));
            }
        }
        EnvelopeType::Error => {
            let message = envelope
                .data
                .and_then(|d| d.as_str().map(str::to_string))
                .unwrap_or_else(|| "codec error".to_string());
            dispatch(listeners, outbound_tx, "error", serde_json::json!({"error": message}), None).await;
        }
        EnvelopeType::Binary => {
            dispatch(listeners, outbound_tx, "binary", envelope.data.unwrap_or(Value::Null), None).await;
        }
        EnvelopeType::Event => {
            let Some(name) = envelope.event else { return };
            let data = envelope.data.unwrap_or(Value::Null);
            dispatch(listeners, outbound_tx, &name, data, envelope.callback_id).await;
        }
    }
}

async fn dispatch(
    listeners: &Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    outbound_tx: &mpsc::Sender<OutboundItem>,
    event: &str,
    data: Value,
    callback_id: Option<String>,
) {
    let handlers: Vec<EventHandler> = {
        let guard = listeners.read().expect("listeners poisoned");
        guard.get(event).cloned().unwrap_or_default()
    };
    for handler in handlers {
        let reply = callback_id.clone().map(|callback_id| ClientReply {
            outbound: outbound_tx.clone(),
            callback_id,
        });
        handler(data.clone(), reply).await;
    }
}

fn serialize_envelope(envelope: &Envelope, encryption: &Arc<Option<Mutex<Encryption>>>) -> meshsock_protocol::Result<String> {
    let mut guard = encryption.as_ref().as_ref().map(|m| m.lock().expect("encryption poisoned"));
    MessageCodec::serialize(envelope, guard.as_deref_mut())
}

fn parse_frame(frame: Frame, encryption: &Arc<Option<Mutex<Encryption>>>) -> Envelope {
    let guard = encryption.as_ref().as_ref().map(|m| m.lock().expect("encryption poisoned"));
    MessageCodec::parse(frame, guard.as_deref())
}
