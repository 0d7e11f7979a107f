//! The `Server`: owns the namespace registry, room index, peer registry,
//! adapter, and the global event-listener table every connection dispatches
//! into.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meshsock_adapter::{Adapter, RelayMessage};
use meshsock_core::{
    BatchHeartbeatManager, Handshake, Middleware, Namespace, NamespaceRegistry, Peer, PeerHandle,
    ReplyFn, RoomIndex, SharedCodec,
};
use meshsock_crypto::{Encryption, EncryptionConfig};
use meshsock_protocol::cache::MessageCache;
use meshsock_protocol::queue::{MessageQueueWorker, QueueConfig, QueueHandle};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::config::{MessageCacheSetting, MessageQueueSetting, ServerConfig};
use crate::error::{Result, ServerError};

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// An event handler registered via [`Server::on`]. Receives the emitting
/// peer's handle, the event payload, and — iff the inbound envelope carried
/// a `callbackId` and this is the first handler for the event — a one-shot
/// [`ReplyFn`].
pub type EventHandler = Arc<dyn Fn(PeerHandle, Value, Option<ReplyFn>) -> BoxFuture<'static> + Send + Sync>;

/// A broadcast queued through the MessageQueue when `useMessageQueue` is set.
struct QueuedBroadcast {
    room: Option<String>,
    event: String,
    data: Value,
    except: Option<String>,
}

/// The running server: peer registry, room index, namespaces, adapter, and
/// the listener tables connections dispatch into.
pub struct Server {
    config: ServerConfig,
    server_id: String,
    namespaces: RwLock<NamespaceRegistry>,
    rooms: RoomIndex,
    peer_handles: Arc<DashMap<String, PeerHandle>>,
    peers: Arc<DashMap<String, Arc<AsyncMutex<Peer>>>>,
    codec: Arc<SharedCodec>,
    adapter: Arc<dyn Adapter>,
    listeners: RwLock<HashMap<String, Vec<EventHandler>>>,
    server_middleware: RwLock<Vec<Middleware>>,
    connection_listeners: RwLock<Vec<Box<dyn Fn(&str) + Send + Sync>>>,
    batch_heartbeat: AsyncMutex<Option<BatchHeartbeatManager>>,
    queue: AsyncMutex<Option<QueueHandle<QueuedBroadcast>>>,
    bound_port: AtomicUsize,
    connection_count: AtomicUsize,
}

impl Server {
    /// Construct a server from `config`, validating the encryption settings
    /// (if any) eagerly — a bad key length is the one construction-time
    /// error the spec calls out as fatal.
    pub fn new(config: ServerConfig, adapter: Arc<dyn Adapter>) -> Result<Arc<Self>> {
        let server_id = meshsock_core::new_server_id();

        let encryption = match &config.encryption {
            Some(settings) if settings.enabled => {
                let algorithm = meshsock_crypto::Algorithm::parse(&settings.algorithm)
                    .map_err(ServerError::Encryption)?;
                Some(Encryption::new(EncryptionConfig {
                    key: settings.key.clone(),
                    algorithm: Some(algorithm),
                    enabled: true,
                    cache_size: settings.cache_size,
                    cache_ttl: Duration::from_millis(settings.cache_ttl_ms),
                })?)
            }
            _ => None,
        };

        let cache = match &config.message_cache {
            MessageCacheSetting::Enabled { max_size, ttl_ms } => {
                Some(MessageCache::new(*max_size, Duration::from_millis(*ttl_ms)))
            }
            MessageCacheSetting::Disabled(_) => None,
        };

        let codec = Arc::new(SharedCodec {
            encryption: encryption.map(std::sync::Mutex::new),
            cache: cache.map(std::sync::Mutex::new),
        });

        Ok(Arc::new(Self {
            config,
            server_id,
            namespaces: RwLock::new(NamespaceRegistry::new()),
            rooms: RoomIndex::new(),
            peer_handles: Arc::new(DashMap::new()),
            peers: Arc::new(DashMap::new()),
            codec,
            adapter,
            listeners: RwLock::new(HashMap::new()),
            server_middleware: RwLock::new(Vec::new()),
            connection_listeners: RwLock::new(Vec::new()),
            batch_heartbeat: AsyncMutex::new(None),
            queue: AsyncMutex::new(None),
            bound_port: AtomicUsize::new(0),
            connection_count: AtomicUsize::new(0),
        }))
    }

    /// This server instance's id, as registered with the adapter.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The configuration this server was built from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The room index (read access for diagnostics/tests).
    pub fn rooms(&self) -> &RoomIndex {
        &self.rooms
    }

    /// Register a namespace. Call before [`Server::listen`].
    pub async fn register_namespace(&self, namespace: Namespace) {
        self.namespaces.write().await.register(namespace);
    }

    /// Append server-wide middleware, run before namespace middleware on
    /// every upgrade.
    pub async fn use_middleware(&self, middleware: Middleware) {
        self.server_middleware.write().await.push(middleware);
    }

    /// Register a server-wide `connection` listener.
    pub async fn on_connection(&self, listener: Box<dyn Fn(&str) + Send + Sync>) {
        self.connection_listeners.write().await.push(listener);
    }

    /// Register a handler for inbound events named `event`. Multiple
    /// handlers may be registered; only the first receives the reply
    /// callback when the inbound envelope carried a `callbackId`.
    pub async fn on(&self, event: impl Into<String>, handler: EventHandler) {
        self.listeners.write().await.entry(event.into()).or_default().push(handler);
    }

    /// The actual bound port, valid after [`Server::listen`] returns.
    pub fn port(&self) -> u16 {
        self.bound_port.load(Ordering::Acquire) as u16
    }

    /// Number of currently-registered connections.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    pub(crate) fn peer_handles(&self) -> &Arc<DashMap<String, PeerHandle>> {
        &self.peer_handles
    }

    pub(crate) fn peers(&self) -> &Arc<DashMap<String, Arc<AsyncMutex<Peer>>>> {
        &self.peers
    }

    pub(crate) fn codec(&self) -> &Arc<SharedCodec> {
        &self.codec
    }

    pub(crate) async fn namespaces(&self) -> tokio::sync::RwLockReadGuard<'_, NamespaceRegistry> {
        self.namespaces.read().await
    }

    pub(crate) async fn run_server_middleware(&self, handshake: &Handshake) -> std::result::Result<(), String> {
        for mw in self.server_middleware.read().await.iter() {
            mw(handshake).await?;
        }
        Ok(())
    }

    pub(crate) async fn fire_connection_listeners(&self, peer_id: &str) {
        for listener in self.connection_listeners.read().await.iter() {
            listener(peer_id);
        }
    }

    pub(crate) fn increment_connections(&self) -> usize {
        self.connection_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn decrement_connections(&self) {
        self.connection_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn set_bound_port(&self, port: u16) {
        self.bound_port.store(port as usize, Ordering::Release);
    }

    /// Dispatch a [`meshsock_core::PeerEvent::Event`] to registered
    /// listeners. Only the first listener gets the reply callback.
    pub(crate) async fn dispatch_event(&self, peer: PeerHandle, name: &str, data: Value, reply: Option<ReplyFn>) {
        let handlers = self.listeners.read().await.get(name).cloned().unwrap_or_default();
        let mut reply = reply;
        for handler in handlers {
            let this_reply = reply.take();
            handler(peer.clone(), data.clone(), this_reply).await;
        }
    }

    /// Join `peer_id` to `room`, updating both the local index and the
    /// adapter (so other instances learn about it).
    pub async fn join_room(&self, peer_id: &str, room: &str) {
        self.rooms.join(peer_id, room);
        if let Err(e) = self.adapter.add_peer_to_room(peer_id, room).await {
            tracing::warn!(error = %e, peer_id, room, "adapter: add_peer_to_room failed");
        }
    }

    /// Remove `peer_id` from `room`.
    pub async fn leave_room(&self, peer_id: &str, room: &str) {
        self.rooms.leave(peer_id, room);
        if let Err(e) = self.adapter.remove_peer_from_room(peer_id, room).await {
            tracing::warn!(error = %e, peer_id, room, "adapter: remove_peer_from_room failed");
        }
    }

    /// Emit to every member of `room` except `except`: relays via the
    /// adapter first (so other instances fan out locally), then fans out
    /// locally using the room index's batching rule.
    pub async fn emit_to_room(&self, room: &str, event: &str, data: Value, except: Option<&str>) {
        let relay = RelayMessage {
            event: event.to_string(),
            data: data.clone(),
            room: Some(room.to_string()),
            except_peer_id: except.map(str::to_string),
        };
        if let Err(e) = self.adapter.broadcast_to_room(room, relay).await {
            tracing::warn!(error = %e, room, "adapter: broadcast_to_room failed");
        }

        let mut cache_guard = self.codec.cache.as_ref().map(|m| m.lock().expect("cache poisoned"));
        let mut encryption_guard = self
            .codec
            .encryption
            .as_ref()
            .map(|m| m.lock().expect("encryption poisoned"));
        self.rooms
            .emit_to_room(
                room,
                event,
                data,
                except,
                &self.peer_handles,
                cache_guard.as_deref_mut(),
                encryption_guard.as_deref_mut(),
            )
            .await;
    }

    /// Server-wide broadcast. Synchronous fan-out unless `useMessageQueue`
    /// is set, in which case it is handed to the [`MessageQueueWorker`].
    pub async fn broadcast(&self, event: &str, data: Value, except: Option<&str>) {
        let relay = RelayMessage {
            event: event.to_string(),
            data: data.clone(),
            room: None,
            except_peer_id: except.map(str::to_string),
        };
        if let Err(e) = self.adapter.broadcast(relay).await {
            tracing::warn!(error = %e, "adapter: broadcast failed");
        }

        {
            let guard = self.queue.lock().await;
            if let Some(queue) = guard.as_ref() {
                let _ = queue
                    .enqueue(
                        QueuedBroadcast {
                            room: None,
                            event: event.to_string(),
                            data,
                            except: except.map(str::to_string),
                        },
                        None,
                    )
                    .await;
                return;
            }
        }

        self.broadcast_locally(event, data, except).await;
    }

    async fn broadcast_locally(&self, event: &str, data: Value, except: Option<&str>) {
        let targets: Vec<PeerHandle> = self
            .peer_handles
            .iter()
            .filter(|entry| except != Some(entry.key().as_str()))
            .filter(|entry| entry.value().is_connected())
            .map(|entry| entry.value().clone())
            .collect();
        for handle in targets {
            handle.emit(event, data.clone()).await;
        }
    }

    /// Apply a message relayed from another server instance to local peers
    /// only — never re-relays, which is what breaks the adapter fan-out loop.
    pub(crate) async fn handle_adapter_message(&self, message: RelayMessage) {
        match message.room {
            Some(room) => {
                let mut cache_guard = self.codec.cache.as_ref().map(|m| m.lock().expect("cache poisoned"));
                let mut encryption_guard = self
                    .codec
                    .encryption
                    .as_ref()
                    .map(|m| m.lock().expect("encryption poisoned"));
                self.rooms
                    .emit_to_room(
                        &room,
                        &message.event,
                        message.data,
                        message.except_peer_id.as_deref(),
                        &self.peer_handles,
                        cache_guard.as_deref_mut(),
                        encryption_guard.as_deref_mut(),
                    )
                    .await;
            }
            None => {
                self.broadcast_locally(&message.event, message.data, message.except_peer_id.as_deref())
                    .await;
            }
        }
    }

    /// Bind and begin accepting connections. Resolves the real bound port,
    /// initializes the adapter, attaches its subscription, and starts the
    /// batch heartbeat manager if configured.
    pub async fn listen(self: &Arc<Self>) -> Result<SocketAddr> {
        self.adapter
            .init(&self.server_id)
            .await
            .map_err(ServerError::Adapter)?;

        let this = Arc::clone(self);
        self.adapter
            .subscribe(Arc::new(move |message| {
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    this.handle_adapter_message(message).await;
                });
            }))
            .await
            .map_err(ServerError::Adapter)?;

        if self.config.use_batch_heartbeat {
            let mgr = BatchHeartbeatManager::start(
                Arc::clone(&self.peer_handles),
                self.config.ping_interval(),
                self.config.ping_timeout(),
            );
            *self.batch_heartbeat.lock().await = Some(mgr);
        }

        if let Some(cfg) = self.queue_config() {
            let handle = spawn_broadcast_queue(Arc::clone(self), cfg);
            *self.queue.lock().await = Some(handle);
        }

        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ServerError::Bind {
                addr: format!("{}:{}", self.config.host, self.config.port),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_string(),
                source: e,
            })?;
        let bound = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        self.set_bound_port(bound.port());

        let app = crate::websocket::router(Arc::clone(self));
        let server = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            {
                tracing::error!(error = %e, "server: accept loop terminated");
            }
            let _ = server;
        });

        Ok(bound)
    }

    /// Stop the batch heartbeat, disconnect every peer, and close the
    /// adapter.
    pub async fn close(&self) {
        if let Some(mgr) = self.batch_heartbeat.lock().await.take() {
            mgr.stop();
        }
        for entry in self.peer_handles.iter() {
            entry.value().request_disconnect("server closing").await;
        }
        if let Err(e) = tokio::time::timeout(Duration::from_secs(2), self.adapter.close()).await {
            tracing::warn!(error = %e, "server: adapter close timed out");
        }
    }

    /// Build the [`QueueConfig`] from `useMessageQueue` settings, for the
    /// worker task spawned alongside the server (currently unused unless
    /// `useMessageQueue` is set — see [`Server::broadcast`]).
    pub(crate) fn queue_config(&self) -> Option<QueueConfig> {
        match &self.config.message_queue {
            MessageQueueSetting::Enabled {
                max_size,
                batch_size,
                process_interval_ms,
            } if self.config.use_message_queue => Some(QueueConfig {
                max_size: *max_size,
                batch_size: *batch_size,
                process_interval: Duration::from_millis(*process_interval_ms),
            }),
            _ => None,
        }
    }
}

/// Spawn the [`MessageQueueWorker`] driving queued broadcasts, wiring its
/// drained items back into [`Server::broadcast_locally`]-equivalent local
/// fan-out. Call once, after [`Server::listen`], only when
/// `useMessageQueue` is set.
pub fn spawn_broadcast_queue(server: Arc<Server>, config: QueueConfig) -> QueueHandle<QueuedBroadcast> {
    let (worker, handle) = MessageQueueWorker::new(config);
    let server_for_worker = Arc::clone(&server);
    tokio::spawn(async move {
        worker
            .run(
                move |item: QueuedBroadcast| {
                    let server = Arc::clone(&server_for_worker);
                    async move {
                        match item.room {
                            Some(room) => {
                                server
                                    .emit_to_room(&room, &item.event, item.data, item.except.as_deref())
                                    .await;
                            }
                            None => {
                                server.broadcast_locally(&item.event, item.data, item.except.as_deref()).await;
                            }
                        }
                        Ok(())
                    }
                },
                |err| tracing::warn!(error = %err, "broadcast queue: send failed"),
            )
            .await;
    });
    handle
}
