//! WebSocket transport: the upgrade-path handler and the per-connection
//! read/write loop that turns frames into [`PeerEvent`]s and drains a
//! peer's outbound queue back to the socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMsg, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use meshsock_core::{new_peer_id, spawn_heartbeat, Handshake, OutboundFrame, Peer, PeerEvent};
use meshsock_protocol::Frame;
use tokio::sync::Mutex as AsyncMutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::error::UpgradeRejection;
use crate::server::Server;

/// The axum [`Router`] serving the upgrade path at the server's
/// configured `path`, plus a bare `/health` endpoint.
pub fn router(server: Arc<Server>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let path = server.config().path.clone();
    let mut router = Router::new().route("/health", get(health_handler));
    router = if path == "/" {
        router.route("/", get(ws_handler)).route("/*rest", get(ws_handler))
    } else {
        router.route(&path, get(ws_handler)).route(&format!("{path}/*rest"), get(ws_handler))
    };
    router.layer(cors).with_state(server)
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Runs the full upgrade-path error sequence: base-path mismatch (404),
/// capacity (503), middleware rejection (401), then the upgrade itself.
async fn ws_handler(
    State(server): State<Arc<Server>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let path = uri.path().to_string();
    if !path.starts_with(server.config().path.as_str()) {
        return rejection_response(UpgradeRejection::NotFound);
    }

    let max = server.config().max_connections;
    if max != 0 && server.connection_count() >= max {
        return rejection_response(UpgradeRejection::Capacity);
    }

    let mut header_map = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            header_map.insert(name.as_str().to_string(), v.to_string());
        }
    }
    let handshake = Handshake {
        query: uri.query().unwrap_or("").to_string(),
        headers: header_map,
        remote_addr: Some(remote_addr),
        url: path.clone(),
    };

    if let Err(reason) = server.run_server_middleware(&handshake).await {
        warn!(reason, "upgrade: server middleware rejected handshake");
        return rejection_response(UpgradeRejection::MiddlewareRejected);
    }

    let namespace_name = {
        let namespaces = server.namespaces().await;
        let ns = namespaces.resolve(&path);
        if let Err(reason) = ns.run_middleware(&handshake).await {
            warn!(reason, "upgrade: namespace middleware rejected handshake");
            return rejection_response(UpgradeRejection::MiddlewareRejected);
        }
        ns.name.clone()
    };

    ws.on_upgrade(move |socket| handle_connection(socket, server, handshake, namespace_name))
}

fn rejection_response(rejection: UpgradeRejection) -> Response {
    let status = StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, rejection_label(rejection)).into_response()
}

fn rejection_label(rejection: UpgradeRejection) -> &'static str {
    match rejection {
        UpgradeRejection::BadRequest => "bad request",
        UpgradeRejection::NotFound => "no matching namespace",
        UpgradeRejection::MiddlewareRejected => "rejected by middleware",
        UpgradeRejection::Capacity => "connection capacity reached",
        UpgradeRejection::UpgradeFailed => "upgrade failed",
    }
}

/// Registers the peer, fires `connection` listeners, then runs the
/// read/write loop until the socket closes or a heartbeat timeout fires.
async fn handle_connection(socket: WebSocket, server: Arc<Server>, handshake: Handshake, namespace_name: String) {
    let peer_id = new_peer_id();
    let (mut peer, mut outbound_rx) = Peer::new(peer_id.clone(), handshake);
    peer.mark_connected();
    let peer_handle = peer.handle();

    server.peer_handles().insert(peer_id.clone(), peer_handle.clone());
    server.peers().insert(peer_id.clone(), Arc::new(AsyncMutex::new(peer)));
    server.increment_connections();

    {
        let namespaces = server.namespaces().await;
        let ns = namespaces.resolve(&namespace_name);
        ns.attach(&peer_id);
        ns.fire_connection(&peer_id);
        if namespace_name != "/" {
            let default_ns = namespaces.default_namespace();
            default_ns.attach(&peer_id);
        }
    }
    server.fire_connection_listeners(&peer_id).await;

    let heartbeat = if !server.config().use_batch_heartbeat {
        Some(spawn_heartbeat(
            peer_handle.clone(),
            server.config().ping_interval(),
            server.config().ping_timeout(),
        ))
    } else {
        None
    };

    let (mut ws_sink, mut ws_stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => WsMsg::Text(text.into()),
                OutboundFrame::Binary(bytes) => WsMsg::Binary(Bytes::from(bytes)),
                OutboundFrame::Close(reason) => {
                    debug!(reason, "websocket: closing");
                    let _ = ws_sink.send(WsMsg::Close(None)).await;
                    break;
                }
            };
            if ws_sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut upload_sweep = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMsg::Text(text))) => {
                        dispatch_frame(&server, &peer_id, Frame::Text(text.to_string())).await;
                    }
                    Some(Ok(WsMsg::Binary(bytes))) => {
                        dispatch_frame(&server, &peer_id, Frame::Binary(bytes.to_vec())).await;
                    }
                    Some(Ok(WsMsg::Ping(_))) | Some(Ok(WsMsg::Pong(_))) => {}
                    Some(Ok(WsMsg::Close(_))) | None => break,
                    Some(Err(e)) => {
                        // Transport errors are never fatal to the server; just
                        // end this connection's loop.
                        debug!(error = %e, "websocket: transport error");
                        break;
                    }
                }
            }
            _ = upload_sweep.tick() => {
                let stale = match server.peers().get(&peer_id).map(|e| e.value().clone()) {
                    Some(peer_arc) => peer_arc.lock().await.sweep_stale_uploads(),
                    None => Vec::new(),
                };
                for (upload_id, reason) in stale {
                    warn!(upload_id, reason, "upload: abandoned");
                    server
                        .dispatch_event(
                            peer_handle.clone(),
                            "error",
                            serde_json::json!({"uploadId": upload_id, "error": reason}),
                            None,
                        )
                        .await;
                }
            }
        }
    }

    if let Some(hb) = heartbeat {
        hb.stop();
    }
    peer_handle.request_disconnect("connection closed").await;
    let _ = writer.await;

    cleanup(&server, &peer_id, &namespace_name).await;
}

/// Parse one inbound frame and route the resulting [`PeerEvent`] to
/// listener dispatch.
async fn dispatch_frame(server: &Arc<Server>, peer_id: &str, frame: Frame) {
    let codec = server.codec();
    let envelope = {
        let enc_guard = codec.encryption.as_ref().map(|m| m.lock().expect("encryption poisoned"));
        meshsock_protocol::MessageCodec::parse(frame, enc_guard.as_deref())
    };

    let Some(peer_arc) = server.peers().get(peer_id).map(|e| e.value().clone()) else {
        return;
    };
    let event = {
        let mut guard = peer_arc.lock().await;
        guard.dispatch(envelope)
    };

    let Some(handle) = server.peer_handles().get(peer_id).map(|e| e.value().clone()) else {
        return;
    };

    match event {
        PeerEvent::Event { name, data, reply } => {
            server.dispatch_event(handle, &name, data, reply).await;
        }
        PeerEvent::FileUpload {
            upload_id,
            file_name,
            file_size,
            bytes,
        } => {
            let payload = serde_json::json!({
                "uploadId": upload_id,
                "fileName": file_name,
                "fileSize": file_size,
                "data": bytes,
            });
            server.dispatch_event(handle, "file-upload", payload, None).await;
        }
        PeerEvent::FileUploadError { upload_id, reason } => {
            warn!(upload_id, reason, "upload: failed");
            server
                .dispatch_event(
                    handle,
                    "error",
                    serde_json::json!({"uploadId": upload_id, "error": reason}),
                    None,
                )
                .await;
        }
        PeerEvent::Error(message) => {
            warn!(message, "peer: protocol error");
            server.dispatch_event(handle, "error", serde_json::json!({"error": message}), None).await;
        }
        PeerEvent::CallbackDelivered | PeerEvent::Heartbeat => {}
    }
}

/// Unregister a disconnected peer from every structure that tracked it:
/// the room index (and adapter), its namespaces, and the peer registries.
async fn cleanup(server: &Arc<Server>, peer_id: &str, namespace_name: &str) {
    server.decrement_connections();

    for room in server.rooms().rooms_for(peer_id) {
        server.leave_room(peer_id, &room).await;
    }

    {
        let namespaces = server.namespaces().await;
        namespaces.resolve(namespace_name).detach(peer_id);
        namespaces.default_namespace().detach(peer_id);
    }

    server.peer_handles().remove(peer_id);
    server.peers().remove(peer_id);
}
