//! Ping/pong keepalive: a per-peer manager and a shared-timer batch variant.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use meshsock_protocol::{Envelope, MessageCodec};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::peer::{is_heartbeat_expired, PeerHandle};

fn ping_text() -> String {
    MessageCodec::serialize(&Envelope::ping(), None).expect("ping envelope always serializes")
}

/// Handle to a running heartbeat task; dropping it does not stop the task
/// (call [`HeartbeatHandle::stop`] explicitly, as the source does on
/// disconnect).
pub struct HeartbeatHandle {
    cancel: CancellationToken,
}

impl HeartbeatHandle {
    /// Stop the heartbeat task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Spawn a per-peer heartbeat: every `ping_interval`, send a ping and start
/// an independent `ping_timeout` timer; a `pong` recorded before that timer
/// fires cancels it, otherwise the peer is disconnected with reason
/// `"ping timeout"`.
pub fn spawn_heartbeat(peer: PeerHandle, ping_interval: Duration, ping_timeout: Duration) -> HeartbeatHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut ticker = interval(ping_interval);
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if !peer.is_connected() {
                return;
            }
            peer.send_raw(ping_text()).await;

            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = peer.wait_for_pong() => {}
                _ = tokio::time::sleep(ping_timeout) => {
                    if is_heartbeat_expired(&peer, ping_timeout) {
                        peer.request_disconnect("ping timeout").await;
                        return;
                    }
                }
            }
        }
    });

    HeartbeatHandle { cancel }
}

/// One shared timer driving keepalive for every registered peer, avoiding
/// a per-peer timer when connection counts are large.
pub struct BatchHeartbeatManager {
    cancel: CancellationToken,
}

impl BatchHeartbeatManager {
    /// Start the shared timer against `peers`, a live view of every
    /// currently-connected peer (typically the server's peer registry).
    pub fn start(peers: Arc<DashMap<String, PeerHandle>>, ping_interval: Duration, ping_timeout: Duration) -> Self {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = interval(ping_interval);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let expired: Vec<PeerHandle> = peers
                    .iter()
                    .filter(|entry| entry.value().is_connected())
                    .filter(|entry| is_heartbeat_expired(entry.value(), ping_timeout))
                    .map(|entry| entry.value().clone())
                    .collect();

                for peer in expired {
                    peer.request_disconnect("ping timeout").await;
                }

                let text = ping_text();
                for entry in peers.iter() {
                    if entry.value().is_connected() {
                        entry.value().send_raw(text.clone()).await;
                    }
                }
            }
        });

        Self { cancel }
    }

    /// Stop the shared timer.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
