//! Room membership index: two mirrored maps kept atomically in sync, plus
//! the batched room fan-out algorithm.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use dashmap::DashMap;
use meshsock_crypto::Encryption;
use meshsock_protocol::cache::MessageCache;
use serde_json::Value;

use crate::peer::PeerHandle;

struct Inner {
    rooms: HashMap<String, HashSet<String>>,
    peer_rooms: HashMap<String, HashSet<String>>,
}

/// Bidirectional `room -> peers` / `peer -> rooms` index.
///
/// Both maps are guarded by a single mutex so every mutation keeps the
/// invariant `peer ∈ rooms[room] ⇔ room ∈ peer_rooms[peer]` atomic.
pub struct RoomIndex {
    inner: Mutex<Inner>,
}

impl Default for RoomIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rooms: HashMap::new(),
                peer_rooms: HashMap::new(),
            }),
        }
    }

    /// Add `peer_id` to `room`, creating the room if this is its first
    /// member.
    pub fn join(&self, peer_id: &str, room: &str) {
        let mut inner = self.inner.lock().expect("room index poisoned");
        inner
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(peer_id.to_string());
        inner
            .peer_rooms
            .entry(peer_id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    /// Remove `peer_id` from `room`. Removes the room entirely once its
    /// member set empties.
    pub fn leave(&self, peer_id: &str, room: &str) {
        let mut inner = self.inner.lock().expect("room index poisoned");
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(peer_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
        if let Some(rooms) = inner.peer_rooms.get_mut(peer_id) {
            rooms.remove(room);
            if rooms.is_empty() {
                inner.peer_rooms.remove(peer_id);
            }
        }
    }

    /// Remove `peer_id` from every room it belongs to. Returns the rooms
    /// it was removed from.
    pub fn leave_all(&self, peer_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().expect("room index poisoned");
        let rooms: Vec<String> = inner
            .peer_rooms
            .remove(peer_id)
            .map(|s| s.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(peer_id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }
        rooms
    }

    /// Members of `room`, or empty if the room does not exist.
    pub fn members(&self, room: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("room index poisoned");
        inner
            .rooms
            .get(room)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rooms `peer_id` currently belongs to.
    pub fn rooms_for(&self, peer_id: &str) -> Vec<String> {
        let inner = self.inner.lock().expect("room index poisoned");
        inner
            .peer_rooms
            .get(peer_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live (non-empty) rooms.
    pub fn room_count(&self) -> usize {
        self.inner.lock().expect("room index poisoned").rooms.len()
    }

    /// Fan out `event`/`data` to every connected member of `room` except
    /// `except` (typically the sender): direct emit for 0-1 recipients, a
    /// single cached serialize for 2-100, and dynamically-sized
    /// cooperative batches above that.
    pub async fn emit_to_room(
        &self,
        room: &str,
        event: &str,
        data: Value,
        except: Option<&str>,
        peers: &DashMap<String, PeerHandle>,
        cache: Option<&mut MessageCache>,
        encryption: Option<&mut Encryption>,
    ) {
        let targets: Vec<String> = self
            .members(room)
            .into_iter()
            .filter(|id| except != Some(id.as_str()))
            .filter(|id| peers.get(id).map(|p| p.is_connected()).unwrap_or(false))
            .collect();

        if targets.is_empty() {
            return;
        }

        if targets.len() == 1 {
            let handle = peers.get(&targets[0]).map(|p| p.clone());
            if let Some(handle) = handle {
                handle.emit(event, data).await;
            }
            return;
        }

        let envelope = meshsock_protocol::Envelope::event(event, data);

        if targets.len() <= 100 {
            let serialized = serialize_cached(&envelope, room, cache, encryption);
            let handles: Vec<PeerHandle> = targets.iter().filter_map(|id| peers.get(id).map(|p| p.clone())).collect();
            for handle in handles {
                handle.send_raw(serialized.clone()).await;
            }
            return;
        }

        let serialized = serialize_cached(&envelope, room, cache, encryption);
        let batch_size = (targets.len() / 20).clamp(50, 200);
        for chunk in targets.chunks(batch_size) {
            let handles: Vec<PeerHandle> = chunk.iter().filter_map(|id| peers.get(id).map(|p| p.clone())).collect();
            for handle in handles {
                handle.send_raw(serialized.clone()).await;
            }
            // Cooperative yield between batches so fan-out to a very large
            // room does not starve the rest of the I/O loop.
            tokio::task::yield_now().await;
        }
    }
}

fn serialize_cached(
    envelope: &meshsock_protocol::Envelope,
    cache_key_scope: &str,
    cache: Option<&mut MessageCache>,
    mut encryption: Option<&mut Encryption>,
) -> String {
    let key = format!(
        "{}:{}",
        cache_key_scope,
        meshsock_crypto::fnv1a_hex(&serde_json::to_string(envelope).unwrap_or_default())
    );

    if let Some(cache) = cache {
        if let Some(hit) = cache.get(&key) {
            return hit;
        }
        let serialized = meshsock_protocol::MessageCodec::serialize(envelope, encryption.as_deref_mut())
            .unwrap_or_else(|_| "{}".to_string());
        cache.insert(key, serialized.clone());
        return serialized;
    }

    meshsock_protocol::MessageCodec::serialize(envelope, encryption.as_deref_mut())
        .unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_reflexive() {
        let idx = RoomIndex::new();
        idx.join("p1", "room-x");
        assert_eq!(idx.members("room-x"), vec!["p1".to_string()]);
        assert_eq!(idx.rooms_for("p1"), vec!["room-x".to_string()]);
    }

    #[test]
    fn leave_removes_empty_room() {
        let idx = RoomIndex::new();
        idx.join("p1", "room-x");
        idx.leave("p1", "room-x");
        assert!(idx.members("room-x").is_empty());
        assert_eq!(idx.room_count(), 0);
    }

    #[test]
    fn leave_all_clears_every_room() {
        let idx = RoomIndex::new();
        idx.join("p1", "a");
        idx.join("p1", "b");
        idx.join("p2", "a");
        let left = idx.leave_all("p1");
        assert_eq!(left.len(), 2);
        assert_eq!(idx.members("a"), vec!["p2".to_string()]);
        assert!(idx.rooms_for("p1").is_empty());
    }

    #[test]
    fn room_survives_while_any_member_remains() {
        let idx = RoomIndex::new();
        idx.join("p1", "a");
        idx.join("p2", "a");
        idx.leave("p1", "a");
        assert_eq!(idx.room_count(), 1);
        assert_eq!(idx.members("a"), vec!["p2".to_string()]);
    }
}
