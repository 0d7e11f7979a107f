//! Single-instance adapter: room membership lives in a local map, broadcast
//! and subscribe are no-ops since there is never a second instance to relay
//! to or hear from.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{Adapter, RelayCallback, RelayMessage, Result};

/// The default adapter for a server running without a distributed backing
/// store. Tracks room membership locally so `peers_in_room`/`rooms_for_peer`
/// still answer correctly within this one instance.
pub struct MemoryAdapter {
    server_id: Mutex<String>,
    rooms: DashMap<String, HashSet<String>>,
    peer_rooms: DashMap<String, HashSet<String>>,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    /// A fresh, empty in-memory adapter.
    pub fn new() -> Self {
        Self {
            server_id: Mutex::new(String::new()),
            rooms: DashMap::new(),
            peer_rooms: DashMap::new(),
        }
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn init(&self, server_id: &str) -> Result<()> {
        *self.server_id.lock().expect("memory adapter poisoned") = server_id.to_string();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.rooms.clear();
        self.peer_rooms.clear();
        Ok(())
    }

    async fn add_peer_to_room(&self, peer_id: &str, room: &str) -> Result<()> {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(peer_id.to_string());
        self.peer_rooms
            .entry(peer_id.to_string())
            .or_default()
            .insert(room.to_string());
        Ok(())
    }

    async fn remove_peer_from_room(&self, peer_id: &str, room: &str) -> Result<()> {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(peer_id);
        }
        if let Some(mut rooms) = self.peer_rooms.get_mut(peer_id) {
            rooms.remove(room);
        }
        Ok(())
    }

    async fn remove_peer_from_all_rooms(&self, peer_id: &str) -> Result<()> {
        if let Some((_, rooms)) = self.peer_rooms.remove(peer_id) {
            for room in rooms {
                if let Some(mut members) = self.rooms.get_mut(&room) {
                    members.remove(peer_id);
                }
            }
        }
        Ok(())
    }

    async fn peers_in_room(&self, room: &str) -> Result<Vec<String>> {
        Ok(self
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn rooms_for_peer(&self, peer_id: &str) -> Result<Vec<String>> {
        Ok(self
            .peer_rooms
            .get(peer_id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn broadcast(&self, _message: RelayMessage) -> Result<()> {
        Ok(())
    }

    async fn broadcast_to_room(&self, _room: &str, _message: RelayMessage) -> Result<()> {
        Ok(())
    }

    async fn subscribe(&self, _callback: RelayCallback) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        Ok(())
    }

    async fn server_ids(&self) -> Result<Vec<String>> {
        Ok(vec![self.server_id.lock().expect("memory adapter poisoned").clone()])
    }

    async fn register_server(&self) -> Result<()> {
        Ok(())
    }

    async fn unregister_server(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_leave_round_trips() {
        let adapter = MemoryAdapter::new();
        adapter.init("s1").await.unwrap();
        adapter.add_peer_to_room("p1", "room-a").await.unwrap();
        assert_eq!(adapter.peers_in_room("room-a").await.unwrap(), vec!["p1"]);
        assert_eq!(adapter.rooms_for_peer("p1").await.unwrap(), vec!["room-a"]);

        adapter.remove_peer_from_room("p1", "room-a").await.unwrap();
        assert!(adapter.peers_in_room("room-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn remove_from_all_rooms_clears_every_membership() {
        let adapter = MemoryAdapter::new();
        adapter.init("s1").await.unwrap();
        adapter.add_peer_to_room("p1", "a").await.unwrap();
        adapter.add_peer_to_room("p1", "b").await.unwrap();
        adapter.remove_peer_from_all_rooms("p1").await.unwrap();
        assert!(adapter.rooms_for_peer("p1").await.unwrap().is_empty());
        assert!(adapter.peers_in_room("a").await.unwrap().is_empty());
        assert!(adapter.peers_in_room("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_ids_reports_self() {
        let adapter = MemoryAdapter::new();
        adapter.init("s1").await.unwrap();
        assert_eq!(adapter.server_ids().await.unwrap(), vec!["s1".to_string()]);
    }
}
