//! Room membership
//!
//! Connection ↔ team room relation used for broadcast fan-out. Joining
//! is idempotent and carries no authorization check (whether the
//! identity belongs to the team is the REST side's concern). The only
//! removal path is the disconnect sweep.

use crate::ConnId;
use dashmap::DashMap;
use std::collections::HashSet;

/// Room id → member connections.
#[derive(Default)]
pub struct RoomMembership {
    rooms: DashMap<String, HashSet<ConnId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add a connection to a room. Returns false when it was already a
    /// member.
    pub fn join(&self, room_id: &str, conn_id: ConnId) -> bool {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id)
    }

    /// Snapshot of the room's live member connections.
    pub fn members_of(&self, room_id: &str) -> Vec<ConnId> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every room it joined (called on
    /// disconnect). Rooms left empty are dropped from the map.
    pub fn remove_all(&self, conn_id: ConnId) {
        let mut empty_rooms = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            if entry.value_mut().remove(&conn_id) && entry.value().is_empty() {
                empty_rooms.push(entry.key().clone());
            }
        }
        for room_id in empty_rooms {
            self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        }
    }

    /// Number of rooms with at least one live member.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let rooms = RoomMembership::new();

        assert!(rooms.join("team1", 1));
        assert!(!rooms.join("team1", 1));
        assert_eq!(rooms.members_of("team1"), vec![1]);
    }

    #[test]
    fn members_of_unknown_room_is_empty() {
        let rooms = RoomMembership::new();
        assert!(rooms.members_of("nowhere").is_empty());
    }

    #[test]
    fn remove_all_sweeps_every_room() {
        let rooms = RoomMembership::new();

        rooms.join("team1", 1);
        rooms.join("team1", 2);
        rooms.join("team2", 1);

        rooms.remove_all(1);

        assert_eq!(rooms.members_of("team1"), vec![2]);
        assert!(rooms.members_of("team2").is_empty());
        // team2 became empty and must be dropped entirely
        assert_eq!(rooms.len(), 1);
    }
}
