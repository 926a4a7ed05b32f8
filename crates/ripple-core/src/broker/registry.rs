//! Connection registry and room index.
//!
//! The registry owns three maps that must change together: connections,
//! rooms and the user index. It is a plain data structure; the broker wraps
//! it in a single lock so every mutation below is atomic with respect to the
//! others.

use ripple_protocol::Event;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::connection::{ConnectionEntry, ConnectionId, ConnectionState, Outbox};
use super::room::Room;
use super::{BrokerConfig, BrokerError};
use crate::auth::UserId;

/// Outcome of one heartbeat cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Connections that were sent a probe.
    pub probed: usize,
    /// Connections removed for missing too many probes.
    pub expired: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, Room>,
    users: HashMap<UserId, HashSet<ConnectionId>>,
}

impl Registry {
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn membership_count(&self) -> usize {
        self.rooms.values().map(Room::len).sum()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn insert(
        &mut self,
        id: ConnectionId,
        outbox: Outbox,
        config: &BrokerConfig,
    ) -> Result<(), BrokerError> {
        if self.connections.len() >= config.max_connections {
            return Err(BrokerError::CapacityExceeded("connections"));
        }
        self.connections.insert(id, ConnectionEntry::new(outbox));
        Ok(())
    }

    /// Remove a connection from every room and from the user index, then
    /// drop its entry (closing its mailbox).
    pub fn remove(&mut self, id: &ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(id)?;

        for room_name in &entry.rooms {
            self.detach_from_room(id, room_name);
        }

        if let Some(user) = &entry.user {
            self.unindex_user(id, user);
        }

        Some(entry)
    }

    /// Add `id` to `room`. Returns `Ok(false)` if it was already a member.
    pub fn join(
        &mut self,
        id: &ConnectionId,
        room_name: &str,
        config: &BrokerConfig,
    ) -> Result<bool, BrokerError> {
        let entry = self
            .connections
            .get_mut(id)
            .ok_or_else(|| BrokerError::NotConnected(id.clone()))?;

        if entry.rooms.contains(room_name) {
            return Ok(false);
        }
        if entry.rooms.len() >= config.max_rooms_per_connection {
            return Err(BrokerError::CapacityExceeded("rooms per connection"));
        }
        if !self.rooms.contains_key(room_name) && self.rooms.len() >= config.max_rooms {
            return Err(BrokerError::CapacityExceeded("rooms"));
        }

        entry.rooms.insert(room_name.to_string());
        let room = self.rooms.entry(room_name.to_string()).or_insert_with(|| {
            debug!(room = %room_name, "Creating new room");
            Room::new(room_name)
        });
        room.insert(id.clone());

        trace!(room = %room_name, connection = %id, members = room.len(), "Joined room");
        Ok(true)
    }

    /// Remove `id` from `room`. Returns `false` if it was not a member.
    pub fn leave(&mut self, id: &ConnectionId, room_name: &str) -> bool {
        let removed = self
            .connections
            .get_mut(id)
            .map(|entry| entry.rooms.remove(room_name))
            .unwrap_or(false);

        if removed {
            self.detach_from_room(id, room_name);
        }
        removed
    }

    /// Associate a user, replacing any previous association.
    ///
    /// Returns `None` if the connection is gone.
    pub fn set_user(&mut self, id: &ConnectionId, user: &UserId) -> Option<Option<UserId>> {
        let entry = self.connections.get_mut(id)?;
        let previous = entry.user.replace(user.clone());

        if let Some(old) = &previous {
            if old != user {
                self.unindex_user(id, old);
            }
        }
        self.users
            .entry(user.clone())
            .or_default()
            .insert(id.clone());

        Some(previous)
    }

    pub fn acknowledge(&mut self, id: &ConnectionId) -> bool {
        match self.connections.get_mut(id) {
            Some(entry) => {
                entry.acknowledge();
                true
            }
            None => false,
        }
    }

    pub fn send(&self, id: &ConnectionId, event: &Arc<Event>) -> bool {
        self.connections
            .get(id)
            .map(|entry| entry.deliver(event))
            .unwrap_or(false)
    }

    pub fn send_to_user(&self, user: &str, event: &Arc<Event>) -> usize {
        self.users
            .get(user)
            .map(|ids| ids.iter().filter(|id| self.send(id, event)).count())
            .unwrap_or(0)
    }

    pub fn broadcast(&self, event: &Arc<Event>) -> usize {
        self.connections
            .values()
            .filter(|entry| entry.deliver(event))
            .count()
    }

    pub fn broadcast_to_room(&self, room_name: &str, event: &Arc<Event>) -> usize {
        self.rooms
            .get(room_name)
            .map(|room| room.members().filter(|id| self.send(id, event)).count())
            .unwrap_or(0)
    }

    /// Run one heartbeat cycle.
    ///
    /// Connections that already missed `max_missed` probes are removed;
    /// every other connection is marked not-alive and probed.
    pub fn heartbeat(&mut self, max_missed: u32) -> HeartbeatReport {
        let max_missed = max_missed.max(1);
        let mut report = HeartbeatReport::default();

        for (id, entry) in &mut self.connections {
            if entry.missed_probes >= max_missed {
                report.expired.push(id.clone());
            } else {
                entry.probe();
                report.probed += 1;
            }
        }

        for id in &report.expired {
            self.remove(id);
        }

        report
    }

    pub fn state(&self, id: &ConnectionId) -> ConnectionState {
        self.connections
            .get(id)
            .map(ConnectionEntry::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn user_of(&self, id: &ConnectionId) -> Option<UserId> {
        self.connections.get(id).and_then(|e| e.user.clone())
    }

    pub fn is_alive(&self, id: &ConnectionId) -> bool {
        self.connections.get(id).is_some_and(|e| e.alive)
    }

    pub fn last_seen(&self, id: &ConnectionId) -> Option<Instant> {
        self.connections.get(id).map(|e| e.last_seen)
    }

    pub fn rooms_of(&self, id: &ConnectionId) -> Vec<String> {
        self.connections
            .get(id)
            .map(|e| e.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_members(&self, room_name: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_name)
            .map(|room| room.members().cloned().collect())
            .unwrap_or_default()
    }

    pub fn room_names(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn room_exists(&self, room_name: &str) -> bool {
        self.rooms.contains_key(room_name)
    }

    pub fn connections_of(&self, user: &str) -> Vec<ConnectionId> {
        self.users
            .get(user)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn detach_from_room(&mut self, id: &ConnectionId, room_name: &str) {
        if let Some(room) = self.rooms.get_mut(room_name) {
            room.remove(id);
            if room.is_empty() {
                self.rooms.remove(room_name);
                debug!(room = %room_name, "Deleted empty room");
            }
        }
    }

    fn unindex_user(&mut self, id: &ConnectionId, user: &str) {
        if let Some(ids) = self.users.get_mut(user) {
            ids.remove(id);
            if ids.is_empty() {
                self.users.remove(user);
            }
        }
    }

    /// Check the bidirectional membership invariants.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (name, room) in &self.rooms {
            assert!(!room.is_empty(), "room {name} is empty");
            for id in room.members() {
                let entry = self.connections.get(id).expect("member is connected");
                assert!(entry.rooms.contains(name), "{id} missing back-reference to {name}");
            }
        }
        for (id, entry) in &self.connections {
            for name in &entry.rooms {
                let room = self.rooms.get(name).expect("joined room exists");
                assert!(room.contains(id), "room {name} missing member {id}");
            }
            if let Some(user) = &entry.user {
                assert!(self.users.get(user).is_some_and(|ids| ids.contains(id)));
            }
        }
    }
}
