//! Rooms.
//!
//! Rooms are named broadcast scopes. A room exists only while it has at
//! least one member.

use std::collections::HashSet;

use super::connection::ConnectionId;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.starts_with('$') {
        return Err("Room names starting with '$' are reserved");
    }
    if !name.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("Room name contains invalid characters");
    }
    Ok(())
}

/// A named set of member connections.
#[derive(Debug, Clone)]
pub struct Room {
    name: String,
    members: HashSet<ConnectionId>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a member. Returns `true` if it was not already present.
    pub fn insert(&mut self, id: ConnectionId) -> bool {
        self.members.insert(id)
    }

    /// Remove a member. Returns `true` if it was present.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.members.remove(id)
    }

    /// Check if a connection is a member.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    /// Iterate over member ids.
    pub fn members(&self) -> impl Iterator<Item = &ConnectionId> {
        self.members.iter()
    }

    /// Get the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_membership() {
        let mut room = Room::new("venue:42");
        let c1 = ConnectionId::new("c1");

        assert!(room.insert(c1.clone()));
        assert!(!room.insert(c1.clone()));
        assert_eq!(room.len(), 1);
        assert!(room.contains(&c1));

        assert!(room.remove(&c1));
        assert!(!room.remove(&c1));
        assert!(room.is_empty());
        assert_eq!(room.name(), "venue:42");
    }

    #[test]
    fn test_room_name_validation() {
        assert!(validate_room_name("venue:42").is_ok());
        assert!(validate_room_name("").is_err());
        assert!(validate_room_name("$system").is_err());
        assert!(validate_room_name("tab\there").is_err());

        let long_name = "a".repeat(MAX_ROOM_NAME_LENGTH + 1);
        assert!(validate_room_name(&long_name).is_err());
    }
}
