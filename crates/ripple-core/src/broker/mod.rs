//! Room-based pub/sub broker.
//!
//! The broker tracks live connections, their room membership and the user
//! each one authenticated as, and fans events out to them. Every connection
//! owns a [`Mailbox`]; the broker only ever pushes into the matching
//! [`Outbox`], so delivery never blocks and per-connection order is FIFO.
//!
//! A disabled broker accepts every call and does nothing.

mod connection;
mod registry;
mod room;

pub use connection::{mailbox, ConnectionId, ConnectionState, Delivery, Mailbox, Outbox};
pub use registry::HeartbeatReport;
pub use room::{validate_room_name, Room, MAX_ROOM_NAME_LENGTH};

use ripple_protocol::{error_codes, ClientMessage, Event};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::auth::{AuthError, Authenticator, StaticTokenAuthenticator, UserId};
use crate::periodic::PeriodicTask;
use registry::Registry;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// A bookkeeping limit was reached.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    /// The connection is not registered.
    #[error("Connection not found: {0}")]
    NotConnected(ConnectionId),

    /// Token rejected.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl BrokerError {
    /// Error code sent to the client in an `error` event.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            BrokerError::InvalidRoom(_) => error_codes::INVALID_ROOM,
            BrokerError::CapacityExceeded(_) => error_codes::CAPACITY,
            BrokerError::NotConnected(_) => error_codes::NOT_CONNECTED,
            BrokerError::Auth(_) => error_codes::AUTH_FAILED,
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// When false every operation is an inert no-op.
    pub enabled: bool,
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Maximum number of rooms.
    pub max_rooms: usize,
    /// Maximum rooms a single connection may join.
    pub max_rooms_per_connection: usize,
    /// Interval between heartbeat cycles.
    pub heartbeat_interval: Duration,
    /// Probes a connection may leave unanswered before it is dropped.
    pub max_missed_probes: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections: 100_000,
            max_rooms: 10_000,
            max_rooms_per_connection: 100,
            heartbeat_interval: Duration::from_secs(30),
            max_missed_probes: 1,
        }
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BrokerStats {
    /// Number of live connections.
    pub connection_count: usize,
    /// Number of rooms.
    pub room_count: usize,
    /// Number of distinct authenticated users.
    pub user_count: usize,
    /// Total room memberships.
    pub total_memberships: usize,
}

/// The connection registry, room index and broadcaster.
pub struct Broker {
    registry: RwLock<Registry>,
    authenticator: Arc<dyn Authenticator>,
    config: BrokerConfig,
}

impl Broker {
    /// Create a broker.
    #[must_use]
    pub fn new(config: BrokerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        info!("Creating broker with config: {:?}", config);
        Self {
            registry: RwLock::new(Registry::default()),
            authenticator,
            config,
        }
    }

    /// Create a broker that ignores every call.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(
            BrokerConfig {
                enabled: false,
                ..BrokerConfig::default()
            },
            Arc::new(StaticTokenAuthenticator::default()),
        )
    }

    /// Check if the broker is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get the broker configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    // Lock poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection and greet it with `connected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection limit is reached.
    pub fn connect(&self, outbox: Outbox) -> Result<ConnectionId, BrokerError> {
        let id = ConnectionId::generate();
        if !self.config.enabled {
            return Ok(id);
        }

        let mut registry = self.write();
        registry.insert(id.clone(), outbox, &self.config)?;
        registry.send(&id, &Arc::new(Event::connected(id.as_str())));
        debug!(connection = %id, connections = registry.connection_count(), "Connected");

        Ok(id)
    }

    /// Validate `token` and associate the resulting user with the connection.
    ///
    /// Validation runs without holding any lock. If the connection went away
    /// in the meantime nothing is recorded and `Ok(None)` is returned.
    ///
    /// A rejected token never closes the connection and never clears an
    /// earlier association: a connection already authenticated as `u1` stays
    /// `u1` after a failed re-authentication, while one that never
    /// authenticated stays anonymous.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Auth`] if the token is rejected.
    pub async fn authenticate(
        &self,
        id: &ConnectionId,
        token: &str,
    ) -> Result<Option<UserId>, BrokerError> {
        if !self.config.enabled {
            return Ok(None);
        }

        let user = self.authenticator.validate(token).await?;

        let mut registry = self.write();
        match registry.set_user(id, &user) {
            Some(previous) => {
                registry.send(id, &Arc::new(Event::authenticated(&user)));
                debug!(connection = %id, user = %user, previous = ?previous, "Authenticated");
                Ok(Some(user))
            }
            None => {
                debug!(connection = %id, "Connection closed during authentication");
                Ok(None)
            }
        }
    }

    /// Add the connection to a room, creating the room on first join.
    ///
    /// Joining a room twice is the same as joining it once.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid, the connection is
    /// unknown, or a capacity limit is reached.
    pub fn join_room(&self, id: &ConnectionId, room: &str) -> Result<(), BrokerError> {
        if !self.config.enabled {
            return Ok(());
        }
        validate_room_name(room).map_err(BrokerError::InvalidRoom)?;

        let mut registry = self.write();
        if registry.join(id, room, &self.config)? {
            registry.send(id, &Arc::new(Event::joined_room(room)));
            debug!(room = %room, connection = %id, "Joined room");
        }
        Ok(())
    }

    /// Remove the connection from a room, deleting the room if it empties.
    ///
    /// Returns `false` if the connection was not a member.
    pub fn leave_room(&self, id: &ConnectionId, room: &str) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut registry = self.write();
        let left = registry.leave(id, room);
        if left {
            registry.send(id, &Arc::new(Event::left_room(room)));
            debug!(room = %room, connection = %id, "Left room");
        }
        left
    }

    /// Deliver an event to one connection.
    ///
    /// Returns `false` if the connection is gone.
    pub fn send(&self, id: &ConnectionId, event: Event) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.read().send(id, &Arc::new(event))
    }

    /// Deliver an event to every live connection of a user.
    ///
    /// Returns the number of connections reached.
    pub fn send_to_user(&self, user: &str, event: Event) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let count = self.read().send_to_user(user, &Arc::new(event));
        trace!(user = %user, recipients = count, "Sent to user");
        count
    }

    /// Deliver an event to every live connection.
    pub fn broadcast(&self, event: Event) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let count = self.read().broadcast(&Arc::new(event));
        trace!(recipients = count, "Broadcast");
        count
    }

    /// Deliver an event to every member of a room.
    pub fn broadcast_to_room(&self, room: &str, event: Event) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let count = self.read().broadcast_to_room(room, &Arc::new(event));
        trace!(room = %room, recipients = count, "Broadcast to room");
        count
    }

    /// Remove the connection from every room, then drop it.
    ///
    /// Its mailbox closes, which tells the transport task to shut down.
    /// Returns `false` if the connection was already gone.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        if !self.config.enabled {
            return false;
        }
        let removed = self.write().remove(id);
        if let Some(entry) = &removed {
            debug!(connection = %id, rooms = entry.rooms.len(), "Disconnected");
        }
        removed.is_some()
    }

    /// Record a heartbeat acknowledgment.
    pub fn acknowledge(&self, id: &ConnectionId) -> bool {
        if !self.config.enabled {
            return false;
        }
        self.write().acknowledge(id)
    }

    /// Route an inbound client message.
    ///
    /// Failures are reported to the client as `error` events and never close
    /// the connection.
    pub async fn handle_message(&self, id: &ConnectionId, message: ClientMessage) {
        if !self.config.enabled {
            return;
        }

        let result = match message {
            ClientMessage::Auth { token } => self.authenticate(id, &token).await.map(|_| ()),
            ClientMessage::JoinRoom { room } => self.join_room(id, &room),
            ClientMessage::LeaveRoom { room } => {
                self.leave_room(id, &room);
                Ok(())
            }
            ClientMessage::Ping => {
                self.acknowledge(id);
                self.send(id, Event::pong());
                Ok(())
            }
            ClientMessage::Unknown(kind) => {
                warn!(connection = %id, kind = %kind, "Ignoring unrecognized message type");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(connection = %id, error = %e, "Client request failed");
            self.send(id, Event::error(e.code(), e.to_string()));
        }
    }

    /// Run one heartbeat cycle.
    ///
    /// Every connection is marked not-alive and probed; a connection that
    /// has already missed `max_missed_probes` probes is disconnected and
    /// removed from all rooms instead.
    pub fn heartbeat_tick(&self) -> HeartbeatReport {
        if !self.config.enabled {
            return HeartbeatReport::default();
        }

        let report = self.write().heartbeat(self.config.max_missed_probes);
        for id in &report.expired {
            info!(connection = %id, "Heartbeat timeout, connection dropped");
        }
        trace!(probed = report.probed, expired = report.expired.len(), "Heartbeat");
        report
    }

    /// Spawn the heartbeat on its configured interval.
    ///
    /// Returns `None` when the broker is disabled.
    #[must_use]
    pub fn spawn_heartbeat(self: &Arc<Self>) -> Option<PeriodicTask> {
        if !self.config.enabled {
            return None;
        }
        let broker = Arc::clone(self);
        Some(PeriodicTask::spawn(
            "heartbeat",
            self.config.heartbeat_interval,
            move || {
                let broker = Arc::clone(&broker);
                async move {
                    broker.heartbeat_tick();
                }
            },
        ))
    }

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let registry = self.read();
        BrokerStats {
            connection_count: registry.connection_count(),
            room_count: registry.room_count(),
            user_count: registry.user_count(),
            total_memberships: registry.membership_count(),
        }
    }

    /// Check if a connection is registered.
    #[must_use]
    pub fn is_connected(&self, id: &ConnectionId) -> bool {
        self.read().contains(id)
    }

    /// Check the liveness flag of a connection.
    #[must_use]
    pub fn is_alive(&self, id: &ConnectionId) -> bool {
        self.read().is_alive(id)
    }

    /// Get when a connection last acknowledged a probe, or connected if it
    /// never has.
    #[must_use]
    pub fn last_seen(&self, id: &ConnectionId) -> Option<Instant> {
        self.read().last_seen(id)
    }

    /// Get the lifecycle state of a connection.
    #[must_use]
    pub fn connection_state(&self, id: &ConnectionId) -> ConnectionState {
        self.read().state(id)
    }

    /// Get the user a connection authenticated as.
    #[must_use]
    pub fn connection_user(&self, id: &ConnectionId) -> Option<UserId> {
        self.read().user_of(id)
    }

    /// Get the rooms a connection has joined.
    #[must_use]
    pub fn connection_rooms(&self, id: &ConnectionId) -> Vec<String> {
        self.read().rooms_of(id)
    }

    /// Get the live connections of a user.
    #[must_use]
    pub fn user_connections(&self, user: &str) -> Vec<ConnectionId> {
        self.read().connections_of(user)
    }

    /// Get the members of a room.
    #[must_use]
    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        self.read().room_members(room)
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.read().room_names()
    }

    /// Check if a room exists.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.read().room_exists(room)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(
            BrokerConfig::default(),
            Arc::new(StaticTokenAuthenticator::default()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ripple_protocol::event::kinds;
    use tokio::sync::Notify;

    fn broker_with_tokens() -> Broker {
        Broker::new(
            BrokerConfig::default(),
            Arc::new(StaticTokenAuthenticator::new([("t1", "u1"), ("t2", "u2")])),
        )
    }

    fn drain(rx: &mut Mailbox) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(d) = rx.try_recv() {
            out.push(d);
        }
        out
    }

    fn kinds_of(rx: &mut Mailbox) -> Vec<String> {
        drain(rx)
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Event(e) => Some(e.kind.clone()),
                Delivery::Probe => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_sends_connected() {
        let broker = Broker::default();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        match rx.try_recv().unwrap() {
            Delivery::Event(e) => {
                assert!(e.is(kinds::CONNECTED));
                assert_eq!(e.payload["connectionId"], id.as_str());
            }
            other => panic!("Expected event, got {:?}", other),
        }
        assert!(broker.is_connected(&id));
        assert_eq!(broker.stats().connection_count, 1);
    }

    #[test]
    fn test_join_is_idempotent() {
        let broker = Broker::default();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        broker.join_room(&id, "venue:42").unwrap();
        let once = (broker.room_members("venue:42"), broker.connection_rooms(&id));
        broker.join_room(&id, "venue:42").unwrap();
        let twice = (broker.room_members("venue:42"), broker.connection_rooms(&id));

        assert_eq!(once, twice);
        assert_eq!(kinds_of(&mut rx), vec!["connected", "joined_room"]);
    }

    #[test]
    fn test_leave_deletes_empty_room() {
        let broker = Broker::default();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        broker.join_room(&id, "lobby").unwrap();
        assert!(broker.leave_room(&id, "lobby"));
        assert!(!broker.room_exists("lobby"));
        assert!(!broker.leave_room(&id, "lobby"));
        assert_eq!(
            kinds_of(&mut rx),
            vec!["connected", "joined_room", "left_room"]
        );
    }

    #[test]
    fn test_join_invalid_room() {
        let broker = Broker::default();
        let (tx, _rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        assert!(matches!(
            broker.join_room(&id, ""),
            Err(BrokerError::InvalidRoom(_))
        ));
        assert!(matches!(
            broker.join_room(&ConnectionId::new("ghost"), "lobby"),
            Err(BrokerError::NotConnected(_))
        ));
        assert!(!broker.room_exists("lobby"));
    }

    #[test]
    fn test_send_to_missing_connection_is_noop() {
        let broker = Broker::default();
        assert!(!broker.send(&ConnectionId::new("ghost"), Event::pong()));
        assert_eq!(broker.send_to_user("nobody", Event::pong()), 0);
        assert_eq!(broker.broadcast_to_room("nowhere", Event::pong()), 0);
    }

    #[test]
    fn test_disconnect_invalidates_sends() {
        let broker = Broker::default();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();
        broker.join_room(&id, "lobby").unwrap();

        assert!(broker.disconnect(&id));
        assert!(!broker.send(&id, Event::pong()));
        assert!(!broker.room_exists("lobby"));
        assert_eq!(broker.connection_state(&id), ConnectionState::Disconnected);

        drain(&mut rx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_authenticate_success_and_failure() {
        let broker = broker_with_tokens();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        let err = broker.authenticate(&id, "bad").await.unwrap_err();
        assert!(matches!(err, BrokerError::Auth(AuthError::InvalidToken)));
        assert!(broker.is_connected(&id));
        assert_eq!(broker.connection_user(&id), None);

        let user = broker.authenticate(&id, "t1").await.unwrap();
        assert_eq!(user.as_deref(), Some("u1"));
        assert_eq!(
            broker.connection_state(&id),
            ConnectionState::Authenticated {
                user: "u1".into(),
                rooms: 0
            }
        );

        // Re-authenticating replaces the association.
        broker.authenticate(&id, "t2").await.unwrap();
        assert!(broker.user_connections("u1").is_empty());
        assert_eq!(broker.user_connections("u2"), vec![id.clone()]);

        assert_eq!(
            kinds_of(&mut rx),
            vec!["connected", "authenticated", "authenticated"]
        );
    }

    #[tokio::test]
    async fn test_failed_reauthentication_keeps_user() {
        let broker = broker_with_tokens();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        broker.authenticate(&id, "t1").await.unwrap();
        let err = broker.authenticate(&id, "bad").await.unwrap_err();
        assert!(matches!(err, BrokerError::Auth(AuthError::InvalidToken)));

        assert_eq!(broker.connection_user(&id).as_deref(), Some("u1"));
        assert_eq!(broker.user_connections("u1"), vec![id.clone()]);
        assert_eq!(kinds_of(&mut rx), vec!["connected", "authenticated"]);
    }

    #[test]
    fn test_broadcast_reaches_live_connections() {
        let broker = Broker::default();
        let (tx_a, mut rx_a) = mailbox();
        let (tx_b, mut rx_b) = mailbox();
        let (tx_c, mut rx_c) = mailbox();
        let a = broker.connect(tx_a).unwrap();
        let b = broker.connect(tx_b).unwrap();
        let c = broker.connect(tx_c).unwrap();
        broker.join_room(&a, "lobby").unwrap();
        assert!(broker.disconnect(&c));
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let sent = broker.broadcast(Event::new("announcement", serde_json::json!({"text": "hi"})));
        assert_eq!(sent, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Delivery::Event(e) => {
                    assert!(e.is("announcement"));
                    assert_eq!(e.payload["text"], "hi");
                }
                other => panic!("Expected event, got {:?}", other),
            }
        }
        assert!(rx_c.try_recv().is_err());
        assert!(!broker.is_connected(&c));
        assert!(broker.is_connected(&b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_seen_tracks_acknowledgements() {
        let broker = Broker::default();
        let (tx, _rx) = mailbox();
        let id = broker.connect(tx).unwrap();
        let connected_at = broker.last_seen(&id).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(broker.last_seen(&id), Some(connected_at));

        assert!(broker.acknowledge(&id));
        assert_eq!(
            broker.last_seen(&id),
            Some(connected_at + Duration::from_secs(5))
        );

        broker.disconnect(&id);
        assert_eq!(broker.last_seen(&id), None);
    }

    struct GatedAuthenticator {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Authenticator for GatedAuthenticator {
        async fn validate(&self, _token: &str) -> Result<UserId, AuthError> {
            self.gate.notified().await;
            Ok("u1".to_string())
        }
    }

    #[tokio::test]
    async fn test_disconnect_during_authentication() {
        let gate = Arc::new(Notify::new());
        let broker = Arc::new(Broker::new(
            BrokerConfig::default(),
            Arc::new(GatedAuthenticator { gate: gate.clone() }),
        ));
        let (tx, _rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        let task = {
            let broker = broker.clone();
            let id = id.clone();
            tokio::spawn(async move { broker.authenticate(&id, "t").await })
        };
        tokio::task::yield_now().await;

        broker.disconnect(&id);
        gate.notify_one();

        let result = task.await.unwrap().unwrap();
        assert_eq!(result, None);
        assert!(broker.user_connections("u1").is_empty());
        assert_eq!(broker.stats().user_count, 0);
    }

    #[tokio::test]
    async fn test_handle_message_routes() {
        let broker = broker_with_tokens();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        broker.handle_message(&id, ClientMessage::auth("t1")).await;
        broker
            .handle_message(&id, ClientMessage::join_room("lobby"))
            .await;
        broker.handle_message(&id, ClientMessage::Ping).await;
        broker
            .handle_message(&id, ClientMessage::Unknown("typing".into()))
            .await;
        broker.handle_message(&id, ClientMessage::auth("bad")).await;
        broker
            .handle_message(&id, ClientMessage::leave_room("lobby"))
            .await;

        assert_eq!(
            kinds_of(&mut rx),
            vec![
                "connected",
                "authenticated",
                "joined_room",
                "pong",
                "error",
                "left_room"
            ]
        );
        assert!(broker.is_connected(&id));
        assert_eq!(broker.connection_user(&id).as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_disabled_broker_is_inert() {
        let broker = Broker::disabled();
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();

        assert!(broker.join_room(&id, "lobby").is_ok());
        assert_eq!(broker.authenticate(&id, "t1").await.unwrap(), None);
        assert_eq!(broker.broadcast(Event::pong()), 0);
        assert_eq!(broker.broadcast_to_room("lobby", Event::pong()), 0);
        assert!(!broker.disconnect(&id));
        assert_eq!(broker.heartbeat_tick(), HeartbeatReport::default());
        assert_eq!(broker.stats(), BrokerStats::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_heartbeat_drops_silent_connection() {
        let broker = Arc::new(Broker::new(
            BrokerConfig {
                heartbeat_interval: Duration::from_secs(10),
                ..BrokerConfig::default()
            },
            Arc::new(StaticTokenAuthenticator::default()),
        ));
        let (tx, mut rx) = mailbox();
        let id = broker.connect(tx).unwrap();
        broker.join_room(&id, "lobby").unwrap();

        let _heartbeat = broker.spawn_heartbeat().unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(broker.is_connected(&id));
        assert!(!broker.is_alive(&id));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!broker.is_connected(&id));
        assert!(!broker.room_exists("lobby"));

        let deliveries = drain(&mut rx);
        assert_eq!(
            deliveries.iter().filter(|d| **d == Delivery::Probe).count(),
            1
        );
    }
}
