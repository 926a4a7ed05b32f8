//! Connection bookkeeping.

use ripple_protocol::Event;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::auth::UserId;

/// Counter that keeps generated ids unique within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}{:04x}", timestamp, counter & 0xffff))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Something queued for a connection's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// An event to encode and write.
    Event(Arc<Event>),
    /// A liveness probe. The transport answers it with a transport-level
    /// ping and reports the reply through `Broker::acknowledge`.
    Probe,
}

/// Sending half of a connection's mailbox, owned by the registry.
pub type Outbox = mpsc::UnboundedSender<Delivery>;

/// Receiving half of a connection's mailbox, owned by the transport task.
///
/// Yields `None` once the broker has dropped the connection.
pub type Mailbox = mpsc::UnboundedReceiver<Delivery>;

/// Create a mailbox pair for a new connection.
#[must_use]
pub fn mailbox() -> (Outbox, Mailbox) {
    mpsc::unbounded_channel()
}

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected without a user.
    Anonymous {
        /// Number of joined rooms (zero means idle).
        rooms: usize,
    },
    /// Connected and associated with a user.
    Authenticated {
        /// The associated user.
        user: UserId,
        /// Number of joined rooms (zero means idle).
        rooms: usize,
    },
    /// Terminal state, after disconnect or heartbeat timeout.
    Disconnected,
}

/// Registry entry for a live connection.
#[derive(Debug)]
pub(crate) struct ConnectionEntry {
    pub user: Option<UserId>,
    pub rooms: HashSet<String>,
    pub alive: bool,
    pub missed_probes: u32,
    pub last_seen: Instant,
    outbox: Outbox,
}

impl ConnectionEntry {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            user: None,
            rooms: HashSet::new(),
            alive: true,
            missed_probes: 0,
            last_seen: Instant::now(),
            outbox,
        }
    }

    /// Queue an event. Returns `false` if the transport side is gone.
    pub fn deliver(&self, event: &Arc<Event>) -> bool {
        self.outbox.send(Delivery::Event(Arc::clone(event))).is_ok()
    }

    pub fn probe(&mut self) -> bool {
        self.alive = false;
        self.missed_probes += 1;
        self.outbox.send(Delivery::Probe).is_ok()
    }

    pub fn acknowledge(&mut self) {
        self.alive = true;
        self.missed_probes = 0;
        self.last_seen = Instant::now();
    }

    pub fn state(&self) -> ConnectionState {
        match &self.user {
            Some(user) => ConnectionState::Authenticated {
                user: user.clone(),
                rooms: self.rooms.len(),
            },
            None => ConnectionState::Anonymous {
                rooms: self.rooms.len(),
            },
        }
    }
}
