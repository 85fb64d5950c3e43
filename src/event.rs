//! Events and actions exchanged between the widget and a transport.
//!
//! DESIGN
//! ======
//! Both backend variants translate their native payloads into `ChatEvent`
//! so the widget never sees a wire format. Outbound intent is expressed as
//! an `Action`; adapters decide how to encode it.

use std::collections::BTreeSet;

use time::OffsetDateTime;

/// Connection lifecycle of a transport.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live connection; the socket adapter may be waiting to retry.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and able to carry actions.
    Connected,
}

/// Something the backend told us.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// A chat line from a user.
    Chat { username: String, text: String, timestamp: OffsetDateTime },
    /// Informational line (joins, leaves, connectivity).
    System { text: String },
    /// Error line (rejected join, connectivity failure).
    Error { text: String },
    /// A join or rename was accepted under `username`.
    Joined { username: String, text: String },
    /// The backend refused to restore the name held before a reconnect.
    /// The session is anonymous again and must join anew.
    IdentityLost { text: String },
    /// Full list of online usernames.
    PresenceSnapshot { usernames: BTreeSet<String> },
    /// Number of connected clients.
    UserCount { count: usize },
}

impl ChatEvent {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }
}

/// Outbound request from the widget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Claim (or change to) a username.
    Join { username: String },
    /// Send a chat line as the current user.
    Chat { text: String },
}

/// Item delivered to a transport subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    State(ConnectionState),
    Event(ChatEvent),
}
