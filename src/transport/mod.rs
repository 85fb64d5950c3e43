//! Backend adapters behind one interface.
//!
//! DESIGN
//! ======
//! A transport owns one background task that talks to its backend and
//! fans `TransportEvent`s out to subscribers through an `EventHub`. The
//! widget sees only this trait, so the socket relay and the realtime store
//! are interchangeable.
//!
//! `send` never blocks and never waits for a reply: join acknowledgements
//! and rejections come back as events. Connectivity failures are reported
//! as events too; nothing is thrown at the caller except "not connected"
//! and "closed".

pub mod hub;
pub mod realtime;
pub mod socket;

pub use hub::{EventHub, Subscription};
pub use realtime::RealtimeTransport;
pub use socket::SocketTransport;

use crate::event::{Action, ConnectionState};

pub const CONNECTED_TEXT: &str = "Connected to chat server. Enter a username to join the conversation.";
pub const DISCONNECTED_TEXT: &str = "Disconnected from chat server. Attempting to reconnect...";
pub const NOT_JOINED_TEXT: &str = "Join the chat before sending messages.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected to chat server. Please wait...")]
    NotConnected,
    #[error("Chat is closed.")]
    Closed,
}

/// Uniform backend interface.
pub trait Transport {
    /// Queue `action` for the backend.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] unless connected,
    /// [`TransportError::Closed`] after [`Transport::shutdown`].
    fn send(&self, action: Action) -> Result<(), TransportError>;

    /// New event handle. Its first item is the current connection state.
    fn subscribe(&self) -> Subscription;

    fn connection_state(&self) -> ConnectionState;

    /// Stop the background task and release backend resources. Idempotent.
    /// Sends fail with `Closed` immediately; subscriptions end once the
    /// task has finished its cleanup.
    fn shutdown(&self);
}
