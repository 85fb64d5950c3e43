//! Realtime database backend seam.
//!
//! DESIGN
//! ======
//! The subscription transport talks to a hosted realtime database through
//! `RealtimeStore`. The database keeps two collections:
//!
//! - `users`: one record per joined client, keyed by a push key, removed by
//!   the backend when the owning connection goes away;
//! - `messages`: append-only chat and system lines, tailed by clients.
//!
//! Timestamps are milliseconds since the Unix epoch and are assigned by the
//! store, not the client. `MemoryStore` is the in-process implementation.

pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

pub use memory::{MemoryConnection, MemoryStore};

/// Push key of a record. Keys sort in creation order.
pub type RecordKey = String;

/// Current `users` collection, keyed by record.
pub type UserMap = BTreeMap<RecordKey, UserRecord>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("realtime store is offline")]
    Offline,
    #[error("record {0} does not exist")]
    UnknownRecord(RecordKey),
}

/// Presence record in `users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    pub joined_at: i64,
    pub last_active: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    System,
}

/// Line in `messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub message: String,
    pub timestamp: i64,
}

/// Message to append; the store stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub username: Option<String>,
    pub message: String,
}

impl NewMessage {
    pub fn chat(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: MessageKind::Chat, username: Some(username.into()), message: message.into() }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self { kind: MessageKind::System, username: None, message: message.into() }
    }
}

/// One client's connection to the realtime database.
///
/// Write operations fail with [`StoreError::Offline`] while the connection
/// is down. Watches and tails stay open across outages.
#[async_trait::async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Snapshot of `users`.
    async fn list_users(&self) -> Result<UserMap, StoreError>;

    /// Push a new presence record owned by this connection. The record is
    /// removed when the connection drops.
    async fn register_user(&self, username: &str) -> Result<RecordKey, StoreError>;

    /// Change the username on an existing record and bump `lastActive`.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownRecord`] if the record was already removed.
    async fn rename_user(&self, key: &str, username: &str) -> Result<(), StoreError>;

    /// Bump `lastActive` on a record.
    async fn touch_user(&self, key: &str) -> Result<(), StoreError>;

    /// Remove a record. Removing a missing record is not an error.
    async fn remove_user(&self, key: &str) -> Result<(), StoreError>;

    /// Append to `messages`.
    async fn push_message(&self, message: NewMessage) -> Result<RecordKey, StoreError>;

    /// Connectivity of this connection.
    fn watch_connection(&self) -> watch::Receiver<bool>;

    /// Live view of `users`.
    fn watch_users(&self) -> watch::Receiver<UserMap>;

    /// The last `limit` messages followed by every later append.
    fn tail_messages(&self, limit: usize) -> mpsc::UnboundedReceiver<MessageRecord>;
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
