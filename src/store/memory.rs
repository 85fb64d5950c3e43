//! In-process realtime store.
//!
//! DESIGN
//! ======
//! `MemoryStore` is the shared database; `MemoryConnection` is one client's
//! link to it. Records registered through a connection are owned by it and
//! disappear when the connection goes offline or its last handle drops,
//! which is the remove-on-disconnect rule a hosted backend applies.
//!
//! All state sits behind one `std::sync::Mutex`; no lock is held across an
//! await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{MessageRecord, NewMessage, RealtimeStore, RecordKey, StoreError, UserMap, UserRecord};

/// Shared in-memory database. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

struct Shared {
    users: UserMap,
    /// Record key -> owning connection id.
    owners: HashMap<RecordKey, u64>,
    messages: Vec<MessageRecord>,
    tails: Vec<mpsc::UnboundedSender<MessageRecord>>,
    users_tx: watch::Sender<UserMap>,
    next_connection: u64,
    next_key: u64,
}

impl Default for Shared {
    fn default() -> Self {
        let (users_tx, _) = watch::channel(UserMap::new());
        Self {
            users: UserMap::new(),
            owners: HashMap::new(),
            messages: Vec::new(),
            tails: Vec::new(),
            users_tx,
            next_connection: 1,
            next_key: 0,
        }
    }
}

impl Shared {
    /// Push key: creation millis, a per-store counter, and random bits.
    fn push_key(&mut self, now_ms: i64) -> RecordKey {
        self.next_key += 1;
        format!("{now_ms:012x}{:08x}{:04x}", self.next_key, rand::random::<u16>())
    }

    fn publish_users(&self) {
        self.users_tx.send_replace(self.users.clone());
    }

    fn drop_owned(&mut self, connection: u64) {
        let owned: Vec<RecordKey> =
            self.owners.iter().filter(|(_, owner)| **owner == connection).map(|(key, _)| key.clone()).collect();
        if owned.is_empty() {
            return;
        }
        for key in &owned {
            self.owners.remove(key);
            self.users.remove(key);
        }
        debug!(connection, removed = owned.len(), "store: dropped presence records");
        self.publish_users();
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new online connection.
    #[must_use]
    pub fn connect(&self) -> MemoryConnection {
        let id = {
            let mut shared = self.lock();
            let id = shared.next_connection;
            shared.next_connection += 1;
            id
        };
        let (online, _) = watch::channel(true);
        MemoryConnection { link: Arc::new(Link { id, store: self.clone(), online }) }
    }

    /// Snapshot of `users`.
    #[must_use]
    pub fn users(&self) -> UserMap {
        self.lock().users.clone()
    }

    /// Every message ever pushed, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.lock().messages.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One client's connection. Clones share the link; the link closes when the
/// last clone drops.
#[derive(Clone)]
pub struct MemoryConnection {
    link: Arc<Link>,
}

struct Link {
    id: u64,
    store: MemoryStore,
    online: watch::Sender<bool>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.store.lock().drop_owned(self.id);
    }
}

impl MemoryConnection {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.link.id
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.link.online.borrow()
    }

    /// Simulate losing or regaining the network. Going offline removes the
    /// records this connection owns.
    pub fn set_online(&self, online: bool) {
        if self.is_online() == online {
            return;
        }
        if !online {
            self.link.store.lock().drop_owned(self.link.id);
        }
        self.link.online.send_replace(online);
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.is_online() { Ok(()) } else { Err(StoreError::Offline) }
    }
}

#[async_trait::async_trait]
impl RealtimeStore for MemoryConnection {
    async fn list_users(&self) -> Result<UserMap, StoreError> {
        self.ensure_online()?;
        Ok(self.link.store.users())
    }

    async fn register_user(&self, username: &str) -> Result<RecordKey, StoreError> {
        self.ensure_online()?;
        let now = now_millis();
        let mut shared = self.link.store.lock();
        let key = shared.push_key(now);
        shared.users.insert(key.clone(), UserRecord { username: username.to_owned(), joined_at: now, last_active: now });
        shared.owners.insert(key.clone(), self.link.id);
        shared.publish_users();
        Ok(key)
    }

    async fn rename_user(&self, key: &str, username: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut shared = self.link.store.lock();
        let Some(record) = shared.users.get_mut(key) else {
            return Err(StoreError::UnknownRecord(key.to_owned()));
        };
        record.username = username.to_owned();
        record.last_active = now_millis();
        shared.publish_users();
        Ok(())
    }

    async fn touch_user(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut shared = self.link.store.lock();
        let Some(record) = shared.users.get_mut(key) else {
            return Err(StoreError::UnknownRecord(key.to_owned()));
        };
        record.last_active = now_millis();
        shared.publish_users();
        Ok(())
    }

    async fn remove_user(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_online()?;
        let mut shared = self.link.store.lock();
        shared.owners.remove(key);
        if shared.users.remove(key).is_some() {
            shared.publish_users();
        }
        Ok(())
    }

    async fn push_message(&self, message: NewMessage) -> Result<RecordKey, StoreError> {
        self.ensure_online()?;
        let now = now_millis();
        let record =
            MessageRecord { kind: message.kind, username: message.username, message: message.message, timestamp: now };
        let mut shared = self.link.store.lock();
        let key = shared.push_key(now);
        shared.tails.retain(|tail| tail.send(record.clone()).is_ok());
        shared.messages.push(record);
        Ok(key)
    }

    fn watch_connection(&self) -> watch::Receiver<bool> {
        self.link.online.subscribe()
    }

    fn watch_users(&self) -> watch::Receiver<UserMap> {
        self.link.store.lock().users_tx.subscribe()
    }

    fn tail_messages(&self, limit: usize) -> mpsc::UnboundedReceiver<MessageRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.link.store.lock();
        let start = shared.messages.len().saturating_sub(limit);
        for record in &shared.messages[start..] {
            if tx.send(record.clone()).is_err() {
                break;
            }
        }
        shared.tails.push(tx);
        rx
    }
}

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
