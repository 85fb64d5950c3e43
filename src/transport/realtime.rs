//! Realtime-database transport.
//!
//! DESIGN
//! ======
//! There is no request/response here: the client writes records and reads
//! the collections back through watches. A background task owns the store
//! handle and `select!`s over:
//!
//! - connectivity changes (`watch_connection`),
//! - the `users` collection (`watch_users`), turned into a presence snapshot
//!   plus a count,
//! - the message tail (last `history_limit`, then live appends),
//! - commands from `send` / `shutdown`.
//!
//! Joining checks the current `users` for a record with the same name that
//! is not ours, then registers (or renames) our record. The check and the
//! write are separate operations, so two clients racing for one name can
//! both win. Rejoining after an outage repeats the same steps with the last
//! accepted name. If that name was taken during the outage, the identity is
//! dropped (`IdentityLost`) and chat is refused until the user joins again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{CONNECTED_TEXT, DISCONNECTED_TEXT, EventHub, NOT_JOINED_TEXT, Subscription, Transport, TransportError};
use crate::config::ChatConfig;
use crate::event::{Action, ChatEvent, ConnectionState};
use crate::session::{NOT_CONNECTED_TEXT, UsernameError};
use crate::store::{MessageKind, MessageRecord, NewMessage, RealtimeStore, RecordKey, StoreError, UserMap};

#[cfg(test)]
#[path = "realtime_test.rs"]
mod realtime_test;

enum Command {
    Send(Action),
    Shutdown,
}

pub struct RealtimeTransport {
    hub: EventHub,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

impl RealtimeTransport {
    /// Start the subscription task over `store`. Must be called inside a
    /// tokio runtime.
    pub fn connect(store: Arc<dyn RealtimeStore>, config: &ChatConfig) -> Self {
        let hub = EventHub::new();
        hub.set_state(ConnectionState::Connecting);
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker { store, hub: hub.clone(), commands: rx, key: None, username: None };
        tokio::spawn(worker.run(config.history_limit));
        Self { hub, commands, closed: AtomicBool::new(false) }
    }
}

impl Transport for RealtimeTransport {
    fn send(&self, action: Action) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if self.hub.connection_state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.commands.send(Command::Send(action)).map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        self.hub.connection_state()
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("realtime: task already stopped");
            self.hub.set_state(ConnectionState::Disconnected);
            self.hub.close();
        }
    }
}

impl Drop for RealtimeTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    store: Arc<dyn RealtimeStore>,
    hub: EventHub,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Our presence record, once registered.
    key: Option<RecordKey>,
    /// Last accepted username.
    username: Option<String>,
}

impl Worker {
    async fn run(mut self, history_limit: usize) {
        let mut online = self.store.watch_connection();
        let mut users = self.store.watch_users();
        let mut messages = self.store.tail_messages(history_limit);

        let initially_online = *online.borrow_and_update();
        self.on_connection(initially_online).await;
        let snapshot = users.borrow_and_update().clone();
        self.on_users(&snapshot);

        loop {
            tokio::select! {
                changed = online.changed() => {
                    if changed.is_err() {
                        warn!("realtime: connection watch closed");
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    self.on_connection(now_online).await;
                    if now_online {
                        let snapshot = users.borrow().clone();
                        self.on_users(&snapshot);
                    }
                }
                changed = users.changed() => {
                    if changed.is_err() {
                        warn!("realtime: users watch closed");
                        break;
                    }
                    let snapshot = users.borrow_and_update().clone();
                    self.on_users(&snapshot);
                }
                record = messages.recv() => match record {
                    Some(record) => self.on_message(record),
                    None => {
                        warn!("realtime: message tail closed");
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(action)) => self.handle(action).await,
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        self.leave().await;
        self.hub.set_state(ConnectionState::Disconnected);
        self.hub.close();
        debug!("realtime: task stopped");
    }

    async fn on_connection(&mut self, online: bool) {
        if online {
            info!("realtime: connected");
            self.hub.set_state(ConnectionState::Connected);
            self.hub.publish(ChatEvent::system(CONNECTED_TEXT));
            if let Some(username) = self.username.clone() {
                debug!(%username, "realtime: restoring identity");
                self.restore(username).await;
            }
        } else {
            info!("realtime: disconnected");
            self.hub.set_state(ConnectionState::Disconnected);
            self.hub.publish(ChatEvent::system(DISCONNECTED_TEXT));
        }
    }

    fn on_users(&self, users: &UserMap) {
        let usernames = users.values().map(|u| u.username.clone()).filter(|u| !u.is_empty()).collect();
        self.hub.publish(ChatEvent::PresenceSnapshot { usernames });
        self.hub.publish(ChatEvent::UserCount { count: users.len() });
    }

    fn on_message(&self, record: MessageRecord) {
        let event = match record.kind {
            MessageKind::Chat => ChatEvent::Chat {
                username: record.username.unwrap_or_default(),
                text: record.message,
                timestamp: from_millis(record.timestamp).unwrap_or_else(OffsetDateTime::now_utc),
            },
            MessageKind::System => ChatEvent::System { text: record.message },
        };
        self.hub.publish(event);
    }

    async fn handle(&mut self, action: Action) {
        match action {
            Action::Join { username } => self.join(username).await,
            Action::Chat { text } => {
                if let Err(e) = self.chat(text).await {
                    self.report(&e);
                }
            }
        }
    }

    /// Post as the current user. Refused unless we hold a presence record.
    async fn chat(&self, text: String) -> Result<(), StoreError> {
        let (Some(username), Some(key)) = (&self.username, &self.key) else {
            warn!("realtime: chat without a presence record refused");
            self.hub.publish(ChatEvent::error(NOT_JOINED_TEXT));
            return Ok(());
        };
        self.store.push_message(NewMessage::chat(username.clone(), text)).await?;
        self.store.touch_user(key).await?;
        Ok(())
    }

    async fn join(&mut self, username: String) {
        match self.try_join(&username).await {
            Ok(Some(text)) => {
                self.username = Some(username.clone());
                self.hub.publish(ChatEvent::Joined { username, text });
            }
            Ok(None) => {
                self.hub.publish(ChatEvent::error(UsernameError::Taken(username).to_string()));
            }
            Err(e) => self.report(&e),
        }
    }

    /// Re-join after an outage. If someone else took the name meanwhile the
    /// identity is dropped and the widget is told to ask again.
    async fn restore(&mut self, username: String) {
        match self.try_join(&username).await {
            Ok(Some(text)) => self.hub.publish(ChatEvent::Joined { username, text }),
            Ok(None) => {
                warn!(%username, "realtime: name taken during outage");
                self.leave().await;
                self.username = None;
                self.hub.publish(ChatEvent::IdentityLost { text: UsernameError::Taken(username).to_string() });
            }
            Err(e) => self.report(&e),
        }
    }

    /// Register or rename. `Ok(None)` when the name is held by someone else.
    async fn try_join(&mut self, username: &str) -> Result<Option<String>, StoreError> {
        let users = self.store.list_users().await?;
        let taken = users.iter().any(|(key, user)| Some(key) != self.key.as_ref() && user.username == username);
        if taken {
            return Ok(None);
        }

        if let Some(key) = self.key.clone() {
            match self.store.rename_user(&key, username).await {
                Ok(()) => {
                    let previous = self.username.clone().unwrap_or_default();
                    if previous != username {
                        self.store
                            .push_message(NewMessage::system(format!("{previous} is now known as {username}")))
                            .await?;
                    }
                    info!(%previous, %username, "realtime: renamed");
                    return Ok(Some(format!("You are now chatting as {username}")));
                }
                Err(StoreError::UnknownRecord(_)) => {
                    debug!(%key, "realtime: presence record gone, registering again");
                    self.key = None;
                }
                Err(e) => return Err(e),
            }
        }

        let key = self.store.register_user(username).await?;
        self.key = Some(key);
        self.store.push_message(NewMessage::system(format!("{username} has joined the chat"))).await?;
        info!(%username, "realtime: joined");
        Ok(Some(format!("You are now chatting as {username}")))
    }

    async fn leave(&mut self) {
        let Some(key) = self.key.take() else { return };
        if let Err(e) = self.store.remove_user(&key).await {
            debug!(error = %e, "realtime: presence removal on shutdown failed");
        }
    }

    fn report(&self, error: &StoreError) {
        warn!(error = %error, "realtime: store write failed");
        let text = match error {
            StoreError::Offline => NOT_CONNECTED_TEXT.to_owned(),
            StoreError::UnknownRecord(_) => format!("Chat server error: {error}"),
        };
        self.hub.publish(ChatEvent::error(text));
    }
}

/// Milliseconds since the Unix epoch to a timestamp.
#[must_use]
pub fn from_millis(ms: i64) -> Option<OffsetDateTime> {
    match OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000) {
        Ok(at) => Some(at),
        Err(_) => None,
    }
}
