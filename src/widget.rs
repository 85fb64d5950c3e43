//! Headless widget shell.
//!
//! DESIGN
//! ======
//! `Widget` is the one place that mutates what the user sees. It owns the
//! session, the message log, the presence list, the input buffer, and the
//! visibility/minimized flags, and it is the only subscriber a front end
//! needs. The host constructs it explicitly with a transport and drives it
//! by feeding transport events (`next_event` / `pump`) and UI actions
//! (`submit`, `request_rename`, `toggle_minimize`, `dismiss`, `toggle`).
//!
//! A transport that cannot restore our name after a reconnect sends
//! `IdentityLost`; the session drops back to anonymous and the join prompt
//! returns. Presence is cleared whenever the connection is not up.
//!
//! UNREAD
//! ======
//! A chat entry that arrives while the widget is hidden or minimized bumps
//! the unread count. The count clears when the widget is visible and
//! expanded again. System and error entries never count.

use time::{OffsetDateTime, UtcOffset};
use tracing::debug;

use crate::config::ChatConfig;
use crate::event::{Action, ChatEvent, ConnectionState, TransportEvent};
use crate::message_log::MessageLog;
use crate::presence::{Presence, PresenceRow};
use crate::session::{Accepted, Session, SessionState, Submit};
use crate::transport::{Subscription, Transport};

#[cfg(test)]
#[path = "widget_test.rs"]
mod widget_test;

pub const JOIN_PLACEHOLDER: &str = "Enter username to join chat...";
pub const CHAT_PLACEHOLDER: &str = "Type a message...";
pub const RENAME_PLACEHOLDER: &str = "Enter new username...";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayMode {
    #[default]
    Expanded,
    Minimized,
}

pub struct Widget<T: Transport> {
    transport: T,
    subscription: Option<Subscription>,
    session: Session,
    log: MessageLog,
    presence: Presence,
    input: String,
    connection: ConnectionState,
    visibility: Visibility,
    mode: DisplayMode,
    unread: usize,
}

impl<T: Transport> Widget<T> {
    /// Mount a widget on `transport`. Times render in `offset`.
    pub fn new(transport: T, config: &ChatConfig, offset: UtcOffset) -> Self {
        let subscription = transport.subscribe();
        Self {
            connection: transport.connection_state(),
            transport,
            subscription: Some(subscription),
            session: Session::new(),
            log: MessageLog::from_config(config, offset),
            presence: Presence::new(),
            input: String::new(),
            visibility: Visibility::Visible,
            mode: DisplayMode::Expanded,
            unread: 0,
        }
    }

    // =========================================================================
    // TRANSPORT EVENTS
    // =========================================================================

    /// Wait for and apply the next transport event. Returns `false` once
    /// the transport has shut down.
    pub async fn next_event(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.recv().await {
            Some(event) => {
                self.handle(event);
                true
            }
            None => false,
        }
    }

    /// Apply every event already queued. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
            self.handle(event);
            applied += 1;
        }
        applied
    }

    /// Apply one transport event.
    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::State(state) => {
                self.connection = state;
                if state != ConnectionState::Connected {
                    self.presence.clear();
                    if self.session.abandon_request() {
                        debug!(?state, "widget: dropped in-flight request");
                    }
                }
            }
            TransportEvent::Event(event) => self.apply(&event),
        }
    }

    fn apply(&mut self, event: &ChatEvent) {
        match event {
            ChatEvent::Joined { username, .. } => {
                let was_waiting = self.session.in_flight();
                match self.session.accept(username) {
                    Accepted::Joined => debug!(%username, "widget: joined"),
                    Accepted::Renamed { from } => debug!(%from, %username, "widget: renamed"),
                    Accepted::Unchanged => {}
                }
                if was_waiting {
                    self.input.clear();
                }
            }
            ChatEvent::Error { .. } => {
                if self.session.reject() {
                    debug!("widget: request rejected");
                }
            }
            ChatEvent::IdentityLost { .. } => {
                if let Some(username) = self.session.forget() {
                    debug!(%username, "widget: identity lost");
                }
            }
            _ => {}
        }

        self.presence.apply(event);
        let counts = self.log.append(event, OffsetDateTime::now_utc()).is_some_and(|entry| entry.is_chat());
        if counts && !self.is_attentive() {
            self.unread += 1;
        }
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Send-button / Enter handler.
    pub fn submit(&mut self) -> Submit {
        let now = OffsetDateTime::now_utc();
        let decision = self.session.submit(&self.input, self.connection);
        match &decision {
            Submit::Ignored => {}
            Submit::Send(action) => match self.transport.send(action.clone()) {
                Ok(()) => {
                    if matches!(action, Action::Chat { .. }) {
                        self.input.clear();
                    }
                }
                Err(e) => {
                    self.session.abandon_request();
                    self.log.push_error(&e.to_string(), now);
                }
            },
            Submit::Rejected(text) => {
                self.log.push_error(text, now);
            }
            Submit::Unchanged(text) => {
                self.log.push_system(text, now);
                self.input.clear();
            }
        }
        decision
    }

    /// "Change" button: open the rename prompt with the current name.
    pub fn request_rename(&mut self) -> bool {
        match self.session.request_rename() {
            Some(current) => {
                self.input = current;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // CHROME
    // =========================================================================

    /// Minimize button.
    pub fn toggle_minimize(&mut self) {
        self.mode = match self.mode {
            DisplayMode::Expanded => DisplayMode::Minimized,
            DisplayMode::Minimized => DisplayMode::Expanded,
        };
        self.clear_unread_if_attentive();
    }

    /// Close button: hides the widget. The host can bring it back with
    /// [`Widget::toggle`].
    pub fn dismiss(&mut self) {
        self.visibility = Visibility::Hidden;
    }

    /// Host-facing show/hide.
    pub fn toggle(&mut self) {
        self.visibility = match self.visibility {
            Visibility::Visible => Visibility::Hidden,
            Visibility::Hidden => Visibility::Visible,
        };
        self.clear_unread_if_attentive();
    }

    /// Tear down: drop the subscription and shut the transport down.
    pub fn close(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.transport.shutdown();
        self.connection = ConnectionState::Disconnected;
    }

    fn is_attentive(&self) -> bool {
        self.visibility == Visibility::Visible && self.mode == DisplayMode::Expanded
    }

    fn clear_unread_if_attentive(&mut self) {
        if self.is_attentive() {
            self.unread = 0;
        }
    }

    // =========================================================================
    // VIEW STATE
    // =========================================================================

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    #[must_use]
    pub fn unread(&self) -> usize {
        self.unread
    }

    /// Unread badge text; `None` when nothing is unread or the widget is
    /// in view.
    #[must_use]
    pub fn badge(&self) -> Option<String> {
        if self.unread == 0 || self.is_attentive() {
            return None;
        }
        Some(if self.unread > 9 { "9+".to_owned() } else { self.unread.to_string() })
    }

    #[must_use]
    pub fn placeholder(&self) -> &'static str {
        match self.session.state() {
            SessionState::Anonymous | SessionState::AwaitingJoin { .. } => JOIN_PLACEHOLDER,
            SessionState::Joined { .. } => CHAT_PLACEHOLDER,
            SessionState::AwaitingRename { .. } => RENAME_PLACEHOLDER,
        }
    }

    #[must_use]
    pub fn submit_label(&self) -> &'static str {
        match self.session.state() {
            SessionState::Anonymous | SessionState::AwaitingJoin { .. } => "Join",
            SessionState::Joined { .. } => "Send",
            SessionState::AwaitingRename { .. } => "Update",
        }
    }

    /// "Chatting as" line, once joined.
    #[must_use]
    pub fn identity_line(&self) -> Option<String> {
        self.session.username().map(|username| format!("Chatting as: {username}"))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    #[must_use]
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Presence rows colored consistently with the log.
    pub fn presence_rows(&mut self) -> Vec<PresenceRow> {
        let current = self.session.username().map(str::to_owned);
        self.presence.rows(current.as_deref(), &mut self.log)
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
