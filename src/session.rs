//! Session identity state machine: join, rename, and send.
//!
//! DESIGN
//! ======
//! The session is pure: `submit` inspects the current state and returns a
//! `Submit` describing what should happen (send an action, show an error,
//! show a note, or nothing). It never touches a transport. State moves
//! forward only through `submit`, `request_rename`, and the responses fed
//! back via `accept` / `reject` / `abandon_request`.
//!
//! IN-FLIGHT GATING
//! ================
//! `AwaitingJoin` and `AwaitingRename { pending: Some(_) }` mean a request
//! is outstanding. Every submit in that window is `Ignored`, so the send
//! button and the Enter key share one gate.

use crate::event::{Action, ConnectionState};

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

pub const MIN_USERNAME_CHARS: usize = 2;
pub const MAX_USERNAME_CHARS: usize = 20;

pub const NOT_CONNECTED_TEXT: &str = "Not connected to chat server. Please wait...";
pub const UNCHANGED_TEXT: &str = "Username unchanged.";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsernameError {
    #[error("Username must be between {min} and {max} characters.")]
    Length { min: usize, max: usize },
    #[error("Username '{0}' is already taken. Please choose another.")]
    Taken(String),
}

/// Trim and length-check a username. Length counts characters, not bytes.
pub fn validate_username(raw: &str) -> Result<String, UsernameError> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if !(MIN_USERNAME_CHARS..=MAX_USERNAME_CHARS).contains(&len) {
        return Err(UsernameError::Length { min: MIN_USERNAME_CHARS, max: MAX_USERNAME_CHARS });
    }
    Ok(trimmed.to_owned())
}

/// Identity phase of the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No username yet.
    #[default]
    Anonymous,
    /// Join request for `pending` is in flight.
    AwaitingJoin { pending: String },
    /// Chatting as `username`.
    Joined { username: String },
    /// Rename prompt open for `current`; `pending` is set while the request
    /// is in flight.
    AwaitingRename { current: String, pending: Option<String> },
}

/// What a submit asks the caller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit {
    /// Nothing to do: empty chat line, or a request is already in flight.
    Ignored,
    /// Hand the action to the transport.
    Send(Action),
    /// Rejected locally; show `0` as an error entry.
    Rejected(String),
    /// Rename to the current name; show `0` as a system note.
    Unchanged(String),
}

/// Outcome of a join/rename acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    Joined,
    Renamed { from: String },
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Username currently held, if any. Stays set while a rename is open.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { username } => Some(username),
            SessionState::AwaitingRename { current, .. } => Some(current),
            SessionState::Anonymous | SessionState::AwaitingJoin { .. } => None,
        }
    }

    /// True while a join or rename request awaits a response.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        matches!(
            self.state,
            SessionState::AwaitingJoin { .. } | SessionState::AwaitingRename { pending: Some(_), .. }
        )
    }

    /// Interpret the input control's text according to the current state.
    pub fn submit(&mut self, input: &str, connection: ConnectionState) -> Submit {
        if self.in_flight() {
            return Submit::Ignored;
        }
        let connected = connection == ConnectionState::Connected;

        match &self.state {
            SessionState::Anonymous => {
                let username = match validate_username(input) {
                    Ok(username) => username,
                    Err(e) => return Submit::Rejected(e.to_string()),
                };
                if !connected {
                    return Submit::Rejected(NOT_CONNECTED_TEXT.to_owned());
                }
                self.state = SessionState::AwaitingJoin { pending: username.clone() };
                Submit::Send(Action::Join { username })
            }
            SessionState::Joined { .. } => {
                let text = input.trim();
                if text.is_empty() {
                    return Submit::Ignored;
                }
                if !connected {
                    return Submit::Rejected(NOT_CONNECTED_TEXT.to_owned());
                }
                Submit::Send(Action::Chat { text: text.to_owned() })
            }
            SessionState::AwaitingRename { current, .. } => {
                let current = current.clone();
                if input.trim() == current {
                    self.state = SessionState::Joined { username: current };
                    return Submit::Unchanged(UNCHANGED_TEXT.to_owned());
                }
                let username = match validate_username(input) {
                    Ok(username) => username,
                    Err(e) => return Submit::Rejected(e.to_string()),
                };
                if !connected {
                    return Submit::Rejected(NOT_CONNECTED_TEXT.to_owned());
                }
                self.state = SessionState::AwaitingRename { current, pending: Some(username.clone()) };
                Submit::Send(Action::Join { username })
            }
            SessionState::AwaitingJoin { .. } => Submit::Ignored,
        }
    }

    /// Open the rename prompt. Returns the text to prefill, or `None` when
    /// not joined.
    pub fn request_rename(&mut self) -> Option<String> {
        let SessionState::Joined { username } = &self.state else {
            return None;
        };
        let current = username.clone();
        self.state = SessionState::AwaitingRename { current: current.clone(), pending: None };
        Some(current)
    }

    /// The backend accepted `username`. The backend is authoritative, so
    /// this applies in any state.
    pub fn accept(&mut self, username: &str) -> Accepted {
        let previous = match &self.state {
            SessionState::Joined { username } | SessionState::AwaitingRename { current: username, .. } => {
                Some(username.clone())
            }
            SessionState::Anonymous | SessionState::AwaitingJoin { .. } => None,
        };
        self.state = SessionState::Joined { username: username.to_owned() };
        match previous {
            None => Accepted::Joined,
            Some(from) if from == username => Accepted::Unchanged,
            Some(from) => Accepted::Renamed { from },
        }
    }

    /// The backend rejected the in-flight request. Returns whether a request
    /// was in flight. A failed rename keeps the prompt open.
    pub fn reject(&mut self) -> bool {
        match &self.state {
            SessionState::AwaitingJoin { .. } => {
                self.state = SessionState::Anonymous;
                true
            }
            SessionState::AwaitingRename { current, pending: Some(_) } => {
                self.state = SessionState::AwaitingRename { current: current.clone(), pending: None };
                true
            }
            _ => false,
        }
    }

    /// The backend no longer recognises our name. Returns the name that was
    /// dropped, if any.
    pub fn forget(&mut self) -> Option<String> {
        let dropped = self.username().map(str::to_owned);
        self.state = SessionState::Anonymous;
        dropped
    }

    /// Drop any in-flight request whose response can no longer arrive.
    pub fn abandon_request(&mut self) -> bool {
        self.reject()
    }
}
