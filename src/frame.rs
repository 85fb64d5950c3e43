//! JSON frames spoken by the WebSocket relay.
//!
//! DESIGN
//! ======
//! Frames are tagged by a `type` field. Outbound frames carry a seconds
//! timestamp (float); inbound frames are decoded into `ServerFrame` and
//! then mapped onto `ChatEvent`. Unknown `type` values and malformed JSON
//! surface as `FrameError::Decode` so the transport can log and drop them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::event::{Action, ChatEvent};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Frame sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join { username: String, timestamp: f64 },
    Chat { message: String, timestamp: f64 },
    Ping { timestamp: f64 },
}

impl ClientFrame {
    #[must_use]
    pub fn from_action(action: &Action, now: OffsetDateTime) -> Self {
        let timestamp = unix_seconds(now);
        match action {
            Action::Join { username } => Self::Join { username: username.clone(), timestamp },
            Action::Chat { text } => Self::Chat { message: text.clone(), timestamp },
        }
    }

    #[must_use]
    pub fn ping(now: OffsetDateTime) -> Self {
        Self::Ping { timestamp: unix_seconds(now) }
    }
}

/// Frame received from the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Chat {
        username: String,
        message: String,
        #[serde(default)]
        timestamp: Option<f64>,
    },
    System {
        message: String,
    },
    Error {
        message: String,
    },
    JoinSuccess {
        username: String,
        #[serde(default)]
        message: Option<String>,
    },
    UserCount {
        count: usize,
    },
    UserList {
        #[serde(default)]
        users: Vec<String>,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<f64>,
    },
}

impl ServerFrame {
    /// Map onto the transport-neutral event. `Pong` has no event.
    #[must_use]
    pub fn into_event(self, received_at: OffsetDateTime) -> Option<ChatEvent> {
        let event = match self {
            Self::Chat { username, message, timestamp } => ChatEvent::Chat {
                username,
                text: message,
                timestamp: timestamp.and_then(from_unix_seconds).unwrap_or(received_at),
            },
            Self::System { message } => ChatEvent::System { text: message },
            Self::Error { message } => ChatEvent::Error { text: message },
            Self::JoinSuccess { username, message } => {
                let text = message.unwrap_or_else(|| format!("You are now chatting as {username}"));
                ChatEvent::Joined { username, text }
            }
            Self::UserCount { count } => ChatEvent::UserCount { count },
            Self::UserList { users } => ChatEvent::PresenceSnapshot {
                usernames: users.into_iter().filter(|u| !u.is_empty()).collect::<BTreeSet<_>>(),
            },
            Self::Pong { .. } => return None,
        };
        Some(event)
    }
}

pub fn encode_client_frame(frame: &ClientFrame) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(FrameError::Encode)
}

pub fn decode_server_frame(text: &str) -> Result<ServerFrame, FrameError> {
    serde_json::from_str(text).map_err(FrameError::Decode)
}

/// Seconds since the Unix epoch, with sub-second precision.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn unix_seconds(at: OffsetDateTime) -> f64 {
    at.unix_timestamp_nanos() as f64 / 1e9
}

/// Inverse of [`unix_seconds`]; `None` for non-finite or out-of-range values.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn from_unix_seconds(seconds: f64) -> Option<OffsetDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let nanos = (seconds * 1e9).round() as i128;
    match OffsetDateTime::from_unix_timestamp_nanos(nanos) {
        Ok(at) => Some(at),
        Err(_) => None,
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
