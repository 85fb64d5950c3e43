//! Online-user list and count.

use std::collections::BTreeSet;

use crate::color::DisplayColor;
use crate::event::ChatEvent;
use crate::message_log::MessageLog;

#[cfg(test)]
#[path = "presence_test.rs"]
mod presence_test;

pub const EMPTY_TEXT: &str = "No users online";

/// One row of the rendered list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceRow {
    pub username: String,
    pub color: DisplayColor,
    pub is_current: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Presence {
    users: BTreeSet<String>,
    count: Option<usize>,
}

impl Presence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence or count event. Other events are ignored and
    /// return `false`.
    pub fn apply(&mut self, event: &ChatEvent) -> bool {
        match event {
            ChatEvent::PresenceSnapshot { usernames } => {
                self.users.clone_from(usernames);
                true
            }
            ChatEvent::UserCount { count } => {
                self.count = Some(*count);
                true
            }
            _ => false,
        }
    }

    /// Forget everything. The widget calls this whenever the connection is
    /// not up.
    pub fn clear(&mut self) {
        self.users.clear();
        self.count = None;
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }

    /// Last reported count, or the list length when none was reported.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.unwrap_or(self.users.len())
    }

    #[must_use]
    pub fn count_label(&self) -> String {
        format!("{} online", self.count())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Sorted rows with colors from `log` and the current user marked.
    pub fn rows(&self, current: Option<&str>, log: &mut MessageLog) -> Vec<PresenceRow> {
        self.users
            .iter()
            .map(|username| PresenceRow {
                username: username.clone(),
                color: log.color_for(username),
                is_current: current == Some(username.as_str()),
            })
            .collect()
    }
}
