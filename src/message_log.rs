//! Ordered chat history with per-user colors and short timestamps.
//!
//! DESIGN
//! ======
//! The log is append-only in receipt order. It never reorders or
//! deduplicates; a backend that redelivered would show duplicates, but
//! neither adapter redelivers. Each entry gets a sequence number so a
//! renderer can print only what is new. An optional limit drops the oldest
//! entries once exceeded.
//!
//! The log owns the session's `ColorMap`; presence rendering asks the log
//! for colors so there is a single writer.

use std::collections::VecDeque;

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::color::{ColorMap, DisplayColor};
use crate::config::ChatConfig;
use crate::event::ChatEvent;

#[cfg(test)]
#[path = "message_log_test.rs"]
mod message_log_test;

/// Kind of a rendered entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Chat { username: String, color: DisplayColor },
    System,
    Error,
}

/// Piece of message text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Link(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    /// Monotonic position in the log, starting at 1.
    pub seq: u64,
    pub kind: EntryKind,
    pub text: String,
    pub segments: Vec<Segment>,
    pub timestamp: OffsetDateTime,
    /// `HH:MM` in the log's display offset.
    pub time: String,
}

impl LogEntry {
    #[must_use]
    pub fn is_chat(&self) -> bool {
        matches!(self.kind, EntryKind::Chat { .. })
    }
}

#[derive(Debug)]
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
    colors: ColorMap,
    limit: Option<usize>,
    offset: UtcOffset,
}

impl MessageLog {
    #[must_use]
    pub fn new(colors: ColorMap, limit: Option<usize>, offset: UtcOffset) -> Self {
        Self { entries: VecDeque::new(), next_seq: 1, colors, limit, offset }
    }

    #[must_use]
    pub fn from_config(config: &ChatConfig, offset: UtcOffset) -> Self {
        Self::new(ColorMap::new(config.color_policy, config.palette.clone()), config.log_limit, offset)
    }

    /// Append the entry for `event`, if it has one. Presence and count
    /// events do not produce entries.
    pub fn append(&mut self, event: &ChatEvent, received_at: OffsetDateTime) -> Option<&LogEntry> {
        match event {
            ChatEvent::Chat { username, text, timestamp } => {
                let color = self.colors.color_for(username);
                Some(self.push(EntryKind::Chat { username: username.clone(), color }, text, *timestamp))
            }
            ChatEvent::System { text } | ChatEvent::Joined { text, .. } => {
                Some(self.push(EntryKind::System, text, received_at))
            }
            ChatEvent::Error { text } | ChatEvent::IdentityLost { text } => {
                Some(self.push(EntryKind::Error, text, received_at))
            }
            ChatEvent::PresenceSnapshot { .. } | ChatEvent::UserCount { .. } => None,
        }
    }

    pub fn push_system(&mut self, text: &str, at: OffsetDateTime) -> &LogEntry {
        self.push(EntryKind::System, text, at)
    }

    pub fn push_error(&mut self, text: &str, at: OffsetDateTime) -> &LogEntry {
        self.push(EntryKind::Error, text, at)
    }

    /// Color for `username`, assigning one on first sight.
    pub fn color_for(&mut self, username: &str) -> DisplayColor {
        self.colors.color_for(username)
    }

    /// All retained entries in display order.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries with `seq > after`.
    pub fn since(&self, after: u64) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.seq > after)
    }

    /// Sequence number of the newest entry, 0 when empty.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push(&mut self, kind: EntryKind, text: &str, timestamp: OffsetDateTime) -> &LogEntry {
        let entry = LogEntry {
            seq: self.next_seq,
            kind,
            text: text.to_owned(),
            segments: segments(text),
            timestamp,
            time: short_time(timestamp, self.offset),
        };
        self.next_seq += 1;
        self.entries.push_back(entry);
        if let Some(limit) = self.limit {
            while self.entries.len() > limit.max(1) {
                self.entries.pop_front();
            }
        }
        &self.entries[self.entries.len() - 1]
    }
}

/// Local UTC offset, or UTC when it cannot be determined.
#[must_use]
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

/// Format as `HH:MM` in `offset`.
#[must_use]
pub fn short_time(at: OffsetDateTime, offset: UtcOffset) -> String {
    match at.to_offset(offset).format(format_description!("[hour]:[minute]")) {
        Ok(formatted) => formatted,
        Err(_) => "--:--".to_owned(),
    }
}

/// Split text into plain and `http(s)://` link segments.
#[must_use]
pub fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(start) = find_scheme(rest) {
        let (before, candidate) = rest.split_at(start);
        plain.push_str(before);
        let end = candidate.find(char::is_whitespace).unwrap_or(candidate.len());
        let link = candidate[..end].trim_end_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | ';' | ':'));
        if is_link(link) {
            if !plain.is_empty() {
                out.push(Segment::Text(std::mem::take(&mut plain)));
            }
            out.push(Segment::Link(link.to_owned()));
            rest = &candidate[link.len()..];
        } else {
            plain.push_str(&candidate[..end]);
            rest = &candidate[end..];
        }
    }

    plain.push_str(rest);
    if !plain.is_empty() {
        out.push(Segment::Text(plain));
    }
    out
}

fn find_scheme(text: &str) -> Option<usize> {
    [text.find("http://"), text.find("https://")].into_iter().flatten().min()
}

fn is_link(candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix("https://").or_else(|| candidate.strip_prefix("http://")) else {
        return false;
    };
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    host.contains('.') && !host.starts_with('.') && !host.ends_with('.')
}
