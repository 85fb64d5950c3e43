use super::*;
use crate::message_log::EntryKind;
use crate::session::NOT_CONNECTED_TEXT;
use crate::transport::{EventHub, TransportError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct FakeTransport {
    hub: EventHub,
    sent: Mutex<Vec<Action>>,
    shut_down: AtomicBool,
}

impl FakeTransport {
    fn sent(&self) -> Vec<Action> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn send(&self, action: Action) -> Result<(), TransportError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.hub.connection_state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(action);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn connection_state(&self) -> ConnectionState {
        self.hub.connection_state()
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        self.hub.close();
    }
}

fn widget() -> Widget<FakeTransport> {
    let mut widget = Widget::new(FakeTransport::default(), &ChatConfig::default(), UtcOffset::UTC);
    widget.transport().hub.set_state(ConnectionState::Connected);
    widget.pump();
    widget
}

fn publish(widget: &mut Widget<FakeTransport>, event: ChatEvent) {
    widget.transport().hub.publish(event);
    widget.pump();
}

fn joined(name: &str) -> Widget<FakeTransport> {
    let mut widget = widget();
    widget.set_input(name);
    widget.submit();
    publish(
        &mut widget,
        ChatEvent::Joined { username: name.into(), text: format!("You are now chatting as {name}") },
    );
    widget
}

fn chat(username: &str, text: &str) -> ChatEvent {
    ChatEvent::Chat { username: username.into(), text: text.into(), timestamp: OffsetDateTime::UNIX_EPOCH }
}

fn texts(widget: &Widget<FakeTransport>) -> Vec<String> {
    widget.log().entries().map(|e| e.text.clone()).collect()
}

// =============================================================
// Join / chat
// =============================================================

#[test]
fn fresh_widget_prompts_for_username() {
    let widget = widget();
    assert!(widget.is_connected());
    assert_eq!(widget.placeholder(), JOIN_PLACEHOLDER);
    assert_eq!(widget.submit_label(), "Join");
    assert_eq!(widget.identity_line(), None);
}

#[test]
fn join_sends_action_and_clears_input_on_success() {
    let mut widget = widget();
    widget.set_input("  neo ");
    assert_eq!(widget.submit(), Submit::Send(Action::Join { username: "neo".into() }));
    assert_eq!(widget.input(), "  neo ");
    assert_eq!(widget.transport().sent(), vec![Action::Join { username: "neo".into() }]);

    publish(&mut widget, ChatEvent::Joined { username: "neo".into(), text: "You are now chatting as neo".into() });
    assert_eq!(widget.input(), "");
    assert_eq!(widget.placeholder(), CHAT_PLACEHOLDER);
    assert_eq!(widget.submit_label(), "Send");
    assert_eq!(widget.identity_line().as_deref(), Some("Chatting as: neo"));
    assert_eq!(texts(&widget).last().map(String::as_str), Some("You are now chatting as neo"));
}

#[test]
fn short_username_logs_error_and_sends_nothing() {
    let mut widget = widget();
    widget.set_input("a");
    widget.submit();

    let last = widget.log().entries().last().unwrap();
    assert_eq!(last.kind, EntryKind::Error);
    assert_eq!(last.text, "Username must be between 2 and 20 characters.");
    assert!(widget.transport().sent().is_empty());
    assert_eq!(widget.input(), "a");
}

#[test]
fn taken_username_error_returns_to_anonymous_and_keeps_input() {
    let mut widget = widget();
    widget.set_input("neo");
    widget.submit();
    publish(&mut widget, ChatEvent::error("Username 'neo' is already taken. Please choose another."));

    assert_eq!(widget.session().state(), &SessionState::Anonymous);
    assert_eq!(widget.input(), "neo");
    widget.set_input("neo2");
    assert!(matches!(widget.submit(), Submit::Send(_)));
}

#[test]
fn double_submit_while_waiting_is_ignored() {
    let mut widget = widget();
    widget.set_input("neo");
    widget.submit();
    assert_eq!(widget.submit(), Submit::Ignored);
    assert_eq!(widget.transport().sent().len(), 1);
}

#[test]
fn chat_send_clears_input() {
    let mut widget = joined("neo");
    widget.set_input("hello there");
    assert_eq!(widget.submit(), Submit::Send(Action::Chat { text: "hello there".into() }));
    assert_eq!(widget.input(), "");
}

#[test]
fn submit_while_disconnected_logs_not_connected() {
    let mut widget = joined("neo");
    widget.transport().hub.set_state(ConnectionState::Disconnected);
    widget.pump();
    assert!(!widget.is_connected());

    widget.set_input("hello");
    widget.submit();
    assert_eq!(texts(&widget).last().map(String::as_str), Some(NOT_CONNECTED_TEXT));
    assert_eq!(widget.input(), "hello");
}

#[test]
fn disconnect_abandons_in_flight_join() {
    let mut widget = widget();
    widget.set_input("neo");
    widget.submit();
    widget.transport().hub.set_state(ConnectionState::Disconnected);
    widget.pump();
    assert_eq!(widget.session().state(), &SessionState::Anonymous);
}

#[test]
fn incoming_chats_render_in_receipt_order_with_stable_colors() {
    let mut widget = joined("neo");
    for (user, text) in [("trinity", "a"), ("morpheus", "b"), ("trinity", "c")] {
        publish(&mut widget, chat(user, text));
    }

    let chats: Vec<_> = widget
        .log()
        .entries()
        .filter_map(|e| match &e.kind {
            EntryKind::Chat { username, color } => Some((username.clone(), color.clone(), e.text.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(chats.len(), 3);
    assert_eq!(chats.iter().map(|c| c.2.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    assert_eq!(chats[0].1, chats[2].1);
}

// =============================================================
// Rename
// =============================================================

#[test]
fn rename_prefills_and_updates_labels() {
    let mut widget = joined("neo");
    assert!(widget.request_rename());
    assert_eq!(widget.input(), "neo");
    assert_eq!(widget.placeholder(), RENAME_PLACEHOLDER);
    assert_eq!(widget.submit_label(), "Update");
}

#[test]
fn rename_to_same_name_notes_unchanged_without_sending() {
    let mut widget = joined("neo");
    widget.request_rename();
    widget.submit();

    assert_eq!(texts(&widget).last().map(String::as_str), Some("Username unchanged."));
    assert_eq!(widget.transport().sent().len(), 1);
    assert_eq!(widget.submit_label(), "Send");
    assert_eq!(widget.input(), "");
}

#[test]
fn rename_accepts_new_name() {
    let mut widget = joined("neo");
    widget.request_rename();
    widget.set_input("trinity");
    widget.submit();
    assert_eq!(widget.transport().sent().last(), Some(&Action::Join { username: "trinity".into() }));

    publish(&mut widget, ChatEvent::Joined { username: "trinity".into(), text: "You are now chatting as trinity".into() });
    assert_eq!(widget.identity_line().as_deref(), Some("Chatting as: trinity"));
    assert_eq!(widget.input(), "");
}

#[test]
fn failed_rename_keeps_prompt_and_text() {
    let mut widget = joined("neo");
    widget.request_rename();
    widget.set_input("trinity");
    widget.submit();
    publish(&mut widget, ChatEvent::error("Username 'trinity' is already taken. Please choose another."));

    assert_eq!(widget.placeholder(), RENAME_PLACEHOLDER);
    assert_eq!(widget.input(), "trinity");
    assert_eq!(widget.identity_line().as_deref(), Some("Chatting as: neo"));
}

// =============================================================
// Unread / chrome
// =============================================================

#[test]
fn minimized_widget_counts_chats_and_expanding_clears() {
    let mut widget = joined("neo");
    widget.toggle_minimize();
    for text in ["1", "2", "3"] {
        publish(&mut widget, chat("trinity", text));
    }
    publish(&mut widget, ChatEvent::system("morpheus has joined the chat"));

    assert_eq!(widget.unread(), 3);
    assert_eq!(widget.badge().as_deref(), Some("3"));

    widget.toggle_minimize();
    assert_eq!(widget.unread(), 0);
    assert_eq!(widget.badge(), None);
}

#[test]
fn badge_caps_at_nine_plus() {
    let mut widget = joined("neo");
    widget.dismiss();
    for i in 0..12 {
        publish(&mut widget, chat("trinity", &i.to_string()));
    }
    assert_eq!(widget.unread(), 12);
    assert_eq!(widget.badge().as_deref(), Some("9+"));
}

#[test]
fn chats_in_view_do_not_count() {
    let mut widget = joined("neo");
    publish(&mut widget, chat("trinity", "hi"));
    assert_eq!(widget.unread(), 0);
    assert_eq!(widget.badge(), None);
}

#[test]
fn showing_while_minimized_keeps_count() {
    let mut widget = joined("neo");
    widget.toggle();
    widget.toggle_minimize();
    publish(&mut widget, chat("trinity", "hi"));

    widget.toggle();
    assert_eq!(widget.visibility(), Visibility::Visible);
    assert_eq!(widget.mode(), DisplayMode::Minimized);
    assert_eq!(widget.badge().as_deref(), Some("1"));

    widget.toggle_minimize();
    assert_eq!(widget.badge(), None);
}

#[test]
fn dismiss_hides_and_toggle_restores() {
    let mut widget = widget();
    widget.dismiss();
    assert_eq!(widget.visibility(), Visibility::Hidden);
    widget.toggle();
    assert_eq!(widget.visibility(), Visibility::Visible);
}

#[test]
fn presence_rows_mark_current_user() {
    let mut widget = joined("neo");
    publish(
        &mut widget,
        ChatEvent::PresenceSnapshot { usernames: ["trinity".to_owned(), "neo".to_owned()].into_iter().collect() },
    );
    publish(&mut widget, ChatEvent::UserCount { count: 2 });

    let rows = widget.presence_rows();
    assert_eq!(rows.iter().map(|r| (r.username.as_str(), r.is_current)).collect::<Vec<_>>(), vec![
        ("neo", true),
        ("trinity", false)
    ]);
    assert_eq!(widget.presence().count_label(), "2 online");
}

#[test]
fn close_unsubscribes_and_shuts_transport_down() {
    let mut widget = joined("neo");
    assert_eq!(widget.transport().hub.subscriber_count(), 1);

    widget.close();
    assert_eq!(widget.transport().hub.subscriber_count(), 0);
    assert!(widget.transport().shut_down.load(Ordering::SeqCst));
    assert!(!widget.is_connected());

    widget.set_input("hello");
    widget.submit();
    assert_eq!(texts(&widget).last().map(String::as_str), Some("Not connected to chat server. Please wait..."));
}

#[tokio::test]
async fn next_event_stops_after_close() {
    let mut widget = widget();
    widget.close();
    assert!(!widget.next_event().await);
}

// =============================================================
// Reconnect
// =============================================================

#[test]
fn lost_identity_returns_to_join_prompt() {
    let mut widget = joined("neo");
    widget.set_input("draft");
    let text = "Username 'neo' is already taken. Please choose another.";
    publish(&mut widget, ChatEvent::IdentityLost { text: text.into() });

    assert_eq!(widget.session().state(), &SessionState::Anonymous);
    assert_eq!(widget.identity_line(), None);
    assert_eq!(widget.placeholder(), JOIN_PLACEHOLDER);
    assert_eq!(widget.submit_label(), "Join");
    let last = widget.log().entries().last().unwrap();
    assert_eq!(last.kind, EntryKind::Error);
    assert_eq!(last.text, text);

    widget.set_input("neo2");
    assert_eq!(widget.submit(), Submit::Send(Action::Join { username: "neo2".into() }));
}

#[test]
fn disconnect_clears_presence() {
    let mut widget = joined("neo");
    publish(&mut widget, ChatEvent::PresenceSnapshot { usernames: ["neo".to_owned()].into_iter().collect() });
    publish(&mut widget, ChatEvent::UserCount { count: 1 });
    assert_eq!(widget.presence().count_label(), "1 online");

    widget.transport().hub.set_state(ConnectionState::Disconnected);
    widget.pump();
    assert!(widget.presence().is_empty());
    assert_eq!(widget.presence().count_label(), "0 online");
    assert_eq!(widget.presence_rows(), Vec::new());
}
