use super::*;
use crate::event::TransportEvent;
use crate::store::{MemoryConnection, MemoryStore};
use std::time::Duration;
use tokio::time::timeout;

fn config() -> ChatConfig {
    ChatConfig { history_limit: 2, ..ChatConfig::default() }
}

fn start(conn: &MemoryConnection) -> (RealtimeTransport, Subscription) {
    let transport = RealtimeTransport::connect(Arc::new(conn.clone()), &config());
    let sub = transport.subscribe();
    (transport, sub)
}

async fn wait_for(sub: &mut Subscription, pred: impl Fn(&TransportEvent) -> bool) -> TransportEvent {
    timeout(Duration::from_secs(1), async {
        loop {
            let event = sub.recv().await.expect("subscription ended early");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn wait_connected(sub: &mut Subscription) {
    wait_for(sub, |e| *e == TransportEvent::State(ConnectionState::Connected)).await;
}

async fn wait_system(sub: &mut Subscription, text: &str) {
    wait_for(sub, |e| matches!(e, TransportEvent::Event(ChatEvent::System { text: t }) if t == text)).await;
}

async fn join(transport: &RealtimeTransport, sub: &mut Subscription, username: &str) {
    transport.send(Action::Join { username: username.into() }).unwrap();
    wait_for(sub, |e| matches!(e, TransportEvent::Event(ChatEvent::Joined { username: u, .. }) if u == username))
        .await;
}

fn usernames(store: &MemoryStore) -> Vec<String> {
    store.users().values().map(|u| u.username.clone()).collect()
}

#[tokio::test]
async fn connecting_announces_connection_and_presence() {
    let store = MemoryStore::new();
    let (_transport, mut sub) = start(&store.connect());

    wait_connected(&mut sub).await;
    wait_system(&mut sub, CONNECTED_TEXT).await;
    let count = wait_for(&mut sub, |e| matches!(e, TransportEvent::Event(ChatEvent::UserCount { .. }))).await;
    assert_eq!(count, TransportEvent::Event(ChatEvent::UserCount { count: 0 }));
}

#[tokio::test]
async fn join_registers_presence_and_announces() {
    let store = MemoryStore::new();
    let (transport, mut sub) = start(&store.connect());
    wait_connected(&mut sub).await;

    transport.send(Action::Join { username: "neo".into() }).unwrap();
    let joined = wait_for(&mut sub, |e| matches!(e, TransportEvent::Event(ChatEvent::Joined { .. }))).await;
    assert_eq!(
        joined,
        TransportEvent::Event(ChatEvent::Joined { username: "neo".into(), text: "You are now chatting as neo".into() })
    );
    wait_system(&mut sub, "neo has joined the chat").await;
    let presence = wait_for(&mut sub, |e| {
        matches!(e, TransportEvent::Event(ChatEvent::PresenceSnapshot { usernames }) if usernames.contains("neo"))
    })
    .await;
    assert!(matches!(presence, TransportEvent::Event(ChatEvent::PresenceSnapshot { .. })));
    assert_eq!(usernames(&store), vec!["neo"]);
}

#[tokio::test]
async fn second_client_cannot_take_held_name() {
    let store = MemoryStore::new();
    let (first, mut first_sub) = start(&store.connect());
    let (second, mut second_sub) = start(&store.connect());
    wait_connected(&mut first_sub).await;
    wait_connected(&mut second_sub).await;

    join(&first, &mut first_sub, "neo").await;
    second.send(Action::Join { username: "neo".into() }).unwrap();
    let error = wait_for(&mut second_sub, |e| matches!(e, TransportEvent::Event(ChatEvent::Error { .. }))).await;

    assert_eq!(
        error,
        TransportEvent::Event(ChatEvent::error("Username 'neo' is already taken. Please choose another."))
    );
    assert_eq!(usernames(&store), vec!["neo"]);
}

#[tokio::test]
async fn rename_updates_record_and_announces_to_peers() {
    let store = MemoryStore::new();
    let (transport, mut sub) = start(&store.connect());
    let (_peer, mut peer_sub) = start(&store.connect());
    wait_connected(&mut sub).await;

    join(&transport, &mut sub, "neo").await;
    join(&transport, &mut sub, "trinity").await;

    wait_system(&mut peer_sub, "neo is now known as trinity").await;
    assert_eq!(usernames(&store), vec!["trinity"]);
}

#[tokio::test]
async fn chat_is_tailed_back_with_sender() {
    let store = MemoryStore::new();
    let (transport, mut sub) = start(&store.connect());
    wait_connected(&mut sub).await;
    join(&transport, &mut sub, "neo").await;

    transport.send(Action::Chat { text: "hello".into() }).unwrap();
    let chat = wait_for(&mut sub, |e| matches!(e, TransportEvent::Event(ChatEvent::Chat { .. }))).await;
    let TransportEvent::Event(ChatEvent::Chat { username, text, .. }) = chat else {
        panic!("expected chat");
    };
    assert_eq!((username.as_str(), text.as_str()), ("neo", "hello"));
}

#[tokio::test]
async fn history_is_limited_to_configured_tail() {
    let store = MemoryStore::new();
    let writer = store.connect();
    for text in ["one", "two", "three"] {
        writer.push_message(NewMessage::chat("trinity", text)).await.unwrap();
    }

    let (_transport, mut sub) = start(&store.connect());
    let mut seen = Vec::new();
    while seen.len() < 2 {
        if let TransportEvent::Event(ChatEvent::Chat { text, .. }) =
            wait_for(&mut sub, |e| matches!(e, TransportEvent::Event(ChatEvent::Chat { .. }))).await
        {
            seen.push(text);
        }
    }
    assert_eq!(seen, vec!["two", "three"]);
}

#[tokio::test]
async fn outage_reports_disconnect_and_restores_identity() {
    let store = MemoryStore::new();
    let conn = store.connect();
    let (transport, mut sub) = start(&conn);
    wait_connected(&mut sub).await;
    join(&transport, &mut sub, "neo").await;

    conn.set_online(false);
    wait_for(&mut sub, |e| *e == TransportEvent::State(ConnectionState::Disconnected)).await;
    wait_system(&mut sub, DISCONNECTED_TEXT).await;
    assert!(store.users().is_empty());
    assert_eq!(transport.send(Action::Chat { text: "hi".into() }), Err(TransportError::NotConnected));

    conn.set_online(true);
    wait_connected(&mut sub).await;
    wait_for(&mut sub, |e| matches!(e, TransportEvent::Event(ChatEvent::Joined { .. }))).await;
    assert_eq!(usernames(&store), vec!["neo"]);
}

#[tokio::test]
async fn shutdown_removes_presence_before_closing() {
    let store = MemoryStore::new();
    let conn = store.connect();
    let (transport, mut sub) = start(&conn);
    wait_connected(&mut sub).await;
    join(&transport, &mut sub, "neo").await;

    transport.shutdown();
    assert_eq!(transport.send(Action::Chat { text: "late".into() }), Err(TransportError::Closed));

    timeout(Duration::from_secs(1), async { while sub.recv().await.is_some() {} }).await.unwrap();
    assert!(store.users().is_empty());
    assert!(conn.is_online());
}

#[test]
fn from_millis_converts_epoch_millis() {
    assert_eq!(from_millis(0), Some(OffsetDateTime::UNIX_EPOCH));
    assert_eq!(from_millis(1_500).map(OffsetDateTime::unix_timestamp), Some(1));
}

#[tokio::test]
async fn name_taken_during_outage_drops_identity_and_refuses_chat() {
    let store = MemoryStore::new();
    let conn = store.connect();
    let (transport, mut sub) = start(&conn);
    let (other, mut other_sub) = start(&store.connect());
    wait_connected(&mut sub).await;
    wait_connected(&mut other_sub).await;
    join(&transport, &mut sub, "neo").await;

    conn.set_online(false);
    wait_system(&mut sub, DISCONNECTED_TEXT).await;
    join(&other, &mut other_sub, "neo").await;

    conn.set_online(true);
    let lost = wait_for(&mut sub, |e| matches!(e, TransportEvent::Event(ChatEvent::IdentityLost { .. }))).await;
    assert_eq!(
        lost,
        TransportEvent::Event(ChatEvent::IdentityLost {
            text: "Username 'neo' is already taken. Please choose another.".into()
        })
    );

    transport.send(Action::Chat { text: "i am the real neo".into() }).unwrap();
    wait_for(&mut sub, |e| *e == TransportEvent::Event(ChatEvent::error(NOT_JOINED_TEXT))).await;

    let chats: Vec<_> = store.messages().into_iter().filter(|m| m.kind == MessageKind::Chat).collect();
    assert!(chats.is_empty(), "unexpected chats {chats:?}");
    assert_eq!(usernames(&store), vec!["neo"]);
    assert_eq!(store.users().len(), 1);
}
