//! WebSocket relay transport.
//!
//! DESIGN
//! ======
//! One background task owns the socket. It loops: connect, run the session
//! until the socket drops, then wait one reconnect interval and try again.
//! There is exactly one sleep in flight at a time and it is abandoned on
//! shutdown, so retries never stack. The interval is fixed and retries are
//! unbounded.
//!
//! Inside a session the task `select!`s over inbound frames, outbound
//! commands from `send`, and the optional keepalive tick. Malformed frames
//! are logged and dropped.
//!
//! After a reconnect the task re-sends `join` for the last username the
//! relay accepted, so the user keeps their identity across outages. An
//! `error` answering that join drops the identity and is published as
//! `IdentityLost` instead of a plain error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{CONNECTED_TEXT, DISCONNECTED_TEXT, EventHub, Subscription, Transport, TransportError};
use crate::config::{ChatConfig, ConfigError};
use crate::event::{Action, ChatEvent, ConnectionState};
use crate::frame::{self, ClientFrame, ServerFrame};

#[cfg(test)]
#[path = "socket_test.rs"]
mod socket_test;

pub const CONNECT_FAILED_TEXT: &str = "Error connecting to chat server.";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

enum Command {
    Send(Action),
    Shutdown,
}

/// How a session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Lost,
    Shutdown,
}

pub struct SocketTransport {
    hub: EventHub,
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

impl SocketTransport {
    /// Start the connection task. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidEndpoint`] when the endpoint is not a
    /// `ws`/`wss`/`http`/`https` URL.
    pub fn connect(config: &ChatConfig) -> Result<Self, ConfigError> {
        let url = config.websocket_url()?;
        let hub = EventHub::new();
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            url,
            reconnect: config.reconnect_interval,
            ping: config.ping_interval,
            hub: hub.clone(),
            commands: rx,
            username: None,
            restoring: false,
        };
        tokio::spawn(worker.run());
        Ok(Self { hub, commands, closed: AtomicBool::new(false) })
    }
}

impl Transport for SocketTransport {
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
            debug!("socket: task already stopped");
            self.hub.set_state(ConnectionState::Disconnected);
            self.hub.close();
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    url: String,
    reconnect: Duration,
    ping: Option<Duration>,
    hub: EventHub,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Last username the relay accepted.
    username: Option<String>,
    /// A restoring `join` was sent this session and not yet answered.
    restoring: bool,
}

impl Worker {
    async fn run(mut self) {
        let mut failure_reported = false;
        loop {
            self.hub.set_state(ConnectionState::Connecting);
            let Some(attempt) = self.connect().await else { break };
            match attempt {
                Ok(ws) => {
                    info!(url = %self.url, "socket: connected");
                    failure_reported = false;
                    self.hub.set_state(ConnectionState::Connected);
                    self.hub.publish(ChatEvent::system(CONNECTED_TEXT));

                    let end = self.session(ws).await;
                    self.hub.set_state(ConnectionState::Disconnected);
                    if end == SessionEnd::Shutdown {
                        break;
                    }
                    info!(url = %self.url, "socket: disconnected");
                    self.hub.publish(ChatEvent::system(DISCONNECTED_TEXT));
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "socket: connect failed");
                    self.hub.set_state(ConnectionState::Disconnected);
                    if !failure_reported {
                        failure_reported = true;
                        self.hub.publish(ChatEvent::system(CONNECT_FAILED_TEXT));
                    }
                }
            }

            if !self.wait_to_reconnect().await {
                break;
            }
        }
        self.hub.set_state(ConnectionState::Disconnected);
        self.hub.close();
        debug!(url = %self.url, "socket: task stopped");
    }

    /// One connect attempt. `None` if shutdown arrived first.
    async fn connect(&mut self) -> Option<Result<WsStream, tungstenite::Error>> {
        let attempt = tokio_tungstenite::connect_async(self.url.as_str());
        tokio::pin!(attempt);
        loop {
            tokio::select! {
                result = &mut attempt => return Some(result.map(|(ws, _)| ws)),
                command = self.commands.recv() => match command {
                    Some(Command::Send(action)) => debug!(?action, "socket: dropped action while connecting"),
                    Some(Command::Shutdown) | None => return None,
                },
            }
        }
    }

    /// Sleep one interval. Returns `false` if shutdown arrived meanwhile.
    async fn wait_to_reconnect(&mut self) -> bool {
        let sleep = tokio::time::sleep(self.reconnect);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(action)) => debug!(?action, "socket: dropped action while disconnected"),
                    Some(Command::Shutdown) | None => return false,
                },
            }
        }
    }

    async fn session(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        self.restoring = self.username.is_some();
        if let Some(username) = self.username.clone() {
            debug!(%username, "socket: restoring identity");
            let frame = ClientFrame::from_action(&Action::Join { username }, OffsetDateTime::now_utc());
            if !write_frame(&mut sink, &frame).await {
                return SessionEnd::Lost;
            }
        }

        // Tokio panics on a zero period.
        let mut keepalive = self
            .ping
            .filter(|period| !period.is_zero())
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                inbound = stream.next() => {
                    let Some(inbound) = inbound else { return SessionEnd::Lost };
                    match inbound {
                        Ok(Message::Text(text)) => self.dispatch(text.as_str()),
                        Ok(Message::Close(_)) => return SessionEnd::Lost,
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "socket: read failed");
                            return SessionEnd::Lost;
                        }
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(action)) => {
                        let frame = ClientFrame::from_action(&action, OffsetDateTime::now_utc());
                        if !write_frame(&mut sink, &frame).await {
                            return SessionEnd::Lost;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        if let Err(e) = sink.close().await {
                            debug!(error = %e, "socket: close failed");
                        }
                        return SessionEnd::Shutdown;
                    }
                },
                () = tick(keepalive.as_mut()) => {
                    if !write_frame(&mut sink, &ClientFrame::ping(OffsetDateTime::now_utc())).await {
                        return SessionEnd::Lost;
                    }
                }
            }
        }
    }

    /// Decode one inbound text frame and publish its event.
    fn dispatch(&mut self, text: &str) {
        let frame = match frame::decode_server_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "socket: dropped malformed frame");
                return;
            }
        };
        match &frame {
            ServerFrame::JoinSuccess { username, .. } => {
                self.restoring = false;
                self.username = Some(username.clone());
            }
            ServerFrame::Error { message } if self.restoring => {
                warn!(username = ?self.username, %message, "socket: relay refused restoring join");
                self.restoring = false;
                self.username = None;
                self.hub.publish(ChatEvent::IdentityLost { text: message.clone() });
                return;
            }
            ServerFrame::Pong { timestamp } => debug!(?timestamp, "socket: pong"),
            _ => {}
        }
        if let Some(event) = frame.into_event(OffsetDateTime::now_utc()) {
            self.hub.publish(event);
        }
    }
}

/// Encode and write one frame. Returns `false` when the socket is gone;
/// an unencodable frame is logged and skipped.
async fn write_frame(sink: &mut WsSink, frame: &ClientFrame) -> bool {
    let text = match frame::encode_client_frame(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "socket: failed to encode frame");
            return true;
        }
    };
    match sink.send(Message::Text(text.into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "socket: write failed");
            false
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
