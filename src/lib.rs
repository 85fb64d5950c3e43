//! Overlay chat core: transports, session state machine, message log, and
//! the headless widget shell that ties them together.
//!
//! SYSTEM CONTEXT
//! ==============
//! `transport` talks to the backend (WebSocket relay or realtime store),
//! `session` decides what a submit means, `message_log` / `presence` /
//! `color` hold what the user sees, and `widget` owns all of it.

pub mod color;
pub mod config;
pub mod event;
pub mod frame;
pub mod message_log;
pub mod presence;
pub mod session;
pub mod store;
pub mod transport;
pub mod widget;

pub use config::{ChatConfig, ColorPolicy};
pub use event::{Action, ChatEvent, ConnectionState, TransportEvent};
pub use session::{SessionState, Submit, UsernameError};
pub use transport::{Subscription, Transport, TransportError};
pub use widget::Widget;
