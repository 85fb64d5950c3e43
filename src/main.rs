use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use overlay_chat::config::{ChatConfig, ConfigError};
use overlay_chat::message_log::{self, EntryKind, LogEntry, Segment};
use overlay_chat::presence::EMPTY_TEXT;
use overlay_chat::store::MemoryStore;
use overlay_chat::transport::{RealtimeTransport, SocketTransport, Transport};
use overlay_chat::widget::{DisplayMode, Visibility};
use overlay_chat::{SessionState, Widget};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("terminal i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// WebSocket relay at `--endpoint`.
    Socket,
    /// In-process realtime store; no network.
    Local,
}

#[derive(Parser, Debug)]
#[command(name = "overlay-chat", about = "Terminal front end for the overlay chat widget")]
struct Cli {
    /// Relay URL (`ws://`, `wss://`, `http://`, `https://`). Overrides `CHAT_ENDPOINT`.
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long, env = "CHAT_BACKEND", value_enum, default_value = "socket")]
    backend: Backend,

    /// Join with this username once connected.
    #[arg(long, env = "CHAT_NAME")]
    name: Option<String>,
}

const HELP_TEXT: &str = "commands: /rename /min /toggle /close /users /help /quit";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<(), CliError> {
    // Read before any runtime threads exist.
    let offset = message_log::local_offset();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ChatConfig::from_env()?;
    if let Some(endpoint) = cli.endpoint.clone() {
        config.endpoint = endpoint;
    }

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async move {
        match cli.backend {
            Backend::Socket => {
                let transport = SocketTransport::connect(&config)?;
                info!(endpoint = %config.endpoint, "cli: socket backend");
                run(Widget::new(transport, &config, offset), cli.name).await
            }
            Backend::Local => {
                let store = MemoryStore::new();
                let transport = RealtimeTransport::connect(Arc::new(store.connect()), &config);
                info!("cli: local backend");
                run(Widget::new(transport, &config, offset), cli.name).await
            }
        }
    })
}

async fn run<T: Transport>(mut widget: Widget<T>, mut auto_join: Option<String>) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = View::default();
    println!("{HELP_TEXT}");

    loop {
        tokio::select! {
            alive = widget.next_event() => {
                if !alive {
                    break;
                }
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !command(&mut widget, line.trim_end())? {
                        break;
                    }
                }
                None => break,
            },
        }

        if widget.is_connected() && *widget.session().state() == SessionState::Anonymous {
            if let Some(name) = auto_join.take() {
                widget.set_input(name);
                widget.submit();
            }
        }
        view.render(&widget)?;
    }

    let mut tail = widget.transport().subscribe();
    widget.close();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async { while tail.recv().await.is_some() {} }).await;
    if drained.is_err() {
        warn!("cli: transport did not stop in time");
    }
    Ok(())
}

/// Apply one input line. Returns `false` on `/quit`.
fn command<T: Transport>(widget: &mut Widget<T>, line: &str) -> Result<bool, CliError> {
    let mut out = io::stdout().lock();
    match line {
        "/quit" => return Ok(false),
        "/help" => writeln!(out, "{HELP_TEXT}")?,
        "/rename" => {
            if widget.request_rename() {
                writeln!(out, "renaming from '{}'; enter the new username", widget.input())?;
            } else {
                writeln!(out, "join first")?;
            }
        }
        "/min" => widget.toggle_minimize(),
        "/toggle" => widget.toggle(),
        "/close" => widget.dismiss(),
        "/users" => {
            writeln!(out, "{}", widget.presence().count_label())?;
            let rows = widget.presence_rows();
            if rows.is_empty() {
                writeln!(out, "  {EMPTY_TEXT}")?;
            }
            for row in rows {
                let (r, g, b) = row.color.rgb();
                let marker = if row.is_current { " (you)" } else { "" };
                writeln!(out, "  \x1b[38;2;{r};{g};{b}m{}\x1b[0m{marker}", row.username)?;
            }
        }
        text => {
            widget.set_input(text);
            widget.submit();
        }
    }
    Ok(true)
}

/// What has already been written to the terminal.
#[derive(Default)]
struct View {
    printed: u64,
    status: String,
}

impl View {
    fn render<T: Transport>(&mut self, widget: &Widget<T>) -> io::Result<()> {
        let mut out = io::stdout().lock();
        if is_in_view(widget) {
            for entry in widget.log().since(self.printed) {
                writeln!(out, "{}", format_entry(entry))?;
                self.printed = entry.seq;
            }
        }

        let status = status_line(widget);
        if status != self.status {
            writeln!(out, "{status}")?;
            self.status = status;
        }
        out.flush()
    }
}

fn is_in_view<T: Transport>(widget: &Widget<T>) -> bool {
    widget.visibility() == Visibility::Visible && widget.mode() == DisplayMode::Expanded
}

fn status_line<T: Transport>(widget: &Widget<T>) -> String {
    let link = if widget.is_connected() { "connected" } else { "disconnected" };
    let who = widget.identity_line().unwrap_or_else(|| "not joined".to_owned());
    let badge = widget.badge().map(|b| format!(" [{b} unread]")).unwrap_or_default();
    format!(
        "-- {link} | {who} | {}{badge} | {} [{}]",
        widget.presence().count_label(),
        widget.placeholder(),
        widget.submit_label()
    )
}

fn format_entry(entry: &LogEntry) -> String {
    let body: String = entry
        .segments
        .iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.clone(),
            Segment::Link(url) => format!("\x1b[4m{url}\x1b[24m"),
        })
        .collect();
    match &entry.kind {
        EntryKind::Chat { username, color } => {
            let (r, g, b) = color.rgb();
            format!("[{}] \x1b[38;2;{r};{g};{b}m{username}\x1b[0m: {body}", entry.time)
        }
        EntryKind::System => format!("[{}] \x1b[2m* {body}\x1b[0m", entry.time),
        EntryKind::Error => format!("[{}] \x1b[31m! {body}\x1b[0m", entry.time),
    }
}
