//! Widget configuration parsed from environment variables.

use std::time::Duration;

use crate::color::parse_hex_rgb;

pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:8081";
pub const DEFAULT_RECONNECT_SECS: u64 = 5;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Palette used by [`ColorPolicy::Palette`] when `CHAT_PALETTE` is unset.
pub const DEFAULT_PALETTE: [&str; 10] = [
    "#4cc9f0", "#4361ee", "#7209b7", "#f72585", "#4ade80", "#fb8500", "#ffbe0b", "#8338ec", "#3a86ff", "#ff006e",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Parse { key: &'static str, value: String },
    #[error("unsupported endpoint scheme: {0}")]
    InvalidEndpoint(String),
}

/// How usernames map to display colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPolicy {
    /// Hash the username to a hue.
    #[default]
    Hash,
    /// Cycle through the palette in first-seen order.
    Palette,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    pub endpoint: String,
    pub reconnect_interval: Duration,
    pub ping_interval: Option<Duration>,
    pub history_limit: usize,
    pub log_limit: Option<usize>,
    pub color_policy: ColorPolicy,
    pub palette: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_SECS),
            ping_interval: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            log_limit: None,
            color_policy: ColorPolicy::Hash,
            palette: DEFAULT_PALETTE.iter().map(|c| (*c).to_owned()).collect(),
        }
    }
}

impl ChatConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `CHAT_ENDPOINT`: relay URL, default `ws://127.0.0.1:8081`
    /// - `CHAT_RECONNECT_SECS`: fixed retry interval, default 5
    /// - `CHAT_PING_SECS`: keepalive interval, off when unset
    /// - `CHAT_HISTORY_LIMIT`: messages replayed from the store, default 50
    /// - `CHAT_LOG_LIMIT`: cap on retained log entries, unbounded when unset
    /// - `CHAT_COLOR_POLICY`: `hash` (default) or `palette`
    /// - `CHAT_PALETTE`: comma-separated `#rgb`/`#rrggbb` colors
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).map_err(|_| ()))
    }

    /// Same as [`ChatConfig::from_env`] but reads through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, ()>,
    {
        let get = |key: &str| match lookup(key) {
            Ok(value) if !value.trim().is_empty() => Some(value.trim().to_owned()),
            _ => None,
        };
        let defaults = Self::default();

        let endpoint = get("CHAT_ENDPOINT").unwrap_or(defaults.endpoint);
        let reconnect_secs = parse_or("CHAT_RECONNECT_SECS", get("CHAT_RECONNECT_SECS"), DEFAULT_RECONNECT_SECS)?;
        if reconnect_secs == 0 {
            return Err(ConfigError::Parse { key: "CHAT_RECONNECT_SECS", value: "0".into() });
        }
        let ping_interval = match get("CHAT_PING_SECS") {
            Some(raw) => match parse_value::<u64>("CHAT_PING_SECS", &raw)? {
                0 => return Err(ConfigError::Parse { key: "CHAT_PING_SECS", value: raw }),
                secs => Some(Duration::from_secs(secs)),
            },
            None => None,
        };
        let history_limit = parse_or("CHAT_HISTORY_LIMIT", get("CHAT_HISTORY_LIMIT"), DEFAULT_HISTORY_LIMIT)?;
        let log_limit = match get("CHAT_LOG_LIMIT") {
            Some(raw) => Some(parse_value::<usize>("CHAT_LOG_LIMIT", &raw)?),
            None => None,
        };
        let color_policy = parse_color_policy(get("CHAT_COLOR_POLICY").as_deref())?;
        let palette = match get("CHAT_PALETTE") {
            Some(raw) => parse_palette(&raw)?,
            None => defaults.palette,
        };

        Ok(Self {
            endpoint,
            reconnect_interval: Duration::from_secs(reconnect_secs),
            ping_interval,
            history_limit,
            log_limit,
            color_policy,
            palette,
        })
    }

    /// Endpoint rewritten to a WebSocket URL.
    pub fn websocket_url(&self) -> Result<String, ConfigError> {
        websocket_url(&self.endpoint)
    }
}

/// Map `http(s)://` to `ws(s)://`; `ws(s)://` passes through.
pub fn websocket_url(endpoint: &str) -> Result<String, ConfigError> {
    let endpoint = endpoint.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Ok(endpoint.to_owned());
    }
    if let Some(rest) = endpoint.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = endpoint.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }

    Err(ConfigError::InvalidEndpoint(endpoint.to_owned()))
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse::<T>()
        .map_err(|_| ConfigError::Parse { key, value: raw.to_owned() })
}

fn parse_or<T: std::str::FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_color_policy(raw: Option<&str>) -> Result<ColorPolicy, ConfigError> {
    match raw.unwrap_or("hash") {
        "hash" => Ok(ColorPolicy::Hash),
        "palette" => Ok(ColorPolicy::Palette),
        other => Err(ConfigError::Parse { key: "CHAT_COLOR_POLICY", value: other.to_owned() }),
    }
}

fn parse_palette(raw: &str) -> Result<Vec<String>, ConfigError> {
    let mut palette = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((r, g, b)) = parse_hex_rgb(item) else {
            return Err(ConfigError::Parse { key: "CHAT_PALETTE", value: item.to_owned() });
        };
        palette.push(format!("#{r:02x}{g:02x}{b:02x}"));
    }
    if palette.is_empty() {
        return Err(ConfigError::Parse { key: "CHAT_PALETTE", value: raw.to_owned() });
    }
    Ok(palette)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
