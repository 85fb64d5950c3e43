//! Username color assignment and color conversion helpers.
//!
//! DESIGN
//! ======
//! A `ColorMap` assigns a color the first time a username is seen and
//! returns the same value for the rest of the session. Two policies:
//! hash-to-hue (stable across sessions too) and a palette cycled in
//! first-seen order. Distinct users may share a color.

use std::collections::HashMap;
use std::fmt;

use crate::config::ColorPolicy;

#[cfg(test)]
#[path = "color_test.rs"]
mod color_test;

const HUE_SATURATION: f64 = 0.70;
const HUE_LIGHTNESS: f64 = 0.60;

/// A display color for a username.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayColor {
    /// `hsl(hue, 70%, 60%)`.
    Hue(u32),
    /// Canonical `#rrggbb`.
    Hex(String),
}

impl DisplayColor {
    /// RGB channels, for renderers without CSS.
    #[must_use]
    pub fn rgb(&self) -> (u8, u8, u8) {
        match self {
            Self::Hue(hue) => hsl_to_rgb(f64::from(*hue), HUE_SATURATION, HUE_LIGHTNESS),
            Self::Hex(hex) => parse_hex_rgb(hex).unwrap_or((217, 75, 75)),
        }
    }
}

impl fmt::Display for DisplayColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hue(hue) => write!(f, "hsl({hue}, 70%, 60%)"),
            Self::Hex(hex) => f.write_str(hex),
        }
    }
}

/// Session-scoped username to color assignment.
#[derive(Clone, Debug)]
pub struct ColorMap {
    policy: ColorPolicy,
    palette: Vec<String>,
    assigned: HashMap<String, DisplayColor>,
}

impl ColorMap {
    #[must_use]
    pub fn new(policy: ColorPolicy, palette: Vec<String>) -> Self {
        Self { policy, palette, assigned: HashMap::new() }
    }

    /// Color for `username`, assigning one on first sight.
    pub fn color_for(&mut self, username: &str) -> DisplayColor {
        if let Some(color) = self.assigned.get(username) {
            return color.clone();
        }
        let color = match self.policy {
            ColorPolicy::Palette if !self.palette.is_empty() => {
                let index = self.assigned.len() % self.palette.len();
                DisplayColor::Hex(self.palette[index].clone())
            }
            _ => DisplayColor::Hue(username_hue(username)),
        };
        self.assigned.insert(username.to_owned(), color.clone());
        color
    }

    /// Previously assigned color, without assigning.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<&DisplayColor> {
        self.assigned.get(username)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

/// 32-bit string hash over UTF-16 code units (`h = h * 31 + c`).
#[must_use]
pub fn hash_code(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit)))
}

/// Hue in `0..360` derived from the username hash.
#[must_use]
pub fn username_hue(username: &str) -> u32 {
    (hash_code(username) % 360).unsigned_abs()
}

/// Parse `#RGB` or `#RRGGBB` values into RGB channels.
pub fn parse_hex_rgb(raw: &str) -> Option<(u8, u8, u8)> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    match hex.len() {
        3 => Some((
            hex_channel(&hex[0..1].repeat(2))?,
            hex_channel(&hex[1..2].repeat(2))?,
            hex_channel(&hex[2..3].repeat(2))?,
        )),
        6 => Some((hex_channel(&hex[0..2])?, hex_channel(&hex[2..4])?, hex_channel(&hex[4..6])?)),
        _ => None,
    }
}

fn hex_channel(digits: &str) -> Option<u8> {
    match u8::from_str_radix(digits, 16) {
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn hsl_to_rgb(hue: f64, saturation: f64, lightness: f64) -> (u8, u8, u8) {
    let chroma = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let sector = (hue % 360.0) / 60.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector {
        s if s < 1.0 => (chroma, x, 0.0),
        s if s < 2.0 => (x, chroma, 0.0),
        s if s < 3.0 => (0.0, chroma, x),
        s if s < 4.0 => (0.0, x, chroma),
        s if s < 5.0 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = lightness - chroma / 2.0;
    let channel = |v: f64| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r), channel(g), channel(b))
}
