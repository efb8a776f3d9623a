//! Color arithmetic shared by the effect renderer and the configuration layer

use thiserror::Error;

use crate::models::Color;

/// Error raised when parsing a color from its text form
#[derive(Debug, Error)]
pub enum ColorParseError {
    /// The string is not `#RRGGBB` or a known color name
    #[error("invalid color: {0}")]
    InvalidFormat(String),
}

/// Scale a color's brightness by a factor in `[0, 1]`
///
/// Channels are truncated and clamped to the `u8` range.
pub fn scale(color: Color, factor: f32) -> Color {
    let factor = if factor.is_nan() { 0.0 } else { factor.clamp(0.0, 1.0) };
    let (r, g, b) = color.into_components();

    Color::new(
        (r as f32 * factor) as u8,
        (g as f32 * factor) as u8,
        (b as f32 * factor) as u8,
    )
}

/// Linear per-channel interpolation between two colors at `ratio` in `[0, 1]`
pub fn interpolate(from: Color, to: Color, ratio: f32) -> Color {
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let (fr, fg, fb) = from.into_components();
    let (tr, tg, tb) = to.into_components();

    Color::new(
        (fr as f32 + (tr as f32 - fr as f32) * ratio).clamp(0.0, 255.0) as u8,
        (fg as f32 + (tg as f32 - fg as f32) * ratio).clamp(0.0, 255.0) as u8,
        (fb as f32 + (tb as f32 - fb as f32) * ratio).clamp(0.0, 255.0) as u8,
    )
}

/// Fully-saturated color for a hue angle in degrees
///
/// The angle wraps, so `from_hue(h)` and `from_hue(h + 360.0)` are the same
/// color.
pub fn from_hue(hue: f32) -> Color {
    let h = hue.rem_euclid(360.0);
    let x = 1.0 - ((h / 60.0) % 2.0 - 1.0).abs();

    let (r, g, b) = match (h / 60.0) as i32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };

    Color::new((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

/// Parse a color from `#RRGGBB` or a basic color name
pub fn parse(s: &str) -> Result<Color, ColorParseError> {
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() == 6 && hex.is_ascii() {
            let channel = |range| {
                u8::from_str_radix(&hex[range], 16)
                    .map_err(|_| ColorParseError::InvalidFormat(s.to_owned()))
            };

            return Ok(Color::new(channel(0..2)?, channel(2..4)?, channel(4..6)?));
        }

        return Err(ColorParseError::InvalidFormat(s.to_owned()));
    }

    match s.to_ascii_lowercase().as_str() {
        "black" => Ok(Color::new(0, 0, 0)),
        "white" => Ok(Color::new(255, 255, 255)),
        "red" => Ok(Color::new(255, 0, 0)),
        "green" => Ok(Color::new(0, 255, 0)),
        "blue" => Ok(Color::new(0, 0, 255)),
        "yellow" => Ok(Color::new(255, 255, 0)),
        "cyan" => Ok(Color::new(0, 255, 255)),
        "magenta" => Ok(Color::new(255, 0, 255)),
        "orange" => Ok(Color::new(255, 165, 0)),
        _ => Err(ColorParseError::InvalidFormat(s.to_owned())),
    }
}

/// Format a color as `#RRGGBB`
pub fn to_hex(color: Color) -> String {
    format!("#{:02X}{:02X}{:02X}", color.red, color.green, color.blue)
}
