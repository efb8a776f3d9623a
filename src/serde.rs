//! Serde extensions

use serde::de::Error;

use crate::color;
use crate::models::Color;

/// Serialize a color as a `#RRGGBB` string
pub fn serialize_color_as_hex<S: serde::ser::Serializer>(
    color: &Color,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(&color::to_hex(*color))
}

/// Deserialize a color from a `#RRGGBB` string or a basic color name
pub fn deserialize_color_from_hex<'de, D: serde::de::Deserializer<'de>>(
    d: D,
) -> Result<Color, D::Error> {
    let value: String = serde::Deserialize::deserialize(d)?;
    color::parse(&value).map_err(D::Error::custom)
}
