//! Colors arrive either as comma-joined decimal triples (`"12,34,56"`), as
//! hex literals (`"#0c2238"`, `"0c2238"`, `"#abc"`) or as JSON arrays. They are
//! canonicalized exactly once, at deserialization or config parsing, into
//! [`Color`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ColorInput", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A color as supplied by a caller, before canonicalization
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColorInput {
    Triple([u8; 3]),
    Text(String),
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// The renderer's native representation. Total over all values.
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl ColorInput {
    pub fn canonicalize(&self) -> Result<Color, PipelineError> {
        match self {
            ColorInput::Triple([r, g, b]) => Ok(Color::new(*r, *g, *b)),
            ColorInput::Text(text) => text.parse(),
        }
    }
}

fn parse_triple(text: &str) -> Result<Color, PipelineError> {
    let inner = text
        .strip_prefix("rgb(")
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);

    let components: Vec<&str> = inner.split(',').map(str::trim).collect();
    let [r, g, b] = components.as_slice() else {
        return Err(PipelineError::InvalidArgument(format!(
            "color '{text}' must have exactly three components"
        )));
    };

    let component = |value: &str| {
        value.parse::<u8>().map_err(|_| {
            PipelineError::InvalidArgument(format!(
                "color component '{value}' in '{text}' is not in 0..=255"
            ))
        })
    };

    Ok(Color::new(component(r)?, component(g)?, component(b)?))
}

fn parse_hex(text: &str) -> Result<Color, PipelineError> {
    let digits = text.strip_prefix('#').unwrap_or(text);
    let invalid = || PipelineError::InvalidArgument(format!("'{text}' is not a hex color"));

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let expanded: String = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 => digits.to_string(),
        _ => return Err(invalid()),
    };

    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| invalid());
    Ok(Color::new(channel(0)?, channel(2)?, channel(4)?))
}

impl FromStr for Color {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(PipelineError::InvalidArgument("empty color".to_string()));
        }
        if text.contains(',') {
            parse_triple(text)
        } else {
            parse_hex(text)
        }
    }
}

impl TryFrom<ColorInput> for Color {
    type Error = PipelineError;

    fn try_from(input: ColorInput) -> Result<Self, Self::Error> {
        input.canonicalize()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The three colors an artifact is rendered with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactColors {
    pub background: Color,
    pub center: Color,
    pub edge: Color,
}

impl Default for ArtifactColors {
    fn default() -> Self {
        Self {
            background: Color::WHITE,
            center: Color::BLACK,
            edge: Color::BLACK,
        }
    }
}
