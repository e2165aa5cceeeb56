// Strong typing over strings. Newtypes for record ids, document ids, and pixel units.
// See DESIGN.md: types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, Result};

/// Storage-assigned record identifier. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> Self {
        RecordId(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an uploaded PDF score.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        DocumentId::new(value)
    }
}

/// Point in canvas-relative pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }
}

/// Rendered canvas size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CanvasSize {
    pub width: f64,
    pub height: f64,
}

impl CanvasSize {
    pub fn new(width: f64, height: f64) -> Self {
        CanvasSize { width, height }
    }

    pub fn zero() -> Self {
        CanvasSize::default()
    }

    /// False for detached canvases (zero, negative, or non-finite dimensions).
    pub fn has_area(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= 0.0 && point.y >= 0.0 && point.x <= self.width && point.y <= self.height
    }
}

/// Canvas position relative to its containing viewer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Offset {
    pub left: f64,
    pub top: f64,
}

impl Offset {
    pub fn new(left: f64, top: f64) -> Self {
        Offset { left, top }
    }

    pub fn zero() -> Self {
        Offset::default()
    }
}

/// Bounding box of the canvas inside the viewer, as reported by the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CanvasBox {
    pub size: CanvasSize,
    pub offset: Offset,
}

impl CanvasBox {
    pub fn new(width: f64, height: f64, left: f64, top: f64) -> Self {
        CanvasBox {
            size: CanvasSize::new(width, height),
            offset: Offset::new(left, top),
        }
    }
}

/// How well the musician can play a section. Closed three-level set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum Confidence {
    /// Needs work.
    #[default]
    Red,
    /// Unsure.
    Amber,
    /// Confident.
    Green,
}

impl Confidence {
    pub const ALL: [Confidence; 3] = [Confidence::Red, Confidence::Amber, Confidence::Green];

    pub fn as_u8(&self) -> u8 {
        match self {
            Confidence::Red => 0,
            Confidence::Amber => 1,
            Confidence::Green => 2,
        }
    }

    /// Presentation color name stored alongside the level.
    pub fn color(&self) -> &'static str {
        match self {
            Confidence::Red => "red",
            Confidence::Amber => "amber",
            Confidence::Green => "green",
        }
    }

    pub fn from_color(color: &str) -> Result<Self> {
        match color.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(Confidence::Red),
            "amber" | "yellow" | "orange" => Ok(Confidence::Amber),
            "green" => Ok(Confidence::Green),
            other => Err(EngineError::Validation(format!(
                "unknown confidence color '{other}'"
            ))),
        }
    }
}

impl TryFrom<u8> for Confidence {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Confidence::Red),
            1 => Ok(Confidence::Amber),
            2 => Ok(Confidence::Green),
            other => Err(EngineError::Validation(format!(
                "confidence must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<Confidence> for u8 {
    fn from(value: Confidence) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.color())
    }
}

/// Engine configuration passed from JS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Drags whose width or height is not above this many pixels are discarded.
    #[serde(default = "default_min_selection_px")]
    pub min_selection_px: f64,
    /// Nominal interval of the session countdown tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u32,
    /// Repeated `score-selected` for the same document inside this window is ignored.
    #[serde(default = "default_score_reselect_window_ms")]
    pub score_reselect_window_ms: u64,
    /// Upper bound for the zoom used when focusing a practice section.
    #[serde(default = "default_max_focus_zoom")]
    pub max_focus_zoom: f64,
    /// Padding around a focused section, as a fraction of the viewport.
    #[serde(default = "default_focus_padding_pct")]
    pub focus_padding_pct: f64,
}

fn default_min_selection_px() -> f64 {
    2.0
}

fn default_tick_interval_ms() -> u32 {
    1000
}

fn default_score_reselect_window_ms() -> u64 {
    100
}

fn default_max_focus_zoom() -> f64 {
    3.0
}

fn default_focus_padding_pct() -> f64 {
    0.05
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            min_selection_px: default_min_selection_px(),
            tick_interval_ms: default_tick_interval_ms(),
            score_reselect_window_ms: default_score_reselect_window_ms(),
            max_focus_zoom: default_max_focus_zoom(),
            focus_padding_pct: default_focus_padding_pct(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.min_selection_px.is_finite() || self.min_selection_px < 0.0 {
            return Err(EngineError::Validation(
                "min_selection_px must be a non-negative number".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(EngineError::Validation(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }
        if !self.max_focus_zoom.is_finite() || self.max_focus_zoom < 1.0 {
            return Err(EngineError::Validation(
                "max_focus_zoom must be at least 1.0".into(),
            ));
        }
        if !(0.0..0.5).contains(&self.focus_padding_pct) {
            return Err(EngineError::Validation(
                "focus_padding_pct must be in [0, 0.5)".into(),
            ));
        }
        Ok(())
    }
}
