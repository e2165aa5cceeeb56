// Pointer-drag selection as an explicit state machine.
// Idle -> Selecting -> Idle, ending either committed or discarded.
// Rule: a confidence must be armed before drawing; the color is a precondition, not a result.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geometry::PixelRect;
use crate::types::{CanvasSize, Confidence, Point};

/// Size of the overlay shown on pointer-down, before any movement.
const INITIAL_OVERLAY_PX: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum GestureState {
    #[default]
    Idle,
    Selecting { start: Point, current: Point },
}

/// What a pointer event did to the gesture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GestureOutcome {
    /// Event had nothing to act on (idle, disabled, or outside the canvas).
    Ignored,
    /// Overlay shown or moved.
    Overlay { rect: PixelRect },
    /// Finished drag big enough to become a highlight.
    Committed {
        rect: PixelRect,
        confidence: Confidence,
    },
    /// Finished drag that was too small or had no armed confidence.
    Discarded,
}

/// Turns pointer-down/move/up into finalized canvas rectangles.
#[derive(Debug, Clone)]
pub struct SelectionGestureController {
    state: GestureState,
    armed: Option<Confidence>,
    enabled: bool,
    min_size_px: f64,
    canvas: CanvasSize,
}

impl SelectionGestureController {
    pub fn new(min_size_px: f64) -> Self {
        SelectionGestureController {
            state: GestureState::Idle,
            armed: None,
            enabled: true,
            min_size_px: if min_size_px.is_finite() {
                min_size_px.max(0.0)
            } else {
                0.0
            },
            canvas: CanvasSize::zero(),
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    pub fn is_selecting(&self) -> bool {
        matches!(self.state, GestureState::Selecting { .. })
    }

    pub fn armed(&self) -> Option<Confidence> {
        self.armed
    }

    /// Arm the confidence used by the next drawn highlight (`confidence-changed`).
    pub fn arm(&mut self, confidence: Confidence) {
        self.armed = Some(confidence);
    }

    pub fn arm_color(&mut self, color: &str) -> Result<Confidence> {
        let confidence = Confidence::from_color(color)?;
        self.arm(confidence);
        Ok(confidence)
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    /// Practice mode turns drawing off. Disabling mid-drag drops the drag.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.state = GestureState::Idle;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current canvas size; pointer-downs outside it are ignored.
    pub fn set_canvas(&mut self, canvas: CanvasSize) {
        self.canvas = canvas;
    }

    pub fn canvas(&self) -> CanvasSize {
        self.canvas
    }

    /// Live overlay rectangle, if a drag is in progress.
    pub fn overlay(&self) -> Option<PixelRect> {
        match self.state {
            GestureState::Idle => None,
            GestureState::Selecting { start, current } if start == current => Some(
                PixelRect::new(start.x, start.y, INITIAL_OVERLAY_PX, INITIAL_OVERLAY_PX),
            ),
            GestureState::Selecting { start, current } => Some(PixelRect::from_points(start, current)),
        }
    }

    /// Start a drag at a canvas-relative point.
    pub fn pointer_down(&mut self, point: Point) -> GestureOutcome {
        if !self.enabled || !self.canvas.has_area() || !self.canvas.contains(point) {
            return GestureOutcome::Ignored;
        }
        self.state = GestureState::Selecting {
            start: point,
            current: point,
        };
        self.overlay_outcome()
    }

    pub fn pointer_move(&mut self, point: Point) -> GestureOutcome {
        match &mut self.state {
            GestureState::Selecting { current, .. } => {
                *current = point;
                self.overlay_outcome()
            }
            GestureState::Idle => GestureOutcome::Ignored,
        }
    }

    pub fn pointer_up(&mut self, point: Point) -> GestureOutcome {
        self.finish(Some(point))
    }

    /// Leaving the canvas mid-drag finalizes with the last known point.
    pub fn pointer_leave(&mut self) -> GestureOutcome {
        self.finish(None)
    }

    /// Abort without committing (e.g. Escape).
    pub fn cancel(&mut self) {
        self.state = GestureState::Idle;
    }

    fn finish(&mut self, point: Option<Point>) -> GestureOutcome {
        let GestureState::Selecting { start, current } = self.state else {
            return GestureOutcome::Ignored;
        };
        self.state = GestureState::Idle;

        // Only the on-canvas part of the drag can become a highlight.
        let end = point.unwrap_or(current);
        let rect = PixelRect::from_points(start, end).clamped_to(self.canvas);
        let big_enough = rect.width > self.min_size_px && rect.height > self.min_size_px;

        match (big_enough, self.armed) {
            (true, Some(confidence)) => GestureOutcome::Committed { rect, confidence },
            (false, _) => {
                debug!(
                    "discarding {:.1}x{:.1} selection below {}px",
                    rect.width, rect.height, self.min_size_px
                );
                GestureOutcome::Discarded
            }
            (true, None) => {
                debug!("discarding selection: no confidence armed");
                GestureOutcome::Discarded
            }
        }
    }

    fn overlay_outcome(&self) -> GestureOutcome {
        match self.overlay() {
            Some(rect) => GestureOutcome::Overlay { rect },
            None => GestureOutcome::Ignored,
        }
    }
}
