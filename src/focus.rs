// Zoom/center planning for bringing a practice section into view.
// Viewer implementations use this; the session engine only hands over the percent rect.

use serde::{Deserialize, Serialize};

use crate::geometry::PercentRect;
use crate::types::{CanvasSize, EngineConfig};

/// Never zoom out further than this, however large the section.
const MIN_FOCUS_ZOOM: f64 = 0.25;

/// What a viewer reports after focusing a section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusResult {
    pub zoom: f64,
    /// False when the scroll range could not put the section in the middle (page edges).
    pub centered: bool,
}

/// Target view for a section: zoom relative to the unscaled page, and the point to
/// center, in page percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusPlan {
    pub zoom: f64,
    pub center_x_pct: f64,
    pub center_y_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusPlanner {
    max_zoom: f64,
    padding_pct: f64,
}

impl FocusPlanner {
    pub fn new(max_zoom: f64, padding_pct: f64) -> Self {
        FocusPlanner {
            max_zoom: max_zoom.max(MIN_FOCUS_ZOOM),
            padding_pct: padding_pct.clamp(0.0, 0.45),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_focus_zoom, config.focus_padding_pct)
    }

    /// Fit `rect` (page percent) into `viewport`, given the page size at zoom 1.
    ///
    /// Sizes without area fall back to zoom 1 on the section center.
    pub fn plan(&self, rect: PercentRect, page: CanvasSize, viewport: CanvasSize) -> FocusPlan {
        let rect = rect.clamped();
        let (center_x_pct, center_y_pct) = rect.center();
        if !page.has_area() || !viewport.has_area() {
            return FocusPlan {
                zoom: 1.0,
                center_x_pct,
                center_y_pct,
            };
        }

        // Section size in unscaled pixels, grown by the padding on both sides.
        let grow = 1.0 + 2.0 * self.padding_pct;
        let width_px = rect.w_pct * page.width * grow;
        let height_px = rect.h_pct * page.height * grow;

        let fit_w = if width_px > 0.0 { viewport.width / width_px } else { f64::INFINITY };
        let fit_h = if height_px > 0.0 { viewport.height / height_px } else { f64::INFINITY };
        let zoom = fit_w.min(fit_h).clamp(MIN_FOCUS_ZOOM, self.max_zoom);

        FocusPlan {
            zoom,
            center_x_pct,
            center_y_pct,
        }
    }

    /// Scroll offset that puts the plan's center in the middle of the viewport,
    /// clamped to the scrollable range. The flag says whether clamping was needed.
    pub fn scroll_for(&self, plan: &FocusPlan, page: CanvasSize, viewport: CanvasSize) -> (f64, f64, bool) {
        let scaled_w = page.width * plan.zoom;
        let scaled_h = page.height * plan.zoom;
        let want_x = plan.center_x_pct * scaled_w - viewport.width / 2.0;
        let want_y = plan.center_y_pct * scaled_h - viewport.height / 2.0;
        let x = want_x.clamp(0.0, (scaled_w - viewport.width).max(0.0));
        let y = want_y.clamp(0.0, (scaled_h - viewport.height).max(0.0));
        let centered = (x - want_x).abs() < 0.5 && (y - want_y).abs() < 0.5;
        (x, y, centered)
    }
}

impl Default for FocusPlanner {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
