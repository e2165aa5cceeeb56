// Pixel <-> percent rectangle conversion.
// Percent rects are the resize-invariant persisted geometry; pixel rects are disposable projections.
// Rule: never panic, never produce NaN. Degenerate input maps to safe zeros.

use serde::{Deserialize, Serialize};

use crate::types::{CanvasSize, Offset, Point};

/// Rectangle in CSS pixels, relative to the canvas (or to the viewer once offset is applied).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PixelRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        PixelRect {
            left,
            top,
            width,
            height,
        }
    }

    /// Axis-aligned bounding box of two corners, dragged in any direction.
    pub fn from_points(a: Point, b: Point) -> Self {
        PixelRect {
            left: a.x.min(b.x),
            top: a.y.min(b.y),
            width: (a.x - b.x).abs(),
            height: (a.y - b.y).abs(),
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Whole-pixel version for style writes.
    pub fn rounded(&self) -> Self {
        PixelRect {
            left: self.left.round(),
            top: self.top.round(),
            width: self.width.round(),
            height: self.height.round(),
        }
    }

    /// The part of this rectangle that lies on a canvas of the given size.
    pub fn clamped_to(&self, canvas: CanvasSize) -> Self {
        let rect = self.normalized();
        let (left, width) = clamp_axis(rect.left, rect.width, positive_or_zero(canvas.width));
        let (top, height) = clamp_axis(rect.top, rect.height, positive_or_zero(canvas.height));
        PixelRect {
            left,
            top,
            width,
            height,
        }
    }

    /// Flip negative extents so width and height are non-negative.
    fn normalized(&self) -> Self {
        let (left, width) = if self.width < 0.0 {
            (self.left + self.width, -self.width)
        } else {
            (self.left, self.width)
        };
        let (top, height) = if self.height < 0.0 {
            (self.top + self.height, -self.height)
        } else {
            (self.top, self.height)
        };
        PixelRect {
            left,
            top,
            width,
            height,
        }
    }
}

/// Rectangle as fractions of the canvas size. All fields in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PercentRect {
    pub x_pct: f64,
    pub y_pct: f64,
    pub w_pct: f64,
    pub h_pct: f64,
}

impl PercentRect {
    pub fn new(x_pct: f64, y_pct: f64, w_pct: f64, h_pct: f64) -> Self {
        PercentRect {
            x_pct,
            y_pct,
            w_pct,
            h_pct,
        }
    }

    /// Clamp into the unit square so that `x + w <= 1` and `y + h <= 1`.
    pub fn clamped(&self) -> Self {
        let (x_pct, w_pct) = clamp_span(finite_or_zero(self.x_pct), finite_or_zero(self.w_pct));
        let (y_pct, h_pct) = clamp_span(finite_or_zero(self.y_pct), finite_or_zero(self.h_pct));
        PercentRect {
            x_pct,
            y_pct,
            w_pct,
            h_pct,
        }
    }

    pub fn is_within_unit_square(&self) -> bool {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        const EPS: f64 = 1e-9;
        in_unit(self.x_pct)
            && in_unit(self.y_pct)
            && in_unit(self.w_pct)
            && in_unit(self.h_pct)
            && self.x_pct + self.w_pct <= 1.0 + EPS
            && self.y_pct + self.h_pct <= 1.0 + EPS
    }

    pub fn contains(&self, x_pct: f64, y_pct: f64) -> bool {
        x_pct >= self.x_pct
            && x_pct <= self.x_pct + self.w_pct
            && y_pct >= self.y_pct
            && y_pct <= self.y_pct + self.h_pct
    }

    pub fn area(&self) -> f64 {
        self.w_pct * self.h_pct
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x_pct + self.w_pct / 2.0, self.y_pct + self.h_pct / 2.0)
    }
}

/// Convert a canvas-relative pixel rectangle to canvas percentages.
///
/// The rectangle is clamped to `[0, width] x [0, height]` before dividing. A zero-sized
/// canvas dimension yields `0` for that axis instead of dividing by zero.
pub fn to_percent_rect(rect: PixelRect, canvas: CanvasSize) -> PercentRect {
    let rect = rect.normalized();
    let (x_pct, w_pct) = axis_to_percent(rect.left, rect.width, canvas.width);
    let (y_pct, h_pct) = axis_to_percent(rect.top, rect.height, canvas.height);
    PercentRect {
        x_pct,
        y_pct,
        w_pct,
        h_pct,
    }
}

/// Project a percent rectangle onto the current canvas size and position.
pub fn to_pixel_rect(rect: PercentRect, canvas: CanvasSize, offset: Offset) -> PixelRect {
    let width = positive_or_zero(canvas.width);
    let height = positive_or_zero(canvas.height);
    PixelRect {
        left: finite_or_zero(rect.x_pct) * width + finite_or_zero(offset.left),
        top: finite_or_zero(rect.y_pct) * height + finite_or_zero(offset.top),
        width: finite_or_zero(rect.w_pct) * width,
        height: finite_or_zero(rect.h_pct) * height,
    }
}

/// Convert a viewer-relative point into canvas-relative pixels.
pub fn viewer_to_canvas(point: Point, offset: Offset) -> Point {
    Point::new(point.x - offset.left, point.y - offset.top)
}

/// Convert a canvas-relative point into canvas percentages.
pub fn point_to_percent(point: Point, canvas: CanvasSize) -> (f64, f64) {
    let x = if canvas.width > 0.0 && canvas.width.is_finite() {
        point.x / canvas.width
    } else {
        0.0
    };
    let y = if canvas.height > 0.0 && canvas.height.is_finite() {
        point.y / canvas.height
    } else {
        0.0
    };
    (finite_or_zero(x), finite_or_zero(y))
}

fn axis_to_percent(start: f64, length: f64, extent: f64) -> (f64, f64) {
    if !(extent.is_finite() && extent > 0.0) {
        return (0.0, 0.0);
    }
    let start = finite_or_zero(start);
    let end = start + finite_or_zero(length);
    let clamped_start = start.clamp(0.0, extent);
    let clamped_end = end.clamp(0.0, extent);
    (
        clamped_start / extent,
        (clamped_end - clamped_start).max(0.0) / extent,
    )
}

fn clamp_axis(start: f64, length: f64, extent: f64) -> (f64, f64) {
    let start = finite_or_zero(start);
    let end = start + finite_or_zero(length);
    let clamped_start = start.clamp(0.0, extent);
    let clamped_end = end.clamp(0.0, extent);
    (clamped_start, (clamped_end - clamped_start).max(0.0))
}

fn clamp_span(start: f64, length: f64) -> (f64, f64) {
    let start = start.clamp(0.0, 1.0);
    let length = length.clamp(0.0, 1.0 - start);
    (start, length)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn positive_or_zero(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn clamped_to_keeps_only_the_on_canvas_part() {
        let canvas = CanvasSize::new(400.0, 300.0);
        let rect = PixelRect::new(399.0, 100.0, 201.0, 100.0).clamped_to(canvas);
        assert_eq!(rect, PixelRect::new(399.0, 100.0, 1.0, 100.0));

        let inside = PixelRect::new(10.0, 10.0, 50.0, 40.0);
        assert_eq!(inside.clamped_to(canvas), inside);

        let negative = PixelRect::new(-20.0, -10.0, 50.0, 30.0).clamped_to(canvas);
        assert_eq!(negative, PixelRect::new(0.0, 0.0, 30.0, 20.0));

        assert_eq!(inside.clamped_to(CanvasSize::zero()), PixelRect::new(0.0, 0.0, 0.0, 0.0));
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "expected {b}, got {a}");
    }

    #[test]
    fn resize_reprojects_proportionally() {
        let pct = PercentRect::new(0.5, 0.5, 0.1, 0.1);

        let small = to_pixel_rect(pct, CanvasSize::new(400.0, 300.0), Offset::zero());
        assert_close(small.left, 200.0);
        assert_close(small.top, 150.0);
        assert_close(small.width, 40.0);
        assert_close(small.height, 30.0);

        let large = to_pixel_rect(pct, CanvasSize::new(800.0, 600.0), Offset::zero());
        assert_close(large.left, 400.0);
        assert_close(large.top, 300.0);
        assert_close(large.width, 80.0);
        assert_close(large.height, 60.0);
    }

    #[test]
    fn offset_shifts_projection() {
        let pct = PercentRect::new(0.25, 0.0, 0.5, 1.0);
        let rect = to_pixel_rect(pct, CanvasSize::new(200.0, 100.0), Offset::new(30.0, 12.0));
        assert_close(rect.left, 80.0);
        assert_close(rect.top, 12.0);
        assert_close(rect.width, 100.0);
        assert_close(rect.height, 100.0);
    }

    #[test]
    fn clamps_rectangles_hanging_off_canvas() {
        let rect = PixelRect::new(-20.0, 250.0, 100.0, 100.0);
        let pct = to_percent_rect(rect, CanvasSize::new(400.0, 300.0));
        assert_close(pct.x_pct, 0.0);
        assert_close(pct.w_pct, 80.0 / 400.0);
        assert_close(pct.y_pct, 250.0 / 300.0);
        assert_close(pct.h_pct, 50.0 / 300.0);
        assert!(pct.is_within_unit_square());
    }

    #[test]
    fn zero_sized_canvas_yields_zero_percentages() {
        let pct = to_percent_rect(PixelRect::new(10.0, 10.0, 5.0, 5.0), CanvasSize::new(0.0, 100.0));
        assert_eq!(pct.x_pct, 0.0);
        assert_eq!(pct.w_pct, 0.0);
        assert_close(pct.y_pct, 0.1);
        assert_close(pct.h_pct, 0.05);

        let pct = to_percent_rect(PixelRect::new(1.0, 1.0, 1.0, 1.0), CanvasSize::zero());
        assert_eq!(pct, PercentRect::default());
    }

    #[test]
    fn from_points_handles_all_drag_directions() {
        let expected = PixelRect::new(10.0, 20.0, 30.0, 40.0);
        let corners = [
            (Point::new(10.0, 20.0), Point::new(40.0, 60.0)),
            (Point::new(40.0, 60.0), Point::new(10.0, 20.0)),
            (Point::new(40.0, 20.0), Point::new(10.0, 60.0)),
            (Point::new(10.0, 60.0), Point::new(40.0, 20.0)),
        ];
        for (a, b) in corners {
            assert_eq!(PixelRect::from_points(a, b), expected);
        }
    }

    #[test]
    fn negative_extent_is_normalized() {
        let pct = to_percent_rect(PixelRect::new(50.0, 50.0, -50.0, -25.0), CanvasSize::new(100.0, 100.0));
        assert_close(pct.x_pct, 0.0);
        assert_close(pct.w_pct, 0.5);
        assert_close(pct.y_pct, 0.25);
        assert_close(pct.h_pct, 0.25);
    }

    #[test]
    fn clamped_percent_rect_stays_in_unit_square() {
        let pct = PercentRect::new(0.9, -0.2, 0.5, f64::NAN).clamped();
        assert_close(pct.x_pct, 0.9);
        assert_close(pct.w_pct, 0.1);
        assert_eq!(pct.y_pct, 0.0);
        assert_eq!(pct.h_pct, 0.0);
        assert!(pct.is_within_unit_square());
    }

    // =========================================================================
    // Property-Based Tests
    // =========================================================================

    mod property_tests {
        use super::*;

        /// Canvas plus a rectangle fully inside it.
        fn rect_in_canvas_strategy() -> impl Strategy<Value = (CanvasSize, PixelRect)> {
            (1.0f64..4000.0, 1.0f64..4000.0)
                .prop_flat_map(|(w, h)| {
                    (Just(w), Just(h), 0.0..w, 0.0..h)
                })
                .prop_flat_map(|(w, h, left, top)| {
                    (
                        Just(CanvasSize::new(w, h)),
                        Just(left),
                        Just(top),
                        0.0..=(w - left),
                        0.0..=(h - top),
                    )
                })
                .prop_map(|(canvas, left, top, width, height)| {
                    (canvas, PixelRect::new(left, top, width, height))
                })
        }

        proptest! {
            /// Property: pixel -> percent -> pixel on the same canvas returns the original
            /// rectangle within one pixel.
            #[test]
            fn round_trip_within_one_pixel((canvas, rect) in rect_in_canvas_strategy()) {
                let back = to_pixel_rect(to_percent_rect(rect, canvas), canvas, Offset::zero());
                prop_assert!((back.left - rect.left).abs() <= 1.0);
                prop_assert!((back.top - rect.top).abs() <= 1.0);
                prop_assert!((back.width - rect.width).abs() <= 1.0);
                prop_assert!((back.height - rect.height).abs() <= 1.0);
            }

            /// Property: projection onto a resized canvas scales with the new size only.
            #[test]
            fn projection_scales_with_new_canvas(
                (canvas, rect) in rect_in_canvas_strategy(),
                scale in 0.1f64..8.0,
            ) {
                let pct = to_percent_rect(rect, canvas);
                let resized = CanvasSize::new(canvas.width * scale, canvas.height * scale);
                let projected = to_pixel_rect(pct, resized, Offset::zero());
                prop_assert!((projected.left - rect.left * scale).abs() <= 1e-6 * resized.width.max(1.0));
                prop_assert!((projected.width - rect.width * scale).abs() <= 1e-6 * resized.width.max(1.0));
                prop_assert!((projected.top - rect.top * scale).abs() <= 1e-6 * resized.height.max(1.0));
                prop_assert!((projected.height - rect.height * scale).abs() <= 1e-6 * resized.height.max(1.0));
            }

            /// Property: any input rectangle, even one far outside the canvas, converts into
            /// the unit square.
            #[test]
            fn percent_rect_always_in_unit_square(
                left in -5000.0f64..5000.0,
                top in -5000.0f64..5000.0,
                width in -5000.0f64..5000.0,
                height in -5000.0f64..5000.0,
                cw in 0.0f64..3000.0,
                ch in 0.0f64..3000.0,
            ) {
                let pct = to_percent_rect(PixelRect::new(left, top, width, height), CanvasSize::new(cw, ch));
                prop_assert!(pct.is_within_unit_square(), "{:?}", pct);
            }
        }
    }
}
