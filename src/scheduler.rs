// Frame-coalesced reconciliation of highlight projections.
// Rule: bursts of resize/zoom/page signals inside one frame cost one pass.
// See DESIGN.md: ReconciliationScheduler

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::highlight::HighlightElement;
use crate::layer::HighlightLayer;
use crate::types::{CanvasBox, RecordId};

/// PDF render collaborator, as far as positioning is concerned.
pub trait RenderSurface {
    /// Canvas box relative to the viewer. `None` when the canvas is detached.
    fn canvas_box(&self) -> Option<CanvasBox>;

    /// 1-based page currently displayed.
    fn current_page(&self) -> u32;

    fn total_pages(&self) -> u32;
}

/// Host adapter that owns the actual visual nodes.
pub trait HighlightSink {
    /// Position and show an element.
    fn place(&mut self, element: &HighlightElement);

    /// Hide without removing (highlights on other pages).
    fn hide(&mut self, id: RecordId);

    /// Drop the node entirely (highlight deleted or score closed).
    fn remove(&mut self, id: RecordId);
}

/// Asks the host for one callback on the next animation frame.
pub trait FrameRequester {
    fn request_frame(&mut self);
}

/// Inputs that invalidate highlight positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ReconcileSignal {
    Resize,
    LayoutChanged,
    PageChanged { page: u32 },
    ScoreSelected,
}

/// What one frame callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PassReport {
    NotPending,
    Detached,
    /// Canvas reported no area; nothing was written.
    SkippedEmptyCanvas,
    Applied { placed: usize, hidden: usize },
}

pub struct ReconciliationScheduler {
    frames: Box<dyn FrameRequester>,
    pending: bool,
    attached: bool,
    passes: u64,
}

impl ReconciliationScheduler {
    pub fn new(frames: Box<dyn FrameRequester>) -> Self {
        ReconciliationScheduler {
            frames,
            pending: false,
            attached: true,
            passes: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Completed passes since construction.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Record a signal and make sure exactly one frame is requested.
    /// The layer follows page changes even while detached; only the frame request is skipped.
    pub fn signal(&mut self, signal: ReconcileSignal, layer: &mut HighlightLayer) {
        if let ReconcileSignal::PageChanged { page } = signal {
            layer.set_current_page(page);
        }
        if !self.attached {
            trace!("ignoring {signal:?}: viewer detached");
            return;
        }
        if self.pending {
            trace!("coalescing {signal:?} into pending pass");
            return;
        }
        self.pending = true;
        self.frames.request_frame();
    }

    /// Viewer torn down. Frames that still fire become no-ops.
    pub fn detach(&mut self) {
        self.attached = false;
        self.pending = false;
    }

    pub fn attach(&mut self) {
        self.attached = true;
    }

    /// Animation-frame callback.
    pub fn on_frame(
        &mut self,
        layer: &HighlightLayer,
        surface: &dyn RenderSurface,
        sink: &mut dyn HighlightSink,
    ) -> PassReport {
        if !self.attached {
            return PassReport::Detached;
        }
        if !self.pending {
            return PassReport::NotPending;
        }
        self.pending = false;
        let report = reconcile(layer, surface, sink);
        self.passes += 1;
        report
    }
}

/// One reconciliation pass: project every highlight on the displayed page, hide the rest.
pub fn reconcile(
    layer: &HighlightLayer,
    surface: &dyn RenderSurface,
    sink: &mut dyn HighlightSink,
) -> PassReport {
    let canvas = match surface.canvas_box() {
        Some(canvas) if canvas.size.has_area() => canvas,
        _ => {
            debug!("canvas has no area; skipping highlight positioning");
            return PassReport::SkippedEmptyCanvas;
        }
    };

    let page = surface.current_page();
    let mut placed = 0;
    let mut hidden = 0;
    for record in layer.records() {
        let Some(id) = record.id else { continue };
        if record.page == page {
            sink.place(&record.project(canvas, true));
            placed += 1;
        } else {
            sink.hide(id);
            hidden += 1;
        }
    }
    PassReport::Applied { placed, hidden }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PercentRect;
    use crate::highlight::HighlightRecord;
    use crate::testing::{CountingFrames, FakeSurface, RecordingSink};
    use crate::types::{Confidence, DocumentId};

    fn record(id: u64, page: u32, rect: PercentRect) -> HighlightRecord {
        let mut r = HighlightRecord::draft(DocumentId::new("doc"), page, rect, Confidence::Green);
        r.id = Some(RecordId::new(id));
        r
    }

    fn layer() -> HighlightLayer {
        let mut layer = HighlightLayer::new();
        layer.load(
            DocumentId::new("doc"),
            vec![
                record(1, 1, PercentRect::new(0.5, 0.5, 0.1, 0.1)),
                record(2, 2, PercentRect::new(0.0, 0.0, 0.2, 0.2)),
            ],
        );
        layer
    }

    #[test]
    fn burst_of_signals_requests_one_frame() {
        let frames = CountingFrames::default();
        let mut scheduler = ReconciliationScheduler::new(Box::new(frames.clone()));
        let mut layer = layer();
        for _ in 0..25 {
            scheduler.signal(ReconcileSignal::Resize, &mut layer);
        }
        scheduler.signal(ReconcileSignal::LayoutChanged, &mut layer);
        assert_eq!(frames.count(), 1);

        let surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 0.0, 0.0), 1);
        let mut sink = RecordingSink::default();
        assert_eq!(
            scheduler.on_frame(&layer, &surface, &mut sink),
            PassReport::Applied { placed: 1, hidden: 1 }
        );
        assert_eq!(scheduler.passes(), 1);

        // A second frame without new signals does nothing.
        assert_eq!(
            scheduler.on_frame(&layer, &surface, &mut sink),
            PassReport::NotPending
        );

        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        assert_eq!(frames.count(), 2);
    }

    #[test]
    fn resize_reprojects_with_new_canvas_size() {
        let frames = CountingFrames::default();
        let mut scheduler = ReconciliationScheduler::new(Box::new(frames));
        let mut layer = layer();
        let mut sink = RecordingSink::default();
        let mut surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 0.0, 0.0), 1);

        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        let placed = sink.placed(RecordId::new(1)).unwrap();
        assert_eq!(placed.rect.rounded(), crate::geometry::PixelRect::new(200.0, 150.0, 40.0, 30.0));

        surface.set_canvas(Some(CanvasBox::new(800.0, 600.0, 0.0, 0.0)));
        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        let placed = sink.placed(RecordId::new(1)).unwrap();
        assert_eq!(placed.rect.rounded(), crate::geometry::PixelRect::new(400.0, 300.0, 80.0, 60.0));
    }

    #[test]
    fn centered_canvas_offset_is_applied() {
        let mut scheduler = ReconciliationScheduler::new(Box::new(CountingFrames::default()));
        let mut layer = layer();
        let mut sink = RecordingSink::default();
        let surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 100.0, 20.0), 1);

        scheduler.signal(ReconcileSignal::LayoutChanged, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        let placed = sink.placed(RecordId::new(1)).unwrap();
        assert!((placed.rect.left - 300.0).abs() < 1e-9);
        assert!((placed.rect.top - 170.0).abs() < 1e-9);
    }

    #[test]
    fn page_change_hides_other_pages_without_refetch() {
        let mut scheduler = ReconciliationScheduler::new(Box::new(CountingFrames::default()));
        let mut layer = layer();
        let mut sink = RecordingSink::default();
        let mut surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 0.0, 0.0), 1);

        scheduler.signal(ReconcileSignal::ScoreSelected, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        assert!(sink.is_visible(RecordId::new(1)));
        assert!(!sink.is_visible(RecordId::new(2)));

        surface.set_page(2);
        scheduler.signal(ReconcileSignal::PageChanged { page: 2 }, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        assert_eq!(layer.current_page(), 2);
        assert!(!sink.is_visible(RecordId::new(1)));
        assert!(sink.is_visible(RecordId::new(2)));
        assert_eq!(layer.len(), 2);

        surface.set_page(1);
        scheduler.signal(ReconcileSignal::PageChanged { page: 1 }, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        assert!(sink.is_visible(RecordId::new(1)));
        assert!(!sink.is_visible(RecordId::new(2)));
        assert_eq!(layer.len(), 2);
        assert_eq!(sink.element_count(), 2);
        assert_eq!(sink.removed_count(), 0);
    }

    #[test]
    fn empty_canvas_skips_writes() {
        let mut scheduler = ReconciliationScheduler::new(Box::new(CountingFrames::default()));
        let mut layer = layer();
        let mut sink = RecordingSink::default();
        let mut surface = FakeSurface::new(CanvasBox::new(0.0, 0.0, 0.0, 0.0), 1);

        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        assert_eq!(
            scheduler.on_frame(&layer, &surface, &mut sink),
            PassReport::SkippedEmptyCanvas
        );

        surface.set_canvas(None);
        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        assert_eq!(
            scheduler.on_frame(&layer, &surface, &mut sink),
            PassReport::SkippedEmptyCanvas
        );
        assert_eq!(sink.element_count(), 0);
    }

    #[test]
    fn frame_after_detach_is_a_no_op() {
        let frames = CountingFrames::default();
        let mut scheduler = ReconciliationScheduler::new(Box::new(frames.clone()));
        let mut layer = layer();
        let mut sink = RecordingSink::default();
        let surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 0.0, 0.0), 1);

        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        scheduler.detach();
        assert_eq!(
            scheduler.on_frame(&layer, &surface, &mut sink),
            PassReport::Detached
        );
        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        assert_eq!(frames.count(), 1);
        assert_eq!(sink.element_count(), 0);
    }

    #[test]
    fn page_change_while_detached_still_moves_the_layer() {
        let frames = CountingFrames::default();
        let mut scheduler = ReconciliationScheduler::new(Box::new(frames.clone()));
        let mut layer = layer();
        let mut sink = RecordingSink::default();
        let surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 0.0, 0.0), 2);

        scheduler.detach();
        scheduler.signal(ReconcileSignal::PageChanged { page: 2 }, &mut layer);
        assert_eq!(frames.count(), 0);
        assert_eq!(layer.current_page(), 2);

        scheduler.attach();
        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        assert_eq!(
            scheduler.on_frame(&layer, &surface, &mut sink),
            PassReport::Applied { placed: 1, hidden: 1 }
        );
        assert_eq!(layer.records_on_page(2).count(), 1);
        assert!(sink.is_visible(RecordId::new(2)));
    }
}
