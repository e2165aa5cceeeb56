// score_practice_engine: Rust/WASM core for score highlights and timed practice.
// The host owns the DOM, IndexedDB and timers; everything here is plain data and state machines
// driven through the collaborator traits.

mod bindings;
mod clock;
mod engine;
mod error;
mod focus;
mod geometry;
mod gesture;
mod highlight;
mod host;
mod layer;
mod plan;
mod repository;
mod scheduler;
mod session;
mod storage;
mod timer;
mod types;

#[cfg(test)]
mod testing;

use wasm_bindgen::prelude::*;

pub use bindings::{
    color_for_confidence, confidence_for_color, on_frame_json, plan_focus_js, plan_focus_json,
    record_id, to_percent_rect_js, to_percent_rect_json, to_pixel_rect_js, to_pixel_rect_json,
    WasmEngine, WasmSelection,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineCollaborators, ScoreEngine, SelectionResult};
pub use error::{EngineError, Result};
pub use focus::{FocusPlan, FocusPlanner, FocusResult};
pub use geometry::{point_to_percent, to_percent_rect, to_pixel_rect, viewer_to_canvas, PercentRect, PixelRect};
pub use gesture::{GestureOutcome, GestureState, SelectionGestureController};
pub use highlight::{HighlightElement, HighlightPatch, HighlightRecord};
pub use host::{
    FrameOutput, HostCallbacks, HostStorage, HostSurface, JsEnvironment, JsEvents, JsFrames,
    JsTicker, JsViewer, JsWakeLock, SinkBatch, SinkCommand, StoreWrite,
};
pub use layer::{HighlightLayer, ScoreSelection};
pub use plan::{PlanHighlightLink, PracticePlan, PracticeSection};
pub use repository::{sorted_for_display, BatchDeleteResult, BatchOperation, HighlightRepository, OperationResult};
pub use scheduler::{reconcile, FrameRequester, HighlightSink, PassReport, ReconcileSignal, ReconciliationScheduler, RenderSurface};
pub use session::{
    PracticeEnvironment, PracticeSessionEngine, SectionChoice, SessionCollaborators, SessionEvent,
    SessionEventSink, SessionPhase, SessionSnapshot, SessionSummary, Viewer, WakeLock,
};
pub use storage::{MemoryStorage, Storage, StorageOp, StoreName};
pub use timer::{format_countdown, Countdown, Ticker, TickerHandle};
pub use types::*;

/// Initialize panic hook and console logger for the browser.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(all(feature = "console_log", target_arch = "wasm32"))]
    if console_log::init_with_level(log::Level::Debug).is_err() {
        log::debug!("logger already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingFrames, FakeSurface, RecordingSink};
    use std::rc::Rc;

    #[test]
    fn drawn_highlight_survives_resize() {
        let storage = Rc::new(MemoryStorage::new());
        let clock = Rc::new(ManualClock::new(0));
        let repo = HighlightRepository::new(storage, clock.clone());
        let config = EngineConfig::default();

        let doc = DocumentId::new("score-1");
        let mut layer = HighlightLayer::new();
        let mut selection = ScoreSelection::new(config.score_reselect_window_ms);
        assert!(layer.select_score(&repo, &mut selection, &doc, clock.now_ms()).unwrap());

        let mut gesture = SelectionGestureController::new(config.min_selection_px);
        let canvas = CanvasSize::new(400.0, 300.0);
        gesture.set_canvas(canvas);
        gesture.arm_color("green").unwrap();
        gesture.pointer_down(Point::new(100.0, 75.0));
        gesture.pointer_move(Point::new(140.0, 105.0));
        let GestureOutcome::Committed { rect, confidence } = gesture.pointer_up(Point::new(140.0, 105.0)) else {
            panic!("drag should commit");
        };
        let id = layer
            .add_from_selection(&repo, rect, canvas, confidence)
            .unwrap()
            .unwrap();

        let mut scheduler = ReconciliationScheduler::new(Box::new(CountingFrames::default()));
        let mut surface = FakeSurface::new(CanvasBox::new(400.0, 300.0, 0.0, 0.0), 1);
        let mut sink = RecordingSink::default();
        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        assert_eq!(
            sink.placed(id).map(|e| e.rect.rounded()),
            Some(PixelRect::new(100.0, 75.0, 40.0, 30.0))
        );

        surface.set_canvas(Some(CanvasBox::new(800.0, 600.0, 0.0, 0.0)));
        scheduler.signal(ReconcileSignal::Resize, &mut layer);
        scheduler.on_frame(&layer, &surface, &mut sink);
        let element = sink.placed(id).unwrap();
        assert_eq!(element.rect.rounded(), PixelRect::new(200.0, 150.0, 80.0, 60.0));
        assert_eq!(element.color, "green");
    }
}
