// WASM surface. JSON in, JSON out, one crossing per call.
// The `*_json` functions carry the logic so they can be tested natively; the exported
// wrappers only turn errors into JS strings.

use std::rc::Rc;

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::clock::SystemClock;
use crate::engine::{EngineCollaborators, ScoreEngine};
use crate::error::{EngineError, Result};
use crate::focus::FocusPlanner;
use crate::geometry::{to_percent_rect, to_pixel_rect, PercentRect, PixelRect};
use crate::gesture::SelectionGestureController;
use crate::highlight::HighlightPatch;
use crate::host::{
    FrameOutput, HostCallbacks, HostStorage, HostSurface, JsEnvironment, JsEvents, JsFrames,
    JsTicker, JsViewer, JsWakeLock, SinkBatch,
};
use crate::plan::PracticePlan;
use crate::repository::BatchOperation;
use crate::scheduler::ReconcileSignal;
use crate::session::SectionChoice;
use crate::storage::StoreName;
use crate::timer::TickerHandle;
use crate::types::{CanvasBox, CanvasSize, Confidence, DocumentId, EngineConfig, Offset, Point, RecordId};

fn to_js(error: EngineError) -> JsValue {
    JsValue::from_str(&error.to_string())
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// JS numbers used as ids must be non-negative integers.
fn whole_number(value: f64, what: &str) -> Result<u64> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Ok(value as u64)
    } else {
        Err(EngineError::Validation(format!("{value} is not a {what}")))
    }
}

pub fn record_id(value: f64) -> Result<RecordId> {
    whole_number(value, "record id").map(RecordId::new)
}

fn store_name(name: &str) -> Result<StoreName> {
    Ok(serde_json::from_value(serde_json::Value::from(name))?)
}

pub fn to_percent_rect_json(rect_json: &str, canvas_width: f64, canvas_height: f64) -> Result<String> {
    let rect: PixelRect = serde_json::from_str(rect_json)?;
    let percent = to_percent_rect(rect, CanvasSize::new(canvas_width, canvas_height));
    Ok(serde_json::to_string(&percent)?)
}

pub fn to_pixel_rect_json(
    rect_json: &str,
    canvas_width: f64,
    canvas_height: f64,
    offset_left: f64,
    offset_top: f64,
) -> Result<String> {
    let rect: PercentRect = serde_json::from_str(rect_json)?;
    let pixels = to_pixel_rect(
        rect,
        CanvasSize::new(canvas_width, canvas_height),
        Offset::new(offset_left, offset_top),
    );
    Ok(serde_json::to_string(&pixels)?)
}

pub fn plan_focus_json(
    rect_json: &str,
    page_width: f64,
    page_height: f64,
    viewport_width: f64,
    viewport_height: f64,
    config_json: &str,
) -> Result<String> {
    let rect: PercentRect = serde_json::from_str(rect_json)?;
    let config = EngineConfig::from_json(config_json)?;
    let plan = FocusPlanner::from_config(&config).plan(
        rect,
        CanvasSize::new(page_width, page_height),
        CanvasSize::new(viewport_width, viewport_height),
    );
    Ok(serde_json::to_string(&plan)?)
}

/// Pixel rect `{left, top, width, height}` to page percent `{xPct, yPct, wPct, hPct}`.
#[wasm_bindgen(js_name = toPercentRect)]
pub fn to_percent_rect_js(rect_json: &str, canvas_width: f64, canvas_height: f64) -> std::result::Result<String, JsValue> {
    to_percent_rect_json(rect_json, canvas_width, canvas_height).map_err(to_js)
}

#[wasm_bindgen(js_name = toPixelRect)]
pub fn to_pixel_rect_js(
    rect_json: &str,
    canvas_width: f64,
    canvas_height: f64,
    offset_left: f64,
    offset_top: f64,
) -> std::result::Result<String, JsValue> {
    to_pixel_rect_json(rect_json, canvas_width, canvas_height, offset_left, offset_top).map_err(to_js)
}

/// Zoom and center for a section. `config_json` may be `"{}"` for defaults.
#[wasm_bindgen(js_name = planFocus)]
pub fn plan_focus_js(
    rect_json: &str,
    page_width: f64,
    page_height: f64,
    viewport_width: f64,
    viewport_height: f64,
    config_json: &str,
) -> std::result::Result<String, JsValue> {
    plan_focus_json(
        rect_json,
        page_width,
        page_height,
        viewport_width,
        viewport_height,
        config_json,
    )
    .map_err(to_js)
}

#[wasm_bindgen(js_name = colorForConfidence)]
pub fn color_for_confidence(level: u8) -> std::result::Result<String, JsValue> {
    Confidence::try_from(level)
        .map(|c| c.color().to_string())
        .map_err(to_js)
}

#[wasm_bindgen(js_name = confidenceForColor)]
pub fn confidence_for_color(color: &str) -> std::result::Result<u8, JsValue> {
    Confidence::from_color(color).map(u8::from).map_err(to_js)
}

/// Drag-selection controller for the score canvas. Outcomes come back as JSON.
#[wasm_bindgen]
pub struct WasmSelection {
    inner: SelectionGestureController,
}

impl WasmSelection {
    pub fn from_config_json(config_json: &str) -> Result<WasmSelection> {
        let config = EngineConfig::from_json(config_json)?;
        Ok(WasmSelection {
            inner: SelectionGestureController::new(config.min_selection_px),
        })
    }

    fn outcome_json(outcome: crate::gesture::GestureOutcome) -> Result<String> {
        Ok(serde_json::to_string(&outcome)?)
    }

    pub fn controller(&self) -> &SelectionGestureController {
        &self.inner
    }
}

#[wasm_bindgen]
impl WasmSelection {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> std::result::Result<WasmSelection, JsValue> {
        Self::from_config_json(config_json).map_err(to_js)
    }

    pub fn set_canvas(&mut self, width: f64, height: f64) {
        self.inner.set_canvas(CanvasSize::new(width, height));
    }

    /// Handles `confidence-changed {color}`. Returns the armed level.
    pub fn arm_color(&mut self, color: &str) -> std::result::Result<u8, JsValue> {
        self.inner.arm_color(color).map(u8::from).map_err(to_js)
    }

    pub fn disarm(&mut self) {
        self.inner.disarm();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.inner.set_enabled(enabled);
    }

    pub fn is_selecting(&self) -> bool {
        self.inner.is_selecting()
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) -> std::result::Result<String, JsValue> {
        Self::outcome_json(self.inner.pointer_down(Point::new(x, y))).map_err(to_js)
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) -> std::result::Result<String, JsValue> {
        Self::outcome_json(self.inner.pointer_move(Point::new(x, y))).map_err(to_js)
    }

    pub fn pointer_up(&mut self, x: f64, y: f64) -> std::result::Result<String, JsValue> {
        Self::outcome_json(self.inner.pointer_up(Point::new(x, y))).map_err(to_js)
    }

    pub fn pointer_leave(&mut self) -> std::result::Result<String, JsValue> {
        Self::outcome_json(self.inner.pointer_leave()).map_err(to_js)
    }

    pub fn cancel(&mut self) {
        self.inner.cancel();
    }

    /// Current overlay rect as JSON, or `null` when idle.
    pub fn overlay(&self) -> std::result::Result<String, JsValue> {
        serde_json::to_string(&self.inner.overlay())
            .map_err(|e| to_js(EngineError::from(e)))
    }
}

/// Frame output for a measured canvas. A zero-sized canvas skips the pass.
pub fn on_frame_json(
    engine: &mut ScoreEngine,
    canvas: CanvasBox,
    page: u32,
    total_pages: u32,
) -> Result<String> {
    let surface = HostSurface {
        canvas: Some(canvas),
        page,
        total_pages,
    };
    let mut batch = SinkBatch::default();
    let report = engine.on_frame(&surface, &mut batch);
    to_json(&FrameOutput {
        report,
        commands: batch.into_commands(),
    })
}

/// Highlight layer, drag selection, reconciliation and practice sessions for one viewer.
///
/// `callbacks` is an object of optional host functions: `onWrite`, `requestFrame`,
/// `startTicker`, `cancelTicker`, `focusOnRect`, `getZoom`, `setZoom`, `setupEnvironment`,
/// `cleanupEnvironment`, `requestWakeLock`, `releaseWakeLock` and `emit`.
#[wasm_bindgen]
pub struct WasmEngine {
    engine: ScoreEngine,
    storage: Rc<HostStorage>,
}

impl WasmEngine {
    pub fn from_parts(config_json: &str, callbacks: &HostCallbacks) -> Result<WasmEngine> {
        let config = EngineConfig::from_json(config_json)?;
        let storage = Rc::new(HostStorage::new(callbacks));
        let engine = ScoreEngine::new(
            config,
            EngineCollaborators {
                storage: storage.clone(),
                clock: Rc::new(SystemClock),
                frames: Box::new(JsFrames::new(callbacks)),
                environment: Box::new(JsEnvironment::new(callbacks)),
                viewer: Box::new(JsViewer::new(callbacks)),
                wake_lock: Box::new(JsWakeLock::new(callbacks)),
                ticker: Box::new(JsTicker::new(callbacks)),
                events: Box::new(JsEvents::new(callbacks)),
            },
        )?;
        Ok(WasmEngine { engine, storage })
    }

    pub fn engine(&self) -> &ScoreEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ScoreEngine {
        &mut self.engine
    }
}

#[wasm_bindgen]
impl WasmEngine {
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, callbacks: JsValue) -> std::result::Result<WasmEngine, JsValue> {
        Self::from_parts(config_json, &HostCallbacks::from_js(&callbacks)).map_err(to_js)
    }

    /// Load records the host already persisted, e.g. `seed("highlights", json)`.
    pub fn seed(&self, store: &str, records_json: &str) -> std::result::Result<usize, JsValue> {
        store_name(store)
            .and_then(|store| self.storage.seed(store, records_json))
            .map_err(to_js)
    }

    /// Handles `score-selected`. Returns whether highlights were (re)loaded.
    pub fn select_score(&mut self, document_id: &str) -> std::result::Result<bool, JsValue> {
        self.engine
            .select_score(&DocumentId::new(document_id))
            .map_err(to_js)
    }

    /// Highlights of the selected score, in display order.
    pub fn highlights(&self) -> std::result::Result<String, JsValue> {
        to_json(&self.engine.highlights()).map_err(to_js)
    }

    pub fn set_canvas(&mut self, width: f64, height: f64) {
        self.engine.set_canvas(CanvasSize::new(width, height));
    }

    pub fn arm_color(&mut self, color: &str) -> std::result::Result<u8, JsValue> {
        self.engine.arm_color(color).map(u8::from).map_err(to_js)
    }

    pub fn disarm(&mut self) {
        self.engine.disarm();
    }

    pub fn pointer_down(&mut self, x: f64, y: f64) -> std::result::Result<String, JsValue> {
        to_json(&self.engine.pointer_down(Point::new(x, y))).map_err(to_js)
    }

    pub fn pointer_move(&mut self, x: f64, y: f64) -> std::result::Result<String, JsValue> {
        to_json(&self.engine.pointer_move(Point::new(x, y))).map_err(to_js)
    }

    /// `{outcome, highlightId?}`; the id is present when the drag was saved.
    pub fn pointer_up(&mut self, x: f64, y: f64) -> std::result::Result<String, JsValue> {
        self.engine
            .pointer_up(Point::new(x, y))
            .and_then(|result| to_json(&result))
            .map_err(to_js)
    }

    pub fn pointer_leave(&mut self) -> std::result::Result<String, JsValue> {
        self.engine
            .pointer_leave()
            .and_then(|result| to_json(&result))
            .map_err(to_js)
    }

    pub fn cancel_selection(&mut self) {
        self.engine.cancel_selection();
    }

    pub fn overlay(&self) -> std::result::Result<String, JsValue> {
        to_json(&self.engine.gesture().overlay()).map_err(to_js)
    }

    pub fn hit_test(&self, x: f64, y: f64) -> Option<f64> {
        self.engine
            .hit_test(Point::new(x, y))
            .map(|id| id.as_u64() as f64)
    }

    pub fn update_highlight(&mut self, id: f64, patch_json: &str) -> std::result::Result<String, JsValue> {
        record_id(id)
            .and_then(|id| {
                let patch: HighlightPatch = serde_json::from_str(patch_json)?;
                self.engine.update_highlight(id, &patch)
            })
            .and_then(|record| to_json(&record))
            .map_err(to_js)
    }

    pub fn delete_highlight(&mut self, id: f64) -> std::result::Result<(), JsValue> {
        record_id(id)
            .and_then(|id| self.engine.delete_highlight(id))
            .map_err(to_js)
    }

    /// Atomic batch of `{type: "deleteHighlight" | "deletePlanHighlights", ...}` operations.
    pub fn delete_many(&mut self, operations_json: &str) -> std::result::Result<String, JsValue> {
        serde_json::from_str::<Vec<BatchOperation>>(operations_json)
            .map_err(EngineError::from)
            .and_then(|operations| self.engine.delete_many(&operations))
            .and_then(|result| to_json(&result))
            .map_err(to_js)
    }

    /// `{type: "resize" | "layout-changed" | "score-selected"}` or `{type: "page-changed", page}`.
    pub fn signal(&mut self, signal_json: &str) -> std::result::Result<(), JsValue> {
        serde_json::from_str::<ReconcileSignal>(signal_json)
            .map(|signal| self.engine.signal(signal))
            .map_err(|e| to_js(EngineError::from(e)))
    }

    pub fn detach(&mut self) {
        self.engine.detach();
    }

    pub fn attach(&mut self) {
        self.engine.attach();
    }

    /// Animation-frame callback with the canvas measured by the host.
    /// Returns `{report, commands}`; apply the commands in order.
    pub fn on_frame(
        &mut self,
        width: f64,
        height: f64,
        left: f64,
        top: f64,
        page: u32,
        total_pages: u32,
    ) -> std::result::Result<String, JsValue> {
        on_frame_json(
            &mut self.engine,
            CanvasBox::new(width, height, left, top),
            page,
            total_pages,
        )
        .map_err(to_js)
    }

    pub fn save_plan(&self, plan_json: &str) -> std::result::Result<f64, JsValue> {
        serde_json::from_str::<PracticePlan>(plan_json)
            .map_err(EngineError::from)
            .and_then(|plan| self.engine.save_plan(&plan))
            .map(|id| id.as_u64() as f64)
            .map_err(to_js)
    }

    /// The plan as JSON, or `null` when it does not exist.
    pub fn get_plan(&self, id: f64) -> std::result::Result<String, JsValue> {
        record_id(id)
            .and_then(|id| self.engine.get_plan(id))
            .and_then(|plan| to_json(&plan))
            .map_err(to_js)
    }

    pub fn list_plans(&self) -> std::result::Result<String, JsValue> {
        self.engine
            .list_plans()
            .and_then(|plans| to_json(&plans))
            .map_err(to_js)
    }

    pub fn delete_plan(&self, id: f64) -> std::result::Result<(), JsValue> {
        record_id(id)
            .and_then(|id| self.engine.delete_plan(id))
            .map_err(to_js)
    }

    pub fn start_session(&mut self, plan_id: f64) -> std::result::Result<String, JsValue> {
        record_id(plan_id)
            .and_then(|id| self.engine.start_session(id))
            .and_then(|snapshot| to_json(&snapshot))
            .map_err(to_js)
    }

    /// Route every fire of a ticker started through `startTicker` here.
    pub fn on_tick(&mut self, handle: f64) {
        match whole_number(handle, "ticker handle") {
            Ok(id) => self.engine.on_tick(TickerHandle::new(id)),
            Err(e) => log::warn!("ignoring tick: {e}"),
        }
    }

    pub fn toggle_pause(&mut self) -> std::result::Result<bool, JsValue> {
        self.engine.toggle_pause().map_err(to_js)
    }

    pub fn advance(&mut self) -> std::result::Result<(), JsValue> {
        self.engine.advance().map_err(to_js)
    }

    /// `choice` is `"repeat"`, `"continue"` or `"end"`; `confidence` 0..=2 or undefined.
    pub fn resolve_section(
        &mut self,
        choice: &str,
        confidence: Option<u8>,
    ) -> std::result::Result<String, JsValue> {
        let resolved = serde_json::from_value::<SectionChoice>(serde_json::Value::from(choice))
            .map_err(EngineError::from)
            .and_then(|choice| {
                let confidence = confidence.map(Confidence::try_from).transpose()?;
                self.engine.resolve_section(choice, confidence)
            });
        resolved.and_then(|snapshot| to_json(&snapshot)).map_err(to_js)
    }

    pub fn set_section_note(&mut self, text: &str) -> std::result::Result<(), JsValue> {
        self.engine.set_section_note(text).map_err(to_js)
    }

    /// Session summary as JSON, or `null` when no session was running.
    pub fn complete_session(&mut self) -> std::result::Result<String, JsValue> {
        self.engine
            .complete_session()
            .and_then(|summary| to_json(&summary))
            .map_err(to_js)
    }

    pub fn exit_session(&mut self) -> std::result::Result<bool, JsValue> {
        self.engine.exit_session().map_err(to_js)
    }

    pub fn snapshot(&self) -> std::result::Result<String, JsValue> {
        to_json(&self.engine.snapshot()).map_err(to_js)
    }

    pub fn is_practicing(&self) -> bool {
        self.engine.is_practicing()
    }

    pub fn on_visibility_change(&mut self, visible: bool) {
        self.engine.on_visibility_change(visible);
    }

    pub fn on_wake_lock_released(&mut self) {
        self.engine.on_wake_lock_released();
    }
}
