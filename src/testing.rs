// Recording fakes for every host collaborator. Each fake is a cheap handle over shared
// state, so a test keeps one clone and gives the other to the engine.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::focus::{FocusPlanner, FocusResult};
use crate::geometry::PercentRect;
use crate::highlight::HighlightElement;
use crate::scheduler::{FrameRequester, HighlightSink, RenderSurface};
use crate::session::{PracticeEnvironment, SessionEvent, SessionEventSink, Viewer, WakeLock};
use crate::storage::{MemoryStorage, Storage, StorageOp, StoreName};
use crate::timer::{Ticker, TickerHandle};
use crate::types::{CanvasBox, CanvasSize, RecordId};

/// In-memory store whose writes can be made to fail with a transient error.
#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: Cell<bool>,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.get() {
            Err(EngineError::Storage("simulated write failure".into()))
        } else {
            Ok(())
        }
    }
}

impl Storage for FlakyStorage {
    fn put(&self, store: StoreName, value: Value) -> Result<RecordId> {
        self.check_write()?;
        self.inner.put(store, value)
    }

    fn get(&self, store: StoreName, id: RecordId) -> Result<Option<Value>> {
        self.inner.get(store, id)
    }

    fn get_all(&self, store: StoreName) -> Result<Vec<Value>> {
        self.inner.get_all(store)
    }

    fn get_by_index(&self, store: StoreName, index: &str, key: &Value) -> Result<Vec<Value>> {
        self.inner.get_by_index(store, index, key)
    }

    fn delete(&self, store: StoreName, id: RecordId) -> Result<()> {
        self.check_write()?;
        self.inner.delete(store, id)
    }

    fn apply_atomic(&self, ops: &[StorageOp]) -> Result<Vec<usize>> {
        self.check_write()?;
        self.inner.apply_atomic(ops)
    }
}

#[derive(Clone, Default)]
pub struct CountingFrames {
    requests: Rc<Cell<usize>>,
}

impl CountingFrames {
    pub fn count(&self) -> usize {
        self.requests.get()
    }
}

impl FrameRequester for CountingFrames {
    fn request_frame(&mut self) {
        self.requests.set(self.requests.get() + 1);
    }
}

pub struct FakeSurface {
    canvas: Option<CanvasBox>,
    page: u32,
    total_pages: u32,
}

impl FakeSurface {
    pub fn new(canvas: CanvasBox, page: u32) -> Self {
        FakeSurface {
            canvas: Some(canvas),
            page,
            total_pages: page.max(4),
        }
    }

    pub fn set_canvas(&mut self, canvas: Option<CanvasBox>) {
        self.canvas = canvas;
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page;
    }
}

impl RenderSurface for FakeSurface {
    fn canvas_box(&self) -> Option<CanvasBox> {
        self.canvas
    }

    fn current_page(&self) -> u32 {
        self.page
    }

    fn total_pages(&self) -> u32 {
        self.total_pages
    }
}

/// Keeps the last element written per highlight, like a DOM node keyed by id.
#[derive(Default)]
pub struct RecordingSink {
    elements: BTreeMap<RecordId, HighlightElement>,
    removed: usize,
}

impl RecordingSink {
    pub fn placed(&self, id: RecordId) -> Option<&HighlightElement> {
        self.elements.get(&id)
    }

    pub fn is_visible(&self, id: RecordId) -> bool {
        self.elements.get(&id).is_some_and(|e| e.visible)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn removed_count(&self) -> usize {
        self.removed
    }
}

impl HighlightSink for RecordingSink {
    fn place(&mut self, element: &HighlightElement) {
        if let Some(id) = element.id {
            self.elements.insert(id, element.clone());
        }
    }

    fn hide(&mut self, id: RecordId) {
        if let Some(element) = self.elements.get_mut(&id) {
            element.visible = false;
        }
    }

    fn remove(&mut self, id: RecordId) {
        if self.elements.remove(&id).is_some() {
            self.removed += 1;
        }
    }
}

#[derive(Default)]
struct ViewerState {
    focused: Vec<PercentRect>,
    zoom: Option<f64>,
}

/// Viewer that plans its zoom with `FocusPlanner` over a fixed page and viewport.
#[derive(Clone, Default)]
pub struct FakeViewer {
    state: Rc<RefCell<ViewerState>>,
}

impl FakeViewer {
    pub fn focused(&self) -> Vec<PercentRect> {
        self.state.borrow().focused.clone()
    }

    pub fn zoom_value(&self) -> f64 {
        self.state.borrow().zoom.unwrap_or(1.0)
    }

    pub fn set_zoom_value(&self, zoom: f64) {
        self.state.borrow_mut().zoom = Some(zoom);
    }
}

impl Viewer for FakeViewer {
    fn focus_on_rect_percent(&mut self, rect: PercentRect) -> FocusResult {
        let planner = FocusPlanner::new(2.0, 0.0);
        let page = CanvasSize::new(800.0, 1000.0);
        let viewport = CanvasSize::new(800.0, 600.0);
        let plan = planner.plan(rect, page, viewport);
        let (_, _, centered) = planner.scroll_for(&plan, page, viewport);

        let mut state = self.state.borrow_mut();
        state.focused.push(rect);
        state.zoom = Some(plan.zoom);
        FocusResult {
            zoom: plan.zoom,
            centered,
        }
    }

    fn zoom(&self) -> f64 {
        self.zoom_value()
    }

    fn set_zoom(&mut self, zoom: f64) {
        self.set_zoom_value(zoom);
    }
}

#[derive(Default)]
struct EnvironmentState {
    setups: usize,
    cleanups: usize,
    refuse: bool,
}

#[derive(Clone, Default)]
pub struct FakeEnvironment {
    state: Rc<RefCell<EnvironmentState>>,
}

impl FakeEnvironment {
    pub fn setups(&self) -> usize {
        self.state.borrow().setups
    }

    pub fn cleanups(&self) -> usize {
        self.state.borrow().cleanups
    }

    pub fn refuse(&self, refuse: bool) {
        self.state.borrow_mut().refuse = refuse;
    }
}

impl PracticeEnvironment for FakeEnvironment {
    fn setup(&mut self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.refuse {
            return false;
        }
        state.setups += 1;
        true
    }

    fn cleanup(&mut self) {
        self.state.borrow_mut().cleanups += 1;
    }
}

#[derive(Default)]
struct WakeLockState {
    requests: usize,
    releases: usize,
    fail: bool,
}

#[derive(Clone, Default)]
pub struct FakeWakeLock {
    state: Rc<RefCell<WakeLockState>>,
}

impl FakeWakeLock {
    pub fn requests(&self) -> usize {
        self.state.borrow().requests
    }

    pub fn releases(&self) -> usize {
        self.state.borrow().releases
    }

    pub fn fail(&self, fail: bool) {
        self.state.borrow_mut().fail = fail;
    }
}

impl WakeLock for FakeWakeLock {
    fn request(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.requests += 1;
        if state.fail {
            Err(EngineError::EnvironmentUnavailable(
                "wake lock not supported".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn release(&mut self) {
        self.state.borrow_mut().releases += 1;
    }
}

#[derive(Default)]
struct TickerState {
    next: u64,
    live: BTreeSet<TickerHandle>,
}

/// Hands out increasing handles. Tests fire ticks by hand with `live()`.
#[derive(Clone, Default)]
pub struct FakeTicker {
    state: Rc<RefCell<TickerState>>,
}

impl FakeTicker {
    /// The single running ticker, if any.
    pub fn live(&self) -> Option<TickerHandle> {
        let state = self.state.borrow();
        assert!(state.live.len() <= 1, "more than one ticker running");
        state.live.iter().next().copied()
    }
}

impl Ticker for FakeTicker {
    fn start(&mut self, _interval_ms: u32) -> TickerHandle {
        let mut state = self.state.borrow_mut();
        state.next += 1;
        let handle = TickerHandle::new(state.next);
        state.live.insert(handle);
        handle
    }

    fn cancel(&mut self, handle: TickerHandle) {
        self.state.borrow_mut().live.remove(&handle);
    }
}

#[derive(Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Host-facing event names, in emission order.
    pub fn names(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .filter_map(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| n.as_str() == name).count()
    }
}

impl SessionEventSink for EventLog {
    fn emit(&mut self, event: &SessionEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
