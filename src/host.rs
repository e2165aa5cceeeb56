// Collaborators backed by host callbacks.
// The host passes one plain object of functions; every callback is optional and a
// missing one falls back to a no-op. Payloads cross as JSON strings.

use js_sys::{Function, Reflect};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasm_bindgen::{JsCast, JsValue};

use crate::error::{EngineError, Result};
use crate::focus::FocusResult;
use crate::geometry::PercentRect;
use crate::highlight::HighlightElement;
use crate::scheduler::{FrameRequester, HighlightSink, PassReport, RenderSurface};
use crate::session::{PracticeEnvironment, SessionEvent, SessionEventSink, Viewer, WakeLock};
use crate::storage::{MemoryStorage, Storage, StorageOp, StoreName};
use crate::timer::{Ticker, TickerHandle};
use crate::types::{CanvasBox, RecordId};

/// Look up `name` on the callbacks object. Anything that is not a function counts as missing.
fn callback(callbacks: &JsValue, name: &str) -> Option<Function> {
    Reflect::get(callbacks, &JsValue::from_str(name))
        .ok()
        .and_then(|value| value.dyn_into::<Function>().ok())
}

fn report(name: &str, result: std::result::Result<JsValue, JsValue>) -> Option<JsValue> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("host callback {name} threw: {err:?}");
            None
        }
    }
}

/// Host functions the engine may call.
#[derive(Clone, Default)]
pub struct HostCallbacks {
    on_write: Option<Function>,
    request_frame: Option<Function>,
    start_ticker: Option<Function>,
    cancel_ticker: Option<Function>,
    focus_on_rect: Option<Function>,
    get_zoom: Option<Function>,
    set_zoom: Option<Function>,
    setup_environment: Option<Function>,
    cleanup_environment: Option<Function>,
    request_wake_lock: Option<Function>,
    release_wake_lock: Option<Function>,
    emit: Option<Function>,
}

impl HostCallbacks {
    pub fn from_js(callbacks: &JsValue) -> Self {
        if callbacks.is_undefined() || callbacks.is_null() {
            return Self::default();
        }
        HostCallbacks {
            on_write: callback(callbacks, "onWrite"),
            request_frame: callback(callbacks, "requestFrame"),
            start_ticker: callback(callbacks, "startTicker"),
            cancel_ticker: callback(callbacks, "cancelTicker"),
            focus_on_rect: callback(callbacks, "focusOnRect"),
            get_zoom: callback(callbacks, "getZoom"),
            set_zoom: callback(callbacks, "setZoom"),
            setup_environment: callback(callbacks, "setupEnvironment"),
            cleanup_environment: callback(callbacks, "cleanupEnvironment"),
            request_wake_lock: callback(callbacks, "requestWakeLock"),
            release_wake_lock: callback(callbacks, "releaseWakeLock"),
            emit: callback(callbacks, "emit"),
        }
    }
}

/// One committed write, as reported to `onWrite`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum StoreWrite {
    Put { store: StoreName, value: Value },
    Delete { store: StoreName, id: RecordId },
    DeleteByIndex { store: StoreName, index: String, key: Value },
}

/// In-memory store that reports every committed write to the host for persistence.
///
/// Reads never leave wasm. The host seeds the store once from its database and then
/// mirrors the writes it is told about, each call carrying a JSON array of `StoreWrite`.
#[derive(Default)]
pub struct HostStorage {
    inner: MemoryStorage,
    on_write: Option<Function>,
}

impl HostStorage {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        HostStorage {
            inner: MemoryStorage::new(),
            on_write: callbacks.on_write.clone(),
        }
    }

    /// Load records the host already holds. Nothing is reported back.
    pub fn seed(&self, store: StoreName, records_json: &str) -> Result<usize> {
        let records: Vec<Value> = serde_json::from_str(records_json)?;
        let count = records.len();
        for record in records {
            self.inner.put(store, record)?;
        }
        debug!("seeded {count} {} records", store.as_str());
        Ok(count)
    }

    fn notify(&self, writes: &[StoreWrite]) {
        let Some(on_write) = &self.on_write else {
            return;
        };
        match serde_json::to_string(writes) {
            Ok(json) => {
                report("onWrite", on_write.call1(&JsValue::NULL, &JsValue::from_str(&json)));
            }
            Err(e) => warn!("could not encode store writes: {e}"),
        }
    }
}

impl Storage for HostStorage {
    fn put(&self, store: StoreName, value: Value) -> Result<RecordId> {
        let id = self.inner.put(store, value)?;
        if let Some(value) = self.inner.get(store, id)? {
            self.notify(&[StoreWrite::Put { store, value }]);
        }
        Ok(id)
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
        self.inner.delete(store, id)?;
        self.notify(&[StoreWrite::Delete { store, id }]);
        Ok(())
    }

    fn apply_atomic(&self, ops: &[StorageOp]) -> Result<Vec<usize>> {
        let counts = self.inner.apply_atomic(ops)?;
        let writes: Vec<StoreWrite> = ops
            .iter()
            .map(|op| match op {
                StorageOp::Put { store, value } => StoreWrite::Put {
                    store: *store,
                    value: value.clone(),
                },
                StorageOp::Delete { store, id } => StoreWrite::Delete {
                    store: *store,
                    id: *id,
                },
                StorageOp::DeleteByIndex { store, index, key } => StoreWrite::DeleteByIndex {
                    store: *store,
                    index: index.clone(),
                    key: key.clone(),
                },
            })
            .collect();
        self.notify(&writes);
        Ok(counts)
    }
}

/// `requestFrame()`; the host answers with `onFrame` on the next animation frame.
pub struct JsFrames {
    request_frame: Option<Function>,
}

impl JsFrames {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        JsFrames {
            request_frame: callbacks.request_frame.clone(),
        }
    }
}

impl FrameRequester for JsFrames {
    fn request_frame(&mut self) {
        if let Some(f) = &self.request_frame {
            report("requestFrame", f.call0(&JsValue::NULL));
        }
    }
}

/// `startTicker(handle, intervalMs)` and `cancelTicker(handle)`.
///
/// Handles are allocated here, so the host only has to map them to its interval ids.
pub struct JsTicker {
    start: Option<Function>,
    cancel: Option<Function>,
    next: u64,
}

impl JsTicker {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        JsTicker {
            start: callbacks.start_ticker.clone(),
            cancel: callbacks.cancel_ticker.clone(),
            next: 0,
        }
    }
}

impl Ticker for JsTicker {
    fn start(&mut self, interval_ms: u32) -> TickerHandle {
        self.next += 1;
        let id = self.next;
        let handle = TickerHandle::new(id);
        if let Some(f) = &self.start {
            report(
                "startTicker",
                f.call2(
                    &JsValue::NULL,
                    &JsValue::from_f64(id as f64),
                    &JsValue::from_f64(f64::from(interval_ms)),
                ),
            );
        }
        handle
    }

    fn cancel(&mut self, handle: TickerHandle) {
        if let Some(f) = &self.cancel {
            report(
                "cancelTicker",
                f.call1(&JsValue::NULL, &JsValue::from_f64(handle.as_u64() as f64)),
            );
        }
    }
}

/// `focusOnRect(rectJson) -> resultJson`, `getZoom() -> number`, `setZoom(number)`.
pub struct JsViewer {
    focus_on_rect: Option<Function>,
    get_zoom: Option<Function>,
    set_zoom: Option<Function>,
}

impl JsViewer {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        JsViewer {
            focus_on_rect: callbacks.focus_on_rect.clone(),
            get_zoom: callbacks.get_zoom.clone(),
            set_zoom: callbacks.set_zoom.clone(),
        }
    }
}

impl Viewer for JsViewer {
    fn focus_on_rect_percent(&mut self, rect: PercentRect) -> FocusResult {
        let unfocused = FocusResult {
            zoom: self.zoom(),
            centered: false,
        };
        let Some(f) = &self.focus_on_rect else {
            return unfocused;
        };
        let Ok(json) = serde_json::to_string(&rect) else {
            return unfocused;
        };
        report("focusOnRect", f.call1(&JsValue::NULL, &JsValue::from_str(&json)))
            .and_then(|value| value.as_string())
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or(unfocused)
    }

    fn zoom(&self) -> f64 {
        self.get_zoom
            .as_ref()
            .and_then(|f| report("getZoom", f.call0(&JsValue::NULL)))
            .and_then(|value| value.as_f64())
            .filter(|zoom| zoom.is_finite() && *zoom > 0.0)
            .unwrap_or(1.0)
    }

    fn set_zoom(&mut self, zoom: f64) {
        if let Some(f) = &self.set_zoom {
            report("setZoom", f.call1(&JsValue::NULL, &JsValue::from_f64(zoom)));
        }
    }
}

/// `setupEnvironment() -> bool` and `cleanupEnvironment()`.
pub struct JsEnvironment {
    setup: Option<Function>,
    cleanup: Option<Function>,
}

impl JsEnvironment {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        JsEnvironment {
            setup: callbacks.setup_environment.clone(),
            cleanup: callbacks.cleanup_environment.clone(),
        }
    }
}

impl PracticeEnvironment for JsEnvironment {
    fn setup(&mut self) -> bool {
        match &self.setup {
            // Anything but an explicit `false` counts as entered.
            Some(f) => report("setupEnvironment", f.call0(&JsValue::NULL))
                .is_some_and(|value| value.as_bool() != Some(false)),
            None => true,
        }
    }

    fn cleanup(&mut self) {
        if let Some(f) = &self.cleanup {
            report("cleanupEnvironment", f.call0(&JsValue::NULL));
        }
    }
}

/// `requestWakeLock() -> bool` and `releaseWakeLock()`.
pub struct JsWakeLock {
    request: Option<Function>,
    release: Option<Function>,
}

impl JsWakeLock {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        JsWakeLock {
            request: callbacks.request_wake_lock.clone(),
            release: callbacks.release_wake_lock.clone(),
        }
    }
}

impl WakeLock for JsWakeLock {
    fn request(&mut self) -> Result<()> {
        let Some(f) = &self.request else {
            return Err(EngineError::EnvironmentUnavailable(
                "host has no wake lock".into(),
            ));
        };
        match report("requestWakeLock", f.call0(&JsValue::NULL)).and_then(|v| v.as_bool()) {
            Some(true) => Ok(()),
            _ => Err(EngineError::EnvironmentUnavailable(
                "wake lock request was refused".into(),
            )),
        }
    }

    fn release(&mut self) {
        if let Some(f) = &self.release {
            report("releaseWakeLock", f.call0(&JsValue::NULL));
        }
    }
}

/// `emit(eventJson)`. The event's `type` is the DOM event name.
pub struct JsEvents {
    emit: Option<Function>,
}

impl JsEvents {
    pub fn new(callbacks: &HostCallbacks) -> Self {
        JsEvents {
            emit: callbacks.emit.clone(),
        }
    }
}

impl SessionEventSink for JsEvents {
    fn emit(&mut self, event: &SessionEvent) {
        let Some(f) = &self.emit else {
            return;
        };
        match serde_json::to_string(event) {
            Ok(json) => {
                report("emit", f.call1(&JsValue::NULL, &JsValue::from_str(&json)));
            }
            Err(e) => warn!("could not encode session event: {e}"),
        }
    }
}

/// Render surface as measured by the host for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostSurface {
    pub canvas: Option<CanvasBox>,
    pub page: u32,
    pub total_pages: u32,
}

impl RenderSurface for HostSurface {
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

/// One write to the highlight nodes, applied by the host in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum SinkCommand {
    Place { element: HighlightElement },
    Hide { id: RecordId },
    Remove { id: RecordId },
}

/// Collects a frame's node writes so they cross the boundary in one call.
#[derive(Debug, Default)]
pub struct SinkBatch {
    commands: Vec<SinkCommand>,
}

impl SinkBatch {
    pub fn into_commands(self) -> Vec<SinkCommand> {
        self.commands
    }
}

impl HighlightSink for SinkBatch {
    fn place(&mut self, element: &HighlightElement) {
        self.commands.push(SinkCommand::Place {
            element: element.clone(),
        });
    }

    fn hide(&mut self, id: RecordId) {
        self.commands.push(SinkCommand::Hide { id });
    }

    fn remove(&mut self, id: RecordId) {
        self.commands.push(SinkCommand::Remove { id });
    }
}

/// Answer to `onFrame`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameOutput {
    pub report: PassReport,
    pub commands: Vec<SinkCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PixelRect;

    #[test]
    fn seeded_records_keep_their_ids() {
        let storage = HostStorage::default();
        let seeded = storage
            .seed(
                StoreName::Highlights,
                r#"[{"id":7,"documentId":"a","xPct":0,"yPct":0,"wPct":0.1,"hPct":0.1,"color":"red"}]"#,
            )
            .unwrap();
        assert_eq!(seeded, 1);
        assert!(storage.get(StoreName::Highlights, RecordId::new(7)).unwrap().is_some());

        let next = storage
            .put(StoreName::Highlights, serde_json::json!({"documentId": "a"}))
            .unwrap();
        assert_eq!(next, RecordId::new(8));
    }

    #[test]
    fn seeding_needs_a_json_array() {
        let storage = HostStorage::default();
        assert!(matches!(
            storage.seed(StoreName::PracticePlans, r#"{"id":1}"#),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn batch_keeps_command_order() {
        let mut batch = SinkBatch::default();
        batch.remove(RecordId::new(3));
        batch.place(&HighlightElement {
            id: Some(RecordId::new(1)),
            page: 1,
            rect: PixelRect::new(1.0, 2.0, 3.0, 4.0),
            color: "amber".into(),
            visible: true,
        });
        batch.hide(RecordId::new(2));

        let json = serde_json::to_value(FrameOutput {
            report: PassReport::Applied {
                placed: 1,
                hidden: 1,
            },
            commands: batch.into_commands(),
        })
        .unwrap();
        assert_eq!(json["report"]["kind"], "applied");
        assert_eq!(json["commands"][0]["cmd"], "remove");
        assert_eq!(json["commands"][1]["element"]["color"], "amber");
        assert_eq!(json["commands"][2], serde_json::json!({"cmd": "hide", "id": 2}));
    }

    #[test]
    fn store_writes_name_the_store() {
        let write = StoreWrite::DeleteByIndex {
            store: StoreName::PracticePlanHighlights,
            index: "planId".into(),
            key: Value::from(4),
        };
        let json = serde_json::to_value(&write).unwrap();
        assert_eq!(json["op"], "deleteByIndex");
        assert_eq!(json["store"], "practicePlanHighlights");
    }
}
