// One engine per viewer: highlight layer, drag selection, frame scheduling and the
// practice session wired over a single repository.
// Rule: drawing is disabled for as long as a practice session is active.

use std::rc::Rc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::gesture::{GestureOutcome, SelectionGestureController};
use crate::highlight::{HighlightPatch, HighlightRecord};
use crate::layer::{HighlightLayer, ScoreSelection};
use crate::plan::PracticePlan;
use crate::repository::{sorted_for_display, BatchDeleteResult, BatchOperation, HighlightRepository};
use crate::scheduler::{
    FrameRequester, HighlightSink, PassReport, ReconcileSignal, ReconciliationScheduler, RenderSurface,
};
use crate::session::{
    PracticeEnvironment, PracticeSessionEngine, SectionChoice, SessionCollaborators,
    SessionEventSink, SessionPhase, SessionSnapshot, SessionSummary, Viewer, WakeLock,
};
use crate::storage::Storage;
use crate::timer::{Ticker, TickerHandle};
use crate::types::{CanvasSize, Confidence, DocumentId, EngineConfig, Point, RecordId};

/// Everything the host provides to a `ScoreEngine`.
pub struct EngineCollaborators {
    pub storage: Rc<dyn Storage>,
    pub clock: Rc<dyn Clock>,
    pub frames: Box<dyn FrameRequester>,
    pub environment: Box<dyn PracticeEnvironment>,
    pub viewer: Box<dyn Viewer>,
    pub wake_lock: Box<dyn WakeLock>,
    pub ticker: Box<dyn Ticker>,
    pub events: Box<dyn SessionEventSink>,
}

/// Result of a pointer event that can finish a drag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub outcome: GestureOutcome,
    /// Id of the highlight saved from a committed drag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_id: Option<RecordId>,
}

pub struct ScoreEngine {
    config: EngineConfig,
    clock: Rc<dyn Clock>,
    repository: HighlightRepository,
    layer: HighlightLayer,
    selection: ScoreSelection,
    scheduler: ReconciliationScheduler,
    session: PracticeSessionEngine,
    gesture: SelectionGestureController,
    /// Nodes to drop on the next frame.
    pending_removals: Vec<RecordId>,
}

impl ScoreEngine {
    pub fn new(config: EngineConfig, collaborators: EngineCollaborators) -> Result<Self> {
        config.validate()?;
        let EngineCollaborators {
            storage,
            clock,
            frames,
            environment,
            viewer,
            wake_lock,
            ticker,
            events,
        } = collaborators;

        let repository = HighlightRepository::new(storage, clock.clone());
        let session = PracticeSessionEngine::new(
            SessionCollaborators {
                repository: repository.clone(),
                environment,
                viewer,
                wake_lock,
                ticker,
                clock: clock.clone(),
                events,
            },
            config.tick_interval_ms,
        );

        Ok(ScoreEngine {
            selection: ScoreSelection::new(config.score_reselect_window_ms),
            gesture: SelectionGestureController::new(config.min_selection_px),
            scheduler: ReconciliationScheduler::new(frames),
            layer: HighlightLayer::new(),
            pending_removals: Vec::new(),
            config,
            clock,
            repository,
            session,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &HighlightRepository {
        &self.repository
    }

    pub fn layer(&self) -> &HighlightLayer {
        &self.layer
    }

    pub fn gesture(&self) -> &SelectionGestureController {
        &self.gesture
    }

    pub fn document_id(&self) -> Option<&DocumentId> {
        self.layer.document_id()
    }

    /// Highlights of the selected score in display order.
    pub fn highlights(&self) -> Vec<HighlightRecord> {
        sorted_for_display(self.layer.records().cloned().collect())
    }

    /// Handle `score-selected`. Nodes of the previous score are removed on the next frame.
    pub fn select_score(&mut self, document_id: &DocumentId) -> Result<bool> {
        let previous: Vec<RecordId> = self.layer.records().filter_map(|r| r.id).collect();
        let loaded = self.layer.select_score(
            &self.repository,
            &mut self.selection,
            document_id,
            self.clock.now_ms(),
        )?;
        if !loaded {
            return Ok(false);
        }
        self.pending_removals
            .extend(previous.into_iter().filter(|id| self.layer.get(*id).is_none()));
        self.scheduler
            .signal(ReconcileSignal::ScoreSelected, &mut self.layer);
        Ok(true)
    }

    pub fn set_canvas(&mut self, canvas: CanvasSize) {
        self.gesture.set_canvas(canvas);
    }

    pub fn arm_color(&mut self, color: &str) -> Result<Confidence> {
        self.gesture.arm_color(color)
    }

    pub fn arm(&mut self, confidence: Confidence) {
        self.gesture.arm(confidence);
    }

    pub fn disarm(&mut self) {
        self.gesture.disarm();
    }

    pub fn pointer_down(&mut self, point: Point) -> GestureOutcome {
        self.gesture.pointer_down(point)
    }

    pub fn pointer_move(&mut self, point: Point) -> GestureOutcome {
        self.gesture.pointer_move(point)
    }

    /// Finish a drag. A committed drag is saved on the current page and shown.
    pub fn pointer_up(&mut self, point: Point) -> Result<SelectionResult> {
        let outcome = self.gesture.pointer_up(point);
        self.commit(outcome)
    }

    pub fn pointer_leave(&mut self) -> Result<SelectionResult> {
        let outcome = self.gesture.pointer_leave();
        self.commit(outcome)
    }

    pub fn cancel_selection(&mut self) {
        self.gesture.cancel();
    }

    fn commit(&mut self, outcome: GestureOutcome) -> Result<SelectionResult> {
        let GestureOutcome::Committed { rect, confidence } = outcome else {
            return Ok(SelectionResult {
                outcome,
                highlight_id: None,
            });
        };
        let highlight_id = self.layer.add_from_selection(
            &self.repository,
            rect,
            self.gesture.canvas(),
            confidence,
        )?;
        if let Some(id) = highlight_id {
            debug!("saved drawn highlight {id}");
            self.scheduler
                .signal(ReconcileSignal::LayoutChanged, &mut self.layer);
        }
        Ok(SelectionResult {
            outcome,
            highlight_id,
        })
    }

    /// Highlight under a canvas point on the displayed page.
    pub fn hit_test(&self, point: Point) -> Option<RecordId> {
        self.layer.hit_test(point, self.gesture.canvas())
    }

    pub fn update_highlight(&mut self, id: RecordId, patch: &HighlightPatch) -> Result<HighlightRecord> {
        let updated = self.layer.update(&self.repository, id, patch)?;
        self.scheduler
            .signal(ReconcileSignal::LayoutChanged, &mut self.layer);
        Ok(updated)
    }

    pub fn delete_highlight(&mut self, id: RecordId) -> Result<()> {
        self.layer.delete(&self.repository, id)?;
        self.pending_removals.push(id);
        self.scheduler
            .signal(ReconcileSignal::LayoutChanged, &mut self.layer);
        Ok(())
    }

    /// Atomic batch delete. Deleted highlights leave the layer only after the batch commits.
    pub fn delete_many(&mut self, operations: &[BatchOperation]) -> Result<BatchDeleteResult> {
        let result = self.repository.delete_many(operations)?;
        for operation in operations {
            if let BatchOperation::DeleteHighlight { id } = operation {
                self.layer.remove(*id);
                self.pending_removals.push(*id);
            }
        }
        self.scheduler
            .signal(ReconcileSignal::LayoutChanged, &mut self.layer);
        Ok(result)
    }

    pub fn signal(&mut self, signal: ReconcileSignal) {
        self.scheduler.signal(signal, &mut self.layer);
    }

    pub fn detach(&mut self) {
        self.scheduler.detach();
    }

    pub fn attach(&mut self) {
        self.scheduler.attach();
    }

    pub fn is_frame_pending(&self) -> bool {
        self.scheduler.is_pending()
    }

    /// Animation-frame callback. Queued removals are flushed first.
    pub fn on_frame(&mut self, surface: &dyn RenderSurface, sink: &mut dyn HighlightSink) -> PassReport {
        for id in self.pending_removals.drain(..) {
            sink.remove(id);
        }
        self.scheduler.on_frame(&self.layer, surface, sink)
    }

    pub fn save_plan(&self, plan: &PracticePlan) -> Result<RecordId> {
        self.repository.save_plan(plan)
    }

    pub fn get_plan(&self, id: RecordId) -> Result<Option<PracticePlan>> {
        self.repository.get_plan(id)
    }

    /// Plans of the selected score.
    pub fn list_plans(&self) -> Result<Vec<PracticePlan>> {
        match self.layer.document_id() {
            Some(document_id) => self.repository.list_plans_by_score(document_id),
            None => Ok(Vec::new()),
        }
    }

    pub fn delete_plan(&self, id: RecordId) -> Result<()> {
        self.repository.delete_plan(id)
    }

    /// Start practicing a plan of the selected score.
    pub fn start_session(&mut self, plan_id: RecordId) -> Result<SessionSnapshot> {
        let document_id = self
            .layer
            .document_id()
            .cloned()
            .ok_or_else(|| EngineError::InvalidState("no score selected".into()))?;
        let snapshot = self.with_session(|s| s.start_from_plan(plan_id, &document_id))?;
        info!("practice started on {document_id}; drawing disabled");
        Ok(snapshot)
    }

    pub fn session_phase(&self) -> SessionPhase {
        self.session.phase()
    }

    pub fn is_practicing(&self) -> bool {
        self.session.is_active()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn on_tick(&mut self, handle: TickerHandle) {
        self.with_session(|s| s.on_tick(handle));
    }

    pub fn toggle_pause(&mut self) -> Result<bool> {
        self.with_session(PracticeSessionEngine::toggle_pause)
    }

    pub fn advance(&mut self) -> Result<()> {
        self.with_session(PracticeSessionEngine::advance)
    }

    pub fn resolve_section(
        &mut self,
        choice: SectionChoice,
        confidence: Option<Confidence>,
    ) -> Result<SessionSnapshot> {
        let snapshot = self.with_session(|s| s.resolve_section(choice, confidence))?;
        // The rating may have changed the color of a visible highlight.
        self.refresh_from_storage();
        Ok(snapshot)
    }

    pub fn set_section_note(&mut self, text: &str) -> Result<()> {
        self.session.set_section_note(text)
    }

    pub fn complete_session(&mut self) -> Result<Option<SessionSummary>> {
        self.with_session(PracticeSessionEngine::complete)
    }

    pub fn exit_session(&mut self) -> Result<bool> {
        self.with_session(PracticeSessionEngine::exit)
    }

    pub fn on_visibility_change(&mut self, visible: bool) {
        self.with_session(|s| s.on_visibility_change(visible));
    }

    pub fn on_wake_lock_released(&mut self) {
        self.with_session(PracticeSessionEngine::on_wake_lock_released);
    }

    fn with_session<T>(&mut self, f: impl FnOnce(&mut PracticeSessionEngine) -> T) -> T {
        let out = f(&mut self.session);
        self.gesture.set_enabled(!self.session.is_active());
        out
    }

    /// Reload the layer's records without the reselect debounce.
    fn refresh_from_storage(&mut self) {
        let Some(document_id) = self.layer.document_id().cloned() else {
            return;
        };
        match self.repository.list_by_document(&document_id) {
            Ok(records) => {
                let page = self.layer.current_page();
                self.layer.load(document_id, records);
                self.layer.set_current_page(page);
                self.scheduler
                    .signal(ReconcileSignal::LayoutChanged, &mut self.layer);
            }
            Err(e) => warn!("could not refresh highlights of {document_id}: {e}"),
        }
    }
}
