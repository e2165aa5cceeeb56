// Timed practice sessions driven by a practice plan.
// Idle -> SectionActive <-> SectionComplete -> Idle, with exit reachable from any active phase.
// Rule: the ticker handle is dropped before any teardown work, so a late tick finds nothing to do.

use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::focus::FocusResult;
use crate::geometry::PercentRect;
use crate::highlight::HighlightPatch;
use crate::plan::PracticePlan;
use crate::repository::HighlightRepository;
use crate::timer::{format_countdown, Countdown, Ticker, TickerHandle};
use crate::types::{Confidence, DocumentId, RecordId};

/// Score viewer, as far as a practice session drives it.
pub trait Viewer {
    /// Zoom and scroll so the section fills the view.
    fn focus_on_rect_percent(&mut self, rect: PercentRect) -> FocusResult;

    fn zoom(&self) -> f64;

    fn set_zoom(&mut self, zoom: f64);
}

/// Practice-mode chrome: hides editing tools, shows the session overlay.
pub trait PracticeEnvironment {
    /// False when the environment cannot be entered (e.g. viewer not mounted).
    fn setup(&mut self) -> bool;

    fn cleanup(&mut self);
}

/// Screen wake lock. Unsupported or denied requests are not fatal.
pub trait WakeLock {
    fn request(&mut self) -> Result<()>;

    fn release(&mut self);
}

pub trait SessionEventSink {
    fn emit(&mut self, event: &SessionEvent);
}

/// Events published to the host, named after the DOM events the UI listens for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "practice-session-configured", rename_all = "camelCase")]
    SessionConfigured {
        plan_id: RecordId,
        score_id: DocumentId,
        name: String,
        section_count: usize,
        start_time: u64,
    },
    #[serde(rename = "practice-section-started", rename_all = "camelCase")]
    SectionStarted {
        index: usize,
        highlight_id: RecordId,
        practice_method: String,
        target_secs: u64,
        repeat: bool,
    },
    #[serde(rename = "practice-timer-tick", rename_all = "camelCase")]
    TimerTick {
        index: usize,
        remaining_secs: u64,
        display: String,
    },
    #[serde(rename = "practice-section-complete", rename_all = "camelCase")]
    SectionComplete {
        index: usize,
        highlight_id: RecordId,
        default_confidence: Confidence,
        is_last: bool,
    },
    #[serde(rename = "practice-session-complete")]
    SessionComplete(SessionSummary),
    #[serde(rename = "practice-session-exit", rename_all = "camelCase")]
    SessionExit {
        plan_id: RecordId,
        index: usize,
        duration_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub plan_id: RecordId,
    pub duration_ms: u64,
    pub sections_completed: usize,
    pub section_notes: BTreeMap<usize, String>,
}

/// User's decision after a section's countdown ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionChoice {
    Repeat,
    Continue,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Idle,
    /// Only observable while `start_from_plan` runs.
    Starting,
    SectionActive,
    SectionComplete {
        #[serde(rename = "defaultConfidence")]
        default_confidence: Confidence,
    },
    /// Only observable while teardown runs.
    Exiting,
}

/// Read-only view for UI chrome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub phase: SessionPhase,
    pub plan_id: Option<RecordId>,
    pub index: usize,
    pub section_count: usize,
    pub remaining_secs: u64,
    pub countdown: String,
    pub paused: bool,
}

/// Everything the engine talks to, injected once.
pub struct SessionCollaborators {
    pub repository: HighlightRepository,
    pub environment: Box<dyn PracticeEnvironment>,
    pub viewer: Box<dyn Viewer>,
    pub wake_lock: Box<dyn WakeLock>,
    pub ticker: Box<dyn Ticker>,
    pub clock: Rc<dyn Clock>,
    pub events: Box<dyn SessionEventSink>,
}

struct ActiveSession {
    plan_id: RecordId,
    plan: PracticePlan,
    index: usize,
    start_ms: u64,
    section_notes: BTreeMap<usize, String>,
    countdown: Countdown,
    ticker: Option<TickerHandle>,
    wake_lock_held: bool,
    sections_completed: usize,
    zoom_before: f64,
}

impl ActiveSession {
    fn current_highlight(&self) -> Option<RecordId> {
        self.plan.sections.get(self.index).map(|s| s.highlight_id)
    }

    fn is_last_section(&self) -> bool {
        self.index + 1 >= self.plan.sections.len()
    }
}

pub struct PracticeSessionEngine {
    repository: HighlightRepository,
    environment: Box<dyn PracticeEnvironment>,
    viewer: Box<dyn Viewer>,
    wake_lock: Box<dyn WakeLock>,
    ticker: Box<dyn Ticker>,
    clock: Rc<dyn Clock>,
    events: Box<dyn SessionEventSink>,
    tick_interval_ms: u32,
    phase: SessionPhase,
    session: Option<ActiveSession>,
    page_visible: bool,
}

impl PracticeSessionEngine {
    pub fn new(collaborators: SessionCollaborators, tick_interval_ms: u32) -> Self {
        let SessionCollaborators {
            repository,
            environment,
            viewer,
            wake_lock,
            ticker,
            clock,
            events,
        } = collaborators;
        PracticeSessionEngine {
            repository,
            environment,
            viewer,
            wake_lock,
            ticker,
            clock,
            events,
            tick_interval_ms: tick_interval_ms.max(1),
            phase: SessionPhase::Idle,
            session: None,
            page_visible: true,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.index)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match &self.session {
            Some(session) => SessionSnapshot {
                phase: self.phase,
                plan_id: Some(session.plan_id),
                index: session.index,
                section_count: session.plan.sections.len(),
                remaining_secs: session.countdown.remaining_secs(),
                countdown: session.countdown.display(),
                paused: session.countdown.is_paused(),
            },
            None => SessionSnapshot {
                phase: self.phase,
                plan_id: None,
                index: 0,
                section_count: 0,
                remaining_secs: 0,
                countdown: format_countdown(0),
                paused: false,
            },
        }
    }

    /// Load a stored plan and start its first section.
    pub fn start_from_plan(&mut self, plan_id: RecordId, score_id: &DocumentId) -> Result<SessionSnapshot> {
        if self.session.is_some() {
            return Err(EngineError::InvalidState(
                "a practice session is already running".into(),
            ));
        }

        let plan = self
            .repository
            .get_plan(plan_id)?
            .ok_or_else(|| EngineError::not_found("practice plan", plan_id))?;
        if &plan.score_id != score_id {
            return Err(EngineError::Validation(format!(
                "practice plan {plan_id} belongs to score {}, not {score_id}",
                plan.score_id
            )));
        }
        plan.ensure_playable()?;

        self.phase = SessionPhase::Starting;
        if !self.environment.setup() {
            self.phase = SessionPhase::Idle;
            return Err(EngineError::EnvironmentUnavailable(
                "practice environment could not be set up".into(),
            ));
        }

        let wake_lock_held = self.acquire_wake_lock();
        let start_ms = self.clock.now_ms();
        let zoom_before = self.viewer.zoom();
        let section_count = plan.sections.len();
        let name = plan.name.clone();

        self.session = Some(ActiveSession {
            plan_id,
            plan,
            index: 0,
            start_ms,
            section_notes: BTreeMap::new(),
            countdown: Countdown::new(0),
            ticker: None,
            wake_lock_held,
            sections_completed: 0,
            zoom_before,
        });
        info!("practice session started: plan {plan_id}, {section_count} sections");
        self.events.emit(&SessionEvent::SessionConfigured {
            plan_id,
            score_id: score_id.clone(),
            name,
            section_count,
            start_time: start_ms,
        });

        self.begin_section(false);
        Ok(self.snapshot())
    }

    /// One interval elapsed on the ticker identified by `handle`.
    ///
    /// Stale handles, paused countdowns and ticks outside an active section do nothing.
    pub fn on_tick(&mut self, handle: TickerHandle) {
        if self.phase != SessionPhase::SectionActive {
            trace!("tick from {handle} outside an active section");
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.ticker != Some(handle) {
            trace!("ignoring stale tick from {handle}");
            return;
        }
        if session.countdown.is_paused() {
            return;
        }

        let remaining_secs = session.countdown.tick();
        let event = SessionEvent::TimerTick {
            index: session.index,
            remaining_secs,
            display: session.countdown.display(),
        };
        self.events.emit(&event);
        if remaining_secs == 0 {
            self.finish_section();
        }
    }

    /// Returns the paused state after toggling.
    pub fn toggle_pause(&mut self) -> Result<bool> {
        let paused = self
            .session
            .as_ref()
            .map(|s| s.countdown.is_paused())
            .ok_or_else(no_session)?;
        if paused {
            self.resume()?;
        } else {
            self.pause()?;
        }
        Ok(!paused)
    }

    pub fn pause(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        if self.phase != SessionPhase::SectionActive || session.countdown.is_paused() {
            return Ok(());
        }
        session.countdown.set_paused(true);
        if let Some(handle) = session.ticker.take() {
            self.ticker.cancel(handle);
        }
        debug!("session paused at {}", session.countdown.display());
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        if self.phase != SessionPhase::SectionActive || !session.countdown.is_paused() {
            return Ok(());
        }
        session.countdown.set_paused(false);
        session.ticker = Some(self.ticker.start(self.tick_interval_ms));
        debug!("session resumed at {}", session.countdown.display());
        Ok(())
    }

    /// Finish the current section now, as if its countdown had run out.
    pub fn advance(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Err(no_session());
        }
        if self.phase != SessionPhase::SectionActive {
            return Err(EngineError::InvalidState(
                "no section is running".into(),
            ));
        }
        self.finish_section();
        Ok(())
    }

    /// Act on the user's choice at the end of a section.
    ///
    /// The confidence (or the highlight's current one) is saved before moving on. A failed
    /// save is logged and the session proceeds anyway.
    pub fn resolve_section(
        &mut self,
        choice: SectionChoice,
        confidence: Option<Confidence>,
    ) -> Result<SessionSnapshot> {
        let SessionPhase::SectionComplete { default_confidence } = self.phase else {
            return Err(EngineError::InvalidState(
                "no section is waiting for a decision".into(),
            ));
        };
        let highlight_id = self
            .session
            .as_ref()
            .and_then(ActiveSession::current_highlight)
            .ok_or_else(no_session)?;

        let chosen = confidence.unwrap_or(default_confidence);
        match self
            .repository
            .update(highlight_id, &HighlightPatch::confidence(chosen))
        {
            Ok(_) => debug!("highlight {highlight_id} rated {chosen}"),
            // A rating that cannot be saved never holds up the session.
            Err(e) => warn!("could not save confidence for highlight {highlight_id}: {e}"),
        }

        match choice {
            SectionChoice::Repeat => self.begin_section(true),
            SectionChoice::Continue => {
                let next = self.session.as_mut().and_then(|session| {
                    if session.is_last_section() {
                        None
                    } else {
                        session.index += 1;
                        Some(session.index)
                    }
                });
                match next {
                    Some(_) => self.begin_section(false),
                    None => {
                        self.complete()?;
                    }
                }
            }
            SectionChoice::End => {
                self.complete()?;
            }
        }
        Ok(self.snapshot())
    }

    /// Record a note against the current section. Blank text removes it.
    pub fn set_section_note(&mut self, text: &str) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        if text.trim().is_empty() {
            session.section_notes.remove(&session.index);
        } else {
            session.section_notes.insert(session.index, text.to_string());
        }
        Ok(())
    }

    /// Finish the session normally. A second call finds nothing to do and returns `None`.
    pub fn complete(&mut self) -> Result<Option<SessionSummary>> {
        let Some(session) = self.teardown() else {
            return Ok(None);
        };
        let summary = SessionSummary {
            plan_id: session.plan_id,
            duration_ms: self.clock.now_ms().saturating_sub(session.start_ms),
            sections_completed: session.sections_completed,
            section_notes: session.section_notes,
        };
        info!(
            "practice session complete: {} sections in {}ms",
            summary.sections_completed, summary.duration_ms
        );
        self.events.emit(&SessionEvent::SessionComplete(summary.clone()));
        Ok(Some(summary))
    }

    /// Leave the session from any phase. Returns whether there was anything to leave.
    pub fn exit(&mut self) -> Result<bool> {
        let Some(session) = self.teardown() else {
            return Ok(false);
        };
        let duration_ms = self.clock.now_ms().saturating_sub(session.start_ms);
        info!("practice session exited at section {}", session.index);
        self.events.emit(&SessionEvent::SessionExit {
            plan_id: session.plan_id,
            index: session.index,
            duration_ms,
        });
        Ok(true)
    }

    /// Page visibility changed. Coming back to the foreground re-acquires a lost wake lock.
    pub fn on_visibility_change(&mut self, visible: bool) {
        self.page_visible = visible;
        if visible {
            self.reacquire_wake_lock();
        }
    }

    /// The platform dropped the wake lock (tab hidden, battery saver, ...).
    pub fn on_wake_lock_released(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.wake_lock_held = false;
        }
        if self.page_visible {
            self.reacquire_wake_lock();
        }
    }

    fn reacquire_wake_lock(&mut self) {
        let needs_lock = self.session.as_ref().is_some_and(|s| !s.wake_lock_held);
        if !needs_lock {
            return;
        }
        let held = self.acquire_wake_lock();
        if let Some(session) = self.session.as_mut() {
            session.wake_lock_held = held;
        }
    }

    fn acquire_wake_lock(&mut self) -> bool {
        match self.wake_lock.request() {
            Ok(()) => true,
            Err(e) => {
                warn!("wake lock unavailable: {e}");
                false
            }
        }
    }

    /// Start the countdown for the current section. Repeats keep the current view.
    fn begin_section(&mut self, repeat: bool) {
        let interval = self.tick_interval_ms;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(section) = session.plan.sections.get(session.index) else {
            return;
        };
        let target_secs = section.target_secs();
        let highlight_id = section.highlight_id;
        let practice_method = section.practice_method.clone();

        if let Some(stale) = session.ticker.take() {
            self.ticker.cancel(stale);
        }
        session.countdown = Countdown::new(target_secs);
        session.ticker = Some(self.ticker.start(interval));
        let index = session.index;
        self.phase = SessionPhase::SectionActive;

        if !repeat {
            self.focus_highlight(highlight_id);
        }
        self.events.emit(&SessionEvent::SectionStarted {
            index,
            highlight_id,
            practice_method,
            target_secs,
            repeat,
        });
    }

    fn focus_highlight(&mut self, highlight_id: RecordId) {
        match self.repository.get(highlight_id) {
            Ok(Some(highlight)) => {
                let result = self.viewer.focus_on_rect_percent(highlight.rect);
                debug!(
                    "focused highlight {highlight_id} at zoom {:.2} (centered: {})",
                    result.zoom, result.centered
                );
            }
            Ok(None) => warn!("highlight {highlight_id} no longer exists; not focusing"),
            Err(e) => warn!("could not load highlight {highlight_id}: {e}"),
        }
    }

    fn finish_section(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(handle) = session.ticker.take() {
            self.ticker.cancel(handle);
        }
        session.sections_completed += 1;
        let index = session.index;
        let is_last = session.is_last_section();
        let Some(highlight_id) = session.current_highlight() else {
            warn!("section {index} is not in the plan; ending the session");
            if let Err(e) = self.complete() {
                warn!("could not complete practice session: {e}");
            }
            return;
        };

        let default_confidence = match self.repository.get(highlight_id) {
            Ok(Some(highlight)) => highlight.confidence,
            Ok(None) => Confidence::Amber,
            Err(e) => {
                warn!("could not read confidence of highlight {highlight_id}: {e}");
                Confidence::Amber
            }
        };
        self.phase = SessionPhase::SectionComplete { default_confidence };
        self.events.emit(&SessionEvent::SectionComplete {
            index,
            highlight_id,
            default_confidence,
            is_last,
        });
    }

    /// Release everything the session holds. Returns the session only the first time.
    fn teardown(&mut self) -> Option<ActiveSession> {
        let mut session = self.session.take()?;
        self.phase = SessionPhase::Exiting;
        if let Some(handle) = session.ticker.take() {
            self.ticker.cancel(handle);
        }
        if session.wake_lock_held {
            self.wake_lock.release();
            session.wake_lock_held = false;
        }
        self.environment.cleanup();
        self.viewer.set_zoom(session.zoom_before);
        self.phase = SessionPhase::Idle;
        Some(session)
    }
}

fn no_session() -> EngineError {
    EngineError::InvalidState("no practice session is running".into())
}
