// Section countdown and the host ticker contract.
// Rule: a tick only counts if it carries the handle of the ticker currently running.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one started ticker. Handles are never reused by a well-behaved host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickerHandle(u64);

impl TickerHandle {
    pub fn new(id: u64) -> Self {
        TickerHandle(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TickerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticker#{}", self.0)
    }
}

/// Cancelable repeating callback (`setInterval` on the web).
///
/// Every fire must be routed back as `on_tick(handle)`. Fires that race a cancel are
/// expected and filtered by the engine.
pub trait Ticker {
    fn start(&mut self, interval_ms: u32) -> TickerHandle;

    fn cancel(&mut self, handle: TickerHandle);
}

/// Whole-second countdown for one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    total_secs: u64,
    remaining_secs: u64,
    paused: bool,
}

impl Countdown {
    pub fn new(total_secs: u64) -> Self {
        Countdown {
            total_secs,
            remaining_secs: total_secs,
            paused: false,
        }
    }

    pub fn total_secs(&self) -> u64 {
        self.total_secs
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.total_secs - self.remaining_secs
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// One second elapsed. Paused or expired countdowns do not move.
    ///
    /// Returns the remaining seconds after the tick.
    pub fn tick(&mut self) -> u64 {
        if !self.paused {
            self.remaining_secs = self.remaining_secs.saturating_sub(1);
        }
        self.remaining_secs
    }

    /// Render for the session chrome.
    pub fn display(&self) -> String {
        format_countdown(self.remaining_secs)
    }
}

/// `MM:SS`, with minutes growing past two digits rather than wrapping into hours.
pub fn format_countdown(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
