//! Per-session attention state.
//!
//! One `SessionState` per conversation channel, created lazily and never
//! persisted. All fields are guarded by the entry's mutex; the scheduler is
//! the only writer.

use std::collections::HashSet;
use std::time::Duration;

use suzu_core::InboundMessage;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Idle,
    Debouncing,
    Deciding,
    Focused,
}

pub struct SessionState {
    pub is_group: bool,
    pub mode: SessionMode,
    /// Messages awaiting a decision, in arrival order.
    pub pending: Vec<InboundMessage>,
    /// Guards against a concurrent second decision for the same burst.
    pub deciding: bool,
    seen: HashSet<String>,
    pub passive_count: u32,
    /// Consecutive focus-loop failures; reset on any successful decision.
    pub micro_failures: u32,
    pub last_interaction: Option<Instant>,
    pub last_macro_eval: Instant,
    /// Most recent decision result, read-only diagnostics.
    pub last_decision: Option<serde_json::Value>,
    pub debounce: Option<JoinHandle<()>>,
    pub focus: Option<JoinHandle<()>>,
}

impl SessionState {
    pub fn new(is_group: bool) -> Self {
        Self {
            is_group,
            mode: SessionMode::Idle,
            pending: Vec::new(),
            deciding: false,
            seen: HashSet::new(),
            passive_count: 0,
            micro_failures: 0,
            last_interaction: None,
            last_macro_eval: Instant::now(),
            last_decision: None,
            debounce: None,
            focus: None,
        }
    }

    /// Record a message id for de-duplication. Returns false for a duplicate.
    /// At capacity the whole set is cleared, trading exactness for a bound.
    pub fn note_seen(&mut self, message_id: &str, capacity: usize) -> bool {
        if self.seen.contains(message_id) {
            return false;
        }
        if self.seen.len() >= capacity {
            self.seen.clear();
        }
        self.seen.insert(message_id.to_string());
        true
    }

    pub fn take_pending(&mut self) -> Vec<InboundMessage> {
        std::mem::take(&mut self.pending)
    }

    /// Put a drained batch back at the front of the queue, preserving order
    /// relative to anything that arrived in the meantime.
    pub fn requeue_front(&mut self, mut batch: Vec<InboundMessage>) {
        batch.append(&mut self.pending);
        self.pending = batch;
    }

    /// Whether a recent interaction keeps this session "warm": messages in
    /// this window engage the debounce path even without an explicit trigger.
    pub fn in_focus_window(&self, window: Duration) -> bool {
        self.last_interaction
            .map(|t| t.elapsed() < window)
            .unwrap_or(false)
    }

    pub fn cancel_debounce(&mut self) {
        if let Some(handle) = self.debounce.take() {
            handle.abort();
        }
    }

    pub fn cancel_focus(&mut self) {
        if let Some(handle) = self.focus.take() {
            handle.abort();
        }
    }
}

/// Shared handle to one session's state.
pub struct SessionEntry {
    pub state: tokio::sync::Mutex<SessionState>,
}

impl SessionEntry {
    pub fn new(is_group: bool) -> Self {
        Self {
            state: tokio::sync::Mutex::new(SessionState::new(is_group)),
        }
    }
}
