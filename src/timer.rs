//src/timer.rs
//! Rest countdown anchored to wall-clock timestamps.
//!
//! Remaining time is always recomputed as
//! `max(0, rest_duration - floor((now - start) / 1000))`, so a tick that arrives late
//! (process suspended, laptop closed, terminal in the background) lands on the same
//! value a steady 1 Hz tick would have produced.
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const TICK_PERIOD_MS: i64 = 1000;
/// Remaining seconds at or below which the audible countdown cue plays.
pub const COUNTDOWN_CUE_SECONDS: u32 = 5;

pub fn remaining_seconds(now_ms: i64, start_timestamp_ms: i64, rest_duration: u32) -> u32 {
    let elapsed = (now_ms - start_timestamp_ms).max(0) / 1000;
    let remaining = i64::from(rest_duration) - elapsed;
    u32::try_from(remaining.max(0)).unwrap_or(0)
}

pub fn in_countdown_tail(remaining: u32) -> bool {
    remaining > 0 && remaining <= COUNTDOWN_CUE_SECONDS
}

/// Source of epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(start_ms)) }
    }

    pub fn advance_ms(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * 1000);
    }

    pub fn set_ms(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PeriodicTask {
    period_ms: i64,
    next_due_ms: i64,
}

/// Registry of cancellable periodic tasks, one per session id.
///
/// The scheduler only decides *when* the host should call back in; what a tick does is
/// derived from timestamps, so missed or late ticks are harmless.
#[derive(Debug, Default, Clone)]
pub struct RestScheduler {
    tasks: HashMap<Uuid, PeriodicTask>,
}

impl RestScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or keeps) the periodic task for `session_id`.
    pub fn schedule(&mut self, session_id: Uuid, period_ms: i64, now_ms: i64) {
        self.tasks.entry(session_id).or_insert(PeriodicTask {
            period_ms,
            next_due_ms: now_ms + period_ms,
        });
    }

    pub fn cancel(&mut self, session_id: Uuid) -> bool {
        self.tasks.remove(&session_id).is_some()
    }

    pub fn is_scheduled(&self, session_id: Uuid) -> bool {
        self.tasks.contains_key(&session_id)
    }

    pub fn next_due_ms(&self, session_id: Uuid) -> Option<i64> {
        self.tasks.get(&session_id).map(|t| t.next_due_ms)
    }

    pub fn is_due(&self, session_id: Uuid, now_ms: i64) -> bool {
        self.tasks
            .get(&session_id)
            .is_some_and(|t| now_ms >= t.next_due_ms)
    }

    /// Moves the next due time past `now_ms`, skipping ticks missed while suspended.
    pub fn mark_ran(&mut self, session_id: Uuid, now_ms: i64) {
        if let Some(task) = self.tasks.get_mut(&session_id) {
            let behind = (now_ms - task.next_due_ms).max(0) / task.period_ms;
            task.next_due_ms += (behind + 1) * task.period_ms;
        }
    }
}
