use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Active,
    AwaitingFlush,
}

/// What the session should do after a key-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlushDecision {
    Hold,
    Armed { deadline: f64 },
    Flush,
}

/// Cancellable one-shot deadline on the session clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebounceTimer {
    deadline: Option<f64>,
}

impl DebounceTimer {
    pub fn arm(&mut self, deadline: f64) {
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<f64> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self, now: f64) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}

/// Decides when the player's phrase is over and must be flushed.
#[derive(Debug)]
pub struct PhraseScheduler {
    held: HashSet<u8>,
    phrase_start: Option<f64>,
    timer: DebounceTimer,
    /// Seconds
    debounce: f64,
    /// Seconds
    long_phrase: f64,
}

impl PhraseScheduler {
    pub fn new(debounce: Duration, long_phrase: Duration) -> Self {
        Self {
            held: HashSet::new(),
            phrase_start: None,
            timer: DebounceTimer::default(),
            debounce: debounce.as_secs_f64(),
            long_phrase: long_phrase.as_secs_f64(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if !self.held.is_empty() {
            SchedulerState::Active
        } else if self.timer.is_armed() {
            SchedulerState::AwaitingFlush
        } else {
            SchedulerState::Idle
        }
    }

    pub fn phrase_start(&self) -> Option<f64> {
        self.phrase_start
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn deadline(&self) -> Option<f64> {
        self.timer.deadline()
    }

    pub fn key_down(&mut self, pitch: u8, now: f64) {
        if self.phrase_start.is_none() {
            self.phrase_start = Some(now);
        }
        self.timer.cancel();
        self.held.insert(pitch);
    }

    /// `key_time` is the timestamp the key-up was stamped with; the debounce
    /// window starts there, so a key-up scheduled ahead delays the flush.
    pub fn key_up(&mut self, pitch: u8, now: f64, key_time: f64) -> FlushDecision {
        if !self.held.remove(&pitch) || !self.held.is_empty() {
            return FlushDecision::Hold;
        }

        let open_for = self.phrase_start.map_or(0.0, |start| now - start);
        if open_for > self.long_phrase {
            self.timer.cancel();
            return FlushDecision::Flush;
        }

        let deadline = key_time + self.debounce;
        self.timer.arm(deadline);
        FlushDecision::Armed { deadline }
    }

    /// True exactly once when an armed debounce expires.
    pub fn poll(&mut self, now: f64) -> bool {
        if self.held.is_empty() && self.timer.expired(now) {
            self.timer.cancel();
            true
        } else {
            false
        }
    }

    /// Back to idle after the phrase was handed to the prediction client.
    pub fn flushed(&mut self) {
        self.timer.cancel();
        self.phrase_start = None;
    }
}
