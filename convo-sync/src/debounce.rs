//! Stability window for high-frequency content changes.
//!
//! ```text
//! Quiescent ──observe(new key)──▶ Pending(deadline) ──elapse──▶ Fired
//!     ▲                              │  ▲      │                  │
//!     │                              │  └──────┘ observe(new key) │
//!     └──────── cancel ──────────────┘   (reset)                  │
//!                                                                  │
//!   Fired ──observe(new key)──▶ Pending(deadline) ◀───────────────┘
//! ```
//!
//! The debouncer only decides; the owner runs the actual timer and reports
//! back with [`Debouncer::elapse`] using the generation it was given. A stale
//! generation (the pending entry was reset or cancelled meanwhile) is ignored.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceState<T> {
    Quiescent,
    Pending {
        key: String,
        payload: T,
        deadline: Instant,
        generation: u64,
    },
    Fired {
        key: String,
    },
}

/// Result of feeding an observation into the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceDecision {
    /// Start (or restart) a timer; fire `elapse(generation)` at `deadline`.
    Schedule { generation: u64, deadline: Instant },
    /// Same key as the pending entry; the running timer stands.
    AlreadyPending,
    /// Same key as the last fired one; nothing to emit.
    Unchanged,
    /// Content went back to the last fired key; the pending entry was dropped.
    Reverted,
}

#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    state: DebounceState<T>,
    last_fired: Option<String>,
    generation: u64,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Quiescent,
            last_fired: None,
            generation: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> &DebounceState<T> {
        &self.state
    }

    pub fn last_fired(&self) -> Option<&str> {
        self.last_fired.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    pub fn observe(&mut self, key: String, payload: T, now: Instant) -> DebounceDecision {
        if let DebounceState::Pending { key: pending, .. } = &self.state {
            if *pending == key {
                return DebounceDecision::AlreadyPending;
            }
        }

        if self.last_fired.as_deref() == Some(key.as_str()) {
            if self.is_pending() {
                self.state = DebounceState::Fired { key };
                return DebounceDecision::Reverted;
            }
            return DebounceDecision::Unchanged;
        }

        self.generation += 1;
        let deadline = now + self.window;
        self.state = DebounceState::Pending {
            key,
            payload,
            deadline,
            generation: self.generation,
        };
        DebounceDecision::Schedule {
            generation: self.generation,
            deadline,
        }
    }

    /// Timer callback. Yields the pending entry if `generation` is current.
    pub fn elapse(&mut self, generation: u64) -> Option<(String, T)> {
        match &self.state {
            DebounceState::Pending {
                generation: current,
                ..
            } if *current == generation => {}
            _ => return None,
        }

        let previous = std::mem::replace(&mut self.state, DebounceState::Quiescent);
        match previous {
            DebounceState::Pending { key, payload, .. } => {
                self.last_fired = Some(key.clone());
                self.state = DebounceState::Fired { key: key.clone() };
                Some((key, payload))
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Record a key emitted outside the window (initial or forced emission).
    /// Drops any pending entry.
    pub fn mark_fired(&mut self, key: String) {
        self.generation += 1;
        self.last_fired = Some(key.clone());
        self.state = DebounceState::Fired { key };
    }

    /// Drop any pending entry. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        let was_pending = self.is_pending();
        if was_pending {
            self.generation += 1;
            self.state = match self.last_fired.clone() {
                Some(key) => DebounceState::Fired { key },
                None => DebounceState::Quiescent,
            };
        }
        was_pending
    }

    /// Forget everything, including the last fired key.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.last_fired = None;
        self.state = DebounceState::Quiescent;
    }
}
