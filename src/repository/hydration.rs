use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use serde::Serialize;

/// Cache lifecycle. Moves forward only, except that a failed attempt returns
/// to `Uninitialized` so the next caller can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationState {
    Uninitialized,
    Hydrating,
    Hydrated,
}

impl HydrationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Hydrating,
            2 => Self::Hydrated,
            _ => Self::Uninitialized,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct HydrationTracker {
    state: AtomicU8,
    completed: AtomicUsize,
}

impl HydrationTracker {
    pub fn state(&self) -> HydrationState {
        HydrationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// Mark a hydration as started. The returned guard rolls the state back
    /// unless [`HydrationAttempt::finish`] is called.
    pub fn begin(&self) -> HydrationAttempt<'_> {
        self.state.store(HydrationState::Hydrating as u8, Ordering::Release);
        HydrationAttempt {
            tracker: self,
            finished: false,
        }
    }
}

pub(crate) struct HydrationAttempt<'a> {
    tracker: &'a HydrationTracker,
    finished: bool,
}

impl HydrationAttempt<'_> {
    pub fn finish(mut self) {
        self.finished = true;
        self.tracker.completed.fetch_add(1, Ordering::AcqRel);
        self.tracker
            .state
            .store(HydrationState::Hydrated as u8, Ordering::Release);
    }
}

impl Drop for HydrationAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker
                .state
                .store(HydrationState::Uninitialized as u8, Ordering::Release);
        }
    }
}
