use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::types::{RateKey, Reservation};

/// Sliding window of allowed actions for one `(principal, command_type)`.
///
/// Timestamps are logical milliseconds taken from the cycle, never read from
/// a clock here, so a replay fed the same timestamps admits the same actions.
#[derive(Debug, Default, Clone)]
pub struct ActionWindow {
    hits: VecDeque<i64>,
    last_at: Option<i64>,
}

impl ActionWindow {
    /// Drop hits at or before `now_ms - window_ms`.
    pub fn prune(&mut self, now_ms: i64, window_ms: i64) {
        let cutoff = now_ms.saturating_sub(window_ms);
        while self.hits.front().is_some_and(|t| *t <= cutoff) {
            self.hits.pop_front();
        }
    }

    pub fn count(&self) -> usize {
        self.hits.len()
    }

    pub fn last_at(&self) -> Option<i64> {
        self.last_at
    }

    pub fn record(&mut self, at_ms: i64) {
        self.hits.push_back(at_ms);
        self.last_at = Some(self.last_at.map_or(at_ms, |last| last.max(at_ms)));
    }

    fn forget(&mut self, at_ms: i64) {
        if let Some(pos) = self.hits.iter().rposition(|t| *t == at_ms) {
            self.hits.remove(pos);
        }
        self.last_at = self.hits.iter().copied().max();
    }
}

/// Per-key windows. The outer lock only finds or creates a window; each key
/// is then checked and updated under its own lock.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<RateKey, Arc<Mutex<ActionWindow>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self, key: &RateKey) -> Arc<Mutex<ActionWindow>> {
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(windows.entry(key.clone()).or_default())
    }

    /// Give back a slot taken by an Allow whose decision was never recorded.
    pub fn release(&self, reservation: &Reservation) {
        let window = self.window(&reservation.key);
        let mut window = window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        window.forget(reservation.at_ms);
    }

    /// Hits currently held for `key`, without pruning.
    pub fn held(&self, key: &RateKey) -> usize {
        let window = self.window(key);
        let window = window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        window.count()
    }
}
