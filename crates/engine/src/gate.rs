use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Decides whether a periodic action may fire now.
pub trait RateGate: Send + Sync {
    /// Returns `true` at most once per window across all callers.
    fn try_acquire(&self) -> bool;
}

/// Opens once per fixed interval, process-wide.
pub struct IntervalGate {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self { Self { interval, last: Mutex::new(None) } }
}

impl RateGate for IntervalGate {
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
