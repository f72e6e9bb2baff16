//! Time sources.
//!
//! Every component reads "now" through a [`Clock`] so the store can act as a
//! server clock and tests can drive time by hand.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;

/// A source of the current UTC time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Start at the Unix epoch.
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::default())
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock() = instant;
    }

    pub fn advance(&self, by: std::time::Duration) {
        let mut now = self.now.lock();
        if let Some(next) = ChronoDuration::from_std(by).ok().and_then(|step| now.checked_add_signed(step)) {
            *now = next;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// `now - window`, saturating at the earliest representable instant.
pub fn cutoff(now: DateTime<Utc>, window: std::time::Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::at_epoch();
        let other = clock.clone();
        clock.advance(Duration::from_secs(12));
        assert_eq!(other.now().timestamp(), 12);
    }

    #[test]
    fn test_cutoff() {
        let now = DateTime::<Utc>::default() + ChronoDuration::seconds(100);
        assert_eq!(cutoff(now, Duration::from_secs(30)).timestamp(), 70);
    }

    #[test]
    fn test_cutoff_saturates() {
        let now = DateTime::<Utc>::default();
        assert_eq!(cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
