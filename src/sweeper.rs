//! Decay/eviction sweeper.
//!
//! On a fixed tick, deletes every report whose `reportedAt` is strictly older
//! than `now - window`. Delete failures are logged and skipped; the next tick
//! picks up whatever was missed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{cutoff, SharedClock, SystemClock};
use crate::config::RetentionWindow;
use crate::error::{with_timeout, Result};
use crate::store::{ReportQuery, SharedStore};

/// Deletes expired reports from the shared store.
#[derive(Clone)]
pub struct Sweeper {
    store: SharedStore,
    clock: SharedClock,
    window: RetentionWindow,
    io_timeout: Duration,
}

impl Sweeper {
    pub fn new(store: SharedStore, window: RetentionWindow) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            window,
            io_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Delete every report with `reportedAt < now - window`.
    ///
    /// The threshold is fixed before any I/O, so reports written while the
    /// sweep runs are never touched. Returns the number actually deleted.
    /// A failed listing abandons the sweep with an error.
    pub async fn sweep(&self, now: DateTime<Utc>, window: Duration) -> Result<usize> {
        let threshold = cutoff(now, window);
        let start = Instant::now();

        let expired = with_timeout(self.io_timeout, self.store.query(ReportQuery::before(threshold))).await?;
        if expired.is_empty() {
            debug!("[Sweeper] Nothing older than {}", threshold);
            return Ok(0);
        }

        let mut deleted = 0usize;
        let mut failed = 0usize;
        for doc in &expired {
            match with_timeout(self.io_timeout, self.store.delete(&doc.id)).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    failed += 1;
                    warn!("[Sweeper] Failed to delete {}: {}", doc.id, e);
                }
            }
        }

        info!(
            "[Sweeper] Deleted {}/{} expired reports ({} failed) older than {} in {:?}",
            deleted,
            expired.len(),
            failed,
            threshold,
            start.elapsed()
        );
        Ok(deleted)
    }

    /// One sweep using the configured clock and the current window.
    pub async fn sweep_now(&self) -> Result<usize> {
        self.sweep(self.clock.now(), self.window.get()).await
    }

    /// Sweep every `interval` until the handle is shut down or dropped.
    ///
    /// Each tick reads the retention window afresh, so reloads apply from
    /// the next tick on.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            info!("[Sweeper] Started (every {:?}, window {:?})", interval, self.window.get());
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_now().await {
                            warn!("[Sweeper] Sweep abandoned: {}", e);
                        }
                    }
                }
            }
            info!("[Sweeper] Stopped");
        });

        SweeperHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Running sweeper task. Dropping the handle aborts the task.
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop after the current sweep (if any) finishes.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("[Sweeper] Task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{Error, StoreError};
    use crate::report::{LocationReport, NewReport, ReportDocument, ReportId};
    use crate::store::{MemoryStore, ReportStore, Subscription};
    use crate::GpsPoint;
    use futures::future::{BoxFuture, FutureExt};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn setup(window_secs: u64) -> (Sweeper, MemoryStore, ManualClock) {
        let clock = ManualClock::at_epoch();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let window = RetentionWindow::new(Duration::from_secs(window_secs)).unwrap();
        let sweeper = Sweeper::new(Arc::new(store.clone()), window).with_clock(Arc::new(clock.clone()));
        (sweeper, store, clock)
    }

    async fn put(store: &MemoryStore, lat: f64) -> LocationReport {
        store
            .insert(NewReport {
                coordinate: GpsPoint::new(lat, 0.0),
                weight: 1.0,
                accuracy: None,
                reported_at: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let (sweeper, store, clock) = setup(10);
        let old = put(&store, 1.0).await;
        clock.advance(Duration::from_secs(5));
        let young = put(&store, 2.0).await;
        clock.advance(Duration::from_secs(7));

        // now = 12, threshold = 2: only the t=0 report goes
        assert_eq!(sweeper.sweep_now().await.unwrap(), 1);
        assert!(store.get(&old.id).is_none());
        assert!(store.get(&young.id).is_some());
    }

    #[tokio::test]
    async fn test_report_exactly_at_threshold_survives() {
        let (sweeper, store, clock) = setup(10);
        put(&store, 1.0).await;
        clock.advance(Duration::from_secs(10));
        assert_eq!(sweeper.sweep_now().await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_second_sweep_is_a_no_op() {
        let (sweeper, store, clock) = setup(10);
        for i in 0..5 {
            put(&store, i as f64).await;
        }
        clock.advance(Duration::from_secs(30));
        assert_eq!(sweeper.sweep_now().await.unwrap(), 5);
        assert_eq!(sweeper.sweep_now().await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_window_reload_applies_to_next_sweep() {
        let (sweeper, store, clock) = setup(3600);
        put(&store, 1.0).await;
        clock.advance(Duration::from_secs(60));
        assert_eq!(sweeper.sweep_now().await.unwrap(), 0);

        sweeper.window.set(Duration::from_secs(30)).unwrap();
        assert_eq!(sweeper.sweep_now().await.unwrap(), 1);
    }

    /// Delegates to a memory store but refuses to delete some ids.
    struct StickyStore {
        inner: MemoryStore,
        sticky: HashSet<ReportId>,
    }

    impl ReportStore for StickyStore {
        fn insert(&self, report: NewReport) -> BoxFuture<'_, std::result::Result<LocationReport, StoreError>> {
            self.inner.insert(report)
        }
        fn query(&self, query: ReportQuery) -> BoxFuture<'_, std::result::Result<Vec<ReportDocument>, StoreError>> {
            self.inner.query(query)
        }
        fn delete<'a>(&'a self, id: &'a ReportId) -> BoxFuture<'a, std::result::Result<(), StoreError>> {
            if self.sticky.contains(id) {
                futures::future::ready(Err(StoreError::Unavailable("write rejected".into()))).boxed()
            } else {
                self.inner.delete(id)
            }
        }
        fn subscribe(&self, query: ReportQuery) -> BoxFuture<'_, std::result::Result<Subscription, StoreError>> {
            self.inner.subscribe(query)
        }
    }

    #[tokio::test]
    async fn test_delete_failures_do_not_abort_sweep() {
        let clock = ManualClock::at_epoch();
        let memory = MemoryStore::with_clock(Arc::new(clock.clone()));
        let a = put(&memory, 1.0).await;
        let b = put(&memory, 2.0).await;
        let c = put(&memory, 3.0).await;

        let store = StickyStore {
            inner: memory.clone(),
            sticky: HashSet::from([b.id.clone()]),
        };
        let window = RetentionWindow::new(Duration::from_secs(10)).unwrap();
        let sweeper = Sweeper::new(Arc::new(store), window).with_clock(Arc::new(clock.clone()));

        clock.advance(Duration::from_secs(20));
        assert_eq!(sweeper.sweep_now().await.unwrap(), 2);
        assert!(memory.get(&a.id).is_none());
        assert!(memory.get(&b.id).is_some());
        assert!(memory.get(&c.id).is_none());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_ticks_until_shutdown() {
        let (sweeper, store, clock) = setup(10);
        put(&store, 1.0).await;
        clock.advance(Duration::from_secs(11));

        let handle = sweeper.spawn(Duration::from_millis(10));
        // First tick fires immediately
        for _ in 0..100 {
            if store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.is_empty());
        handle.shutdown().await;

        // Nothing sweeps after shutdown
        put(&store, 2.0).await;
        clock.advance(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.len(), 1);
    }

    /// Delegates to a memory store, but listings hang while `stalled` is set.
    struct StallingStore {
        inner: MemoryStore,
        stalled: AtomicBool,
    }

    impl ReportStore for StallingStore {
        fn insert(&self, report: NewReport) -> BoxFuture<'_, std::result::Result<LocationReport, StoreError>> {
            self.inner.insert(report)
        }
        fn query(&self, query: ReportQuery) -> BoxFuture<'_, std::result::Result<Vec<ReportDocument>, StoreError>> {
            if self.stalled.load(Ordering::SeqCst) {
                futures::future::pending().boxed()
            } else {
                self.inner.query(query)
            }
        }
        fn delete<'a>(&'a self, id: &'a ReportId) -> BoxFuture<'a, std::result::Result<(), StoreError>> {
            self.inner.delete(id)
        }
        fn subscribe(&self, query: ReportQuery) -> BoxFuture<'_, std::result::Result<Subscription, StoreError>> {
            self.inner.subscribe(query)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_listing_abandons_tick_and_next_tick_recovers() {
        let clock = ManualClock::at_epoch();
        let memory = MemoryStore::with_clock(Arc::new(clock.clone()));
        put(&memory, 1.0).await;
        clock.advance(Duration::from_secs(20));

        let store = Arc::new(StallingStore {
            inner: memory.clone(),
            stalled: AtomicBool::new(true),
        });
        let window = RetentionWindow::new(Duration::from_secs(10)).unwrap();
        let sweeper = Sweeper::new(store.clone(), window)
            .with_clock(Arc::new(clock.clone()))
            .with_io_timeout(Duration::from_millis(100));

        let err = sweeper.sweep_now().await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Timeout(_))), "{err}");
        assert_eq!(memory.len(), 1);

        let handle = sweeper.spawn(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(memory.len(), 1);

        store.stalled.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(memory.is_empty());
        handle.shutdown().await;
    }
}
