//! Aggregation view builder.
//!
//! Holds one live subscription to the store and republishes the complete
//! feature set whenever the subscription delivers a snapshot. Between
//! snapshots a refresh tick rebuilds from the last snapshot so reports age
//! out of the published set on time even when nothing is written.
//!
//! ```text
//! Uninitialized -> Subscribed -> Publishing -> Subscribed -> ...
//!                      |             |
//!                      +--> Error <--+   (recovers on the next notification)
//!
//! shutdown() -> Unsubscribed
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{SharedClock, SystemClock};
use crate::config::RetentionWindow;
use crate::error::{with_timeout, PublishError};
use crate::heatmap::{build_features_from_documents, FeatureCollection};
use crate::publish::SharedPublisher;
use crate::report::ReportDocument;
use crate::store::{ReportQuery, SharedStore, Snapshot, Subscription};

/// Lifecycle of a [`ViewBuilder`] task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Uninitialized,
    Subscribed,
    Publishing,
    /// Last subscribe or publish failed. Cleared by the next success.
    Error,
    /// Terminal, after an explicit shutdown.
    Unsubscribed,
}

/// Rebuilds and publishes the heat layer dataset from the live report set.
#[derive(Clone)]
pub struct ViewBuilder {
    store: SharedStore,
    publisher: SharedPublisher,
    clock: SharedClock,
    window: RetentionWindow,
    io_timeout: Duration,
}

impl ViewBuilder {
    pub fn new(store: SharedStore, publisher: SharedPublisher, window: RetentionWindow) -> Self {
        Self {
            store,
            publisher,
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

    /// Feature set for `documents` at the current time and window.
    pub fn recompute(&self, documents: &[ReportDocument]) -> FeatureCollection {
        build_features_from_documents(documents, self.clock.now(), self.window.get())
    }

    /// Recompute and hand the whole set to the publisher.
    pub async fn publish_documents(&self, documents: &[ReportDocument]) -> Result<usize, PublishError> {
        let features = self.recompute(documents);
        let count = features.len();
        match tokio::time::timeout(self.io_timeout, self.publisher.replace_all(features)).await {
            Ok(result) => result.map(|_| count),
            Err(_) => Err(PublishError::Transport(format!("publish timed out after {:?}", self.io_timeout))),
        }
    }

    /// Start the subscription loop. Refreshes every `refresh` between
    /// store notifications.
    pub fn spawn(self, refresh: Duration) -> ViewHandle {
        let (state_tx, state_rx) = watch::channel(ViewState::Uninitialized);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            self.run(refresh, state_tx, stop_rx).await;
        });

        ViewHandle {
            stop: Some(stop_tx),
            task: Some(task),
            state: state_rx,
        }
    }

    async fn run(self, refresh: Duration, state: watch::Sender<ViewState>, mut stop: oneshot::Receiver<()>) {
        info!("[ViewBuilder] Started (refresh {:?}, window {:?})", refresh, self.window.get());
        let mut window_rx = self.window.watch();
        let mut subscription: Option<Subscription> = None;
        let mut last_documents: Option<Vec<ReportDocument>> = None;

        let mut ticker = tokio::time::interval(refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            if subscription.is_none() {
                subscription = self.open_subscription(&state).await;
            }

            tokio::select! {
                _ = &mut stop => break,

                changed = window_rx.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    info!("[ViewBuilder] Retention window now {:?}, re-subscribing", *window_rx.borrow());
                    // Dropping cancels the old live query; the new one
                    // delivers a fresh snapshot at the top of the loop.
                    subscription = None;
                }

                snapshot = next_snapshot(&mut subscription) => match snapshot {
                    Some(snapshot) => {
                        debug!(
                            "[ViewBuilder] Snapshot: {} documents, {} changes",
                            snapshot.documents.len(),
                            snapshot.changes.len()
                        );
                        self.publish(&snapshot.documents, true, &state).await;
                        last_documents = Some(snapshot.documents);
                    }
                    None => {
                        warn!("[ViewBuilder] Subscription closed by store");
                        subscription = None;
                        state.send_replace(ViewState::Error);
                    }
                },

                _ = ticker.tick() => {
                    if let Some(docs) = &last_documents {
                        self.publish(docs, subscription.is_some(), &state).await;
                    }
                }
            }
        }

        drop(subscription);
        state.send_replace(ViewState::Unsubscribed);
        info!("[ViewBuilder] Unsubscribed");
    }

    async fn open_subscription(&self, state: &watch::Sender<ViewState>) -> Option<Subscription> {
        let query = ReportQuery::within(self.window.get());
        match with_timeout(self.io_timeout, self.store.subscribe(query)).await {
            Ok(sub) => {
                state.send_replace(ViewState::Subscribed);
                Some(sub)
            }
            Err(e) => {
                warn!("[ViewBuilder] Subscribe failed, retrying next tick: {}", e);
                state.send_replace(ViewState::Error);
                None
            }
        }
    }

    async fn publish(&self, documents: &[ReportDocument], subscribed: bool, state: &watch::Sender<ViewState>) {
        state.send_replace(ViewState::Publishing);
        let start = Instant::now();
        match self.publish_documents(documents).await {
            Ok(count) => {
                debug!("[ViewBuilder] Published {} features in {:?}", count, start.elapsed());
                state.send_replace(if subscribed { ViewState::Subscribed } else { ViewState::Error });
            }
            Err(e) => {
                warn!("[ViewBuilder] Publish failed, will retry on next notification: {}", e);
                state.send_replace(ViewState::Error);
            }
        }
    }
}

async fn next_snapshot(subscription: &mut Option<Subscription>) -> Option<Snapshot> {
    match subscription {
        Some(sub) => sub.next().await,
        None => futures::future::pending().await,
    }
}

/// Running view builder. Dropping the handle aborts the task, which also
/// drops its subscription.
pub struct ViewHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    state: watch::Receiver<ViewState>,
}

impl ViewHandle {
    pub fn state(&self) -> ViewState {
        *self.state.borrow()
    }

    /// Receiver for state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ViewState> {
        self.state.clone()
    }

    /// Cancel the subscription and wait for the task to finish. No publish
    /// happens after this returns.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("[ViewBuilder] Task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
