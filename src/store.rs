//! The shared document store contract and an in-memory implementation.
//!
//! The pipeline only needs four things from a store:
//! - create a record, stamping it with the store's own clock
//! - range queries on `reportedAt`
//! - delete by id
//! - live subscriptions that deliver a full snapshot of matching records
//!   first, then again after every change that touches the result set
//!
//! [`MemoryStore`] provides all of them in-process. A hosted database can be
//! plugged in by implementing [`ReportStore`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::clock::{cutoff, SharedClock, SystemClock};
use crate::error::StoreError;
use crate::report::{LocationReport, NewReport, ReportDocument, ReportId};

/// Filter on `reportedAt`. Documents without a timestamp never match a
/// time-filtered query.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ReportQuery {
    /// Only records younger than this, measured against the store clock
    /// each time the query is evaluated.
    pub within: Option<Duration>,
    /// Only records strictly older than this instant.
    pub before: Option<DateTime<Utc>>,
}

impl ReportQuery {
    /// Every record in the collection.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn within(window: Duration) -> Self {
        Self { within: Some(window), before: None }
    }

    pub fn before(threshold: DateTime<Utc>) -> Self {
        Self { within: None, before: Some(threshold) }
    }

    /// Evaluate against one document at `now`.
    pub fn matches(&self, doc: &ReportDocument, now: DateTime<Utc>) -> bool {
        if self.within.is_none() && self.before.is_none() {
            return true;
        }
        let Some(reported_at) = doc.reported_at else {
            return false;
        };
        if let Some(window) = self.within {
            if reported_at <= cutoff(now, window) {
                return false;
            }
        }
        if let Some(threshold) = self.before {
            if reported_at >= threshold {
                return false;
            }
        }
        true
    }
}

/// What changed since the previous snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportChange {
    Added(ReportId),
    Removed(ReportId),
}

/// A full result set for one subscription at one instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub documents: Vec<ReportDocument>,
    /// Empty for the initial snapshot.
    pub changes: Vec<ReportChange>,
    pub read_at: DateTime<Utc>,
}

/// A live query. Dropping it cancels delivery.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    /// Wrap a receiver fed by a store implementation.
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self { rx }
    }

    /// Next snapshot, or `None` once the store has gone away.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Stop delivery. Equivalent to dropping the subscription.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}

/// Contract the pipeline needs from the shared document store.
pub trait ReportStore: Send + Sync {
    /// Create a record. When `report.reported_at` is `None` the store
    /// stamps it with its own clock.
    fn insert(&self, report: NewReport) -> BoxFuture<'_, Result<LocationReport, StoreError>>;

    /// One-shot read.
    fn query(&self, query: ReportQuery) -> BoxFuture<'_, Result<Vec<ReportDocument>, StoreError>>;

    fn delete<'a>(&'a self, id: &'a ReportId) -> BoxFuture<'a, Result<(), StoreError>>;

    /// Open a live query. The first snapshot is delivered immediately.
    fn subscribe(&self, query: ReportQuery) -> BoxFuture<'_, Result<Subscription, StoreError>>;

    /// Current server time, if the store keeps its own clock.
    fn server_time(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Shared store handle.
pub type SharedStore = Arc<dyn ReportStore>;

struct Listener {
    query: ReportQuery,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct Inner {
    documents: RwLock<HashMap<ReportId, ReportDocument>>,
    listeners: Mutex<Vec<Listener>>,
    clock: SharedClock,
}

/// In-memory document store with snapshot-listener semantics.
///
/// Cloning gives another handle to the same collection.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store stamping records with wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store stamping records (and evaluating `within` queries) with `clock`.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: RwLock::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                clock,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live subscriptions. Cancelled or dropped ones are not counted.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .iter()
            .filter(|l| !l.tx.is_closed())
            .count()
    }

    /// All documents, oldest first.
    pub fn documents(&self) -> Vec<ReportDocument> {
        self.collect(&ReportQuery::all(), self.inner.clock.now())
    }

    pub fn get(&self, id: &ReportId) -> Option<ReportDocument> {
        self.inner.documents.read().get(id).cloned()
    }

    /// Write a raw document as another client might, bypassing validation.
    /// Replaces any document with the same id.
    pub fn insert_document(&self, doc: ReportDocument) {
        let id = doc.id.clone();
        let replaced = self.inner.documents.write().insert(id.clone(), doc.clone());
        let mut touched = vec![doc];
        touched.extend(replaced);
        self.notify(vec![ReportChange::Added(id)], &touched);
    }

    fn insert_now(&self, report: NewReport) -> LocationReport {
        let stored = LocationReport {
            id: ReportId::generate(),
            coordinate: report.coordinate,
            weight: report.weight,
            reported_at: report.reported_at.unwrap_or_else(|| self.inner.clock.now()),
            accuracy: report.accuracy,
        };
        let doc = ReportDocument::from_report(&stored);
        self.inner.documents.write().insert(stored.id.clone(), doc.clone());
        debug!("[MemoryStore] Inserted {} at {}", stored.id, stored.reported_at);
        self.notify(vec![ReportChange::Added(stored.id.clone())], &[doc]);
        stored
    }

    fn delete_now(&self, id: &ReportId) -> Result<(), StoreError> {
        let removed = self.inner.documents.write().remove(id);
        match removed {
            Some(doc) => {
                debug!("[MemoryStore] Deleted {}", id);
                self.notify(vec![ReportChange::Removed(id.clone())], &[doc]);
                Ok(())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    fn collect(&self, query: &ReportQuery, now: DateTime<Utc>) -> Vec<ReportDocument> {
        let mut docs: Vec<ReportDocument> = self
            .inner
            .documents
            .read()
            .values()
            .filter(|d| query.matches(d, now))
            .cloned()
            .collect();
        docs.sort_by(|a, b| a.reported_at.cmp(&b.reported_at).then_with(|| a.id.cmp(&b.id)));
        docs
    }

    fn subscribe_now(&self, query: ReportQuery) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // Hold the registry lock so no change slips between the initial
        // snapshot and registration.
        let mut listeners = self.inner.listeners.lock();
        let now = self.inner.clock.now();
        let initial = Snapshot {
            documents: self.collect(&query, now),
            changes: Vec::new(),
            read_at: now,
        };
        // Receiver is alive, the send cannot fail
        let _ = tx.send(initial);
        listeners.push(Listener { query, tx });
        info!("[MemoryStore] New subscription ({} live)", listeners.len());
        Subscription::new(rx)
    }

    /// Push a fresh snapshot to every listener whose query matches one of
    /// the `touched` documents (old or new version). Changes outside a
    /// listener's result set leave it alone.
    fn notify(&self, changes: Vec<ReportChange>, touched: &[ReportDocument]) {
        let mut listeners = self.inner.listeners.lock();
        let now = self.inner.clock.now();
        listeners.retain(|listener| {
            if listener.tx.is_closed() {
                return false;
            }
            if !touched.iter().any(|doc| listener.query.matches(doc, now)) {
                return true;
            }
            let snapshot = Snapshot {
                documents: self.collect(&listener.query, now),
                changes: changes.clone(),
                read_at: now,
            };
            listener.tx.send(snapshot).is_ok()
        });
    }
}

impl ReportStore for MemoryStore {
    fn insert(&self, report: NewReport) -> BoxFuture<'_, Result<LocationReport, StoreError>> {
        future::ready(Ok(self.insert_now(report))).boxed()
    }

    fn query(&self, query: ReportQuery) -> BoxFuture<'_, Result<Vec<ReportDocument>, StoreError>> {
        future::ready(Ok(self.collect(&query, self.inner.clock.now()))).boxed()
    }

    fn delete<'a>(&'a self, id: &'a ReportId) -> BoxFuture<'a, Result<(), StoreError>> {
        future::ready(self.delete_now(id)).boxed()
    }

    fn subscribe(&self, query: ReportQuery) -> BoxFuture<'_, Result<Subscription, StoreError>> {
        future::ready(Ok(self.subscribe_now(query))).boxed()
    }

    fn server_time(&self) -> Option<DateTime<Utc>> {
        Some(self.inner.clock.now())
    }
}
