//! Heat layer publishing.
//!
//! A publisher receives the complete feature set and replaces whatever it
//! held before. There is no incremental update path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use log::debug;
use tokio::sync::watch;

use crate::error::PublishError;
use crate::heatmap::FeatureCollection;

/// Consumer of the aggregated dataset (the map's heat layer).
pub trait HeatLayerPublisher: Send + Sync {
    /// Replace the whole dataset.
    fn replace_all(&self, features: FeatureCollection) -> BoxFuture<'_, Result<(), PublishError>>;
}

/// Shared publisher handle.
pub type SharedPublisher = Arc<dyn HeatLayerPublisher>;

/// Keeps the latest dataset in a watch channel for in-process consumers.
#[derive(Debug, Clone)]
pub struct WatchPublisher {
    tx: Arc<watch::Sender<FeatureCollection>>,
    publishes: Arc<AtomicU64>,
}

impl Default for WatchPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(FeatureCollection::default());
        Self {
            tx: Arc::new(tx),
            publishes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receiver that sees every replacement.
    pub fn subscribe(&self) -> watch::Receiver<FeatureCollection> {
        self.tx.subscribe()
    }

    /// Copy of the current dataset.
    pub fn latest(&self) -> FeatureCollection {
        self.tx.borrow().clone()
    }

    /// Number of successful `replace_all` calls.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }
}

impl HeatLayerPublisher for WatchPublisher {
    fn replace_all(&self, features: FeatureCollection) -> BoxFuture<'_, Result<(), PublishError>> {
        let count = features.len();
        self.tx.send_replace(features);
        let n = self.publishes.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("[WatchPublisher] Dataset #{} with {} features", n, count);
        future::ready(Ok(())).boxed()
    }
}
