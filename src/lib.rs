//! # Heat Pipeline
//!
//! Live location heat-map data for campus maps.
//!
//! This library provides:
//! - Ingestion of location reports (coordinate, weight, accuracy) into a shared store
//! - A sweeper that deletes reports older than the retention window
//! - A view builder that keeps a live subscription on the store and republishes
//!   the full set of weighted points for a heat layer
//!
//! ## Features
//!
//! - **`parallel`** - Build feature sets with rayon
//! - **`http`** - Publish datasets to a remote heat layer over HTTP
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use heat_pipeline::{GpsPoint, MemoryStore, Pipeline, PipelineConfig, WatchPublisher};
//!
//! # async fn demo() -> heat_pipeline::Result<()> {
//! let store = MemoryStore::new();
//! let publisher = WatchPublisher::new();
//! let pipeline = Pipeline::new(PipelineConfig::default(), Arc::new(store), Arc::new(publisher.clone()))?;
//! let handle = pipeline.start();
//!
//! handle.ingestor().ingest(GpsPoint::new(34.4140, -119.8489), None, Some(10.0)).await?;
//!
//! let layer = publisher.latest();
//! println!("{} points, geojson: {}", layer.len(), layer.to_geojson());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};

pub mod clock;
pub mod config;
pub mod error;
pub mod geo_utils;
pub mod heatmap;
pub mod ingest;
pub mod pipeline;
pub mod publish;
pub mod report;
pub mod store;
pub mod sweeper;
pub mod view;

// HTTP heat layer publisher
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpPublisher;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{PipelineConfig, RetentionWindow, TimestampSource, DEFAULT_CENTER};
pub use error::{Error, PublishError, Result, StoreError};
pub use heatmap::{build_features, AggregatedFeature, FeatureCollection, FeatureIndex};
pub use ingest::{sensor_channel, Ingestor, SensorEvent, SensorReceiver, SensorSender};
pub use pipeline::{Pipeline, PipelineHandle};
pub use publish::{HeatLayerPublisher, SharedPublisher, WatchPublisher};
pub use report::{LocationReport, NewReport, ReportDocument, ReportId};
pub use store::{MemoryStore, ReportQuery, ReportStore, SharedStore, Snapshot, Subscription};
pub use sweeper::{Sweeper, SweeperHandle};
pub use view::{ViewBuilder, ViewHandle, ViewState};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("HeatPipelineRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use heat_pipeline::GpsPoint;
/// let point = GpsPoint::new(34.4140, -119.8489); // UCSB
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Geographic bounding box (a map viewport).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Edges inclusive.
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{info, warn};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::{Builder, Runtime};

    /// A self-contained pipeline for the mobile client: in-memory store,
    /// in-process heat layer, and its own tokio runtime behind a
    /// synchronous API.
    #[derive(uniffi::Object)]
    pub struct HeatPipeline {
        runtime: Runtime,
        store: MemoryStore,
        publisher: WatchPublisher,
        pipeline: Pipeline,
        handle: Mutex<Option<PipelineHandle>>,
    }

    #[uniffi::export]
    impl HeatPipeline {
        /// Start a pipeline with the given retention window (seconds).
        #[uniffi::constructor]
        pub fn new(retention_window_secs: u64) -> std::result::Result<Arc<Self>, Error> {
            init_logging();
            info!("[HeatPipelineRust] Starting with {}s retention", retention_window_secs);

            let runtime = Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| Error::Config(format!("Failed to create tokio runtime: {}", e)))?;

            let config = PipelineConfig {
                retention_window_secs,
                ..Default::default()
            };
            let store = MemoryStore::new();
            let publisher = WatchPublisher::new();
            let pipeline = Pipeline::new(config, Arc::new(store.clone()), Arc::new(publisher.clone()))?;

            let handle = {
                let _guard = runtime.enter();
                pipeline.start()
            };

            Ok(Arc::new(Self {
                runtime,
                store,
                publisher,
                pipeline,
                handle: Mutex::new(Some(handle)),
            }))
        }

        /// Store one report. Returns its id.
        pub fn ingest(
            &self,
            latitude: f64,
            longitude: f64,
            weight: Option<f64>,
            accuracy: Option<f64>,
        ) -> std::result::Result<String, Error> {
            let ingestor = self.pipeline.ingestor();
            let id = self
                .runtime
                .block_on(ingestor.ingest(GpsPoint::new(latitude, longitude), weight, accuracy))?;
            Ok(id.to_string())
        }

        /// Run one sweep now. Returns the number of deleted reports.
        pub fn sweep(&self) -> std::result::Result<u64, Error> {
            let sweeper = self.pipeline.sweeper();
            let deleted = self.runtime.block_on(sweeper.sweep_now())?;
            Ok(deleted as u64)
        }

        pub fn set_retention_window(&self, secs: u64) -> std::result::Result<(), Error> {
            self.pipeline.retention_window().set(Duration::from_secs(secs))
        }

        /// The dataset most recently handed to the heat layer.
        pub fn current_features(&self) -> Vec<AggregatedFeature> {
            self.publisher.latest().features
        }

        /// Same as `current_features`, as a GeoJSON string for the map SDK.
        pub fn current_geojson(&self) -> String {
            self.publisher.latest().to_geojson().to_string()
        }

        pub fn report_count(&self) -> u64 {
            self.store.len() as u64
        }

        /// Stop background tasks. Further calls to `ingest`/`sweep` still work.
        pub fn shutdown(&self) {
            let handle = self.handle.lock().take();
            match handle {
                Some(handle) => {
                    let stored = self.runtime.block_on(handle.shutdown());
                    info!("[HeatPipelineRust] Shut down ({} sensor events stored)", stored);
                }
                None => warn!("[HeatPipelineRust] shutdown called twice"),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
