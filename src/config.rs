//! Pipeline configuration and the shared retention window.

use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::GpsPoint;

/// UCSB campus, the default map center for consumers.
pub const DEFAULT_CENTER: GpsPoint = GpsPoint { latitude: 34.4140, longitude: -119.8489 };

/// Where `reportedAt` comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum TimestampSource {
    /// The store stamps records with its own clock. Immune to client skew.
    #[default]
    Server,
    /// The ingestor stamps records with its local clock.
    Local,
}

/// Configuration for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum report age before exclusion and deletion (default: 5 minutes)
    pub retention_window_secs: u64,
    /// Sweeper tick (default: 10s)
    pub sweep_interval_ms: u64,
    /// View rebuild tick when no store change arrives (default: 1s)
    pub refresh_interval_ms: u64,
    /// Upper bound on any single store call (default: 5s)
    pub io_timeout_ms: u64,
    pub timestamp_source: TimestampSource,
    /// Buffered sensor events before senders wait (default: 256)
    pub sensor_channel_capacity: usize,
    /// Initial camera center handed to map consumers
    pub center: GpsPoint,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retention_window_secs: 300,
            sweep_interval_ms: 10_000,
            refresh_interval_ms: 1000,
            io_timeout_ms: 5000,
            timestamp_source: TimestampSource::Server,
            sensor_channel_capacity: 256,
            center: DEFAULT_CENTER,
        }
    }
}

impl PipelineConfig {
    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_window_secs == 0 {
            return Err(Error::Config("retention_window_secs must be > 0".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config("sweep_interval_ms must be > 0".into()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(Error::Config("refresh_interval_ms must be > 0".into()));
        }
        if self.io_timeout_ms == 0 {
            return Err(Error::Config("io_timeout_ms must be > 0".into()));
        }
        if self.sensor_channel_capacity == 0 {
            return Err(Error::Config("sensor_channel_capacity must be > 0".into()));
        }
        if !self.center.is_valid() {
            return Err(Error::Config(format!(
                "center ({}, {}) is out of range",
                self.center.latitude, self.center.longitude
            )));
        }
        Ok(())
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// The process-wide retention window.
///
/// Clones share one value. The sweeper and the view builder both read it
/// through [`RetentionWindow::get`] or [`RetentionWindow::watch`], so a
/// reload is seen by both at once.
#[derive(Debug, Clone)]
pub struct RetentionWindow {
    tx: std::sync::Arc<watch::Sender<Duration>>,
}

impl RetentionWindow {
    pub fn new(window: Duration) -> Result<Self> {
        if window.is_zero() {
            return Err(Error::Config("retention window must be > 0".into()));
        }
        let (tx, _rx) = watch::channel(window);
        Ok(Self { tx: std::sync::Arc::new(tx) })
    }

    pub fn get(&self) -> Duration {
        *self.tx.borrow()
    }

    /// Hot-reload the window.
    pub fn set(&self, window: Duration) -> Result<()> {
        if window.is_zero() {
            return Err(Error::Config("retention window must be > 0".into()));
        }
        let previous = self.tx.send_replace(window);
        if previous != window {
            info!("[RetentionWindow] {:?} -> {:?}", previous, window);
        }
        Ok(())
    }

    /// Receiver notified on every change.
    pub fn watch(&self) -> watch::Receiver<Duration> {
        self.tx.subscribe()
    }
}
