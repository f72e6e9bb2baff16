//! Location report ingestion.
//!
//! Reports arrive either as direct [`Ingestor::ingest`] calls or as
//! [`SensorEvent`]s pushed into a channel by the location source. Each one
//! becomes exactly one new record in the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::clock::{SharedClock, SystemClock};
use crate::config::TimestampSource;
use crate::error::{with_timeout, Error, Result};
use crate::report::{NewReport, ReportId, DEFAULT_WEIGHT};
use crate::store::SharedStore;
use crate::GpsPoint;

/// One position fix from the device or an external reporting client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorEvent {
    pub coordinate: GpsPoint,
    pub accuracy: Option<f64>,
    /// Device time of the fix. Only used with [`TimestampSource::Local`].
    pub timestamp: DateTime<Utc>,
}

/// Sending half held by the location source.
pub type SensorSender = mpsc::Sender<SensorEvent>;
/// Receiving half handed to [`Ingestor::run`].
pub type SensorReceiver = mpsc::Receiver<SensorEvent>;

/// Bounded channel between the location source and the ingestor.
pub fn sensor_channel(capacity: usize) -> (SensorSender, SensorReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Validates reports and writes them to the shared store.
#[derive(Clone)]
pub struct Ingestor {
    store: SharedStore,
    clock: SharedClock,
    timestamp_source: TimestampSource,
    io_timeout: Duration,
}

impl Ingestor {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            timestamp_source: TimestampSource::Server,
            io_timeout: Duration::from_secs(5),
        }
    }

    /// Clock used for local timestamps: [`TimestampSource::Local`], or a
    /// store that keeps no clock of its own.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timestamp_source(mut self, source: TimestampSource) -> Self {
        self.timestamp_source = source;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn timestamp_source(&self) -> TimestampSource {
        self.timestamp_source
    }

    /// Validate and persist one report.
    ///
    /// `weight` defaults to 1.0. Every call creates a new record, even for a
    /// coordinate and time identical to an earlier one.
    pub async fn ingest(&self, coordinate: GpsPoint, weight: Option<f64>, accuracy: Option<f64>) -> Result<ReportId> {
        self.ingest_at(coordinate, weight, accuracy, self.clock.now()).await
    }

    /// As [`Ingestor::ingest`], with the local timestamp supplied by the caller.
    /// The timestamp is ignored when the store stamps records.
    pub async fn ingest_at(
        &self,
        coordinate: GpsPoint,
        weight: Option<f64>,
        accuracy: Option<f64>,
        local_time: DateTime<Utc>,
    ) -> Result<ReportId> {
        let report = self.validate(coordinate, weight, accuracy, local_time)?;
        let stored = with_timeout(self.io_timeout, self.store.insert(report)).await?;
        debug!(
            "[Ingestor] Stored {} at ({:.5}, {:.5}) weight {}",
            stored.id, stored.coordinate.latitude, stored.coordinate.longitude, stored.weight
        );
        Ok(stored.id)
    }

    fn validate(
        &self,
        coordinate: GpsPoint,
        weight: Option<f64>,
        accuracy: Option<f64>,
        local_time: DateTime<Utc>,
    ) -> Result<NewReport> {
        if !coordinate.is_valid() {
            return Err(Error::InvalidCoordinate {
                latitude: coordinate.latitude,
                longitude: coordinate.longitude,
            });
        }
        let weight = weight.unwrap_or(DEFAULT_WEIGHT);
        if !weight.is_finite() || weight <= 0.0 {
            return Err(Error::InvalidWeight(weight));
        }
        if let Some(a) = accuracy {
            if !a.is_finite() || a < 0.0 {
                return Err(Error::InvalidAccuracy(a));
            }
        }
        // Server stamping needs a store that keeps its own clock
        let reported_at = match self.timestamp_source {
            TimestampSource::Server if self.store.server_time().is_some() => None,
            TimestampSource::Server => {
                debug!("[Ingestor] Store has no clock, stamping with local time");
                Some(local_time)
            }
            TimestampSource::Local => Some(local_time),
        };
        Ok(NewReport { coordinate, weight, accuracy, reported_at })
    }

    /// Drain sensor events until every sender is gone.
    ///
    /// Rejected or failed events are logged and skipped. Returns how many
    /// events were stored.
    pub async fn run(&self, mut events: SensorReceiver) -> usize {
        info!("[Ingestor] Consuming sensor events ({:?} timestamps)", self.timestamp_source);
        let mut stored = 0usize;
        let mut rejected = 0usize;

        while let Some(event) = events.recv().await {
            match self.ingest_at(event.coordinate, None, event.accuracy, event.timestamp).await {
                Ok(_) => stored += 1,
                Err(e) => {
                    rejected += 1;
                    warn!("[Ingestor] Dropped sensor event: {}", e);
                }
            }
        }

        info!("[Ingestor] Sensor channel closed: {} stored, {} dropped", stored, rejected);
        stored
    }
}
