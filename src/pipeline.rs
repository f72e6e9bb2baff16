//! Wiring: one config, one store, one publisher, three components.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::clock::{SharedClock, SystemClock};
use crate::config::{PipelineConfig, RetentionWindow};
use crate::error::Result;
use crate::ingest::{sensor_channel, Ingestor, SensorSender};
use crate::publish::SharedPublisher;
use crate::store::SharedStore;
use crate::sweeper::{Sweeper, SweeperHandle};
use crate::view::{ViewBuilder, ViewHandle, ViewState};

/// Builds the ingestor, sweeper and view builder from one config so they
/// share the store, the clock and the retention window.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    store: SharedStore,
    publisher: SharedPublisher,
    clock: SharedClock,
    window: RetentionWindow,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: SharedStore, publisher: SharedPublisher) -> Result<Self> {
        config.validate()?;
        let window = RetentionWindow::new(config.retention_window())?;
        Ok(Self {
            config,
            store,
            publisher,
            clock: Arc::new(SystemClock),
            window,
        })
    }

    /// Clock for the sweeper threshold, view filtering and local timestamps.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn retention_window(&self) -> &RetentionWindow {
        &self.window
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(self.store.clone())
            .with_clock(self.clock.clone())
            .with_timestamp_source(self.config.timestamp_source)
            .with_io_timeout(self.config.io_timeout())
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.store.clone(), self.window.clone())
            .with_clock(self.clock.clone())
            .with_io_timeout(self.config.io_timeout())
    }

    pub fn view_builder(&self) -> ViewBuilder {
        ViewBuilder::new(self.store.clone(), self.publisher.clone(), self.window.clone())
            .with_clock(self.clock.clone())
            .with_io_timeout(self.config.io_timeout())
    }

    /// Start the sweeper, the view builder and a sensor-event consumer.
    pub fn start(&self) -> PipelineHandle {
        info!(
            "[Pipeline] Starting: window {:?}, sweep every {:?}, refresh every {:?}, {:?} timestamps",
            self.window.get(),
            self.config.sweep_interval(),
            self.config.refresh_interval(),
            self.config.timestamp_source
        );

        let sweeper = self.sweeper().spawn(self.config.sweep_interval());
        let view = self.view_builder().spawn(self.config.refresh_interval());

        let ingestor = self.ingestor();
        let (sensor_tx, sensor_rx) = sensor_channel(self.config.sensor_channel_capacity);
        let consumer = ingestor.clone();
        let sensor_task = tokio::spawn(async move { consumer.run(sensor_rx).await });

        PipelineHandle {
            ingestor,
            window: self.window.clone(),
            sensor: Some(sensor_tx),
            sensor_task: Some(sensor_task),
            sweeper: Some(sweeper),
            view: Some(view),
            drain_timeout: self.config.io_timeout(),
        }
    }
}

/// A running pipeline.
pub struct PipelineHandle {
    ingestor: Ingestor,
    window: RetentionWindow,
    sensor: Option<SensorSender>,
    sensor_task: Option<JoinHandle<usize>>,
    sweeper: Option<SweeperHandle>,
    view: Option<ViewHandle>,
    drain_timeout: Duration,
}

impl PipelineHandle {
    /// Direct ingestion, bypassing the sensor channel.
    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    /// Sender for the location source. `None` after shutdown.
    pub fn sensor_sender(&self) -> Option<SensorSender> {
        self.sensor.clone()
    }

    /// Hot-reload the retention window for both sweeper and view.
    pub fn set_retention_window(&self, window: Duration) -> Result<()> {
        self.window.set(window)
    }

    pub fn view_state(&self) -> ViewState {
        self.view.as_ref().map_or(ViewState::Unsubscribed, |v| v.state())
    }

    /// Stop everything. Sensor events still queued get `drain_timeout` to be
    /// stored; returns how many sensor events were stored overall.
    pub async fn shutdown(mut self) -> usize {
        if let Some(view) = self.view.take() {
            view.shutdown().await;
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }

        self.sensor.take();
        let mut stored = 0;
        if let Some(mut task) = self.sensor_task.take() {
            match tokio::time::timeout(self.drain_timeout, &mut task).await {
                Ok(Ok(n)) => stored = n,
                Ok(Err(e)) => warn!("[Pipeline] Sensor consumer failed: {}", e),
                Err(_) => {
                    warn!("[Pipeline] Sensor senders still open after {:?}, aborting consumer", self.drain_timeout);
                    task.abort();
                }
            }
        }
        info!("[Pipeline] Stopped ({} sensor events stored)", stored);
        stored
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        if let Some(task) = self.sensor_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::heatmap::FeatureCollection;
    use crate::ingest::SensorEvent;
    use crate::publish::WatchPublisher;
    use crate::store::MemoryStore;
    use crate::GpsPoint;
    use tokio::sync::watch;

    const WAIT: Duration = Duration::from_secs(2);

    fn fast_config(window_secs: u64) -> PipelineConfig {
        PipelineConfig {
            retention_window_secs: window_secs,
            sweep_interval_ms: 10,
            refresh_interval_ms: 10,
            io_timeout_ms: 500,
            ..Default::default()
        }
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<FeatureCollection>, pred: F) -> FeatureCollection
    where
        F: FnMut(&FeatureCollection) -> bool,
    {
        tokio::time::timeout(WAIT, rx.wait_for(pred))
            .await
            .expect("timed out waiting for dataset")
            .expect("publisher dropped")
            .clone()
    }

    async fn wait_until_len(store: &MemoryStore, len: usize) {
        for _ in 0..200 {
            if store.len() == len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("store never reached {} records (has {})", len, store.len());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PipelineConfig { retention_window_secs: 0, ..Default::default() };
        let result = Pipeline::new(config, Arc::new(MemoryStore::new()), Arc::new(WatchPublisher::new()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_campus_scenario() {
        let clock = ManualClock::at_epoch();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let publisher = WatchPublisher::new();
        let mut rx = publisher.subscribe();

        let pipeline = Pipeline::new(fast_config(10), Arc::new(store.clone()), Arc::new(publisher.clone()))
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let handle = pipeline.start();

        let a = GpsPoint::new(34.4140, -119.8489);
        let b = GpsPoint::new(34.4150, -119.8500);

        // t=0: A
        handle.ingestor().ingest(a, Some(1.0), None).await.unwrap();
        // t=5: B
        clock.advance(Duration::from_secs(5));
        handle.ingestor().ingest(b, Some(2.0), None).await.unwrap();

        // t=8: both live
        clock.advance(Duration::from_secs(3));
        let published = wait_for(&mut rx, |fc| fc.len() == 2).await;
        assert!(published.contains(a, 1.0));
        assert!(published.contains(b, 2.0));

        // t=12: A swept, only B shown
        clock.advance(Duration::from_secs(4));
        wait_until_len(&store, 1).await;
        let published = wait_for(&mut rx, |fc| fc.len() == 1).await;
        assert!(published.contains(b, 2.0));
        assert!(!published.contains(a, 1.0));

        // t=16: nothing left
        clock.advance(Duration::from_secs(4));
        wait_for(&mut rx, |fc| fc.is_empty()).await;
        wait_until_len(&store, 0).await;

        handle.shutdown().await;
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_sensor_events_flow_to_the_heat_layer() {
        let store = MemoryStore::new();
        let publisher = WatchPublisher::new();
        let mut rx = publisher.subscribe();
        let pipeline =
            Pipeline::new(fast_config(300), Arc::new(store.clone()), Arc::new(publisher.clone())).unwrap();
        let handle = pipeline.start();

        let sensor = handle.sensor_sender().unwrap();
        let now = chrono::Utc::now();
        for i in 0..3 {
            sensor
                .send(SensorEvent {
                    coordinate: GpsPoint::new(34.414 + i as f64 * 0.001, -119.8489),
                    accuracy: Some(8.0),
                    timestamp: now,
                })
                .await
                .unwrap();
        }
        // Out of range, dropped by the ingestor
        sensor
            .send(SensorEvent { coordinate: GpsPoint::new(-95.0, 0.0), accuracy: None, timestamp: now })
            .await
            .unwrap();
        drop(sensor);

        let published = wait_for(&mut rx, |fc| fc.len() == 3).await;
        assert_eq!(published.total_magnitude(), 3.0);
        assert_eq!(handle.shutdown().await, 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_retention_reload_reaches_sweeper_and_view() {
        let clock = ManualClock::at_epoch();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let publisher = WatchPublisher::new();
        let mut rx = publisher.subscribe();
        let pipeline = Pipeline::new(fast_config(3600), Arc::new(store.clone()), Arc::new(publisher.clone()))
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        let handle = pipeline.start();

        handle.ingestor().ingest(GpsPoint::new(1.0, 1.0), None, None).await.unwrap();
        clock.advance(Duration::from_secs(120));
        wait_for(&mut rx, |fc| fc.len() == 1).await;

        handle.set_retention_window(Duration::from_secs(60)).unwrap();
        wait_for(&mut rx, |fc| fc.is_empty()).await;
        wait_until_len(&store, 0).await;
        handle.shutdown().await;
    }
}
