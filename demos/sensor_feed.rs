//! Feed simulated device fixes through the sensor channel.
//!
//! Run with: cargo run --example sensor_feed

use std::sync::Arc;
use std::time::Duration;

use heat_pipeline::{GpsPoint, MemoryStore, Pipeline, PipelineConfig, SensorEvent, WatchPublisher};

#[tokio::main]
async fn main() -> heat_pipeline::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Debug)
        .init()
        .ok();

    let config = PipelineConfig::from_json(r#"{"retention_window_secs": 5, "sweep_interval_ms": 500, "refresh_interval_ms": 200}"#)?;
    let store = MemoryStore::new();
    let publisher = WatchPublisher::new();
    let mut layer = publisher.subscribe();

    let pipeline = Pipeline::new(config, Arc::new(store.clone()), Arc::new(publisher.clone()))?;
    let handle = pipeline.start();
    let Some(sensor) = handle.sensor_sender() else {
        return Ok(());
    };

    // A walker crossing campus, one fix every 100ms, plus one bogus fix
    let producer = tokio::spawn(async move {
        for i in 0..20 {
            let fix = SensorEvent {
                coordinate: GpsPoint::new(34.4120 + i as f64 * 0.0002, -119.8480),
                accuracy: Some(5.0 + i as f64),
                timestamp: chrono::Utc::now(),
            };
            if sensor.send(fix).await.is_err() {
                break;
            }
            if i == 10 {
                let bogus = SensorEvent {
                    coordinate: GpsPoint::new(120.0, 0.0),
                    accuracy: None,
                    timestamp: chrono::Utc::now(),
                };
                let _ = sensor.send(bogus).await;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    let watcher = tokio::spawn(async move {
        while layer.changed().await.is_ok() {
            let points = layer.borrow_and_update().len();
            println!("heat layer now has {} points", points);
        }
    });

    producer.await.ok();
    tokio::time::sleep(Duration::from_secs(6)).await;
    println!("stored reports after expiry window: {}", store.len());

    let stored = handle.shutdown().await;
    watcher.abort();
    println!("sensor events stored: {}", stored);
    Ok(())
}
