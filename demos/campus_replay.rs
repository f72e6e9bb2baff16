//! Replay a handful of campus check-ins through the full pipeline.
//!
//! Run with: cargo run --example campus_replay

use std::sync::Arc;
use std::time::Duration;

use heat_pipeline::{
    FeatureIndex, GpsPoint, ManualClock, MemoryStore, Pipeline, PipelineConfig, WatchPublisher,
};

#[tokio::main]
async fn main() -> heat_pipeline::Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .ok();

    let clock = ManualClock::at_epoch();
    let store = MemoryStore::with_clock(Arc::new(clock.clone()));
    let publisher = WatchPublisher::new();

    let config = PipelineConfig {
        retention_window_secs: 10,
        sweep_interval_ms: 50,
        refresh_interval_ms: 50,
        ..Default::default()
    };
    let center = config.center;
    let pipeline = Pipeline::new(config, Arc::new(store.clone()), Arc::new(publisher.clone()))?
        .with_clock(Arc::new(clock.clone()));
    let handle = pipeline.start();

    let check_ins = [
        (0, GpsPoint::new(34.4140, -119.8489), 1.0), // Storke Plaza
        (2, GpsPoint::new(34.4137, -119.8455), 3.0), // Library, study group
        (5, GpsPoint::new(34.4150, -119.8500), 2.0),
        (7, GpsPoint::new(34.4120, -119.8440), 1.0),
    ];

    let mut elapsed = 0;
    for (at, point, weight) in check_ins {
        clock.advance(Duration::from_secs(at - elapsed));
        elapsed = at;
        handle.ingestor().ingest(point, Some(weight), Some(10.0)).await?;
    }

    for step in [8u64, 12, 16, 20] {
        clock.advance(Duration::from_secs(step - elapsed));
        elapsed = step;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let layer = publisher.latest();
        let index = FeatureIndex::new(&layer);
        let nearby = index.within_radius(center, 250.0);
        println!(
            "t={:>2}s  stored={}  published={}  total weight={:.1}  within 250m of center={}",
            step,
            store.len(),
            layer.len(),
            layer.total_magnitude(),
            nearby.len()
        );
    }

    if let Some(mid) = publisher.latest().center() {
        println!("\nHeat center: ({:.5}, {:.5})", mid.latitude, mid.longitude);
    }
    println!("\nFinal GeoJSON: {}", publisher.latest().to_geojson());
    handle.shutdown().await;
    Ok(())
}
