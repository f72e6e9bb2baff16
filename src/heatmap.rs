//! Heat layer features.
//!
//! Turns the live subset of location reports into weighted point features:
//! - one [`AggregatedFeature`] per live report, magnitude = weight
//! - the whole set is rebuilt from scratch each time (no diff state)
//! - output serializes to GeoJSON for Mapbox-style heatmap layers
//!
//! [`FeatureIndex`] adds viewport and radius lookups over a built set.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rstar::{RTree, RTreeObject, AABB};
use serde_json::{json, Value};

use crate::geo_utils::{compute_bounds, compute_center, haversine_distance, meters_to_degrees};
use crate::report::{LocationReport, ReportDocument};
use crate::{Bounds, GpsPoint};

/// A single point with a numeric magnitude, the unit a heat layer consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct AggregatedFeature {
    pub coordinate: GpsPoint,
    pub magnitude: f64,
}

impl AggregatedFeature {
    pub fn from_report(report: &LocationReport) -> Self {
        Self {
            coordinate: report.coordinate,
            magnitude: report.weight,
        }
    }
}

/// The complete dataset at one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureCollection {
    pub features: Vec<AggregatedFeature>,
    /// When the set was computed. `None` for a never-built collection.
    pub generated_at: Option<DateTime<Utc>>,
}

impl FeatureCollection {
    /// An empty set computed at `now`, for "no data" rendering.
    pub fn empty_at(now: DateTime<Utc>) -> Self {
        Self {
            features: Vec::new(),
            generated_at: Some(now),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn total_magnitude(&self) -> f64 {
        self.features.iter().map(|f| f.magnitude).sum()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        let points: Vec<GpsPoint> = self.features.iter().map(|f| f.coordinate).collect();
        compute_bounds(&points)
    }

    /// Unweighted mean position of the features, `None` when empty.
    pub fn center(&self) -> Option<GpsPoint> {
        let points: Vec<GpsPoint> = self.features.iter().map(|f| f.coordinate).collect();
        compute_center(&points)
    }

    /// True if some feature sits exactly at `coordinate` with `magnitude`.
    pub fn contains(&self, coordinate: GpsPoint, magnitude: f64) -> bool {
        self.features
            .iter()
            .any(|f| f.coordinate == coordinate && f.magnitude == magnitude)
    }

    /// GeoJSON `FeatureCollection` of `Point`s with the magnitude in
    /// `properties.mag`.
    pub fn to_geojson(&self) -> Value {
        let features: Vec<Value> = self
            .features
            .iter()
            .map(|f| {
                json!({
                    "type": "Feature",
                    "geometry": {
                        "type": "Point",
                        "coordinates": [f.coordinate.longitude, f.coordinate.latitude],
                    },
                    "properties": { "mag": f.magnitude },
                })
            })
            .collect();

        json!({
            "type": "FeatureCollection",
            "features": features,
        })
    }
}

/// Build the feature set from reports: keep those younger than `window`
/// at `now`, one feature each.
pub fn build_features(reports: &[LocationReport], now: DateTime<Utc>, window: Duration) -> FeatureCollection {
    #[cfg(feature = "parallel")]
    let features: Vec<AggregatedFeature> = {
        use rayon::prelude::*;
        reports
            .par_iter()
            .filter(|r| r.is_live(now, window))
            .map(AggregatedFeature::from_report)
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let features: Vec<AggregatedFeature> = reports
        .iter()
        .filter(|r| r.is_live(now, window))
        .map(AggregatedFeature::from_report)
        .collect();

    FeatureCollection {
        features,
        generated_at: Some(now),
    }
}

/// Same as [`build_features`] but straight from stored documents.
/// Documents without a valid coordinate or timestamp are skipped.
pub fn build_features_from_documents(
    documents: &[ReportDocument],
    now: DateTime<Utc>,
    window: Duration,
) -> FeatureCollection {
    let reports: Vec<LocationReport> = documents.iter().filter_map(ReportDocument::to_report).collect();
    build_features(&reports, now, window)
}

/// Feature position for spatial indexing.
#[derive(Debug, Clone, Copy)]
struct IndexedFeature {
    index: usize,
    lng: f64,
    lat: f64,
}

impl RTreeObject for IndexedFeature {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lng, self.lat])
    }
}

/// R-tree over a [`FeatureCollection`] for viewport and radius lookups.
pub struct FeatureIndex<'a> {
    collection: &'a FeatureCollection,
    rtree: RTree<IndexedFeature>,
}

impl<'a> FeatureIndex<'a> {
    pub fn new(collection: &'a FeatureCollection) -> Self {
        let entries: Vec<IndexedFeature> = collection
            .features
            .iter()
            .enumerate()
            .map(|(index, f)| IndexedFeature {
                index,
                lng: f.coordinate.longitude,
                lat: f.coordinate.latitude,
            })
            .collect();
        Self {
            collection,
            rtree: RTree::bulk_load(entries),
        }
    }

    /// Features inside `bounds` (edges inclusive).
    pub fn in_bounds(&self, bounds: &Bounds) -> Vec<AggregatedFeature> {
        let envelope = AABB::from_corners(
            [bounds.min_lng, bounds.min_lat],
            [bounds.max_lng, bounds.max_lat],
        );
        let mut hits: Vec<usize> = self
            .rtree
            .locate_in_envelope(&envelope)
            .map(|e| e.index)
            .collect();
        hits.sort_unstable();
        hits.into_iter().map(|i| self.collection.features[i]).collect()
    }

    /// Features within `radius_meters` of `center` (haversine).
    ///
    /// The candidate box does not wrap at the antimeridian, and its longitude
    /// padding stops growing past about 84 degrees of latitude, so results
    /// near the poles or across +/-180 longitude can be incomplete.
    pub fn within_radius(&self, center: GpsPoint, radius_meters: f64) -> Vec<AggregatedFeature> {
        let pad = meters_to_degrees(radius_meters, center.latitude);
        let search = Bounds {
            min_lat: center.latitude - pad,
            max_lat: center.latitude + pad,
            min_lng: center.longitude - pad,
            max_lng: center.longitude + pad,
        };
        self.in_bounds(&search)
            .into_iter()
            .filter(|f| haversine_distance(&center, &f.coordinate) <= radius_meters)
            .collect()
    }
}
