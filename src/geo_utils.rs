//! # Geographic Utilities
//!
//! Small geographic helpers used by feature queries.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`compute_bounds`] | Bounding box of a set of points |
//! | [`compute_center`] | Centroid of a set of points |
//! | [`meters_to_degrees`] | Convert meters to approximate degrees at a latitude |
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees).

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GpsPoint};

/// Great-circle distance in meters (spherical Earth, radius 6,371 km).
///
/// ```rust
/// use heat_pipeline::{GpsPoint, geo_utils};
///
/// let storke_tower = GpsPoint::new(34.4124, -119.8487);
/// let library = GpsPoint::new(34.4137, -119.8455);
/// let d = geo_utils::haversine_distance(&storke_tower, &library);
/// assert!(d > 250.0 && d < 400.0);
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Convert meters to approximate degrees at a given latitude.
///
/// Uses the longitude scale (the smaller degree) so the result is a
/// conservative square search radius.
#[inline]
pub fn meters_to_degrees(meters: f64, latitude: f64) -> f64 {
    let lat_rad = latitude.to_radians();
    let meters_per_degree = 111_320.0 * lat_rad.cos().max(0.1);
    meters / meters_per_degree
}

/// Bounding box of `points`, or `None` when empty.
pub fn compute_bounds(points: &[GpsPoint]) -> Option<Bounds> {
    if points.is_empty() {
        return None;
    }
    let mut min_lat = f64::MAX;
    let mut max_lat = f64::MIN;
    let mut min_lng = f64::MAX;
    let mut max_lng = f64::MIN;

    for p in points {
        min_lat = min_lat.min(p.latitude);
        max_lat = max_lat.max(p.latitude);
        min_lng = min_lng.min(p.longitude);
        max_lng = max_lng.max(p.longitude);
    }

    Some(Bounds { min_lat, max_lat, min_lng, max_lng })
}

/// Arithmetic mean of the points. Fine for campus-sized areas; does not
/// handle the antimeridian.
pub fn compute_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let sum_lat: f64 = points.iter().map(|p| p.latitude).sum();
    let sum_lng: f64 = points.iter().map(|p| p.longitude).sum();
    Some(GpsPoint::new(sum_lat / n, sum_lng / n))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GpsPoint::new(34.4140, -119.8489);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_haversine_distance_known_value() {
        // One thousandth of a degree of latitude is about 111m
        let a = GpsPoint::new(34.4140, -119.8489);
        let b = GpsPoint::new(34.4150, -119.8489);
        assert!(approx_eq(haversine_distance(&a, &b), 111.2, 1.0));
    }

    #[test]
    fn test_compute_bounds() {
        let points = vec![
            GpsPoint::new(34.4140, -119.8489),
            GpsPoint::new(34.4150, -119.8500),
            GpsPoint::new(34.4120, -119.8450),
        ];
        let bounds = compute_bounds(&points).unwrap();
        assert_eq!(bounds.min_lat, 34.4120);
        assert_eq!(bounds.max_lat, 34.4150);
        assert_eq!(bounds.min_lng, -119.8500);
        assert_eq!(bounds.max_lng, -119.8450);
        assert!(compute_bounds(&[]).is_none());
    }

    #[test]
    fn test_compute_center() {
        let points = vec![GpsPoint::new(34.40, -119.80), GpsPoint::new(34.42, -119.82)];
        let center = compute_center(&points).unwrap();
        assert!(approx_eq(center.latitude, 34.41, 1e-9));
        assert!(approx_eq(center.longitude, -119.81, 1e-9));
        assert!(compute_center(&[]).is_none());
    }

    #[test]
    fn test_meters_to_degrees() {
        let deg = meters_to_degrees(111_320.0, 0.0);
        assert!(approx_eq(deg, 1.0, 0.01));
        assert!(meters_to_degrees(111_320.0, 45.0) > 1.0);
    }
}
