//! Location reports and their stored document shape.

use std::fmt;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::GpsPoint;

/// Weight used when a reporting client supplies none.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Opaque identifier assigned by the store when a report is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    /// Fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ReportId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ReportId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observation of a subject's position.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReport {
    pub id: ReportId,
    pub coordinate: GpsPoint,
    /// Report intensity (group size in some clients). Always positive.
    pub weight: f64,
    pub reported_at: DateTime<Utc>,
    /// Sensor accuracy radius in meters. Advisory only.
    pub accuracy: Option<f64>,
}

impl LocationReport {
    /// Age of the report at `now`. Reports stamped in the future have zero age.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.reported_at).to_std().unwrap_or_default()
    }

    /// True while the report is younger than `window`.
    pub fn is_live(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        self.age(now) < window
    }
}

/// A report about to be written. The store fills in the id and, when
/// `reported_at` is `None`, its own server timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub coordinate: GpsPoint,
    pub weight: f64,
    pub accuracy: Option<f64>,
    pub reported_at: Option<DateTime<Utc>>,
}

/// Wire-level `{lat, lng}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl From<GpsPoint> for LatLng {
    fn from(p: GpsPoint) -> Self {
        Self { lat: p.latitude, lng: p.longitude }
    }
}

impl From<LatLng> for GpsPoint {
    fn from(l: LatLng) -> Self {
        GpsPoint::new(l.lat, l.lng)
    }
}

/// A record as held by the document store:
/// `{location: {lat, lng}, weight, reportedAt, accuracy?}`.
///
/// Every field is optional because other writers share the collection.
/// Use [`ReportDocument::to_report`] to get a validated [`LocationReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDocument {
    pub id: ReportId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
}

impl ReportDocument {
    /// Build the stored form of a report.
    pub fn from_report(report: &LocationReport) -> Self {
        Self {
            id: report.id.clone(),
            location: Some(report.coordinate.into()),
            weight: Some(report.weight),
            reported_at: Some(report.reported_at),
            accuracy: report.accuracy,
        }
    }

    /// Convert into a report, or `None` when the document has no usable
    /// location, timestamp or weight. A missing weight reads as
    /// [`DEFAULT_WEIGHT`]; a zero, negative or non-finite one rejects the
    /// document.
    pub fn to_report(&self) -> Option<LocationReport> {
        let coordinate: GpsPoint = self.location?.into();
        if !coordinate.is_valid() {
            return None;
        }
        let reported_at = self.reported_at?;
        let weight = match self.weight {
            None => DEFAULT_WEIGHT,
            Some(w) if w.is_finite() && w > 0.0 => w,
            Some(w) => {
                debug!("[ReportDocument] Skipping {}: weight {}", self.id, w);
                return None;
            }
        };

        Some(LocationReport {
            id: self.id.clone(),
            coordinate,
            weight,
            reported_at,
            accuracy: self.accuracy,
        })
    }
}
