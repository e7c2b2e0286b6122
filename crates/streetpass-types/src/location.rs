//! Coordinates, grid cell identifiers and location source failures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single fix from the device location source. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    /// Degrees, WGS84.
    pub latitude: f64,
    /// Degrees, WGS84.
    pub longitude: f64,
    /// Horizontal accuracy in meters.
    #[serde(default)]
    pub accuracy: f64,
    /// When the fix was taken.
    #[serde(default)]
    pub timestamp: u64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            timestamp: 0,
        }
    }

    /// Both axes are finite and inside the WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Opaque key of a grid cell, `"{lat_index}_{lon_index}"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridCellId(String);

impl GridCellId {
    /// Wrap an already-formatted cell key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GridCellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<GridCellId> for String {
    fn from(id: GridCellId) -> Self {
        id.0
    }
}

/// Failures reported by the device location source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum LocationError {
    /// The platform has no location API.
    #[error("location is not supported on this device")]
    Unsupported,

    /// The user declined the location permission.
    #[error("location permission denied")]
    PermissionDenied,

    /// No fix arrived within the acquisition window.
    #[error("timed out waiting for a location fix")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validity() {
        assert!(Coordinate::new(34.0522, -118.2437).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -180.5).is_valid());
    }

    #[test]
    fn test_coordinate_deserialize_defaults() {
        let coord: Coordinate =
            serde_json::from_str(r#"{"latitude": 1.5, "longitude": 2.5}"#).expect("parse");
        assert_eq!(coord.accuracy, 0.0);
        assert_eq!(coord.timestamp, 0);
    }

    #[test]
    fn test_grid_cell_id_serializes_as_string() {
        let id = GridCellId::new("340522_-1182437");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"340522_-1182437\"");
        assert_eq!(id.to_string(), "340522_-1182437");
    }

    #[test]
    fn test_location_error_wire_names() {
        let json = serde_json::to_string(&LocationError::PermissionDenied).expect("serialize");
        assert_eq!(json, "\"permission_denied\"");
    }
}
