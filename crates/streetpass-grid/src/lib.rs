//! # streetpass-grid
//!
//! Maps coordinates onto fixed-size, axis-aligned latitude/longitude cells.
//!
//! Two coordinates share a cell iff `floor(lat / size)` and `floor(lon / size)`
//! are both equal. This is bucketing, not clustering: two points a few
//! centimetres apart on either side of a cell edge never share a cell.

use serde::{Deserialize, Serialize};
use streetpass_types::{Coordinate, GridCellId};

/// Default cell edge in degrees (~11 m at the equator).
pub const DEFAULT_CELL_SIZE: f64 = 0.0001;

/// Mean Earth radius used by [`distance_meters`].
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Grid errors.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("cell size must be finite and positive, got {0}")]
    InvalidCellSize(f64),
}

/// Grid parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Cell edge in degrees.
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
}

fn default_cell_size() -> f64 {
    DEFAULT_CELL_SIZE
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), GridError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(GridError::InvalidCellSize(self.cell_size));
        }
        Ok(())
    }

    pub fn cell_id(&self, coordinate: &Coordinate) -> GridCellId {
        cell_id(coordinate, self.cell_size)
    }
}

/// Cell containing `coordinate`.
pub fn cell_id(coordinate: &Coordinate, cell_size: f64) -> GridCellId {
    cell_id_for(coordinate.latitude, coordinate.longitude, cell_size)
}

/// Cell containing `(latitude, longitude)`.
///
/// NaN input is not rejected; it yields an id containing `NaN`. Callers
/// validate coordinates upstream.
pub fn cell_id_for(latitude: f64, longitude: f64, cell_size: f64) -> GridCellId {
    let lat_index = axis_index(latitude, cell_size);
    let lon_index = axis_index(longitude, cell_size);
    GridCellId::new(format!("{lat_index}_{lon_index}"))
}

fn axis_index(value: f64, cell_size: f64) -> f64 {
    // + 0.0 turns -0.0 into 0.0 so both render as "0".
    (value / cell_size).floor() + 0.0
}

/// Great-circle distance in meters (haversine, spherical Earth).
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// [`distance_meters`] between two coordinates.
pub fn distance_between(a: &Coordinate, b: &Coordinate) -> f64 {
    distance_meters(a.latitude, a.longitude, b.latitude, b.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_format() {
        let id = cell_id_for(34.0522, -118.2437, DEFAULT_CELL_SIZE);
        assert_eq!(id.as_str(), "340522_-1182437");
    }

    #[test]
    fn test_cell_id_is_stable() {
        let coord = Coordinate::new(51.50735, -0.12776);
        assert_eq!(
            cell_id(&coord, DEFAULT_CELL_SIZE),
            cell_id(&coord, DEFAULT_CELL_SIZE)
        );
    }

    #[test]
    fn test_same_floor_same_cell() {
        let a = cell_id_for(34.0522, -118.2437, DEFAULT_CELL_SIZE);
        let b = cell_id_for(34.05225, -118.24365, DEFAULT_CELL_SIZE);
        assert_eq!(a, b);
    }

    #[test]
    fn test_straddling_points_differ() {
        // -118.24371 / 0.0001 floors to -1182438, one cell west of -118.2437.
        let a = cell_id_for(34.0522, -118.2437, DEFAULT_CELL_SIZE);
        let b = cell_id_for(34.05225, -118.24371, DEFAULT_CELL_SIZE);
        assert_ne!(a, b);
        assert_eq!(b.as_str(), "340522_-1182438");
        assert!(distance_meters(34.0522, -118.2437, 34.05225, -118.24371) < 10.0);
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        assert_eq!(cell_id_for(-0.0, 0.0, DEFAULT_CELL_SIZE).as_str(), "0_0");
    }

    #[test]
    fn test_floor_not_truncate_below_zero() {
        assert_eq!(cell_id_for(-0.00005, 0.00005, DEFAULT_CELL_SIZE).as_str(), "-1_0");
    }

    #[test]
    fn test_nan_propagates() {
        let id = cell_id_for(f64::NAN, 1.0, DEFAULT_CELL_SIZE);
        assert!(id.as_str().starts_with("NaN_"));
    }

    #[test]
    fn test_coarser_cells_merge() {
        let config = GridConfig { cell_size: 0.01 };
        let a = config.cell_id(&Coordinate::new(34.051, -118.241));
        let b = config.cell_id(&Coordinate::new(34.059, -118.249));
        assert_eq!(a, b);
    }

    #[test]
    fn test_config_validation() {
        assert!(GridConfig::default().validate().is_ok());
        assert!(GridConfig { cell_size: 0.0 }.validate().is_err());
        assert!(GridConfig { cell_size: -1.0 }.validate().is_err());
        assert!(GridConfig { cell_size: f64::NAN }.validate().is_err());
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance_meters(34.0522, -118.2437, 34.0522, -118.2437), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let ab = distance_meters(34.0522, -118.2437, 40.7128, -74.0060);
        let ba = distance_meters(40.7128, -74.0060, 34.0522, -118.2437);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_distance_known_value() {
        // Los Angeles to New York, ~3936 km on a 6371 km sphere.
        let d = distance_between(
            &Coordinate::new(34.0522, -118.2437),
            &Coordinate::new(40.7128, -74.0060),
        );
        assert!((d - 3_936_000.0).abs() < 5_000.0, "got {d}");
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = distance_meters(0.0, 0.0, 1.0, 0.0);
        let expected = EARTH_RADIUS_METERS * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6);
    }
}
