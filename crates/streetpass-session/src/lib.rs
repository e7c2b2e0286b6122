//! # streetpass-session
//!
//! Per-device orchestration: the avatar bootstrap ([`AvatarManager`]) and the
//! proximity state machine ([`ProximitySession`]) that joins the grid cell
//! of the latest location fix, watches who else is there and records every
//! sighting as an encounter.

pub mod avatar;
pub mod error;
pub mod session;
pub mod view;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use streetpass_grid::GridConfig;
use streetpass_types::Coordinate;

pub use avatar::AvatarManager;
pub use error::SessionError;
pub use session::{PeerUpdate, ProximitySession, SessionCommand, SessionHandle};
pub use view::{SessionState, SessionView};

/// Latitude used when no fix arrives in time.
pub const FALLBACK_LATITUDE: f64 = 34.0522;

/// Longitude used when no fix arrives in time.
pub const FALLBACK_LONGITUDE: f64 = -118.2437;

/// Tunables of a [`ProximitySession`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SessionConfig {
    pub grid: GridConfig,
    /// How long to wait for the first location fix before using `fallback`.
    pub location_timeout: Duration,
    /// How long to wait for the first peer snapshot before showing an empty
    /// list.
    pub peer_load_timeout: Duration,
    pub fallback: Coordinate,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            location_timeout: Duration::from_secs(5),
            peer_load_timeout: Duration::from_secs(5),
            fallback: Coordinate {
                latitude: FALLBACK_LATITUDE,
                longitude: FALLBACK_LONGITUDE,
                accuracy: 100.0,
                timestamp: 0,
            },
        }
    }
}

/// Serializable form of the fallback coordinate, for config files.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FallbackLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for FallbackLocation {
    fn default() -> Self {
        Self {
            latitude: FALLBACK_LATITUDE,
            longitude: FALLBACK_LONGITUDE,
        }
    }
}

impl From<FallbackLocation> for Coordinate {
    fn from(f: FallbackLocation) -> Self {
        Coordinate {
            latitude: f.latitude,
            longitude: f.longitude,
            accuracy: 100.0,
            timestamp: 0,
        }
    }
}
