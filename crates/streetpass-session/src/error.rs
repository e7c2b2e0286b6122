//! Session-level error taxonomy.

use serde::{Deserialize, Serialize};
use streetpass_types::LocationError;

/// Everything a session reports to its owner. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    #[error("location is unavailable")]
    LocationUnavailable,

    #[error("location permission denied")]
    LocationPermissionDenied,

    #[error("timed out waiting for a location fix")]
    LocationTimeout,

    /// The backend has no signed-in identity for this device.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Our own presence could not be written. Peers are still shown.
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// The cell subscription broke; peer updates stop until restart.
    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("local storage fault: {0}")]
    StorageFault(String),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("invalid share link: {0}")]
    InvalidLink(String),
}

impl From<LocationError> for SessionError {
    fn from(e: LocationError) -> Self {
        match e {
            LocationError::Unsupported => SessionError::LocationUnavailable,
            LocationError::PermissionDenied => SessionError::LocationPermissionDenied,
            LocationError::Timeout => SessionError::LocationTimeout,
        }
    }
}

impl From<streetpass_db::DbError> for SessionError {
    fn from(e: streetpass_db::DbError) -> Self {
        SessionError::StorageFault(e.to_string())
    }
}

impl From<streetpass_types::TypesError> for SessionError {
    fn from(e: streetpass_types::TypesError) -> Self {
        SessionError::InvalidProfile(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
