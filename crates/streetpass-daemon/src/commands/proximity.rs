//! Location feed and proximity session command handlers.

use std::sync::Arc;

use serde_json::Value;
use streetpass_session::SessionCommand;
use streetpass_types::{Coordinate, LocationError};

use super::send_to_session;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Feed a location fix from the UI's geolocation source.
pub async fn report_location(state: &Arc<DaemonState>, params: &Value) -> Result {
    let coordinate: Coordinate = serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_params(&e.to_string()))?;
    if !coordinate.is_valid() {
        return Err(RpcError::invalid_params("coordinate out of range"));
    }

    let cell = state.config.grid.cell_id(&coordinate);
    send_to_session(state, SessionCommand::Location(coordinate)).await?;
    Ok(serde_json::json!({"cell": cell}))
}

/// Report that the geolocation source failed.
pub async fn report_location_error(state: &Arc<DaemonState>, params: &Value) -> Result {
    let error: LocationError = params
        .get("error")
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("error required"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| RpcError::invalid_params(&e.to_string()))
        })?;

    send_to_session(state, SessionCommand::LocationFailed(error)).await?;
    Ok(serde_json::json!({"reported": true}))
}

/// The full session view.
pub async fn get_session_status(state: &Arc<DaemonState>) -> Result {
    let view = state.view.borrow().clone();
    serde_json::to_value(&view).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Everyone else in the current cell.
pub async fn get_nearby(state: &Arc<DaemonState>) -> Result {
    let view = state.view.borrow().clone();
    let peers: Vec<Value> = view
        .peers
        .iter()
        .map(|(id, entry)| {
            let mut value = serde_json::to_value(entry).unwrap_or_default();
            value["id"] = Value::from(id.as_str());
            value["initials"] = Value::from(entry.profile.initials());
            value
        })
        .collect();

    Ok(serde_json::json!({
        "cell": view.cell,
        "loading": view.loading,
        "publishError": view.publish_error,
        "count": peers.len(),
        "peers": peers,
    }))
}

/// Re-establish publish and subscription, clearing a halt.
pub async fn restart_session(state: &Arc<DaemonState>) -> Result {
    send_to_session(state, SessionCommand::Restart).await?;
    Ok(serde_json::json!({"restarted": true}))
}
