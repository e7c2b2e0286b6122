//! Identity and avatar command handlers.

use std::sync::Arc;

use serde_json::Value;
use streetpass_session::SessionCommand;
use streetpass_types::{now_ms, ProfileUpdate};
use tracing::info;

use super::{send_to_session, session_error};
use crate::events::Event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Get this device's identity.
pub async fn get_identity(state: &Arc<DaemonState>) -> Result {
    let avatar = state.avatar.lock().await;
    Ok(serde_json::json!({"identity": avatar.identity()}))
}

/// Build the shareable link, optionally against another `base_url`.
pub async fn get_share_link(state: &Arc<DaemonState>, params: &Value) -> Result {
    let base_url = params
        .get("base_url")
        .and_then(|v| v.as_str())
        .unwrap_or(&state.config.share.base_url);
    let link = state
        .avatar
        .lock()
        .await
        .share_link(base_url)
        .map_err(session_error)?;
    Ok(serde_json::json!({"link": link}))
}

/// Take over the identity carried by a shared link.
pub async fn adopt_shared_link(state: &Arc<DaemonState>, params: &Value) -> Result {
    let link = params
        .get("link")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("link required"))?;

    let (adopted, profile) = {
        let mut avatar = state.avatar.lock().await;
        let adopted = avatar.adopt_link(link, now_ms()).map_err(session_error)?;
        (adopted, avatar.profile().clone())
    };

    let Some(identity) = adopted else {
        return Ok(serde_json::json!({"adopted": false}));
    };
    state.switch_identity(identity.clone(), profile).await;

    Ok(serde_json::json!({"adopted": true, "identity": identity}))
}

/// Get the avatar profile.
pub async fn get_profile(state: &Arc<DaemonState>) -> Result {
    let avatar = state.avatar.lock().await;
    let profile = avatar.profile();
    let mut value = serde_json::to_value(profile)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    value["initials"] = Value::from(profile.initials());
    Ok(value)
}

/// Merge a partial edit into the profile, save it and re-publish.
pub async fn update_profile(state: &Arc<DaemonState>, params: &Value) -> Result {
    let update: ProfileUpdate = serde_json::from_value(params.clone())
        .map_err(|e| RpcError::invalid_profile(&e.to_string()))?;
    if update.is_empty() {
        return Err(RpcError::invalid_params("no profile fields given"));
    }

    let profile = {
        let mut avatar = state.avatar.lock().await;
        avatar.update(&update, now_ms()).map_err(session_error)?.clone()
    };
    info!(name = %profile.display_name, "Profile updated");

    send_to_session(state, SessionCommand::Profile(profile.clone())).await?;

    let value = serde_json::to_value(&profile)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    state
        .event_bus
        .emit(Event::now("ProfileUpdated", value.clone()));
    Ok(value)
}

/// Wipe profile, identity and encounters, and start over as a new device.
pub async fn reset_local_data(state: &Arc<DaemonState>) -> Result {
    let (identity, profile) = {
        let mut avatar = state.avatar.lock().await;
        avatar.reset(now_ms()).map_err(session_error)?;
        (avatar.identity().clone(), avatar.profile().clone())
    };
    state.switch_identity(identity.clone(), profile).await;

    Ok(serde_json::json!({"reset": true, "identity": identity}))
}
