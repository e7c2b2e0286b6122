//! Reaction and greeting command handlers.

use std::sync::Arc;

use serde_json::Value;
use streetpass_db::LocalStore;
use streetpass_presence::PresenceError;
use streetpass_types::interaction::{GREETINGS, REACTIONS};
use streetpass_types::{now_ms, Identity, Interaction, InteractionKind};
use tracing::info;

use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// The reaction and greeting catalogs.
pub async fn get_interaction_options(_state: &Arc<DaemonState>) -> Result {
    let reactions: Vec<Value> = REACTIONS
        .iter()
        .enumerate()
        .map(|(index, (emoji, label))| {
            serde_json::json!({"index": index, "emoji": emoji, "label": label})
        })
        .collect();
    let greetings: Vec<Value> = GREETINGS
        .iter()
        .enumerate()
        .map(|(index, text)| serde_json::json!({"index": index, "text": text}))
        .collect();

    Ok(serde_json::json!({"reactions": reactions, "greetings": greetings}))
}

/// Send a reaction or greeting to another device.
pub async fn send_interaction(state: &Arc<DaemonState>, params: &Value) -> Result {
    let to = params
        .get("to")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("to required"))?;
    let to = Identity::parse(to).map_err(|e| RpcError::invalid_params(&e.to_string()))?;
    let kind: InteractionKind = params
        .get("kind")
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("kind required"))
        .and_then(|v| {
            serde_json::from_value(v).map_err(|e| RpcError::invalid_params(&e.to_string()))
        })?;
    let index = params
        .get("index")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params("index required"))? as usize;

    let (from, from_name) = {
        let avatar = state.avatar.lock().await;
        (avatar.identity().clone(), avatar.profile().display_name.clone())
    };
    if to == from {
        return Err(RpcError::invalid_params("cannot send an interaction to yourself"));
    }

    let interaction = Interaction::new(kind, index, &from_name, now_ms())
        .map_err(|e| RpcError::invalid_params(&e.to_string()))?;

    state
        .presence
        .send_interaction(&from, &to, &interaction)
        .await
        .map_err(|e| match e {
            PresenceError::AuthenticationRequired => RpcError::not_ready(),
            other => RpcError::backend_error(&other.to_string()),
        })?;

    let recipient_name = recipient_name(state, &to);
    info!(to = %to, "Interaction sent");
    Ok(serde_json::json!({
        "sent": true,
        "message": interaction.describe_for(&recipient_name),
    }))
}

/// Best-known display name of `peer`: nearby first, then history.
fn recipient_name(state: &Arc<DaemonState>, peer: &Identity) -> String {
    if let Some(entry) = state.view.borrow().peers.get(peer) {
        return entry.profile.display_name.clone();
    }
    state
        .store
        .encounter(peer)
        .map(|record| record.profile.display_name)
        .unwrap_or_default()
}
