//! Encounter history command handlers.

use std::sync::Arc;

use serde_json::Value;
use streetpass_db::LocalStore;

use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Everyone this device has met, most recent first.
pub async fn get_encounters(state: &Arc<DaemonState>, params: &Value) -> Result {
    let limit = match params.get("limit") {
        None | Some(Value::Null) => usize::MAX,
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| RpcError::invalid_params("limit must be a non-negative integer"))?,
    };

    let encounters: Vec<_> = state.store.encounters().into_iter().take(limit).collect();
    serde_json::to_value(encounters).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Number of distinct peers ever met.
pub async fn get_encounter_count(state: &Arc<DaemonState>) -> Result {
    Ok(serde_json::json!({"count": state.store.encounter_count()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use streetpass_types::{Identity, PeerEntry, Profile};

    #[tokio::test]
    async fn test_encounter_history() {
        let state = testing::state().await;
        assert_eq!(get_encounter_count(&state).await.expect("count")["count"], 0);

        let mut profile = Profile::new_default(1);
        profile.display_name = "Bo".into();
        let entry = PeerEntry::new(profile, 2);
        let bo = Identity::parse("bo").expect("valid");
        let cy = Identity::parse("cy").expect("valid");
        state.store.record_encounter(&bo, &entry, 10).expect("record");
        state.store.record_encounter(&cy, &entry, 20).expect("record");
        state.store.record_encounter(&bo, &entry, 30).expect("record");

        assert_eq!(get_encounter_count(&state).await.expect("count")["count"], 2);

        let all = get_encounters(&state, &Value::Null).await.expect("list");
        assert_eq!(all[0]["peerId"], "bo");
        assert_eq!(all[0]["meetCount"], 2);
        assert_eq!(all[0]["firstMet"], 10);
        assert_eq!(all[0]["lastSeen"], 30);
        assert_eq!(all[1]["peerId"], "cy");

        let one = get_encounters(&state, &serde_json::json!({"limit": 1}))
            .await
            .expect("list");
        assert_eq!(one.as_array().map(Vec::len), Some(1));

        let err = get_encounters(&state, &serde_json::json!({"limit": -1}))
            .await
            .expect_err("bad limit");
        assert_eq!(err.code, -32602);
    }
}
