//! Diagnostics command handlers.

use std::sync::Arc;

use serde_json::Value;

use crate::events::EventFilter;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Liveness check.
pub async fn ping(state: &Arc<DaemonState>) -> Result {
    let backend = state.presence.backend();
    Ok(serde_json::json!({
        "pong": true,
        "version": env!("CARGO_PKG_VERSION"),
        "backend": backend.kind(),
        "connected": backend.is_connected(),
        "events": state.event_bus.sequence(),
    }))
}

/// Read the optional `filter` of a `subscribe_events` call.
pub fn parse_filter(params: &Value) -> std::result::Result<EventFilter, RpcError> {
    match params.get("filter") {
        None | Some(Value::Null) => Ok(EventFilter::default()),
        Some(filter) => serde_json::from_value(filter.clone())
            .map_err(|e| RpcError::invalid_params(&format!("filter: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        let filter = parse_filter(&serde_json::json!({})).expect("empty");
        assert!(filter.categories.is_none());

        let filter = parse_filter(&serde_json::json!({"filter": {"categories": ["nearby"]}}))
            .expect("categories");
        assert_eq!(filter.categories, Some(vec!["nearby".to_string()]));

        let err = parse_filter(&serde_json::json!({"filter": {"categories": 3}}))
            .expect_err("bad filter");
        assert_eq!(err.code, -32602);
    }
}
