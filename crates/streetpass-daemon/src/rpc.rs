//! JSON-RPC server over Unix socket.
//!
//! Listens on a Unix domain socket, accepts connections, and dispatches
//! JSON-RPC method calls to the appropriate command handlers. A connection
//! that calls `subscribe_events` also receives matching events as
//! `"event"` notifications, interleaved with its responses.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::commands;
use crate::events::EventFilter;
use crate::DaemonState;

/// JSON-RPC request.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC response.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    /// JSON-RPC version.
    pub jsonrpc: String,
    /// Request ID.
    pub id: serde_json::Value,
    /// Result or error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC notification carrying a daemon event.
#[derive(Debug, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: serde_json::Value,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcError {
    /// Error code.
    pub code: i32,
    /// Error name.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

impl RpcError {
    // Standard JSON-RPC errors

    /// Parse error (-32700).
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "PARSE_ERROR".to_string(),
            data: None,
        }
    }

    /// Invalid request (-32600).
    pub fn invalid_request() -> Self {
        Self {
            code: -32600,
            message: "INVALID_REQUEST".to_string(),
            data: None,
        }
    }

    /// Method not found (-32601).
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: "METHOD_NOT_FOUND".to_string(),
            data: Some(serde_json::json!({"method": method})),
        }
    }

    /// Invalid params (-32602).
    pub fn invalid_params(detail: &str) -> Self {
        Self {
            code: -32602,
            message: "INVALID_PARAMS".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Internal error (-32603).
    pub fn internal_error(detail: &str) -> Self {
        Self {
            code: -32603,
            message: "INTERNAL_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// The proximity session is not running (-32010).
    pub fn not_ready() -> Self {
        Self {
            code: -32010,
            message: "NOT_READY".to_string(),
            data: None,
        }
    }

    /// Profile failed validation (-32020).
    pub fn invalid_profile(detail: &str) -> Self {
        Self {
            code: -32020,
            message: "INVALID_PROFILE".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }

    /// Presence backend failure (-32030).
    pub fn backend_error(detail: &str) -> Self {
        Self {
            code: -32030,
            message: "BACKEND_ERROR".to_string(),
            data: Some(serde_json::json!({"detail": detail})),
        }
    }
}

/// The RPC server.
pub struct RpcServer {
    state: Arc<DaemonState>,
    socket_path: PathBuf,
}

impl RpcServer {
    /// Create a new RPC server.
    pub fn new(state: Arc<DaemonState>, socket_path: PathBuf) -> Self {
        Self { state, socket_path }
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> anyhow::Result<()> {
        // Remove stale socket file
        let _ = std::fs::remove_file(&self.socket_path);

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("IPC server listening on {:?}", self.socket_path);

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = self.state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(state, stream).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(
    state: Arc<DaemonState>,
    stream: tokio::net::UnixStream,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Responses and event notifications share one writer.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(async move {
        while let Some(mut frame) = out_rx.recv().await {
            frame.push('\n');
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut events: Option<JoinHandle<()>> = None;

    let result = async {
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break; // EOF
            }

            let response = match serde_json::from_str::<RpcRequest>(&line) {
                Ok(request) if request.jsonrpc != "2.0" => {
                    RpcResponse::error(request.id, RpcError::invalid_request())
                }
                Ok(request) => match request.method.as_str() {
                    "subscribe_events" => {
                        let id = request.id.clone();
                        match subscribe_events(&state, &request.params, &out_tx) {
                            Ok((task, result)) => {
                                if let Some(previous) = events.replace(task) {
                                    previous.abort();
                                }
                                RpcResponse::success(id, result)
                            }
                            Err(e) => RpcResponse::error(id, e),
                        }
                    }
                    "unsubscribe_events" => {
                        let was_subscribed = match events.take() {
                            Some(task) => {
                                task.abort();
                                true
                            }
                            None => false,
                        };
                        RpcResponse::success(
                            request.id,
                            serde_json::json!({"unsubscribed": was_subscribed}),
                        )
                    }
                    _ => dispatch_request(state.clone(), request).await,
                },
                Err(_) => RpcResponse::error(serde_json::Value::Null, RpcError::parse_error()),
            };

            if out_tx.send(serde_json::to_string(&response)?).is_err() {
                break;
            }
        }
        anyhow::Ok(())
    }
    .await;

    if let Some(task) = events.take() {
        task.abort();
    }
    drop(out_tx);
    if let Ok(Err(e)) = writer_task.await {
        debug!("Writer closed: {e}");
    }
    result
}

/// Start forwarding events matching the filter in `params` to `out`.
fn subscribe_events(
    state: &Arc<DaemonState>,
    params: &serde_json::Value,
    out: &mpsc::UnboundedSender<String>,
) -> Result<(JoinHandle<()>, serde_json::Value), RpcError> {
    let filter = commands::diagnostics::parse_filter(params)?;
    let mut rx = state.event_bus.subscribe();
    let out = out.clone();

    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !filter.matches(&event) {
                        continue;
                    }
                    let notification = RpcNotification {
                        jsonrpc: "2.0".to_string(),
                        method: "event".to_string(),
                        params: serde_json::json!(event),
                    };
                    let Ok(frame) = serde_json::to_string(&notification) else {
                        continue;
                    };
                    if out.send(frame).is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {skipped} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    Ok((
        task,
        serde_json::json!({"subscribed": true, "sequence": state.event_bus.sequence()}),
    ))
}

/// Dispatch a JSON-RPC request to the appropriate command handler.
pub async fn dispatch_request(state: Arc<DaemonState>, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    let method = request.method.as_str();

    debug!("Dispatching RPC method: {}", method);

    let result = match method {
        // Identity and avatar
        "get_identity" => commands::avatar::get_identity(&state).await,
        "get_share_link" => commands::avatar::get_share_link(&state, &request.params).await,
        "adopt_shared_link" => {
            commands::avatar::adopt_shared_link(&state, &request.params).await
        }
        "get_profile" => commands::avatar::get_profile(&state).await,
        "update_profile" => commands::avatar::update_profile(&state, &request.params).await,
        "reset_local_data" => commands::avatar::reset_local_data(&state).await,

        // Proximity session
        "report_location" => commands::proximity::report_location(&state, &request.params).await,
        "report_location_error" => {
            commands::proximity::report_location_error(&state, &request.params).await
        }
        "get_session_status" => commands::proximity::get_session_status(&state).await,
        "get_nearby" => commands::proximity::get_nearby(&state).await,
        "restart_session" => commands::proximity::restart_session(&state).await,

        // Encounter history
        "get_encounters" => commands::encounters::get_encounters(&state, &request.params).await,
        "get_encounter_count" => commands::encounters::get_encounter_count(&state).await,

        // Interactions
        "get_interaction_options" => commands::interactions::get_interaction_options(&state).await,
        "send_interaction" => {
            commands::interactions::send_interaction(&state, &request.params).await
        }

        // Diagnostics
        "ping" => commands::diagnostics::ping(&state).await,

        _ => Err(RpcError::method_not_found(method)),
    };

    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => RpcResponse::error(id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn request(method: &str, params: serde_json::Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: serde_json::json!(1),
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(RpcError::not_ready().code, -32010);
        assert_eq!(RpcError::invalid_profile("x").code, -32020);
        assert_eq!(RpcError::backend_error("x").code, -32030);

        let err = RpcError::method_not_found("unknown");
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "METHOD_NOT_FOUND");
    }

    #[test]
    fn test_rpc_response_shapes() {
        let resp = RpcResponse::success(serde_json::json!(1), serde_json::json!({"count": 3}));
        let json = serde_json::to_value(&resp).expect("serialize");
        assert_eq!(json["result"]["count"], 3);
        assert!(json.get("error").is_none());

        let resp = RpcResponse::error(serde_json::json!(1), RpcError::internal_error("test"));
        let json = serde_json::to_value(&resp).expect("serialize");
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["code"], -32603);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let state = testing::state().await;
        let resp = dispatch_request(state, request("mint_coins", serde_json::json!({}))).await;
        assert_eq!(resp.error.map(|e| e.code), Some(-32601));
    }

    #[tokio::test]
    async fn test_dispatch_ping() {
        let state = testing::state().await;
        let resp = dispatch_request(state, request("ping", serde_json::Value::Null)).await;
        let result = resp.result.expect("result");
        assert_eq!(result["pong"], true);
        assert_eq!(result["backend"], "local");
    }

    #[tokio::test]
    async fn test_socket_round_trip_with_events() {
        let dir = std::env::temp_dir().join(format!("streetpassd-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let socket_path = dir.join("rpc.sock");

        let state = testing::state().await;
        let server = RpcServer::new(state.clone(), socket_path.clone());
        let server_task = tokio::spawn(async move { server.run().await });

        let stream = loop {
            match tokio::net::UnixStream::connect(&socket_path).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"subscribe_events\",\"params\":{\"filter\":{\"event_types\":[\"ProfileUpdated\"]}}}\n")
            .await
            .expect("write");
        let reply = lines.next_line().await.expect("read").expect("line");
        let reply: serde_json::Value = serde_json::from_str(&reply).expect("json");
        assert_eq!(reply["result"]["subscribed"], true);

        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"update_profile\",\"params\":{\"name\":\"Ann\"}}\n")
            .await
            .expect("write");

        let mut saw_reply = false;
        let mut saw_event = false;
        while !(saw_reply && saw_event) {
            let line = lines.next_line().await.expect("read").expect("line");
            let frame: serde_json::Value = serde_json::from_str(&line).expect("json");
            if frame["id"] == 2 {
                assert_eq!(frame["result"]["name"], "Ann");
                saw_reply = true;
            } else {
                assert_eq!(frame["method"], "event");
                assert_eq!(frame["params"]["event_type"], "ProfileUpdated");
                saw_event = true;
            }
        }

        writer.write_all(b"not json\n").await.expect("write");
        let line = lines.next_line().await.expect("read").expect("line");
        let frame: serde_json::Value = serde_json::from_str(&line).expect("json");
        assert_eq!(frame["error"]["code"], -32700);

        server_task.abort();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
