//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category.

pub mod avatar;
pub mod diagnostics;
pub mod encounters;
pub mod interactions;
pub mod proximity;

use std::sync::Arc;

use streetpass_session::{SessionCommand, SessionError};

use crate::rpc::RpcError;
use crate::DaemonState;

/// Hand `command` to the proximity session.
pub(crate) async fn send_to_session(
    state: &Arc<DaemonState>,
    command: SessionCommand,
) -> Result<(), RpcError> {
    state
        .session
        .send(command)
        .await
        .map_err(|_| RpcError::not_ready())
}

/// Map a session-level error onto the RPC error space.
pub(crate) fn session_error(e: SessionError) -> RpcError {
    match e {
        SessionError::InvalidProfile(detail) => RpcError::invalid_profile(&detail),
        SessionError::InvalidLink(detail) => RpcError::invalid_params(&detail),
        SessionError::AuthenticationRequired => RpcError::not_ready(),
        SessionError::PublishFailed(detail) | SessionError::SubscriptionFailed(detail) => {
            RpcError::backend_error(&detail)
        }
        other => RpcError::internal_error(&other.to_string()),
    }
}
