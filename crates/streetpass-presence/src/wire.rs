//! Relay wire protocol.
//!
//! Newline-delimited JSON over TCP, one frame per line.
//!
//! Client to relay:
//!
//! ```text
//! {"id": 1, "op": "sign_in", "identity": "abc"}
//! {"id": 2, "op": "set", "path": "locations/1_2/users/abc", "value": {...}}
//! {"id": 3, "op": "watch", "watch": 7, "path": "locations/1_2/users"}
//! {"id": 4, "op": "cancel_on_disconnect", "path": "locations/1_2/users/abc"}
//! ```
//!
//! Relay to client:
//!
//! ```text
//! {"type": "reply", "id": 2, "result": null}
//! {"type": "reply", "id": 3, "error": {"code": "auth_required", "message": "..."}}
//! {"type": "event", "watch": 7, "value": {...}}
//! ```
//!
//! Watch ids are chosen by the client so events can be routed before the
//! reply to the `watch` request arrives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use streetpass_types::Identity;

use crate::backend::{DisconnectAction, WatchEvent, WatchId};
use crate::PresenceError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SignIn {
        identity: Identity,
    },
    Set {
        path: String,
        value: Value,
    },
    Update {
        path: String,
        fields: Map<String, Value>,
    },
    Remove {
        path: String,
    },
    Get {
        path: String,
    },
    Watch {
        watch: WatchId,
        path: String,
    },
    Unwatch {
        watch: WatchId,
    },
    OnDisconnect {
        path: String,
        action: DisconnectAction,
    },
    CancelOnDisconnect {
        path: String,
    },
    Ping,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Reply {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Event {
        watch: WatchId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
}

impl ServerFrame {
    pub fn reply(id: u64, result: crate::Result<Value>) -> Self {
        match result {
            Ok(value) => ServerFrame::Reply {
                id,
                result: Some(value),
                error: None,
            },
            Err(e) => ServerFrame::Reply {
                id,
                result: None,
                error: Some(WireError::from(&e)),
            },
        }
    }

    pub fn event(watch: WatchId, event: WatchEvent) -> Self {
        match event {
            Ok(value) => ServerFrame::Event {
                watch,
                value: Some(value),
                error: None,
            },
            Err(e) => ServerFrame::Event {
                watch,
                value: None,
                error: Some(WireError::from(&e)),
            },
        }
    }
}

/// Outcome carried by a reply or event: an error wins, a missing value is
/// `null`.
pub fn outcome(value: Option<Value>, error: Option<WireError>) -> crate::Result<Value> {
    match error {
        Some(e) => Err(e.into()),
        None => Ok(value.unwrap_or(Value::Null)),
    }
}

/// An error as carried on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

pub const AUTH_REQUIRED: &str = "auth_required";
pub const INVALID_PATH: &str = "invalid_path";
pub const BAD_REQUEST: &str = "bad_request";
pub const INTERNAL: &str = "internal";

impl From<&PresenceError> for WireError {
    fn from(e: &PresenceError) -> Self {
        let code = match e {
            PresenceError::AuthenticationRequired => AUTH_REQUIRED,
            PresenceError::InvalidPath { .. } => INVALID_PATH,
            PresenceError::Protocol(_) => BAD_REQUEST,
            _ => INTERNAL,
        };
        WireError {
            code: code.to_string(),
            message: e.to_string(),
        }
    }
}

impl From<WireError> for PresenceError {
    fn from(e: WireError) -> Self {
        match e.code.as_str() {
            AUTH_REQUIRED => PresenceError::AuthenticationRequired,
            INVALID_PATH => PresenceError::InvalidPath {
                path: String::new(),
                reason: e.message,
            },
            BAD_REQUEST => PresenceError::Protocol(e.message),
            _ => PresenceError::Backend(e.message),
        }
    }
}
