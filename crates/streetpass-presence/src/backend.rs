//! The realtime backend contract.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use streetpass_types::Identity;
use tokio::sync::mpsc;

use crate::{PresenceError, Result};

/// Identifies one watch on one connection.
pub type WatchId = u64;

/// A full value of the watched subtree, or the error that ended the watch.
///
/// An absent subtree is delivered as `Value::Null`.
pub type WatchEvent = std::result::Result<Value, PresenceError>;

/// A write the backend applies on the client's behalf once its connection
/// goes away.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisconnectAction {
    Remove,
    Set(Value),
    Update(Map<String, Value>),
}

/// A live subtree watch.
///
/// The first event is the current value of the subtree; every later event
/// is the new value after a change. The channel closes when the watch is
/// removed or the connection is lost.
#[derive(Debug)]
pub struct Watch {
    pub id: WatchId,
    pub events: mpsc::UnboundedReceiver<WatchEvent>,
}

/// A connection to a hierarchical realtime store.
///
/// Every operation except `sign_in` requires a signed-in identity and fails
/// with [`PresenceError::AuthenticationRequired`] otherwise.
pub trait Backend: Send + Sync + 'static {
    /// Authenticate this connection as `identity`.
    fn sign_in(&self, identity: &Identity) -> impl Future<Output = Result<()>> + Send;

    /// Replace the value at `path`. Writing `null` removes it.
    fn set(&self, path: &str, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Write each field of `fields` below `path`, leaving siblings alone.
    fn update(&self, path: &str, fields: Map<String, Value>)
        -> impl Future<Output = Result<()>> + Send;

    fn remove(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Current value at `path`, `null` if absent.
    fn get(&self, path: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Watch the subtree at `path`.
    fn watch(&self, path: &str) -> impl Future<Output = Result<Watch>> + Send;

    /// Stop a watch. Unknown ids are ignored.
    fn unwatch(&self, id: WatchId);

    /// Register `action` to run at `path` when this connection is lost.
    ///
    /// A later registration for the same path replaces the earlier one.
    fn on_disconnect(
        &self,
        path: &str,
        action: DisconnectAction,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Drop the action registered at `path` so it never runs. Paths without
    /// a registration are ignored.
    fn cancel_on_disconnect(&self, path: &str) -> impl Future<Output = Result<()>> + Send;
}
