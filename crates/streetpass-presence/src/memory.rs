//! In-process backend over a shared [`PresenceTree`].
//!
//! Several `MemoryBackend`s over one tree behave like several devices
//! connected to the same realtime store. Dropping one (or calling
//! [`MemoryBackend::disconnect`]) runs its disconnect actions.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use streetpass_types::Identity;

use crate::backend::{Backend, DisconnectAction, Watch, WatchId};
use crate::tree::{PresenceTree, TreeClient};
use crate::Result;

pub struct MemoryBackend {
    client: Mutex<TreeClient>,
}

impl MemoryBackend {
    pub fn connect(tree: Arc<PresenceTree>) -> Self {
        Self {
            client: Mutex::new(TreeClient::new(tree)),
        }
    }

    fn client(&self) -> MutexGuard<'_, TreeClient> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulate losing the connection.
    pub fn disconnect(&self) {
        self.client().close();
    }

    pub fn is_connected(&self) -> bool {
        !self.client().is_closed()
    }
}

impl Backend for MemoryBackend {
    async fn sign_in(&self, identity: &Identity) -> Result<()> {
        self.client().sign_in(identity.clone())
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.client().set(path, value)
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.client().update(path, fields)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.client().remove(path)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.client().get(path)
    }

    async fn watch(&self, path: &str) -> Result<Watch> {
        self.client().watch(path)
    }

    fn unwatch(&self, id: WatchId) {
        self.client().unwatch(id);
    }

    async fn on_disconnect(&self, path: &str, action: DisconnectAction) -> Result<()> {
        self.client().on_disconnect(path, action)
    }

    async fn cancel_on_disconnect(&self, path: &str) -> Result<()> {
        self.client().cancel_on_disconnect(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PresenceError;
    use serde_json::json;

    fn identity(raw: &str) -> Identity {
        Identity::parse(raw).expect("valid identity")
    }

    #[tokio::test]
    async fn test_two_clients_share_a_tree() {
        let tree = Arc::new(PresenceTree::new());
        let a = MemoryBackend::connect(Arc::clone(&tree));
        let b = MemoryBackend::connect(Arc::clone(&tree));
        a.sign_in(&identity("a")).await.expect("sign in");
        b.sign_in(&identity("b")).await.expect("sign in");

        let mut watch = b.watch("cell").await.expect("watch");
        assert_eq!(watch.events.recv().await, Some(Ok(Value::Null)));

        a.set("cell/a", json!({"name": "A"})).await.expect("set");
        assert_eq!(
            watch.events.recv().await,
            Some(Ok(json!({"a": {"name": "A"}})))
        );
        assert_eq!(b.get("cell/a/name").await.expect("get"), json!("A"));
    }

    #[tokio::test]
    async fn test_unauthenticated_operations_fail() {
        let tree = Arc::new(PresenceTree::new());
        let a = MemoryBackend::connect(tree);
        assert_eq!(
            a.set("x", json!(1)).await,
            Err(PresenceError::AuthenticationRequired)
        );
        assert_eq!(
            a.on_disconnect("x", DisconnectAction::Remove).await,
            Err(PresenceError::AuthenticationRequired)
        );
    }

    #[tokio::test]
    async fn test_disconnect_cleans_up() {
        let tree = Arc::new(PresenceTree::new());
        let a = MemoryBackend::connect(Arc::clone(&tree));
        a.sign_in(&identity("a")).await.expect("sign in");
        a.set("cell/a", json!(1)).await.expect("set");
        a.on_disconnect("cell/a", DisconnectAction::Remove)
            .await
            .expect("register");
        let mut watch = a.watch("cell").await.expect("watch");
        let _ = watch.events.recv().await;

        a.disconnect();
        assert!(!a.is_connected());
        assert_eq!(tree.get("cell").expect("get"), Value::Null);
        assert_eq!(watch.events.recv().await, None);
        assert_eq!(a.get("cell").await, Err(PresenceError::Disconnected));
    }

    #[tokio::test]
    async fn test_unwatch_closes_stream() {
        let tree = Arc::new(PresenceTree::new());
        let a = MemoryBackend::connect(Arc::clone(&tree));
        a.sign_in(&identity("a")).await.expect("sign in");
        let mut watch = a.watch("cell").await.expect("watch");
        let _ = watch.events.recv().await;
        a.unwatch(watch.id);
        assert_eq!(watch.events.recv().await, None);
        assert_eq!(tree.watcher_count(), 0);
    }
}
