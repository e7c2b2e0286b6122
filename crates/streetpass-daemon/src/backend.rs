//! The presence backend the daemon talks to.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use streetpass_presence::{
    Backend, DisconnectAction, MemoryBackend, PresenceTree, RemoteBackend, Result, Watch, WatchId,
};
use streetpass_types::Identity;
use tracing::info;

/// Either a relay connection or a private in-process tree.
pub enum DaemonBackend {
    /// No relay configured; only this daemon is ever present.
    Local(MemoryBackend),
    Remote(RemoteBackend),
}

impl DaemonBackend {
    /// Connect to the relay at `addr`, or stand up a private tree when it
    /// is empty.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        if addr.is_empty() {
            info!("No relay configured, using an in-process presence tree");
            return Ok(Self::local(Arc::new(PresenceTree::new())));
        }
        let remote = RemoteBackend::connect_with_timeout(addr, timeout).await?;
        info!("Connected to relay at {addr}");
        Ok(Self::Remote(remote))
    }

    pub fn local(tree: Arc<PresenceTree>) -> Self {
        Self::Local(MemoryBackend::connect(tree))
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Local(b) => b.is_connected(),
            Self::Remote(b) => b.is_connected(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "relay",
        }
    }
}

impl Backend for DaemonBackend {
    async fn sign_in(&self, identity: &Identity) -> Result<()> {
        match self {
            Self::Local(b) => b.sign_in(identity).await,
            Self::Remote(b) => b.sign_in(identity).await,
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        match self {
            Self::Local(b) => b.set(path, value).await,
            Self::Remote(b) => b.set(path, value).await,
        }
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        match self {
            Self::Local(b) => b.update(path, fields).await,
            Self::Remote(b) => b.update(path, fields).await,
        }
    }

    async fn remove(&self, path: &str) -> Result<()> {
        match self {
            Self::Local(b) => b.remove(path).await,
            Self::Remote(b) => b.remove(path).await,
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        match self {
            Self::Local(b) => b.get(path).await,
            Self::Remote(b) => b.get(path).await,
        }
    }

    async fn watch(&self, path: &str) -> Result<Watch> {
        match self {
            Self::Local(b) => b.watch(path).await,
            Self::Remote(b) => b.watch(path).await,
        }
    }

    fn unwatch(&self, id: WatchId) {
        match self {
            Self::Local(b) => b.unwatch(id),
            Self::Remote(b) => b.unwatch(id),
        }
    }

    async fn on_disconnect(&self, path: &str, action: DisconnectAction) -> Result<()> {
        match self {
            Self::Local(b) => b.on_disconnect(path, action).await,
            Self::Remote(b) => b.on_disconnect(path, action).await,
        }
    }

    async fn cancel_on_disconnect(&self, path: &str) -> Result<()> {
        match self {
            Self::Local(b) => b.cancel_on_disconnect(path).await,
            Self::Remote(b) => b.cancel_on_disconnect(path).await,
        }
    }
}
