//! # streetpass-presence
//!
//! Presence in grid cells on top of a realtime hierarchical store.
//!
//! This crate implements:
//!
//! - [`channel`] - the [`PresenceChannel`] contract consumed by the session
//!   layer and [`BackendPresence`], its adapter over any [`Backend`]
//! - [`backend`] - the [`Backend`] contract: set / update / remove / get,
//!   subtree watches, and disconnect-triggered cleanup
//! - [`tree`] - [`PresenceTree`], the shared JSON tree that implements the
//!   backend semantics, and [`TreeClient`], one connection's view of it
//! - [`memory`] - [`MemoryBackend`], an in-process backend over a shared tree
//! - [`remote`] - [`RemoteBackend`], a TCP client of a relay
//! - [`relay`] - [`RelayServer`], which serves a tree over TCP
//! - [`wire`] - the JSON-lines frames exchanged between the two
//!
//! ## Paths
//!
//! ```text
//! locations/{cell}/users/{id}   presence entry, removed on disconnect
//! users/{id}/avatar             mirrored profile
//! users/{id}/currentLocation    last joined cell
//! users/{id}/location           {cell, online, lastUpdated | lastSeen}
//! inbox/{recipient}/{sender}    last interaction from sender
//! ```

pub mod backend;
pub mod channel;
pub mod memory;
pub mod parse;
pub mod paths;
pub mod relay;
pub mod remote;
pub mod tree;
pub mod wire;

pub use backend::{Backend, DisconnectAction, Watch, WatchEvent, WatchId};
pub use channel::{BackendPresence, PresenceChannel, Subscription};
pub use memory::MemoryBackend;
pub use relay::RelayServer;
pub use remote::RemoteBackend;
pub use tree::{PresenceTree, TreeClient};

/// Presence and backend errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PresenceError {
    /// No identity has signed in on this connection yet.
    #[error("authentication required")]
    AuthenticationRequired,

    /// The path is empty or contains a forbidden segment.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The connection to the backend is gone.
    #[error("backend connection lost")]
    Disconnected,

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No reply arrived in time.
    #[error("backend did not reply within {0} ms")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PresenceError {
    fn from(e: std::io::Error) -> Self {
        PresenceError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PresenceError {
    fn from(e: serde_json::Error) -> Self {
        PresenceError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PresenceError>;
