//! The presence contract used by proximity sessions, and its adapter over a
//! [`Backend`].

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use streetpass_types::{now_ms, GridCellId, Identity, Interaction, PeerEntry, PeerSnapshot, Profile};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backend::{Backend, DisconnectAction};
use crate::parse::{parse_inbox, parse_snapshot};
use crate::{paths, PresenceError, Result};

/// Publish, withdraw and observe presence in grid cells.
pub trait PresenceChannel: Send + Sync + 'static {
    /// Write `entry` as `identity`'s presence in `cell`, replacing any
    /// previous entry there. The entry is removed automatically when the
    /// connection drops.
    fn publish(
        &self,
        identity: &Identity,
        cell: &GridCellId,
        entry: &PeerEntry,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove `identity`'s entry from `cell`. The cell is no longer touched
    /// when the connection drops.
    fn leave(&self, identity: &Identity, cell: &GridCellId)
        -> impl Future<Output = Result<()>> + Send;

    /// Observe the members of `cell`. The first update is the current
    /// membership.
    fn subscribe(&self, cell: &GridCellId)
        -> impl Future<Output = Result<Subscription<PeerSnapshot>>> + Send;

    /// Mirror the profile outside any cell, for lookups by identity.
    fn mirror_profile(
        &self,
        identity: &Identity,
        profile: &Profile,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A live stream of decoded updates from one backend path.
///
/// Dropping the subscription (or calling [`Subscription::unsubscribe`])
/// stops the underlying watch. An `Err` item is terminal.
pub struct Subscription<T> {
    path: String,
    updates: mpsc::UnboundedReceiver<Result<T>>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T> Subscription<T> {
    pub fn new(
        path: impl Into<String>,
        updates: mpsc::UnboundedReceiver<Result<T>>,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            path: path.into(),
            updates,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next update; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.updates.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// [`PresenceChannel`] over any [`Backend`], plus the per-user records and
/// the interaction inbox kept alongside presence.
pub struct BackendPresence<B> {
    backend: Arc<B>,
}

impl<B: Backend> BackendPresence<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Authenticate the connection as `identity`.
    pub async fn sign_in(&self, identity: &Identity) -> Result<()> {
        self.backend.sign_in(identity).await?;
        info!(identity = %identity, "Signed in to presence backend");
        Ok(())
    }

    /// Mark `identity` online in `cell`; the record flips to offline when
    /// the connection drops.
    pub async fn mark_online(&self, identity: &Identity, cell: &GridCellId) -> Result<()> {
        self.mark_online_at(identity, cell, now_ms()).await
    }

    async fn mark_online_at(&self, identity: &Identity, cell: &GridCellId, now: u64) -> Result<()> {
        let location = paths::user_location(identity);
        self.backend
            .set(
                &location,
                json!({"cell": cell.as_str(), "online": true, "lastUpdated": now}),
            )
            .await?;
        self.backend
            .on_disconnect(&location, DisconnectAction::Update(offline_fields(now)))
            .await
    }

    /// Mark `identity` offline in its user record.
    pub async fn mark_offline(&self, identity: &Identity) -> Result<()> {
        self.backend
            .update(&paths::user_location(identity), offline_fields(now_ms()))
            .await
    }

    /// Drop `interaction` into `to`'s inbox, replacing the previous one from
    /// `from`.
    pub async fn send_interaction(
        &self,
        from: &Identity,
        to: &Identity,
        interaction: &Interaction,
    ) -> Result<()> {
        interaction
            .validate()
            .map_err(|e| PresenceError::Protocol(e.to_string()))?;
        let value = serde_json::to_value(interaction)?;
        self.backend
            .set(&paths::inbox_entry(to, from), value)
            .await?;
        debug!(from = %from, to = %to, "Interaction sent");
        Ok(())
    }

    /// Observe `identity`'s inbox.
    pub async fn watch_inbox(
        &self,
        identity: &Identity,
    ) -> Result<Subscription<Vec<(Identity, Interaction)>>> {
        self.watch_parsed(paths::inbox(identity), parse_inbox).await
    }

    async fn watch_parsed<T: Send + 'static>(
        &self,
        path: String,
        parse: fn(&Value) -> T,
    ) -> Result<Subscription<T>> {
        let mut watch = self.backend.watch(&path).await?;
        let watch_id = watch.id;
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = watch.events.recv().await {
                let update = event.map(|value| parse(&value));
                let terminal = update.is_err();
                if tx.send(update).is_err() || terminal {
                    return;
                }
            }
            let _ = tx.send(Err(PresenceError::Disconnected));
        });

        let backend = Arc::clone(&self.backend);
        Ok(Subscription::new(path, rx, move || backend.unwatch(watch_id)))
    }
}

fn offline_fields(now: u64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("online".into(), Value::Bool(false));
    fields.insert("lastSeen".into(), Value::from(now));
    fields
}

impl<B: Backend> PresenceChannel for BackendPresence<B> {
    async fn publish(&self, identity: &Identity, cell: &GridCellId, entry: &PeerEntry) -> Result<()> {
        let member = paths::cell_member(cell, identity);
        self.backend
            .set(&member, serde_json::to_value(entry)?)
            .await?;
        self.backend
            .on_disconnect(&member, DisconnectAction::Remove)
            .await?;

        self.backend
            .set(&paths::current_location(identity), Value::from(cell.as_str()))
            .await?;

        self.mark_online_at(identity, cell, entry.last_active.unwrap_or_else(now_ms))
            .await?;

        debug!(identity = %identity, cell = %cell, "Published presence");
        Ok(())
    }

    async fn leave(&self, identity: &Identity, cell: &GridCellId) -> Result<()> {
        let member = paths::cell_member(cell, identity);
        self.backend.cancel_on_disconnect(&member).await?;
        self.backend.remove(&member).await?;
        debug!(identity = %identity, cell = %cell, "Left cell");
        Ok(())
    }

    async fn subscribe(&self, cell: &GridCellId) -> Result<Subscription<PeerSnapshot>> {
        self.watch_parsed(paths::cell_members(cell), parse_snapshot)
            .await
    }

    async fn mirror_profile(&self, identity: &Identity, profile: &Profile) -> Result<()> {
        self.backend
            .set(&paths::avatar(identity), serde_json::to_value(profile)?)
            .await
    }
}
