//! The shared JSON tree behind every backend.
//!
//! [`PresenceTree`] holds the data and the watchers. [`TreeClient`] is one
//! connection's handle on it: it carries the signed-in identity, the
//! connection's watches and its disconnect actions, and runs those actions
//! when it is closed or dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use streetpass_types::Identity;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::backend::{DisconnectAction, Watch, WatchEvent, WatchId};
use crate::{paths, PresenceError, Result};

struct Watcher {
    path: Vec<String>,
    last: Value,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct TreeState {
    root: Map<String, Value>,
    watchers: BTreeMap<WatchId, Watcher>,
    next_watch: WatchId,
}

impl TreeState {
    /// Re-evaluate every watcher whose path overlaps `changed`.
    ///
    /// A watcher only hears about a change if its subtree value differs from
    /// what it last received. Watchers whose receiver is gone are dropped.
    fn notify(&mut self, changed: &[String]) {
        let TreeState { root, watchers, .. } = self;
        watchers.retain(|id, w| {
            if !(w.path.starts_with(changed) || changed.starts_with(&w.path)) {
                return true;
            }
            let current = lookup(root, &w.path).cloned().unwrap_or(Value::Null);
            if current == w.last {
                return true;
            }
            w.last = current.clone();
            let alive = w.tx.send(Ok(current)).is_ok();
            if !alive {
                debug!(watch = *id, "Dropping watcher with closed receiver");
            }
            alive
        });
    }
}

/// A hierarchical JSON store with subtree watches.
#[derive(Default)]
pub struct PresenceTree {
    state: Mutex<TreeState>,
}

impl PresenceTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TreeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value at `path`, `null` if absent.
    pub fn get(&self, path: &str) -> Result<Value> {
        let segs = paths::segments(path)?;
        Ok(lookup(&self.state().root, &segs)
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Replace the value at `path`. `null` and empty objects remove it.
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        let segs = paths::segments(path)?;
        check_keys(path, &value)?;
        let mut state = self.state();
        write(&mut state.root, &segs, prune(value));
        state.notify(&segs);
        Ok(())
    }

    /// Write each field below `path`. Field keys may themselves be
    /// `/`-separated relative paths. Nothing is written if any key is
    /// invalid.
    pub fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let base = paths::segments(path)?;
        let mut writes = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let mut segs = base.clone();
            segs.extend(paths::segments(&key)?);
            check_keys(path, &value)?;
            writes.push((segs, prune(value)));
        }

        let mut state = self.state();
        for (segs, value) in writes {
            write(&mut state.root, &segs, value);
        }
        state.notify(&base);
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        self.set(path, Value::Null)
    }

    /// Watch the subtree at `path`. The current value is sent immediately.
    pub fn watch(&self, path: &str, tx: mpsc::UnboundedSender<WatchEvent>) -> Result<WatchId> {
        let segs = paths::segments(path)?;
        let mut state = self.state();
        let id = state.next_watch;
        state.next_watch += 1;

        let current = lookup(&state.root, &segs).cloned().unwrap_or(Value::Null);
        // A closed receiver is cleaned up on the next notify.
        let _ = tx.send(Ok(current.clone()));
        state.watchers.insert(
            id,
            Watcher {
                path: segs,
                last: current,
                tx,
            },
        );
        Ok(id)
    }

    /// Remove a watch; its channel closes. Unknown ids are ignored.
    pub fn unwatch(&self, id: WatchId) {
        self.state().watchers.remove(&id);
    }

    pub fn watcher_count(&self) -> usize {
        self.state().watchers.len()
    }
}

fn lookup<'a>(root: &'a Map<String, Value>, segs: &[String]) -> Option<&'a Value> {
    let (first, rest) = segs.split_first()?;
    rest.iter().try_fold(root.get(first)?, |node, seg| node.get(seg))
}

fn write(root: &mut Map<String, Value>, segs: &[String], value: Option<Value>) {
    match value {
        Some(value) => insert(root, segs, value),
        None => delete(root, segs),
    }
}

fn insert(root: &mut Map<String, Value>, segs: &[String], value: Value) {
    let Some((last, parents)) = segs.split_last() else {
        return;
    };
    let mut node = root;
    for seg in parents {
        let child = node
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        let Value::Object(next) = child else {
            return;
        };
        node = next;
    }
    node.insert(last.clone(), value);
}

/// Remove the value at `segs`, then any parent left empty.
fn delete(map: &mut Map<String, Value>, segs: &[String]) {
    match segs {
        [] => {}
        [last] => {
            map.remove(last);
        }
        [head, rest @ ..] => {
            let mut emptied = false;
            if let Some(Value::Object(child)) = map.get_mut(head) {
                delete(child, rest);
                emptied = child.is_empty();
            }
            if emptied {
                map.remove(head);
            }
        }
    }
}

/// Strip nulls and empty objects. `None` means nothing is left.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            (!pruned.is_empty()).then_some(Value::Object(pruned))
        }
        other => Some(other),
    }
}

/// Object keys inside a written value must be valid path segments.
fn check_keys(path: &str, value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key.contains('/') || paths::segments(key).is_err() {
                    return Err(PresenceError::InvalidPath {
                        path: path.to_string(),
                        reason: format!("invalid key {key:?} in value"),
                    });
                }
                check_keys(path, child)?;
            }
            Ok(())
        }
        Value::Array(items) => items.iter().try_for_each(|item| check_keys(path, item)),
        _ => Ok(()),
    }
}

/// One connection's handle on a [`PresenceTree`].
pub struct TreeClient {
    tree: Arc<PresenceTree>,
    identity: Option<Identity>,
    watches: Vec<WatchId>,
    on_disconnect: Vec<(String, DisconnectAction)>,
    closed: bool,
}

impl TreeClient {
    pub fn new(tree: Arc<PresenceTree>) -> Self {
        Self {
            tree,
            identity: None,
            watches: Vec::new(),
            on_disconnect: Vec::new(),
            closed: false,
        }
    }

    pub fn sign_in(&mut self, identity: Identity) -> Result<()> {
        if self.closed {
            return Err(PresenceError::Disconnected);
        }
        debug!(identity = %identity, "Client signed in");
        self.identity = Some(identity);
        Ok(())
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn authorized(&self) -> Result<()> {
        if self.closed {
            Err(PresenceError::Disconnected)
        } else if self.identity.is_none() {
            Err(PresenceError::AuthenticationRequired)
        } else {
            Ok(())
        }
    }

    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        self.authorized()?;
        self.tree.set(path, value)
    }

    pub fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.authorized()?;
        self.tree.update(path, fields)
    }

    pub fn remove(&self, path: &str) -> Result<()> {
        self.authorized()?;
        self.tree.remove(path)
    }

    pub fn get(&self, path: &str) -> Result<Value> {
        self.authorized()?;
        self.tree.get(path)
    }

    pub fn watch(&mut self, path: &str) -> Result<Watch> {
        self.authorized()?;
        let (tx, events) = mpsc::unbounded_channel();
        let id = self.tree.watch(path, tx)?;
        self.watches.push(id);
        Ok(Watch { id, events })
    }

    /// Stop one of this client's watches.
    pub fn unwatch(&mut self, id: WatchId) {
        if let Some(pos) = self.watches.iter().position(|w| *w == id) {
            self.watches.swap_remove(pos);
            self.tree.unwatch(id);
        }
    }

    pub fn on_disconnect(&mut self, path: &str, action: DisconnectAction) -> Result<()> {
        self.authorized()?;
        paths::segments(path)?;
        match self.on_disconnect.iter_mut().find(|(p, _)| p == path) {
            Some(slot) => slot.1 = action,
            None => self.on_disconnect.push((path.to_string(), action)),
        }
        Ok(())
    }

    /// Forget the disconnect action registered at `path`, if any.
    pub fn cancel_on_disconnect(&mut self, path: &str) -> Result<()> {
        self.authorized()?;
        paths::segments(path)?;
        self.on_disconnect.retain(|(p, _)| p != path);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Drop every watch and run the registered disconnect actions.
    ///
    /// Idempotent; later operations fail with `Disconnected`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for id in self.watches.drain(..) {
            self.tree.unwatch(id);
        }
        for (path, action) in self.on_disconnect.drain(..) {
            let result = match action {
                DisconnectAction::Remove => self.tree.remove(&path),
                DisconnectAction::Set(value) => self.tree.set(&path, value),
                DisconnectAction::Update(fields) => self.tree.update(&path, fields),
            };
            if let Err(e) = result {
                warn!(path = %path, "Disconnect action failed: {e}");
            }
        }
        debug!(identity = ?self.identity, "Client closed");
    }
}

impl Drop for TreeClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_set_get_nested() {
        let tree = PresenceTree::new();
        tree.set("a/b/c", json!(1)).expect("set");
        assert_eq!(tree.get("a").expect("get"), json!({"b": {"c": 1}}));
        assert_eq!(tree.get("a/b/c").expect("get"), json!(1));
        assert_eq!(tree.get("a/x").expect("get"), Value::Null);
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let tree = PresenceTree::new();
        tree.set("a/b/c", json!(1)).expect("set");
        tree.set("a/d", json!(2)).expect("set");
        tree.remove("a/b/c").expect("remove");
        assert_eq!(tree.get("a").expect("get"), json!({"d": 2}));
        tree.remove("a/d").expect("remove");
        assert_eq!(tree.get("a").expect("get"), Value::Null);
    }

    #[test]
    fn test_null_and_empty_values_remove() {
        let tree = PresenceTree::new();
        tree.set("a", json!({"x": 1})).expect("set");
        tree.set("a", json!({"y": null})).expect("set");
        assert_eq!(tree.get("a").expect("get"), Value::Null);
    }

    #[test]
    fn test_set_through_scalar() {
        let tree = PresenceTree::new();
        tree.set("a", json!(5)).expect("set");
        tree.set("a/b", json!(6)).expect("set");
        assert_eq!(tree.get("a").expect("get"), json!({"b": 6}));
    }

    #[test]
    fn test_update_keeps_siblings() {
        let tree = PresenceTree::new();
        tree.set("u", json!({"cell": "1_1", "online": true}))
            .expect("set");
        tree.update("u", fields(json!({"online": false, "meta/seen": 9})))
            .expect("update");
        assert_eq!(
            tree.get("u").expect("get"),
            json!({"cell": "1_1", "online": false, "meta": {"seen": 9}})
        );
    }

    #[test]
    fn test_update_with_bad_key_writes_nothing() {
        let tree = PresenceTree::new();
        let result = tree.update("u", fields(json!({"ok": 1, "bad.key": 2})));
        assert!(matches!(result, Err(PresenceError::InvalidPath { .. })));
        assert_eq!(tree.get("u").expect("get"), Value::Null);
    }

    #[test]
    fn test_invalid_paths_and_keys() {
        let tree = PresenceTree::new();
        assert!(tree.set("", json!(1)).is_err());
        assert!(tree.set("a/b#", json!(1)).is_err());
        assert!(tree.set("a", json!({"x/y": 1})).is_err());
        assert!(tree.get("a//b").is_err());
    }

    #[test]
    fn test_watch_sends_initial_value() {
        let tree = PresenceTree::new();
        tree.set("cell/a", json!(1)).expect("set");
        let (tx, mut rx) = mpsc::unbounded_channel();
        tree.watch("cell", tx).expect("watch");
        assert_eq!(rx.try_recv().expect("initial"), Ok(json!({"a": 1})));

        let (tx, mut rx) = mpsc::unbounded_channel();
        tree.watch("empty", tx).expect("watch");
        assert_eq!(rx.try_recv().expect("initial"), Ok(Value::Null));
    }

    #[test]
    fn test_watch_notifications() {
        let tree = PresenceTree::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tree.watch("cell", tx).expect("watch");
        let _ = rx.try_recv();

        // Descendant write.
        tree.set("cell/a", json!({"name": "A"})).expect("set");
        assert_eq!(rx.try_recv().expect("event"), Ok(json!({"a": {"name": "A"}})));

        // Same value again: no event.
        tree.set("cell/a/name", json!("A")).expect("set");
        assert!(rx.try_recv().is_err());

        // Unrelated write: no event.
        tree.set("other/a", json!(1)).expect("set");
        assert!(rx.try_recv().is_err());

        // Ancestor removal.
        tree.set("cell/b", json!(2)).expect("set");
        let _ = rx.try_recv();
        tree.remove("cell").expect("remove");
        assert_eq!(rx.try_recv().expect("event"), Ok(Value::Null));
    }

    #[test]
    fn test_unwatch_and_closed_receivers() {
        let tree = PresenceTree::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = tree.watch("a", tx).expect("watch");
        tree.unwatch(id);
        assert_eq!(tree.watcher_count(), 0);
        let _ = rx.try_recv();
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        tree.watch("a", tx).expect("watch");
        drop(rx);
        tree.set("a", json!(1)).expect("set");
        assert_eq!(tree.watcher_count(), 0);
    }

    #[test]
    fn test_client_requires_sign_in() {
        let tree = Arc::new(PresenceTree::new());
        let mut client = TreeClient::new(tree);
        assert_eq!(
            client.set("a", json!(1)),
            Err(PresenceError::AuthenticationRequired)
        );
        assert!(matches!(
            client.watch("a"),
            Err(PresenceError::AuthenticationRequired)
        ));
        client
            .sign_in(Identity::parse("me").expect("valid"))
            .expect("sign in");
        assert!(client.set("a", json!(1)).is_ok());
    }

    #[test]
    fn test_close_runs_disconnect_actions() {
        let tree = Arc::new(PresenceTree::new());
        let mut client = TreeClient::new(Arc::clone(&tree));
        client
            .sign_in(Identity::parse("me").expect("valid"))
            .expect("sign in");

        client.set("cell/me", json!({"name": "Me"})).expect("set");
        client.set("users/me", json!({"online": true, "cell": "c"})).expect("set");
        client
            .on_disconnect("cell/me", DisconnectAction::Set(json!("stale")))
            .expect("register");
        // Replaces the earlier registration for the same path.
        client
            .on_disconnect("cell/me", DisconnectAction::Remove)
            .expect("register");
        client
            .on_disconnect(
                "users/me",
                DisconnectAction::Update(fields(json!({"online": false}))),
            )
            .expect("register");
        let mut watch = client.watch("cell").expect("watch");
        let _ = watch.events.try_recv();

        client.close();

        assert_eq!(tree.get("cell/me").expect("get"), Value::Null);
        assert_eq!(
            tree.get("users/me").expect("get"),
            json!({"online": false, "cell": "c"})
        );
        assert_eq!(tree.watcher_count(), 0);
        assert_eq!(client.get("cell"), Err(PresenceError::Disconnected));
    }

    #[test]
    fn test_cancelled_action_does_not_run() {
        let tree = Arc::new(PresenceTree::new());
        let mut client = TreeClient::new(Arc::clone(&tree));
        client
            .sign_in(Identity::parse("me").expect("valid"))
            .expect("sign in");
        client
            .on_disconnect("old/me", DisconnectAction::Remove)
            .expect("register");
        client
            .on_disconnect("new/me", DisconnectAction::Remove)
            .expect("register");
        client.cancel_on_disconnect("old/me").expect("cancel");
        client.cancel_on_disconnect("never/me").expect("unknown path");

        // Someone else writes the old path after we left it.
        tree.set("old/me", json!("theirs")).expect("set");
        tree.set("new/me", json!("ours")).expect("set");
        client.close();

        assert_eq!(tree.get("old/me").expect("get"), json!("theirs"));
        assert_eq!(tree.get("new/me").expect("get"), Value::Null);
    }

    #[test]
    fn test_drop_closes_client() {
        let tree = Arc::new(PresenceTree::new());
        {
            let mut client = TreeClient::new(Arc::clone(&tree));
            client
                .sign_in(Identity::parse("me").expect("valid"))
                .expect("sign in");
            client.set("cell/me", json!(1)).expect("set");
            client
                .on_disconnect("cell/me", DisconnectAction::Remove)
                .expect("register");
        }
        assert_eq!(tree.get("cell/me").expect("get"), Value::Null);
    }
}
