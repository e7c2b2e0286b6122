//! Integration test harness for StreetPass.
//!
//! Devices here are real [`ProximitySession`]s over real
//! [`BackendPresence`] adapters and in-memory SQLite stores, sharing one
//! [`PresenceTree`] either in-process or through a relay.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p streetpass-integration-tests
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use streetpass_db::SqliteStore;
use streetpass_presence::{
    Backend, BackendPresence, DisconnectAction, MemoryBackend, PresenceError, PresenceTree,
    Result, Watch, WatchId,
};
use streetpass_session::{
    ProximitySession, SessionCommand, SessionConfig, SessionHandle, SessionView,
};
use streetpass_types::{Coordinate, Identity, Profile};

/// How long a test waits for a view condition before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// Session tunables for tests: no location fallback during a test run.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        location_timeout: Duration::from_secs(600),
        peer_load_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    }
}

pub fn identity(raw: &str) -> Identity {
    Identity::parse(raw).expect("valid identity")
}

pub fn profile(name: &str) -> Profile {
    let mut profile = Profile::new_default(1_700_000_000_000);
    profile.display_name = name.to_string();
    profile
}

/// One simulated device.
pub struct Device<B: Backend> {
    pub identity: Identity,
    pub store: Arc<SqliteStore>,
    pub presence: Arc<BackendPresence<B>>,
    pub session: SessionHandle,
}

impl<B: Backend> Device<B> {
    /// Sign `backend` in as `id` and start a session with a profile named
    /// `name`.
    pub async fn start(backend: B, id: &str, name: &str) -> Self {
        let identity = identity(id);
        let presence = Arc::new(BackendPresence::new(Arc::new(backend)));
        presence.sign_in(&identity).await.expect("sign in");

        let store = Arc::new(SqliteStore::open_memory().expect("open store"));
        let session = ProximitySession::new(
            Arc::clone(&presence),
            Arc::clone(&store),
            identity.clone(),
            test_config(),
        )
        .with_profile(profile(name))
        .spawn(16);

        Self {
            identity,
            store,
            presence,
            session,
        }
    }

    pub async fn move_to(&self, latitude: f64, longitude: f64) {
        let sent = self
            .session
            .send(SessionCommand::Location(Coordinate::new(latitude, longitude)))
            .await;
        assert!(sent, "session stopped");
    }

    /// Wait until the view satisfies `condition` and return it.
    pub async fn wait_for(&mut self, condition: impl FnMut(&SessionView) -> bool) -> SessionView {
        tokio::time::timeout(WAIT, self.session.view.wait_for(condition))
            .await
            .expect("view condition reached in time")
            .expect("session running")
            .clone()
    }

    pub fn view(&self) -> SessionView {
        self.session.current()
    }

    pub fn peer_names(&self) -> Vec<String> {
        self.view()
            .peers
            .values()
            .map(|entry| entry.profile.display_name.clone())
            .collect()
    }

    pub async fn shutdown(self) {
        self.session.shutdown().await;
    }
}

/// A device on its own connection to `tree`.
pub async fn memory_device(
    tree: &Arc<PresenceTree>,
    id: &str,
    name: &str,
) -> Device<MemoryBackend> {
    Device::start(MemoryBackend::connect(Arc::clone(tree)), id, name).await
}

/// A [`MemoryBackend`] whose presence writes can be made to fail.
pub struct FlakyBackend {
    inner: MemoryBackend,
    fail_presence_writes: AtomicBool,
}

impl FlakyBackend {
    pub fn new(tree: Arc<PresenceTree>) -> Self {
        Self {
            inner: MemoryBackend::connect(tree),
            fail_presence_writes: AtomicBool::new(false),
        }
    }

    /// Fail every write below `locations/` from now on.
    pub fn fail_presence_writes(&self, fail: bool) {
        self.fail_presence_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.fail_presence_writes.load(Ordering::SeqCst) && path.starts_with("locations/") {
            return Err(PresenceError::Backend("simulated write failure".into()));
        }
        Ok(())
    }
}

impl Backend for FlakyBackend {
    async fn sign_in(&self, identity: &Identity) -> Result<()> {
        self.inner.sign_in(identity).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.check(path)?;
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        self.check(path)?;
        self.inner.update(path, fields).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.check(path)?;
        self.inner.remove(path).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.inner.get(path).await
    }

    async fn watch(&self, path: &str) -> Result<Watch> {
        self.inner.watch(path).await
    }

    fn unwatch(&self, id: WatchId) {
        self.inner.unwatch(id)
    }

    async fn on_disconnect(&self, path: &str, action: DisconnectAction) -> Result<()> {
        self.inner.on_disconnect(path, action).await
    }

    async fn cancel_on_disconnect(&self, path: &str) -> Result<()> {
        self.inner.cancel_on_disconnect(path).await
    }
}
