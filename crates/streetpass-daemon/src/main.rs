//! streetpassd: the StreetPass device daemon.
//!
//! Single OS process running a Tokio async runtime. It owns the local store,
//! the presence backend connection and the proximity session. The UI talks
//! to it via JSON-RPC over a Unix socket and feeds it location fixes.
//!
//! Usage: `streetpassd [shared-link]`. A shared link (`...?user={id}`) given
//! at startup makes this device take over that identity.

mod backend;
mod commands;
mod config;
mod events;
mod rpc;
mod watchers;

use std::sync::Arc;

use streetpass_db::SqliteStore;
use streetpass_presence::BackendPresence;
use streetpass_session::{AvatarManager, ProximitySession, SessionCommand, SessionView};
use streetpass_types::{now_ms, Identity, Profile};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backend::DaemonBackend;
use crate::config::DaemonConfig;
use crate::events::{Event, EventBus};
use crate::rpc::RpcServer;

/// Buffered session commands before `report_location` and friends wait.
const SESSION_COMMAND_BUFFER: usize = 64;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Configuration.
    pub config: DaemonConfig,
    /// Local store.
    pub store: Arc<SqliteStore>,
    /// Presence on the configured backend.
    pub presence: Arc<BackendPresence<DaemonBackend>>,
    /// Identity and profile.
    pub avatar: Mutex<AvatarManager<SqliteStore>>,
    /// Current identity, for background tasks that follow it.
    pub identity: watch::Sender<Identity>,
    /// Proximity session inbox.
    pub session: mpsc::Sender<SessionCommand>,
    /// Latest session view.
    pub view: watch::Receiver<SessionView>,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
}

impl DaemonState {
    /// Bootstrap the avatar, sign in to the backend and start the session
    /// and its background watchers. Returns the state and the session task.
    pub async fn start(
        config: DaemonConfig,
        store: Arc<SqliteStore>,
        backend: DaemonBackend,
        shared_link: Option<&str>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let avatar = AvatarManager::bootstrap(Arc::clone(&store), shared_link, now_ms());
        let identity = avatar.identity().clone();
        let profile = avatar.profile().clone();

        let presence = Arc::new(BackendPresence::new(Arc::new(backend)));
        if let Err(e) = presence.sign_in(&identity).await {
            // The session reports AuthenticationRequired until restarted.
            warn!("Presence sign-in failed: {e}");
        }

        let session = ProximitySession::new(
            Arc::clone(&presence),
            Arc::clone(&store),
            identity.clone(),
            config.session_config(),
        )
        .with_profile(profile);
        let handle = session.spawn(SESSION_COMMAND_BUFFER);

        let (identity_tx, _) = watch::channel(identity);
        let event_bus = EventBus::new(config.advanced.event_buffer);

        let state = Arc::new(Self {
            config,
            store,
            presence,
            avatar: Mutex::new(avatar),
            identity: identity_tx,
            session: handle.commands,
            view: handle.view,
            event_bus,
        });

        watchers::spawn_view_events(state.view.clone(), state.event_bus.clone());
        watchers::spawn_inbox_events(
            Arc::clone(&state.presence),
            state.identity.subscribe(),
            state.event_bus.clone(),
        );

        (state, handle.task)
    }

    /// Switch every component over to `identity`, starting from `profile`.
    pub async fn switch_identity(&self, identity: Identity, profile: Profile) {
        if let Err(e) = self.presence.sign_in(&identity).await {
            warn!("Presence sign-in failed: {e}");
        }
        self.identity.send_replace(identity.clone());
        if self
            .session
            .send(SessionCommand::Identity(identity.clone(), profile))
            .await
            .is_err()
        {
            warn!("Session is not running, identity change not applied");
        }
        self.event_bus.emit(Event::now(
            "IdentityChanged",
            serde_json::json!({"identity": identity}),
        ));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config
    let config = DaemonConfig::load()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("streetpass={}", config.advanced.log_level).parse()?),
        )
        .init();

    info!("StreetPass daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let store = Arc::new(SqliteStore::open(&data_dir.join(streetpass_db::DB_FILE_NAME))?);

    // 3. Connect to the presence backend
    let backend = DaemonBackend::connect(&config.relay.addr, config.request_timeout()).await?;

    // 4. Build daemon state and start the session
    let shared_link = std::env::args().nth(1);
    let (state, session_task) =
        DaemonState::start(config, store, backend, shared_link.as_deref()).await;

    // 5. Start IPC server
    let socket_path = data_dir.join("streetpassd.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 6. Emit DaemonStarted event
    state.event_bus.emit(Event::now(
        "DaemonStarted",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": state.presence.backend().kind(),
        }),
    ));

    // 7. Run the RPC server until Ctrl-C
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown: leave the cell before the connection goes away.
    info!("Daemon shutting down gracefully");
    let _ = state.session.send(SessionCommand::Shutdown).await;
    if let Err(e) = session_task.await {
        warn!("Session task ended abnormally: {e}");
    }
    let identity = state.identity.borrow().clone();
    if let Err(e) = state.presence.mark_offline(&identity).await {
        warn!("Failed to mark {identity} offline: {e}");
    }

    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
