//! The proximity state machine.
//!
//! A session joins the grid cell of the latest location fix once it also has
//! a profile: it publishes its own entry there, subscribes to the cell, and
//! folds every membership snapshot into its peer view and the encounter
//! history. All state lives in one task; commands, snapshots and deadlines
//! are serialized by [`ProximitySession::run`].
//!
//! Every subscription is tagged with the generation it was created in. The
//! generation is bumped whenever the subscription is replaced or dropped, so
//! a snapshot from a previous cell can never be applied after a switch.

use std::sync::Arc;

use streetpass_db::LocalStore;
use streetpass_presence::{PresenceChannel, PresenceError, Subscription};
use streetpass_types::{
    now_ms, Coordinate, GridCellId, Identity, LocationError, PeerEntry, PeerSnapshot, Profile,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::view::{SessionState, SessionView};
use crate::{SessionConfig, SessionError};

/// Inputs a running session reacts to.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCommand {
    /// A fix from the location source.
    Location(Coordinate),
    /// The location source failed.
    LocationFailed(LocationError),
    /// The profile was edited (already persisted by the caller).
    Profile(Profile),
    /// The device adopted another identity, along with the profile it
    /// starts from.
    Identity(Identity, Profile),
    /// Drop everything and rejoin the current cell.
    Restart,
    /// Leave the cell and stop the task.
    Shutdown,
}

/// One delivery from the cell subscription, tagged with where it came from.
#[derive(Debug)]
pub struct PeerUpdate {
    pub generation: u64,
    pub cell: GridCellId,
    pub result: Result<PeerSnapshot, PresenceError>,
}

struct CellSubscription {
    generation: u64,
    cell: GridCellId,
    subscription: Subscription<PeerSnapshot>,
}

/// Handle on a session running in its own task.
pub struct SessionHandle {
    pub commands: mpsc::Sender<SessionCommand>,
    pub view: watch::Receiver<SessionView>,
    pub task: JoinHandle<()>,
}

impl SessionHandle {
    /// Send a command; `false` if the session task has stopped.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn current(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Ask the session to shut down and wait for it.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Session task ended abnormally: {e}");
        }
    }
}

pub struct ProximitySession<C, S> {
    channel: Arc<C>,
    store: Arc<S>,
    config: SessionConfig,
    identity: Identity,
    profile: Option<Profile>,
    location: Option<Coordinate>,
    cell: Option<GridCellId>,
    state: SessionState,
    generation: u64,
    active: Option<CellSubscription>,
    /// The cell our own entry is currently published in.
    published_in: Option<GridCellId>,
    peers: PeerSnapshot,
    loading: bool,
    publish_error: bool,
    error: Option<SessionError>,
    location_error: Option<SessionError>,
    location_deadline: Option<Instant>,
    peer_deadline: Option<Instant>,
    view: watch::Sender<SessionView>,
}

impl<C: PresenceChannel, S: LocalStore + 'static> ProximitySession<C, S> {
    pub fn new(channel: Arc<C>, store: Arc<S>, identity: Identity, config: SessionConfig) -> Self {
        let (view, _) = watch::channel(SessionView::new(identity.clone()));
        Self {
            channel,
            store,
            config,
            identity,
            profile: None,
            location: None,
            cell: None,
            state: SessionState::Idle,
            generation: 0,
            active: None,
            published_in: None,
            peers: PeerSnapshot::new(),
            loading: false,
            publish_error: false,
            error: None,
            location_error: None,
            location_deadline: None,
            peer_deadline: None,
            view,
        }
    }

    /// Start with a profile already known.
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn subscribe_view(&self) -> watch::Receiver<SessionView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            identity: self.identity.clone(),
            location: self.location,
            cell: self.cell.clone(),
            peers: self.peers.clone(),
            loading: self.loading,
            publish_error: self.publish_error,
            error: self.error.clone(),
            location_error: self.location_error.clone(),
            encounter_count: self.store.encounter_count(),
            generation: self.generation,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peers(&self) -> &PeerSnapshot {
        &self.peers
    }

    fn publish_view(&self) {
        self.view.send_replace(self.view());
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, commands: usize) -> SessionHandle {
        let (tx, rx) = mpsc::channel(commands);
        let view = self.subscribe_view();
        let task = tokio::spawn(self.run(rx));
        SessionHandle {
            commands: tx,
            view,
            task,
        }
    }

    /// Process commands, snapshots and deadlines until `Shutdown` or until
    /// every command sender is gone, then tear down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        self.start().await;

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                update = self.next_update() => {
                    self.handle_update(update);
                }
                _ = wait_deadline(deadline) => self.fire_deadlines().await,
            }
        }

        self.teardown().await;
        info!("Proximity session stopped");
    }

    pub async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Location(coordinate) => self.set_location(coordinate).await,
            SessionCommand::LocationFailed(error) => self.location_failed(error),
            SessionCommand::Profile(profile) => self.set_profile(profile).await,
            SessionCommand::Identity(identity, profile) => {
                self.set_identity(identity, profile).await
            }
            SessionCommand::Restart => self.restart().await,
            SessionCommand::Shutdown => self.teardown().await,
        }
    }

    /// Leave `Idle` and wait for inputs; activates at once if both a cell
    /// and a profile are already known.
    pub async fn start(&mut self) {
        if self.state != SessionState::Idle {
            return;
        }
        info!(identity = %self.identity, "Proximity session starting");
        self.state = SessionState::AwaitingInputs;
        if self.cell.is_none() {
            self.location_deadline = Some(Instant::now() + self.config.location_timeout);
        }
        self.try_activate().await;
        self.publish_view();
    }

    /// Apply a location fix: the cell is recomputed and joined if it changed.
    pub async fn set_location(&mut self, coordinate: Coordinate) {
        if !coordinate.is_valid() {
            warn!(
                latitude = coordinate.latitude,
                longitude = coordinate.longitude,
                "Ignoring invalid location fix"
            );
            self.location_error = Some(SessionError::LocationUnavailable);
            self.publish_view();
            return;
        }
        self.location_deadline = None;
        self.location_error = None;
        self.location = Some(coordinate);
        let cell = self.config.grid.cell_id(&coordinate);
        self.set_cell(cell).await;
    }

    /// Record a location source failure. Whatever cell is already joined is
    /// kept; no fallback is used.
    pub fn location_failed(&mut self, error: LocationError) {
        warn!("Location source failed: {error}");
        self.location_deadline = None;
        self.location_error = Some(error.into());
        self.publish_view();
    }

    pub async fn set_cell(&mut self, cell: GridCellId) {
        if self.cell.as_ref() == Some(&cell) {
            self.publish_view();
            return;
        }
        debug!(from = ?self.cell, to = %cell, "Cell changed");
        self.cell = Some(cell);

        match self.state {
            SessionState::Idle => {}
            SessionState::Halted => {
                // Stay halted, but do not keep an entry in a cell we left.
                self.leave_published().await;
            }
            SessionState::AwaitingInputs | SessionState::Active => {
                self.invalidate();
                self.leave_published().await;
                self.state = SessionState::AwaitingInputs;
                self.try_activate().await;
            }
        }
        self.publish_view();
    }

    /// Replace the profile; while active, re-publish it in the current cell
    /// and mirror it.
    pub async fn set_profile(&mut self, profile: Profile) {
        self.profile = Some(profile.clone());

        match self.state {
            SessionState::Active => {
                if let Some(cell) = self.cell.clone() {
                    self.publish_in(&cell, &profile).await;
                }
                self.mirror(&profile).await;
            }
            SessionState::AwaitingInputs => self.try_activate().await,
            SessionState::Idle | SessionState::Halted => {}
        }
        self.publish_view();
    }

    /// Switch to another identity: leave under the old one, rejoin under the
    /// new one with `profile`.
    pub async fn set_identity(&mut self, identity: Identity, profile: Profile) {
        if identity == self.identity {
            self.set_profile(profile).await;
            return;
        }
        info!(from = %self.identity, to = %identity, "Session identity changed");
        self.invalidate();
        self.leave_published().await;
        self.identity = identity;
        self.profile = Some(profile);
        self.publish_error = false;
        self.error = None;

        if self.state != SessionState::Idle {
            self.state = SessionState::AwaitingInputs;
            self.try_activate().await;
        }
        self.publish_view();
    }

    /// Re-establish publish and subscription in the current cell, clearing
    /// any halt.
    pub async fn restart(&mut self) {
        info!("Restarting proximity session");
        if self.state == SessionState::Idle {
            self.start().await;
            return;
        }
        self.invalidate();
        self.error = None;
        self.state = SessionState::AwaitingInputs;
        if self.cell.is_none() && self.location_deadline.is_none() {
            self.location_deadline = Some(Instant::now() + self.config.location_timeout);
        }
        self.try_activate().await;
        self.publish_view();
    }

    /// Unsubscribe, leave the cell and return to `Idle`.
    pub async fn teardown(&mut self) {
        if self.state == SessionState::Idle {
            return;
        }
        self.invalidate();
        self.leave_published().await;
        self.location_deadline = None;
        self.state = SessionState::Idle;
        self.publish_view();
        debug!("Session torn down");
    }

    /// Wait for the next delivery of the active subscription. Pending
    /// forever while there is none.
    pub async fn next_update(&mut self) -> PeerUpdate {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        let result = active
            .subscription
            .next()
            .await
            .unwrap_or(Err(PresenceError::Disconnected));
        PeerUpdate {
            generation: active.generation,
            cell: active.cell.clone(),
            result,
        }
    }

    /// Apply one subscription delivery. Returns whether it was applied.
    ///
    /// Deliveries from an older generation or another cell are discarded.
    /// Our own identity is filtered out, and every remaining peer counts as
    /// one sighting.
    pub fn handle_update(&mut self, update: PeerUpdate) -> bool {
        if self.state != SessionState::Active
            || update.generation != self.generation
            || self.cell.as_ref() != Some(&update.cell)
        {
            debug!(
                generation = update.generation,
                current = self.generation,
                cell = %update.cell,
                "Discarding stale peer update"
            );
            return false;
        }

        match update.result {
            Ok(mut snapshot) => {
                snapshot.remove(&self.identity);
                let now = now_ms();
                for (peer, entry) in &snapshot {
                    if let Err(e) = self.store.record_encounter(peer, entry, now) {
                        warn!(peer = %peer, "Failed to record encounter: {e}");
                    }
                }
                debug!(cell = %update.cell, peers = snapshot.len(), "Peer snapshot applied");
                self.peers = snapshot;
                self.loading = false;
                self.peer_deadline = None;
            }
            Err(e) => {
                warn!(cell = %update.cell, "Cell subscription failed: {e}");
                self.halt(SessionError::SubscriptionFailed(e.to_string()));
            }
        }
        self.publish_view();
        true
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.location_deadline, self.peer_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Handle whichever deadlines have passed.
    pub async fn fire_deadlines(&mut self) {
        let now = Instant::now();

        if self.location_deadline.is_some_and(|d| d <= now) {
            self.location_deadline = None;
            if self.cell.is_none() {
                let fallback = self.config.fallback;
                warn!(
                    latitude = fallback.latitude,
                    longitude = fallback.longitude,
                    "No location fix in time, using fallback location"
                );
                self.set_location(fallback).await;
                self.location_error = Some(SessionError::LocationTimeout);
                self.publish_view();
            }
        }

        if self.peer_deadline.is_some_and(|d| d <= now) {
            self.peer_deadline = None;
            if self.loading {
                debug!("No peer snapshot in time, showing an empty cell");
                self.loading = false;
                self.peers.clear();
                self.publish_view();
            }
        }
    }

    async fn try_activate(&mut self) {
        if self.state != SessionState::AwaitingInputs {
            return;
        }
        let (Some(cell), Some(profile)) = (self.cell.clone(), self.profile.clone()) else {
            return;
        };
        self.activate(cell, profile).await;
    }

    async fn activate(&mut self, cell: GridCellId, profile: Profile) {
        self.generation += 1;
        self.peers.clear();
        self.loading = true;
        self.peer_deadline = Some(Instant::now() + self.config.peer_load_timeout);
        self.error = None;

        if !self.publish_in(&cell, &profile).await && self.needs_auth() {
            self.wait_for_auth();
            return;
        }
        if self.published_in.is_some() {
            self.mirror(&profile).await;
        }

        match self.channel.subscribe(&cell).await {
            Ok(subscription) => {
                info!(cell = %cell, generation = self.generation, "Joined cell");
                self.active = Some(CellSubscription {
                    generation: self.generation,
                    cell,
                    subscription,
                });
                self.state = SessionState::Active;
            }
            Err(PresenceError::AuthenticationRequired) => self.wait_for_auth(),
            Err(e) => {
                warn!(cell = %cell, "Failed to subscribe to cell: {e}");
                self.halt(SessionError::SubscriptionFailed(e.to_string()));
            }
        }
    }

    /// Publish our entry in `cell`; sets or clears the publish error flag.
    async fn publish_in(&mut self, cell: &GridCellId, profile: &Profile) -> bool {
        let entry = PeerEntry::new(profile.clone(), now_ms());
        match self.channel.publish(&self.identity, cell, &entry).await {
            Ok(()) => {
                self.publish_error = false;
                self.published_in = Some(cell.clone());
                true
            }
            Err(e) => {
                warn!(cell = %cell, "Failed to publish presence: {e}");
                self.publish_error = true;
                if matches!(e, PresenceError::AuthenticationRequired) {
                    self.error = Some(SessionError::AuthenticationRequired);
                }
                false
            }
        }
    }

    async fn mirror(&self, profile: &Profile) {
        if let Err(e) = self.channel.mirror_profile(&self.identity, profile).await {
            warn!("Failed to mirror profile: {e}");
        }
    }

    async fn leave_published(&mut self) {
        let Some(cell) = self.published_in.take() else {
            return;
        };
        if let Err(e) = self.channel.leave(&self.identity, &cell).await {
            warn!(cell = %cell, "Failed to leave cell: {e}");
        }
    }

    fn needs_auth(&self) -> bool {
        self.error == Some(SessionError::AuthenticationRequired)
    }

    /// Without authentication nothing is published or subscribed; stay in
    /// `AwaitingInputs` until restarted.
    fn wait_for_auth(&mut self) {
        warn!("Presence backend requires authentication");
        self.error = Some(SessionError::AuthenticationRequired);
        self.loading = false;
        self.peer_deadline = None;
        self.state = SessionState::AwaitingInputs;
    }

    fn halt(&mut self, error: SessionError) {
        self.invalidate();
        self.error = Some(error);
        self.state = SessionState::Halted;
    }

    /// Drop the subscription and make every delivery already in flight
    /// stale.
    fn invalidate(&mut self) {
        self.generation += 1;
        if let Some(active) = self.active.take() {
            active.subscription.unsubscribe();
        }
        self.peers.clear();
        self.loading = false;
        self.peer_deadline = None;
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
