//! What a session exposes to its owner.

use serde::{Deserialize, Serialize};
use streetpass_types::{Coordinate, GridCellId, Identity, PeerSnapshot};

use crate::SessionError;

/// Lifecycle of a [`ProximitySession`](crate::ProximitySession).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not started, or torn down.
    #[default]
    Idle,
    /// Waiting for a cell, a profile, or backend authentication.
    AwaitingInputs,
    /// Published and subscribed in the current cell.
    Active,
    /// The subscription failed; waiting for an explicit restart.
    Halted,
}

/// Snapshot of session state, published on every change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub state: SessionState,
    #[ts(type = "string")]
    pub identity: Identity,
    pub location: Option<Coordinate>,
    #[ts(type = "string | null")]
    pub cell: Option<GridCellId>,
    /// Everyone else in the cell.
    #[ts(type = "Record<string, PeerEntry>")]
    pub peers: PeerSnapshot,
    /// No snapshot has arrived for the current cell yet.
    pub loading: bool,
    /// The last publish attempt failed.
    pub publish_error: bool,
    /// Authentication or subscription failure.
    pub error: Option<SessionError>,
    pub location_error: Option<SessionError>,
    pub encounter_count: usize,
    /// Bumped whenever the subscription is replaced or dropped.
    pub generation: u64,
}

impl SessionView {
    pub fn new(identity: Identity) -> Self {
        Self {
            state: SessionState::Idle,
            identity,
            location: None,
            cell: None,
            peers: PeerSnapshot::new(),
            loading: false,
            publish_error: false,
            error: None,
            location_error: None,
            encounter_count: 0,
            generation: 0,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
