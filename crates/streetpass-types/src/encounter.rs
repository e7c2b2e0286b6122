//! Encounter history entries.

use serde::{Deserialize, Serialize};

use crate::{Identity, PeerEntry, Profile};

/// Aggregated sightings of one peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct EncounterRecord {
    #[ts(type = "string")]
    pub peer_id: Identity,
    /// Profile as of the most recent sighting.
    #[serde(flatten)]
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<u64>,
    /// Set on the first sighting, never changed afterwards.
    pub first_met: u64,
    pub last_seen: u64,
    pub meet_count: u64,
}

impl EncounterRecord {
    /// The record produced by a first sighting.
    pub fn first_sighting(peer_id: Identity, entry: &PeerEntry, now: u64) -> Self {
        Self {
            peer_id,
            profile: entry.profile.clone(),
            last_active: entry.last_active,
            first_met: now,
            last_seen: now,
            meet_count: 1,
        }
    }

    /// Fold another sighting into this record.
    pub fn observe(&mut self, entry: &PeerEntry, now: u64) {
        self.profile = entry.profile.clone();
        self.last_active = entry.last_active;
        self.last_seen = now;
        self.meet_count += 1;
    }
}
