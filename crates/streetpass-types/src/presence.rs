//! Peer presence entries as published into a grid cell.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Identity, Profile};

/// What a device publishes about itself into its current cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    #[serde(flatten)]
    pub profile: Profile,
    /// When the peer last (re)published, Unix ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<u64>,
}

impl PeerEntry {
    pub fn new(profile: Profile, last_active: u64) -> Self {
        Self {
            profile,
            last_active: Some(last_active),
        }
    }
}

/// Members of one cell, keyed by identity.
pub type PeerSnapshot = BTreeMap<Identity, PeerEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_entry_is_flat_on_the_wire() {
        let entry = PeerEntry::new(Profile::new_default(1), 42);
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["name"], "");
        assert_eq!(value["lastActive"], 42);
        assert!(value.get("profile").is_none());

        let back: PeerEntry = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, entry);
    }

    #[test]
    fn test_snapshot_is_ordered_by_identity() {
        let mut snapshot = PeerSnapshot::new();
        for id in ["zed", "amy", "mo"] {
            snapshot.insert(
                Identity::parse(id).expect("valid"),
                PeerEntry::new(Profile::new_default(1), 1),
            );
        }
        let keys: Vec<&str> = snapshot.keys().map(Identity::as_str).collect();
        assert_eq!(keys, ["amy", "mo", "zed"]);
    }
}
