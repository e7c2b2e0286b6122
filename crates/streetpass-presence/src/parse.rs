//! Decoding raw backend values into typed snapshots.
//!
//! Anything other devices wrote is untrusted: entries with an invalid
//! identity key or an undecodable profile are dropped, never surfaced.

use serde_json::Value;
use streetpass_types::{Identity, Interaction, PeerEntry, PeerSnapshot};
use tracing::debug;

/// Decode the members map of a cell. `null` is an empty cell.
pub fn parse_snapshot(value: &Value) -> PeerSnapshot {
    let Value::Object(members) = value else {
        if !value.is_null() {
            debug!("Cell value is not an object, treating as empty");
        }
        return PeerSnapshot::new();
    };

    members
        .iter()
        .filter_map(|(key, raw)| {
            let identity = match Identity::parse(key) {
                Ok(identity) => identity,
                Err(e) => {
                    debug!(key = %key, "Dropping entry with invalid identity: {e}");
                    return None;
                }
            };
            let entry = parse_entry(raw)?;
            Some((identity, entry))
        })
        .collect()
}

/// Decode one presence entry.
///
/// A `lastActive` that is not a Unix-ms integer is ignored rather than
/// failing the whole entry.
pub fn parse_entry(raw: &Value) -> Option<PeerEntry> {
    let mut raw = raw.clone();
    if let Value::Object(map) = &mut raw {
        if map.get("lastActive").is_some_and(|v| !v.is_u64()) {
            map.remove("lastActive");
        }
    }

    match serde_json::from_value::<PeerEntry>(raw) {
        Ok(entry) => match entry.profile.validate() {
            Ok(()) => Some(entry),
            Err(e) => {
                debug!("Dropping entry with invalid profile: {e}");
                None
            }
        },
        Err(e) => {
            debug!("Dropping undecodable entry: {e}");
            None
        }
    }
}

/// Decode an inbox: the last interaction from each sender, oldest first.
pub fn parse_inbox(value: &Value) -> Vec<(Identity, Interaction)> {
    let Value::Object(senders) = value else {
        return Vec::new();
    };

    let mut inbox: Vec<(Identity, Interaction)> = senders
        .iter()
        .filter_map(|(key, raw)| {
            let sender = Identity::parse(key).ok()?;
            let interaction = serde_json::from_value::<Interaction>(raw.clone()).ok()?;
            interaction.validate().ok()?;
            Some((sender, interaction))
        })
        .collect();
    inbox.sort_by_key(|(_, i)| i.sent_at);
    inbox
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use streetpass_types::{InteractionKind, Profile};

    fn profile_json(name: &str) -> Value {
        let mut profile = Profile::new_default(1);
        profile.display_name = name.into();
        serde_json::to_value(profile).expect("serialize")
    }

    #[test]
    fn test_null_is_empty() {
        assert!(parse_snapshot(&Value::Null).is_empty());
        assert!(parse_snapshot(&json!(42)).is_empty());
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let mut good = profile_json("Ann");
        good["lastActive"] = json!(99);
        let mut long = profile_json("");
        long["name"] = json!("x".repeat(21));

        let cell = json!({
            "peerA": good,
            "peerB": {"name": "No colors"},
            "peerC": "garbage",
            "peerD": long,
        });
        let snapshot = parse_snapshot(&cell);
        assert_eq!(snapshot.len(), 1);
        let entry = &snapshot[&Identity::parse("peerA").expect("valid")];
        assert_eq!(entry.profile.display_name, "Ann");
        assert_eq!(entry.last_active, Some(99));
    }

    #[test]
    fn test_non_numeric_last_active_is_ignored() {
        let mut raw = profile_json("Ann");
        raw["lastActive"] = json!("2024-03-18T10:00:00Z");
        let entry = parse_entry(&raw).expect("entry kept");
        assert_eq!(entry.last_active, None);
    }

    #[test]
    fn test_parse_inbox() {
        let inbox = json!({
            "late": {"kind": "greeting", "index": 1, "fromName": "L", "sentAt": 20},
            "early": {"kind": "reaction", "index": 0, "fromName": "E", "sentAt": 10},
            "bogus": {"kind": "reaction", "index": 40, "sentAt": 5},
        });
        let parsed = parse_inbox(&inbox);
        let senders: Vec<&str> = parsed.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(senders, ["early", "late"]);
        assert_eq!(parsed[1].1.kind, InteractionKind::Greeting);
    }
}
