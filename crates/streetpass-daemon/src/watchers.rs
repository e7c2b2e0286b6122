//! Background tasks that turn session and inbox changes into events.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use streetpass_presence::{Backend, BackendPresence, Subscription};
use streetpass_session::SessionView;
use streetpass_types::{Identity, Interaction};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{Event, EventBus};

/// Emit events for every change of the session view.
pub fn spawn_view_events(
    mut view: watch::Receiver<SessionView>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = view.borrow_and_update().clone();
        while view.changed().await.is_ok() {
            let next = view.borrow_and_update().clone();
            for event in view_events(&previous, &next) {
                bus.emit(event);
            }
            previous = next;
        }
        debug!("Session view closed, view events stopped");
    })
}

/// Events describing the step from `prev` to `next`.
pub fn view_events(prev: &SessionView, next: &SessionView) -> Vec<Event> {
    let mut events = Vec::new();

    if prev.state != next.state
        || prev.error != next.error
        || prev.location_error != next.location_error
        || prev.publish_error != next.publish_error
        || prev.identity != next.identity
    {
        events.push(Event::now(
            "SessionStateChanged",
            json!({
                "state": next.state,
                "cell": next.cell,
                "error": next.error,
                "locationError": next.location_error,
                "publishError": next.publish_error,
            }),
        ));
    }

    if prev.peers != next.peers || prev.cell != next.cell || prev.loading != next.loading {
        events.push(Event::now(
            "NearbyChanged",
            json!({
                "cell": next.cell,
                "loading": next.loading,
                "peers": next.peers,
            }),
        ));
    }

    for (peer, entry) in &next.peers {
        if !prev.peers.contains_key(peer) {
            events.push(Event::now(
                "EncounterRecorded",
                json!({
                    "peerId": peer,
                    "name": entry.profile.display_name,
                    "encounterCount": next.encounter_count,
                }),
            ));
        }
    }

    events
}

/// Follow the current identity's inbox and emit `InteractionReceived` for
/// each interaction sent after the watch started.
pub fn spawn_inbox_events<B: Backend>(
    presence: Arc<BackendPresence<B>>,
    mut identity: watch::Receiver<Identity>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let me = identity.borrow_and_update().clone();
            let end = match presence.watch_inbox(&me).await {
                Ok(inbox) => follow_inbox(&me, inbox, &mut identity, &bus).await,
                Err(e) => {
                    warn!(identity = %me, "Failed to watch inbox: {e}");
                    InboxEnd::WatchEnded
                }
            };
            match end {
                InboxEnd::IdentityChanged => continue,
                InboxEnd::Closed => return,
                // Rewatch once the identity changes.
                InboxEnd::WatchEnded => {
                    if identity.changed().await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

enum InboxEnd {
    IdentityChanged,
    WatchEnded,
    Closed,
}

async fn follow_inbox(
    me: &Identity,
    mut inbox: Subscription<Vec<(Identity, Interaction)>>,
    identity: &mut watch::Receiver<Identity>,
    bus: &EventBus,
) -> InboxEnd {
    let mut cursor = InboxCursor::default();
    loop {
        tokio::select! {
            changed = identity.changed() => {
                return match changed {
                    Ok(()) => InboxEnd::IdentityChanged,
                    Err(_) => InboxEnd::Closed,
                };
            }
            update = inbox.next() => match update {
                Some(Ok(entries)) => {
                    for event in cursor.advance(entries) {
                        bus.emit(event);
                    }
                }
                Some(Err(e)) => {
                    warn!(identity = %me, "Inbox watch ended: {e}");
                    return InboxEnd::WatchEnded;
                }
                None => return InboxEnd::WatchEnded,
            },
        }
    }
}

/// Tracks the newest interaction seen from each sender.
#[derive(Default)]
struct InboxCursor {
    primed: bool,
    latest: HashMap<Identity, u64>,
}

impl InboxCursor {
    /// Events for entries newer than what was seen. The first delivery only
    /// primes the cursor.
    fn advance(&mut self, entries: Vec<(Identity, Interaction)>) -> Vec<Event> {
        let mut events = Vec::new();
        for (sender, interaction) in entries {
            let newer = self
                .latest
                .get(&sender)
                .map_or(true, |seen| interaction.sent_at > *seen);
            if !newer {
                continue;
            }
            self.latest.insert(sender.clone(), interaction.sent_at);
            if self.primed {
                events.push(Event::now(
                    "InteractionReceived",
                    json!({
                        "from": sender,
                        "fromName": interaction.from_name,
                        "kind": interaction.kind,
                        "index": interaction.index,
                        "text": interaction.text(),
                        "sentAt": interaction.sent_at,
                    }),
                ));
            }
        }
        self.primed = true;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streetpass_session::SessionState;
    use streetpass_types::{GridCellId, InteractionKind, PeerEntry, Profile};

    fn id(raw: &str) -> Identity {
        Identity::parse(raw).expect("valid identity")
    }

    fn wave(sent_at: u64) -> Interaction {
        Interaction::new(InteractionKind::Reaction, 0, "Bo", sent_at).expect("valid")
    }

    #[test]
    fn test_view_events_on_first_snapshot() {
        let mut prev = SessionView::new(id("me"));
        prev.state = SessionState::Active;
        prev.cell = Some(GridCellId::new("1_1"));
        prev.loading = true;

        let mut next = prev.clone();
        next.loading = false;
        next.peers
            .insert(id("bo"), PeerEntry::new(Profile::new_default(1), 5));
        next.encounter_count = 1;

        let events = view_events(&prev, &next);
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["NearbyChanged", "EncounterRecorded"]);
        assert_eq!(events[1].payload["peerId"], "bo");
    }

    #[test]
    fn test_view_events_on_state_change() {
        let prev = SessionView::new(id("me"));
        let mut next = prev.clone();
        next.state = SessionState::AwaitingInputs;

        let events = view_events(&prev, &next);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "SessionStateChanged");
        assert_eq!(events[0].payload["state"], "awaiting_inputs");
        assert!(view_events(&next, &next).is_empty());
    }

    #[test]
    fn test_inbox_cursor_skips_existing_entries() {
        let mut cursor = InboxCursor::default();
        assert!(cursor.advance(vec![(id("bo"), wave(10))]).is_empty());

        let events = cursor.advance(vec![(id("bo"), wave(10)), (id("cy"), wave(11))]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["from"], "cy");
        assert_eq!(events[0].payload["text"], "👋");

        let events = cursor.advance(vec![(id("bo"), wave(12)), (id("cy"), wave(11))]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["from"], "bo");
    }
}
