//! Reactions and greetings peers can send each other.

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// `(emoji, label)` for every reaction, by index.
pub const REACTIONS: [(&str, &str); 6] = [
    ("👋", "Wave"),
    ("😊", "Smile"),
    ("👍", "Thumbs Up"),
    ("🎮", "Gaming"),
    ("💬", "Chat"),
    ("🔄", "Connect"),
];

/// Canned greetings, by index.
pub const GREETINGS: [&str; 6] = [
    "Hi there!",
    "Hello from GDC!",
    "Nice to meet you!",
    "Let's connect!",
    "Game on!",
    "Looking to network?",
];

/// Which catalog an interaction index refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Reaction,
    Greeting,
}

impl InteractionKind {
    fn catalog_len(self) -> usize {
        match self {
            InteractionKind::Reaction => REACTIONS.len(),
            InteractionKind::Greeting => GREETINGS.len(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            InteractionKind::Reaction => "reaction",
            InteractionKind::Greeting => "greeting",
        }
    }
}

/// An interaction as stored in the recipient's inbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub kind: InteractionKind,
    pub index: usize,
    /// Sender's display name at send time.
    #[serde(default)]
    pub from_name: String,
    pub sent_at: u64,
}

impl Interaction {
    pub fn new(kind: InteractionKind, index: usize, from_name: &str, sent_at: u64) -> Result<Self> {
        let interaction = Self {
            kind,
            index,
            from_name: from_name.to_string(),
            sent_at,
        };
        interaction.validate()?;
        Ok(interaction)
    }

    /// Reject indexes outside the catalog.
    pub fn validate(&self) -> Result<()> {
        if self.index >= self.kind.catalog_len() {
            return Err(TypesError::UnknownInteraction {
                kind: self.kind.name(),
                index: self.index,
            });
        }
        Ok(())
    }

    /// The emoji for a reaction, the sentence for a greeting.
    pub fn text(&self) -> &'static str {
        match self.kind {
            InteractionKind::Reaction => REACTIONS.get(self.index).map(|r| r.0),
            InteractionKind::Greeting => GREETINGS.get(self.index).copied(),
        }
        .unwrap_or("?")
    }

    /// The confirmation line shown to the sender.
    pub fn describe_for(&self, recipient_name: &str) -> String {
        let who = if recipient_name.is_empty() {
            "Anonymous"
        } else {
            recipient_name
        };
        match self.kind {
            InteractionKind::Reaction => format!("Sent {} to {who}", self.text()),
            InteractionKind::Greeting => format!("Sent \"{}\" to {who}", self.text()),
        }
    }
}
