//! # streetpass-types
//!
//! Shared domain types used across the StreetPass workspace: coordinates and
//! grid cells, identities, avatar profiles, peer snapshots, encounter records
//! and the interaction catalog.
//!
//! All timestamps are Unix epoch milliseconds (`u64`).

pub mod encounter;
pub mod identity;
pub mod interaction;
pub mod location;
pub mod presence;
pub mod profile;

pub use encounter::EncounterRecord;
pub use identity::Identity;
pub use interaction::{Interaction, InteractionKind};
pub use location::{Coordinate, GridCellId, LocationError};
pub use presence::{PeerEntry, PeerSnapshot};
pub use profile::{Accessory, Color, HairStyle, Profile, ProfileUpdate};

/// Maximum display name length, in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 20;

/// Maximum identity length, in characters.
pub const MAX_IDENTITY_CHARS: usize = 128;

/// Validation errors for domain values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid color '{0}', expected #RRGGBB")]
    InvalidColor(String),

    #[error("display name is {len} characters, maximum is {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("unknown hair style index {0}")]
    UnknownHairStyle(u8),

    #[error("unknown accessory index {0}")]
    UnknownAccessory(u8),

    #[error("unknown {kind} index {index}")]
    UnknownInteraction { kind: &'static str, index: usize },

    #[error("invalid share link: {0}")]
    InvalidShareLink(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[test]
    #[ignore] // Run manually to generate bindings
    fn export_ts_bindings() {
        use ts_rs::TS;
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../bindings");
        std::fs::create_dir_all(&dir).expect("create bindings dir");
        crate::profile::Profile::export_all_to(&dir).expect("export profile");
        crate::presence::PeerEntry::export_all_to(&dir).expect("export peer entry");
        crate::encounter::EncounterRecord::export_all_to(&dir).expect("export encounter");
        crate::interaction::Interaction::export_all_to(&dir).expect("export interaction");
        crate::location::Coordinate::export_all_to(&dir).expect("export coordinate");
    }
}
