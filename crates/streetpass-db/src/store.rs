//! The [`LocalStore`] contract and its SQLite implementation.
//!
//! Reads never fail: a storage fault or an undecodable record is logged and
//! reported as absent (or zero / empty). Writes return the error so callers
//! can surface it, but nothing here panics.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use streetpass_types::{EncounterRecord, Identity, PeerEntry, Profile};
use tracing::{debug, warn};

use crate::queries::{encounters, kv};
use crate::{DbError, Result};

/// Durable per-device records: profile, identity and encounter history.
///
/// Single-writer: one session task owns the store for a device.
pub trait LocalStore: Send + Sync {
    fn load_profile(&self) -> Option<Profile>;

    /// Overwrite the stored profile.
    fn save_profile(&self, profile: &Profile) -> Result<()>;

    fn load_identity(&self) -> Option<Identity>;

    fn save_identity(&self, identity: &Identity) -> Result<()>;

    /// Fold one sighting of `peer` into its encounter record.
    fn record_encounter(&self, peer: &Identity, entry: &PeerEntry, now: u64) -> Result<()>;

    /// Number of distinct peers ever encountered.
    fn encounter_count(&self) -> usize;

    /// All records, most recently seen first.
    fn encounters(&self) -> Vec<EncounterRecord>;

    fn encounter(&self, peer: &Identity) -> Option<EncounterRecord>;

    /// Drop profile, identity and the whole encounter history.
    fn reset(&self) -> Result<()>;
}

/// [`LocalStore`] over a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating and migrating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::from_connection(crate::open(path)?))
    }

    /// A fresh in-memory store.
    pub fn open_memory() -> Result<Self> {
        Ok(Self::from_connection(crate::open_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the raw connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn())
    }
}

impl LocalStore for SqliteStore {
    fn load_profile(&self) -> Option<Profile> {
        match kv::get_json::<Profile>(&self.conn(), kv::PROFILE_KEY) {
            Ok(profile) => match profile.validate() {
                Ok(()) => Some(profile),
                Err(e) => {
                    warn!("Stored profile is invalid, ignoring: {e}");
                    None
                }
            },
            Err(DbError::NotFound(_)) => None,
            Err(e) => {
                warn!("Failed to load profile: {e}");
                None
            }
        }
    }

    fn save_profile(&self, profile: &Profile) -> Result<()> {
        kv::set_json(&self.conn(), kv::PROFILE_KEY, profile)
    }

    fn load_identity(&self) -> Option<Identity> {
        match kv::get(&self.conn(), kv::IDENTITY_KEY) {
            Ok(raw) => match Identity::parse(&raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!("Stored identity is invalid, ignoring: {e}");
                    None
                }
            },
            Err(DbError::NotFound(_)) => None,
            Err(e) => {
                warn!("Failed to load identity: {e}");
                None
            }
        }
    }

    fn save_identity(&self, identity: &Identity) -> Result<()> {
        kv::set(&self.conn(), kv::IDENTITY_KEY, identity.as_str())
    }

    fn record_encounter(&self, peer: &Identity, entry: &PeerEntry, now: u64) -> Result<()> {
        debug!(peer = %peer, "Recording encounter");
        encounters::record(&self.conn(), peer, entry, now)
    }

    fn encounter_count(&self) -> usize {
        encounters::count(&self.conn()).map_or_else(
            |e| {
                warn!("Failed to count encounters: {e}");
                0
            },
            |n| n as usize,
        )
    }

    fn encounters(&self) -> Vec<EncounterRecord> {
        encounters::list(&self.conn()).unwrap_or_else(|e| {
            warn!("Failed to list encounters: {e}");
            Vec::new()
        })
    }

    fn encounter(&self, peer: &Identity) -> Option<EncounterRecord> {
        match encounters::get(&self.conn(), peer) {
            Ok(record) => Some(record),
            Err(DbError::NotFound(_)) => None,
            Err(e) => {
                warn!("Failed to load encounter for {peer}: {e}");
                None
            }
        }
    }

    fn reset(&self) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        kv::delete(&tx, kv::PROFILE_KEY)?;
        kv::delete(&tx, kv::IDENTITY_KEY)?;
        encounters::clear(&tx)?;
        tx.commit()?;
        Ok(())
    }
}
