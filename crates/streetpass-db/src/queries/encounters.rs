//! Encounter history query functions.

use rusqlite::Connection;
use streetpass_types::{EncounterRecord, Identity, PeerEntry, Profile};

use crate::{DbError, Result};

/// Record one sighting of `peer_id` at `now`.
///
/// A single upsert: the first sighting inserts with `meet_count = 1` and
/// `first_met = now`; later sightings keep `first_met`, bump `meet_count`,
/// and refresh `last_seen` and the profile snapshot.
pub fn record(conn: &Connection, peer_id: &Identity, entry: &PeerEntry, now: u64) -> Result<()> {
    let profile = serde_json::to_string(&entry.profile)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO encounters (peer_id, profile, last_active, first_met, last_seen, meet_count)
         VALUES (?1, ?2, ?3, ?4, ?4, 1)
         ON CONFLICT(peer_id) DO UPDATE SET
             profile = excluded.profile,
             last_active = excluded.last_active,
             last_seen = excluded.last_seen,
             meet_count = encounters.meet_count + 1",
        rusqlite::params![
            peer_id.as_str(),
            profile,
            entry.last_active.map(|t| t as i64),
            now as i64,
        ],
    )?;
    Ok(())
}

/// Get the record for one peer.
pub fn get(conn: &Connection, peer_id: &Identity) -> Result<EncounterRecord> {
    let row = conn
        .query_row(
            "SELECT peer_id, profile, last_active, first_met, last_seen, meet_count
             FROM encounters WHERE peer_id = ?1",
            [peer_id.as_str()],
            read_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("encounter".into()),
            other => DbError::Sqlite(other),
        })?;
    row.into_record()
}

/// List all records, most recently seen first.
///
/// Rows that no longer deserialize are skipped.
pub fn list(conn: &Connection) -> Result<Vec<EncounterRecord>> {
    let mut stmt = conn.prepare(
        "SELECT peer_id, profile, last_active, first_met, last_seen, meet_count
         FROM encounters ORDER BY last_seen DESC, peer_id",
    )?;

    let rows = stmt
        .query_map([], read_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match row.into_record() {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping unreadable encounter row: {e}");
                None
            }
        })
        .collect())
}

/// Number of distinct peers ever encountered.
pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM encounters", [], |row| row.get(0))?;
    Ok(n as u64)
}

/// Remove every record.
pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM encounters", [])?;
    Ok(())
}

/// A raw encounter row from the database.
#[derive(Debug)]
pub struct EncounterRow {
    pub peer_id: String,
    pub profile: String,
    pub last_active: Option<u64>,
    pub first_met: u64,
    pub last_seen: u64,
    pub meet_count: u64,
}

impl EncounterRow {
    fn into_record(self) -> Result<EncounterRecord> {
        let peer_id = Identity::parse(&self.peer_id)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        let profile: Profile = serde_json::from_str(&self.profile)
            .map_err(|e| DbError::Serialization(e.to_string()))?;
        Ok(EncounterRecord {
            peer_id,
            profile,
            last_active: self.last_active,
            first_met: self.first_met,
            last_seen: self.last_seen,
            meet_count: self.meet_count,
        })
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EncounterRow> {
    Ok(EncounterRow {
        peer_id: row.get(0)?,
        profile: row.get(1)?,
        last_active: row.get::<_, Option<i64>>(2)?.map(|t| t as u64),
        first_met: row.get::<_, i64>(3)? as u64,
        last_seen: row.get::<_, i64>(4)? as u64,
        meet_count: row.get::<_, i64>(5)? as u64,
    })
}
