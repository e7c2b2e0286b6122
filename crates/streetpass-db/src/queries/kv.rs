//! Key/value record functions.

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{DbError, Result};

/// Key holding the serialized avatar profile.
pub const PROFILE_KEY: &str = "profile";

/// Key holding the raw identity string.
pub const IDENTITY_KEY: &str = "identity";

/// Get a value by key.
pub fn get(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
        row.get(0)
    })
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("record '{key}'")),
        other => DbError::Sqlite(other),
    })
}

/// Set a value, replacing any previous one.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
        rusqlite::params![key, value],
    )?;
    Ok(())
}

/// Delete a key. Deleting a missing key is not an error.
pub fn delete(conn: &Connection, key: &str) -> Result<()> {
    conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
    Ok(())
}

/// Get and deserialize a JSON value.
pub fn get_json<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<T> {
    let raw = get(conn, key)?;
    serde_json::from_str(&raw).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Serialize and store a JSON value.
pub fn set_json<T: Serialize>(conn: &Connection, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()))?;
    set(conn, key, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_set_and_get() {
        let conn = test_db();
        set(&conn, IDENTITY_KEY, "abc").expect("set");
        assert_eq!(get(&conn, IDENTITY_KEY).expect("get"), "abc");
        set(&conn, IDENTITY_KEY, "def").expect("overwrite");
        assert_eq!(get(&conn, IDENTITY_KEY).expect("get"), "def");
    }

    #[test]
    fn test_get_nonexistent() {
        let conn = test_db();
        let result = get(&conn, "nonexistent");
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_delete() {
        let conn = test_db();
        set(&conn, "k", "v").expect("set");
        delete(&conn, "k").expect("delete");
        delete(&conn, "k").expect("delete again");
        assert!(matches!(get(&conn, "k"), Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_json_round_trip_and_corruption() {
        let conn = test_db();
        set_json(&conn, "list", &vec![1u32, 2, 3]).expect("set");
        let list: Vec<u32> = get_json(&conn, "list").expect("get");
        assert_eq!(list, [1, 2, 3]);

        set(&conn, "list", "{not json").expect("corrupt");
        let result: Result<Vec<u32>> = get_json(&conn, "list");
        assert!(matches!(result, Err(DbError::Serialization(_))));
    }
}
