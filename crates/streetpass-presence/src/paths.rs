//! Backend path layout and validation.

use streetpass_types::{GridCellId, Identity};

use crate::{PresenceError, Result};

/// Characters a path segment may not contain.
const FORBIDDEN: [char; 5] = ['.', '#', '$', '[', ']'];

/// Split and validate a `/`-separated path.
///
/// Leading and trailing slashes are ignored; empty inner segments and
/// segments containing `. # $ [ ]` or control characters are rejected.
pub fn segments(path: &str) -> Result<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(invalid(path, "empty path"));
    }
    trimmed
        .split('/')
        .map(|seg| {
            if seg.is_empty() {
                Err(invalid(path, "empty segment"))
            } else if let Some(c) = seg
                .chars()
                .find(|c| FORBIDDEN.contains(c) || c.is_control())
            {
                Err(invalid(path, &format!("forbidden character {c:?}")))
            } else {
                Ok(seg.to_string())
            }
        })
        .collect()
}

fn invalid(path: &str, reason: &str) -> PresenceError {
    PresenceError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

pub fn cell_members(cell: &GridCellId) -> String {
    format!("locations/{cell}/users")
}

pub fn cell_member(cell: &GridCellId, identity: &Identity) -> String {
    format!("locations/{cell}/users/{identity}")
}

pub fn avatar(identity: &Identity) -> String {
    format!("users/{identity}/avatar")
}

pub fn current_location(identity: &Identity) -> String {
    format!("users/{identity}/currentLocation")
}

pub fn user_location(identity: &Identity) -> String {
    format!("users/{identity}/location")
}

pub fn inbox(identity: &Identity) -> String {
    format!("inbox/{identity}")
}

pub fn inbox_entry(recipient: &Identity, sender: &Identity) -> String {
    format!("inbox/{recipient}/{sender}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments() {
        assert_eq!(
            segments("/locations/1_2/users/").expect("valid"),
            ["locations", "1_2", "users"]
        );
        assert!(segments("").is_err());
        assert!(segments("/").is_err());
        assert!(segments("a//b").is_err());
        assert!(segments("a/b.c").is_err());
        assert!(segments("a/$b").is_err());
        assert!(segments("a/b\n").is_err());
    }

    #[test]
    fn test_layout() {
        let cell = GridCellId::new("340522_-1182437");
        let id = Identity::parse("peerA").expect("valid");
        assert_eq!(cell_members(&cell), "locations/340522_-1182437/users");
        assert_eq!(
            cell_member(&cell, &id),
            "locations/340522_-1182437/users/peerA"
        );
        assert_eq!(avatar(&id), "users/peerA/avatar");
        assert_eq!(inbox_entry(&id, &id), "inbox/peerA/peerA");
        assert!(segments(&cell_member(&cell, &id)).is_ok());
    }
}
