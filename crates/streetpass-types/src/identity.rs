//! Device identity and shareable identity links.
//!
//! An identity is the opaque key a device publishes itself under. It is
//! generated once, persisted locally, and can be carried to another device
//! through a link of the form `{base}?user={id}`. Importing a link is an
//! identity-adoption mechanism, not a security boundary: two devices holding
//! the same identity overwrite each other's presence entries.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, TypesError, MAX_IDENTITY_CHARS};

/// Query parameter carrying the identity in a shareable link.
const SHARE_PARAM: &str = "user";

/// A stable, path-safe device identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Generate a fresh random identity (128 bits, lowercase hex).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Validate and wrap an identity string.
    ///
    /// Accepts 1..=128 characters of `[A-Za-z0-9_-]`, so an identity is always
    /// a single segment of a backend path.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(TypesError::InvalidIdentity("empty".into()));
        }
        if raw.chars().count() > MAX_IDENTITY_CHARS {
            return Err(TypesError::InvalidIdentity(format!(
                "longer than {MAX_IDENTITY_CHARS} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TypesError::InvalidIdentity(format!(
                "unexpected character {bad:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the shareable link for this identity.
    ///
    /// Other query parameters of `base_url` are kept; an existing `user`
    /// parameter is replaced.
    pub fn share_link(&self, base_url: &str) -> Result<String> {
        let mut url = Url::parse(base_url)
            .map_err(|e| TypesError::InvalidShareLink(format!("base url '{base_url}': {e}")))?;
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != SHARE_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(SHARE_PARAM, self.as_str());
        Ok(url.into())
    }

    /// Extract the identity embedded in a shareable link.
    ///
    /// Returns `Ok(None)` when the link carries no `user` parameter and an
    /// error when the link is not a URL or the parameter is present but not
    /// a valid identity. The parameter is percent-decoded.
    pub fn from_share_link(link: &str) -> Result<Option<Self>> {
        let url = Url::parse(link).map_err(|e| TypesError::InvalidShareLink(e.to_string()))?;
        let Some((_, value)) = url.query_pairs().find(|(key, _)| key == SHARE_PARAM) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Err(TypesError::InvalidShareLink("empty user parameter".into()));
        }
        Self::parse(&value)
            .map(Some)
            .map_err(|e| TypesError::InvalidShareLink(e.to_string()))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(id: Identity) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_hex_and_unique() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_rejects_path_characters() {
        assert!(Identity::parse("abc/def").is_err());
        assert!(Identity::parse("abc.def").is_err());
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse(&"a".repeat(129)).is_err());
        assert!(Identity::parse("peer_A-1").is_ok());
    }

    #[test]
    fn test_share_link_round_trip() {
        let id = Identity::parse("a1b2c3").expect("valid");
        let link = id.share_link("https://streetpass.example/").expect("link");
        assert_eq!(link, "https://streetpass.example/?user=a1b2c3");
        let parsed = Identity::from_share_link(&link).expect("parse");
        assert_eq!(parsed, Some(id));
    }

    #[test]
    fn test_share_link_among_other_params() {
        let parsed = Identity::from_share_link("https://x.example/?ref=qr&user=peer42#top")
            .expect("parse");
        assert_eq!(parsed.map(String::from), Some("peer42".to_string()));
    }

    #[test]
    fn test_share_link_is_percent_decoded() {
        let parsed = Identity::from_share_link("https://x.example/?user=abc%2Ddef").expect("parse");
        assert_eq!(parsed.map(String::from), Some("abc-def".to_string()));
    }

    #[test]
    fn test_share_link_keeps_base_query() {
        let id = Identity::parse("abc").expect("valid");
        let link = id.share_link("https://x.example/?ref=qr").expect("link");
        assert_eq!(link, "https://x.example/?ref=qr&user=abc");
        assert_eq!(Identity::from_share_link(&link).expect("parse"), Some(id.clone()));

        let replaced = id
            .share_link("https://x.example/?user=old&ref=qr#top")
            .expect("link");
        assert_eq!(replaced, "https://x.example/?ref=qr&user=abc#top");
    }

    #[test]
    fn test_share_link_needs_absolute_base() {
        let id = Identity::parse("abc").expect("valid");
        assert!(matches!(
            id.share_link("not a url"),
            Err(TypesError::InvalidShareLink(_))
        ));
        assert!(matches!(
            Identity::from_share_link("not a url"),
            Err(TypesError::InvalidShareLink(_))
        ));
    }

    #[test]
    fn test_share_link_without_user() {
        assert_eq!(Identity::from_share_link("https://x.example/").expect("ok"), None);
        assert_eq!(
            Identity::from_share_link("https://x.example/?ref=qr").expect("ok"),
            None
        );
    }

    #[test]
    fn test_share_link_with_bad_user() {
        let result = Identity::from_share_link("https://x.example/?user=../etc");
        assert!(matches!(result, Err(TypesError::InvalidShareLink(_))));
        let result = Identity::from_share_link("https://x.example/?user=");
        assert!(matches!(result, Err(TypesError::InvalidShareLink(_))));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: std::result::Result<Identity, _> = serde_json::from_str("\"peerA\"");
        assert!(ok.is_ok());
        let bad: std::result::Result<Identity, _> = serde_json::from_str("\"a/b\"");
        assert!(bad.is_err());
    }
}
