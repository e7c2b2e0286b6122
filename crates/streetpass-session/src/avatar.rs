//! Identity and profile lifecycle.

use std::sync::Arc;

use streetpass_db::LocalStore;
use streetpass_types::{Identity, Profile, ProfileUpdate};
use tracing::{info, warn};

use crate::error::{Result, SessionError};

/// Owns the device identity and avatar profile on top of a [`LocalStore`].
pub struct AvatarManager<S> {
    store: Arc<S>,
    identity: Identity,
    profile: Profile,
}

impl<S: LocalStore> AvatarManager<S> {
    /// Resolve identity and profile at startup.
    ///
    /// Identity comes from `shared_link` if it carries one, else from the
    /// store, else it is generated. It is saved when newly generated or taken
    /// from a link. The stored profile is used unless the link names a
    /// different identity, in which case the device starts from the default
    /// profile.
    pub fn bootstrap(store: Arc<S>, shared_link: Option<&str>, now: u64) -> Self {
        let linked = shared_link.and_then(|link| match Identity::from_share_link(link) {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Ignoring shared link: {e}");
                None
            }
        });
        let stored = store.load_identity();

        let identity = match (&linked, &stored) {
            (Some(linked), _) => linked.clone(),
            (None, Some(stored)) => stored.clone(),
            (None, None) => Identity::generate(),
        };
        if linked.is_some() || stored.is_none() {
            if let Err(e) = store.save_identity(&identity) {
                warn!("Failed to save identity: {e}");
            }
        }

        let foreign_link = linked.is_some() && linked != stored;
        let profile = match store.load_profile() {
            Some(profile) if !foreign_link => profile,
            _ => Profile::new_default(now),
        };

        info!(identity = %identity, from_link = linked.is_some(), "Avatar bootstrapped");
        Self {
            store,
            identity,
            profile,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Merge `update` into the profile and persist it.
    pub fn update(&mut self, update: &ProfileUpdate, now: u64) -> Result<&Profile> {
        let next = update.apply(&self.profile, now)?;
        self.store.save_profile(&next)?;
        self.profile = next;
        Ok(&self.profile)
    }

    /// Take over the identity carried by `link`.
    ///
    /// Returns the adopted identity, or `None` if it is the current one.
    /// A different identity starts from the default profile.
    pub fn adopt_link(&mut self, link: &str, now: u64) -> Result<Option<Identity>> {
        let linked = Identity::from_share_link(link)
            .map_err(|e| SessionError::InvalidLink(e.to_string()))?;
        let Some(identity) = linked else {
            return Ok(None);
        };
        if identity == self.identity {
            return Ok(None);
        }
        self.store.save_identity(&identity)?;
        info!(from = %self.identity, to = %identity, "Adopted shared identity");
        self.identity = identity.clone();
        self.profile = Profile::new_default(now);
        Ok(Some(identity))
    }

    /// Wipe the store and start over with a fresh identity.
    pub fn reset(&mut self, now: u64) -> Result<()> {
        self.store.reset()?;
        let identity = Identity::generate();
        self.store.save_identity(&identity)?;
        info!(identity = %identity, "Local data reset");
        self.identity = identity;
        self.profile = Profile::new_default(now);
        Ok(())
    }

    /// `{base}?user={id}` for this device.
    pub fn share_link(&self, base_url: &str) -> Result<String> {
        self.identity
            .share_link(base_url)
            .map_err(|e| SessionError::InvalidLink(e.to_string()))
    }
}
