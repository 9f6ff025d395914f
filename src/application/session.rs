//! Session: the owned lifetime of one identity's tree store and gift manager.
//!
//! Created after login, torn down at logout. Nothing else holds the cached
//! trees, so dropping the session releases them.

use std::sync::Arc;

use crate::domain::{AppConfig, Clock, Result, User};
use crate::infrastructure::{IdentityProvider, TreeRemote};

use super::gift_manager::GiftManager;
use super::tree_store::TreeStore;

pub struct Session {
    user: User,
    remote: Arc<dyn TreeRemote>,
    clock: Arc<dyn Clock>,
    config: AppConfig,
    store: Arc<TreeStore>,
    gifts: GiftManager,
}

impl Session {
    /// Start a session for an authenticated user.
    #[must_use]
    pub fn start(
        user: User,
        remote: Arc<dyn TreeRemote>,
        config: AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(TreeStore::new(
            user.id.clone(),
            remote.clone(),
            config.tree.branch_removal,
        ));
        let gifts = GiftManager::new(user.clone(), remote.clone(), store.clone(), clock.clone());
        tracing::info!(user_id = %user.id, "Session started");
        Self {
            user,
            remote,
            clock,
            config,
            store,
            gifts,
        }
    }

    /// Authenticate and start a session.
    ///
    /// # Errors
    /// Returns the identity provider's failure.
    pub async fn login(
        identity: &dyn IdentityProvider,
        email: &str,
        password: &str,
        remote: Arc<dyn TreeRemote>,
        config: AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let auth = identity.login(email, password).await?;
        Ok(Self::start(auth.user, remote, config, clock))
    }

    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<TreeStore> {
        &self.store
    }

    #[must_use]
    pub const fn gifts(&self) -> &GiftManager {
        &self.gifts
    }

    /// Load my tree and my gifts.
    ///
    /// # Errors
    /// Returns the gift list failure; tree failures are left in the store's `error`.
    pub async fn load(&self) -> Result<()> {
        self.store.fetch_my_tree().await;
        self.gifts.refresh().await
    }

    /// Tear down all cached state.
    pub fn logout(self) {
        self.store.clear();
        self.gifts.clear();
        tracing::info!(user_id = %self.user.id, "Session ended");
    }

    /// Identity change: tear down and start again for `user`.
    #[must_use]
    pub fn switch_user(self, user: User) -> Self {
        let remote = self.remote.clone();
        let clock = self.clock.clone();
        let config = self.config.clone();
        self.logout();
        Self::start(user, remote, config, clock)
    }
}
