//! Tree store: the session's cache of "my tree" and the shared tree being
//! viewed, with loading/error state and optimistic mutations.
//!
//! All state changes go through [`TreeStore::update`], which republishes a
//! [`StoreSnapshot`] on the watch channel returned by [`TreeStore::subscribe`].
//!
//! Mutations to the same tree id are serialized in issue order: the next
//! patch is not sent to the backend until the previous one has been committed
//! or rolled back in the cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::domain::{
    AppError, Branch, BranchChanges, BranchRemovalPolicy, Fruit, FruitChanges, Result, Root,
    RootChanges, Tree, TreePatch,
};
use crate::infrastructure::TreeRemote;

use super::optimistic::PendingMutation;

/// Public state of the store, as seen by the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    /// My tree, `None` until loaded.
    pub tree: Option<Tree>,
    /// Last fetched shared tree.
    pub shared_tree: Option<Tree>,
    pub is_loading: bool,
    /// Displayable message of the last failure.
    pub error: Option<String>,
}

/// How a fetch call settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Loaded,
    /// Another fetch of the same tree was already in flight.
    Coalesced,
    /// The result arrived after the view moved on and was discarded.
    Superseded,
    /// The failure is recorded in `error`.
    Failed,
}

#[derive(Default)]
struct StoreState {
    tree: Option<Tree>,
    shared_tree: Option<Tree>,
    error: Option<String>,
    my_tree_loading: bool,
    shared_loading: bool,
    shared_generation: u64,
    /// Bumped by `clear`; results started before a clear are dropped.
    epoch: u64,
}

impl StoreState {
    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            tree: self.tree.clone(),
            shared_tree: self.shared_tree.clone(),
            is_loading: self.my_tree_loading || self.shared_loading,
            error: self.error.clone(),
        }
    }
}

/// Resets the in-flight flag of a my-tree fetch if the fetch future is dropped.
struct MyTreeLoading<'a> {
    store: &'a TreeStore,
    armed: bool,
}

impl MyTreeLoading<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for MyTreeLoading<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.update(|st| st.my_tree_loading = false);
        }
    }
}

/// Session-scoped tree cache.
pub struct TreeStore {
    owner_id: String,
    remote: Arc<dyn TreeRemote>,
    removal_policy: BranchRemovalPolicy,
    state: Mutex<StoreState>,
    tree_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    changes: watch::Sender<StoreSnapshot>,
}

impl TreeStore {
    /// Create an empty store for `owner_id`.
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        remote: Arc<dyn TreeRemote>,
        removal_policy: BranchRemovalPolicy,
    ) -> Self {
        let (changes, _) = watch::channel(StoreSnapshot::default());
        Self {
            owner_id: owner_id.into(),
            remote,
            removal_policy,
            state: Mutex::new(StoreState::default()),
            tree_locks: Mutex::new(HashMap::new()),
            changes,
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        self.state.lock().snapshot()
    }

    /// Receiver updated after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.changes.subscribe()
    }

    #[must_use]
    pub fn tree(&self) -> Option<Tree> {
        self.state.lock().tree.clone()
    }

    #[must_use]
    pub fn shared_tree(&self) -> Option<Tree> {
        self.state.lock().shared_tree.clone()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        let st = self.state.lock();
        st.my_tree_loading || st.shared_loading
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn clear_error(&self) {
        self.update(|st| st.error = None);
    }

    fn update<R>(&self, change: impl FnOnce(&mut StoreState) -> R) -> R {
        let (result, snapshot) = {
            let mut st = self.state.lock();
            let result = change(&mut st);
            (result, st.snapshot())
        };
        self.changes.send_replace(snapshot);
        result
    }

    /// Record `err` as the displayable error and hand it back.
    fn fail(&self, err: AppError) -> AppError {
        self.update(|st| st.error = Some(err.user_message()));
        err
    }

    /// Load my tree. A call while another is in flight is a no-op.
    ///
    /// On failure the previously cached tree stays available; only a tree
    /// that violates its invariants is dropped from the cache.
    pub async fn fetch_my_tree(&self) -> FetchOutcome {
        let epoch = self.update(|st| {
            if st.my_tree_loading {
                return None;
            }
            st.my_tree_loading = true;
            st.error = None;
            Some(st.epoch)
        });
        let Some(epoch) = epoch else {
            tracing::debug!(owner_id = %self.owner_id, "Tree fetch already in flight");
            return FetchOutcome::Coalesced;
        };
        let loading = MyTreeLoading {
            store: self,
            armed: true,
        };

        let result = self.load_valid_tree().await;

        let outcome = self.update(|st| {
            st.my_tree_loading = false;
            if st.epoch != epoch {
                return FetchOutcome::Superseded;
            }
            match result {
                Ok(tree) => {
                    tracing::info!(
                        tree_id = %tree.id,
                        branches = tree.branches.len(),
                        fruits = tree.fruits.len(),
                        "Tree loaded"
                    );
                    st.tree = Some(tree);
                    FetchOutcome::Loaded
                }
                Err(err) => {
                    tracing::warn!(owner_id = %self.owner_id, error = %err, "Tree fetch failed");
                    if matches!(err, AppError::CorruptTree { .. }) {
                        st.tree = None;
                    }
                    st.error = Some(err.user_message());
                    FetchOutcome::Failed
                }
            }
        });
        loading.disarm();
        outcome
    }

    /// Fetch and validate; a corrupt tree clears the cache and is fetched once more.
    async fn load_valid_tree(&self) -> Result<Tree> {
        let tree = self.remote.fetch_tree(&self.owner_id).await?;
        match tree.validate() {
            Ok(()) => Ok(tree),
            Err(err) => {
                tracing::warn!(tree_id = %tree.id, error = %err, "Fetched corrupt tree, refetching");
                self.update(|st| st.tree = None);
                let tree = self.remote.fetch_tree(&self.owner_id).await?;
                tree.validate()?;
                Ok(tree)
            }
        }
    }

    /// Load the tree behind a share token.
    ///
    /// Clears the previous shared tree first. Once settled, exactly one of
    /// `shared_tree` and `error` is set.
    pub async fn fetch_shared_tree(&self, share_token: &str) -> FetchOutcome {
        let generation = self.update(|st| {
            st.shared_generation += 1;
            st.shared_tree = None;
            st.shared_loading = true;
            st.error = None;
            st.shared_generation
        });

        let result = self
            .remote
            .fetch_shared_tree(share_token)
            .await
            .and_then(|tree| tree.validate().map(|()| tree));

        self.update(|st| {
            if st.shared_generation != generation {
                return FetchOutcome::Superseded;
            }
            st.shared_loading = false;
            match result {
                Ok(tree) => {
                    tracing::info!(tree_id = %tree.id, "Shared tree loaded");
                    st.shared_tree = Some(tree);
                    st.error = None;
                    FetchOutcome::Loaded
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Shared tree fetch failed");
                    st.shared_tree = None;
                    st.error = Some(err.user_message());
                    FetchOutcome::Failed
                }
            }
        })
    }

    /// Drop the shared tree when leaving its view; a fetch still in flight
    /// is discarded when it settles.
    pub fn leave_shared_view(&self) {
        self.update(|st| {
            st.shared_generation += 1;
            st.shared_tree = None;
            st.shared_loading = false;
        });
    }

    /// Forget everything. Called on logout or identity change.
    pub fn clear(&self) {
        self.update(|st| {
            let epoch = st.epoch + 1;
            let shared_generation = st.shared_generation + 1;
            *st = StoreState {
                epoch,
                shared_generation,
                ..StoreState::default()
            };
        });
        // Serial locks survive: a mutation issued before the clear may still
        // be in flight.
        tracing::debug!(owner_id = %self.owner_id, "Tree store cleared");
    }

    /// Create the first tree of the owner and cache it.
    ///
    /// # Errors
    /// Returns the backend failure, also recorded in `error`.
    pub async fn create_my_tree(&self, name: &str) -> Result<Tree> {
        match self.remote.create_tree(&self.owner_id, name).await {
            Ok(tree) => {
                self.update(|st| {
                    st.tree = Some(tree.clone());
                    st.error = None;
                });
                Ok(tree)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Issue a share token for my tree.
    ///
    /// # Errors
    /// `NotFound` if my tree is not loaded, or the backend failure.
    pub async fn share_my_tree(&self) -> Result<String> {
        let tree_id = self.loaded_tree_id().map_err(|e| self.fail(e))?;
        self.remote
            .create_share_token(&tree_id)
            .await
            .map_err(|e| self.fail(e))
    }

    fn loaded_tree_id(&self) -> Result<String> {
        self.state
            .lock()
            .tree
            .as_ref()
            .map(|t| t.id.clone())
            .ok_or_else(|| AppError::not_found("tree"))
    }

    fn serial_lock(&self, tree_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.tree_locks
            .lock()
            .entry(tree_id.to_string())
            .or_default()
            .clone()
    }

    /// Apply `patch` optimistically to my tree and confirm it with the backend.
    ///
    /// The cache shows the change immediately. On backend failure it is
    /// restored to the exact pre-mutation tree and `error` is set.
    ///
    /// # Errors
    /// The local validation failure (nothing is sent), or the backend failure
    /// after rollback.
    pub async fn apply(&self, patch: TreePatch) -> Result<Tree> {
        let tree_id = self.loaded_tree_id().map_err(|e| self.fail(e))?;
        let serial = self.serial_lock(&tree_id);
        let _turn = serial.lock().await;

        let started = self.update(|st| -> Result<(PendingMutation, u64)> {
            let base = st
                .tree
                .as_ref()
                .filter(|t| t.id == tree_id)
                .ok_or_else(|| AppError::not_found("tree"))?;
            let pending = PendingMutation::begin(base, patch)?;
            st.tree = Some(pending.optimistic().clone());
            st.error = None;
            Ok((pending, st.epoch))
        });
        let (pending, epoch) = started.map_err(|e| self.fail(e))?;
        let op = pending.patch().label();

        match self.remote.mutate_tree(&tree_id, pending.patch()).await {
            Ok(confirmed) => {
                if let Err(err) = confirmed.validate() {
                    tracing::warn!(tree_id = %tree_id, op, error = %err, "Backend returned corrupt tree");
                    self.update(|st| {
                        if st.epoch == epoch {
                            st.tree = None;
                        }
                    });
                    let err = self.fail(err);
                    self.fetch_my_tree().await;
                    return Err(err);
                }
                self.update(|st| {
                    if st.epoch == epoch {
                        st.tree = Some(pending.commit(confirmed.clone()));
                    }
                });
                tracing::info!(tree_id = %tree_id, op, "Mutation confirmed");
                Ok(confirmed)
            }
            Err(err) => {
                tracing::warn!(tree_id = %tree_id, op, error = %err, "Mutation failed, rolling back");
                self.update(|st| {
                    if st.epoch == epoch {
                        st.tree = Some(pending.rollback());
                    }
                    st.error = Some(err.user_message());
                });
                Err(err)
            }
        }
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn add_branch(&self, branch: Branch) -> Result<Tree> {
        self.apply(TreePatch::AddBranch { branch }).await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn update_branch(&self, branch_id: &str, changes: BranchChanges) -> Result<Tree> {
        self.apply(TreePatch::UpdateBranch {
            branch_id: branch_id.to_string(),
            changes,
        })
        .await
    }

    /// Remove a branch following the configured removal policy.
    ///
    /// # Errors
    /// See [`TreeStore::apply`]; with the `reject` policy a branch that still
    /// holds fruits is a validation error.
    pub async fn remove_branch(&self, branch_id: &str) -> Result<Tree> {
        self.apply(TreePatch::RemoveBranch {
            branch_id: branch_id.to_string(),
            cascade: self.removal_policy.cascades(),
        })
        .await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn add_fruit(&self, fruit: Fruit) -> Result<Tree> {
        self.apply(TreePatch::AddFruit { fruit }).await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn update_fruit(&self, fruit_id: &str, changes: FruitChanges) -> Result<Tree> {
        self.apply(TreePatch::UpdateFruit {
            fruit_id: fruit_id.to_string(),
            changes,
        })
        .await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn remove_fruit(&self, fruit_id: &str) -> Result<Tree> {
        self.apply(TreePatch::RemoveFruit {
            fruit_id: fruit_id.to_string(),
        })
        .await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn add_root(&self, root: Root) -> Result<Tree> {
        self.apply(TreePatch::AddRoot { root }).await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn update_root(&self, root_id: &str, changes: RootChanges) -> Result<Tree> {
        self.apply(TreePatch::UpdateRoot {
            root_id: root_id.to_string(),
            changes,
        })
        .await
    }

    /// # Errors
    /// See [`TreeStore::apply`].
    pub async fn remove_root(&self, root_id: &str) -> Result<Tree> {
        self.apply(TreePatch::RemoveRoot {
            root_id: root_id.to_string(),
        })
        .await
    }
}
