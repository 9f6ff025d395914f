//! Gift lifecycle: tracks gifts sent by and addressed to the current user,
//! drives their status transitions, and copies accepted content into the
//! recipient's tree through the [`TreeStore`].
//!
//! Time capsules are checked lazily: every read accessor first materializes
//! any accepted gift whose unlock date has passed. A gift's content lands in
//! the tree at most once; operations on the same gift id are serialized.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{
    AppError, Clock, Gift, GiftDecision, GiftDraft, GiftStatus, Result, User,
};
use crate::infrastructure::TreeRemote;

use super::tree_store::TreeStore;

#[derive(Default)]
struct GiftState {
    gifts: Vec<Gift>,
    error: Option<String>,
    /// Gifts copied into the tree this session, kept even when the backend
    /// failed to record the copy.
    copied: HashMap<String, DateTime<Utc>>,
}

impl GiftState {
    fn find(&self, gift_id: &str) -> Option<&Gift> {
        self.gifts.iter().find(|g| g.id == gift_id)
    }

    fn upsert(&mut self, mut gift: Gift) {
        if gift.materialized_at.is_none() {
            gift.materialized_at = self.copied.get(&gift.id).copied();
        }
        match self.gifts.iter_mut().find(|g| g.id == gift.id) {
            Some(existing) => *existing = gift,
            None => self.gifts.push(gift),
        }
    }
}

/// Session-scoped gift tracker.
pub struct GiftManager {
    user: User,
    remote: Arc<dyn TreeRemote>,
    store: Arc<TreeStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<GiftState>,
    gift_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl GiftManager {
    #[must_use]
    pub fn new(
        user: User,
        remote: Arc<dyn TreeRemote>,
        store: Arc<TreeStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user,
            remote,
            store,
            clock,
            state: Mutex::new(GiftState::default()),
            gift_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Displayable message of the last failure.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    fn fail(&self, err: AppError) -> AppError {
        self.state.lock().error = Some(err.user_message());
        err
    }

    fn serial_lock(&self, gift_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.gift_locks
            .lock()
            .entry(gift_id.to_string())
            .or_default()
            .clone()
    }

    fn cached(&self, gift_id: &str) -> Option<Gift> {
        self.state.lock().find(gift_id).cloned()
    }

    /// Reload the gift list from the backend, then materialize due gifts.
    ///
    /// # Errors
    /// Returns the backend failure, also recorded in `error`.
    pub async fn refresh(&self) -> Result<()> {
        let gifts = self
            .remote
            .fetch_gifts(&self.user.id)
            .await
            .map_err(|e| self.fail(e))?;
        tracing::info!(user_id = %self.user.id, count = gifts.len(), "Gifts loaded");
        {
            let mut st = self.state.lock();
            st.gifts.clear();
            for gift in gifts {
                st.upsert(gift);
            }
            st.error = None;
        }
        self.materialize_due().await;
        Ok(())
    }

    /// Gifts addressed to the current user.
    pub async fn received(&self) -> Vec<Gift> {
        self.materialize_due().await;
        self.state
            .lock()
            .gifts
            .iter()
            .filter(|g| g.recipient_id == self.user.id)
            .cloned()
            .collect()
    }

    /// Gifts sent by the current user.
    pub async fn sent(&self) -> Vec<Gift> {
        self.materialize_due().await;
        self.state
            .lock()
            .gifts
            .iter()
            .filter(|g| g.sender_id == self.user.id)
            .cloned()
            .collect()
    }

    pub async fn gift(&self, gift_id: &str) -> Option<Gift> {
        self.materialize_due().await;
        self.cached(gift_id)
    }

    /// Received gifts the recipient has not looked at yet.
    #[must_use]
    pub fn unseen_count(&self) -> usize {
        self.state
            .lock()
            .gifts
            .iter()
            .filter(|g| g.recipient_id == self.user.id && g.is_new)
            .count()
    }

    /// Send a gift. Retrying with the same draft cannot create a duplicate.
    ///
    /// # Errors
    /// `Validation` for a malformed draft (nothing is sent), or the backend failure.
    pub async fn send(&self, draft: &GiftDraft) -> Result<Gift> {
        draft.validate(&self.user.id).map_err(|e| self.fail(e))?;
        let gift = self
            .remote
            .send_gift(&self.user, draft)
            .await
            .map_err(|e| self.fail(e))?;
        tracing::info!(
            gift_id = %gift.id,
            kind = %gift.kind,
            recipient_id = %gift.recipient_id,
            "Gift sent"
        );
        self.state.lock().upsert(gift.clone());
        Ok(gift)
    }

    /// Accept a pending gift addressed to the current user.
    ///
    /// Branch, fruit and tree gifts are copied into the tree right away; a
    /// time capsule is only marked accepted until its unlock date passes. If
    /// copying fails the gift stays accepted and the copy is retried on the
    /// next access.
    ///
    /// # Errors
    /// `Validation` if the gift is addressed to someone else, `Conflict` if it
    /// was already answered, or the backend failure.
    pub async fn accept(&self, gift_id: &str) -> Result<Gift> {
        let serial = self.serial_lock(gift_id);
        let _turn = serial.lock().await;

        let gift = self.respond(gift_id, GiftDecision::Accepted).await?;
        if gift.needs_materialization(self.clock.now()) {
            if let Err(err) = self.materialize_locked(&gift).await {
                tracing::warn!(gift_id, error = %err, "Accepted gift not copied yet");
                self.fail(err);
            }
        } else {
            tracing::info!(gift_id, unlock_date = ?gift.unlock_date, "Time capsule accepted, still locked");
        }
        Ok(self.cached(gift_id).unwrap_or(gift))
    }

    /// Reject a pending gift. Nothing is copied and the sender is not notified here.
    ///
    /// # Errors
    /// Same as [`GiftManager::accept`].
    pub async fn reject(&self, gift_id: &str) -> Result<Gift> {
        let serial = self.serial_lock(gift_id);
        let _turn = serial.lock().await;
        self.respond(gift_id, GiftDecision::Rejected).await
    }

    /// Look up a gift, loading the list once if it is not cached yet.
    async fn locate(&self, gift_id: &str) -> Result<Gift> {
        if let Some(gift) = self.cached(gift_id) {
            return Ok(gift);
        }
        let gifts = self.remote.fetch_gifts(&self.user.id).await?;
        let mut st = self.state.lock();
        for gift in gifts {
            st.upsert(gift);
        }
        st.find(gift_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("gift {gift_id}")))
    }

    async fn respond(&self, gift_id: &str, decision: GiftDecision) -> Result<Gift> {
        let gift = self.locate(gift_id).await.map_err(|e| self.fail(e))?;
        if gift.recipient_id != self.user.id {
            return Err(self.fail(AppError::validation("this gift is not addressed to you")));
        }
        if gift.status.is_terminal() {
            tracing::warn!(gift_id, status = %gift.status, "Gift already answered");
            return Err(self.fail(AppError::conflict(format!(
                "gift {gift_id} is already {}",
                gift.status
            ))));
        }

        let updated = self
            .remote
            .respond_to_gift(gift_id, decision)
            .await
            .map_err(|e| self.fail(e))?;
        tracing::info!(gift_id, status = %updated.status, "Gift answered");
        {
            let mut st = self.state.lock();
            st.upsert(updated.clone());
            st.error = None;
        }
        Ok(updated)
    }

    /// Set `is_new = false`, whatever the status.
    ///
    /// # Errors
    /// `NotFound` for an unknown gift, or the backend failure.
    pub async fn mark_seen(&self, gift_id: &str) -> Result<Gift> {
        let serial = self.serial_lock(gift_id);
        let _turn = serial.lock().await;

        let gift = self.locate(gift_id).await.map_err(|e| self.fail(e))?;
        if !gift.is_new {
            return Ok(gift);
        }
        let updated = self
            .remote
            .mark_gift_seen(gift_id)
            .await
            .map_err(|e| self.fail(e))?;
        self.state.lock().upsert(updated.clone());
        Ok(updated)
    }

    /// Copy every accepted, unlocked, not yet copied gift into the tree.
    /// Returns how many were copied by this call.
    pub async fn materialize_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<String> = self
            .state
            .lock()
            .gifts
            .iter()
            .filter(|g| g.recipient_id == self.user.id && g.needs_materialization(now))
            .map(|g| g.id.clone())
            .collect();

        let mut copied = 0;
        for gift_id in due {
            let serial = self.serial_lock(&gift_id);
            let _turn = serial.lock().await;

            // Another access may have copied it while we waited.
            let Some(gift) = self.cached(&gift_id) else {
                continue;
            };
            if !gift.needs_materialization(self.clock.now()) {
                continue;
            }
            match self.materialize_locked(&gift).await {
                Ok(()) => copied += 1,
                Err(err) => {
                    tracing::warn!(gift_id = %gift_id, error = %err, "Gift copy failed, will retry");
                    self.fail(err);
                }
            }
        }
        copied
    }

    /// Copy the gift's content into my tree. Caller holds the gift's serial lock.
    async fn materialize_locked(&self, gift: &Gift) -> Result<()> {
        debug_assert_eq!(gift.status, GiftStatus::Accepted);
        let content = self.remote.fetch_gift_content(&gift.id).await?;

        if self.store.tree().is_none() {
            self.store.fetch_my_tree().await;
        }
        let tree = self.store.tree().ok_or_else(|| AppError::not_found("tree"))?;

        let now = self.clock.now();
        self.store.apply(content.graft_into(&tree, now)).await?;

        let recorded = match self.remote.mark_gift_materialized(&gift.id, now).await {
            Ok(updated) => updated,
            Err(err) => {
                // The content is in the tree; remember that locally even if the
                // backend did not record it.
                tracing::warn!(gift_id = %gift.id, error = %err, "Could not record gift copy");
                Gift {
                    materialized_at: Some(now),
                    ..gift.clone()
                }
            }
        };
        tracing::info!(gift_id = %gift.id, kind = %gift.kind, "Gift content added to tree");
        let mut st = self.state.lock();
        st.copied.insert(gift.id.clone(), now);
        st.upsert(recorded);
        Ok(())
    }

    /// Forget all gifts. Called on logout.
    pub fn clear(&self) {
        *self.state.lock() = GiftState::default();
        self.gift_locks.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::domain::{
        BranchRemovalPolicy, Branch, FixedClock, Fruit, GiftContent, GiftKind, Tree, TreePatch,
    };
    use crate::infrastructure::InMemoryRemote;

    const ME: &str = "demo_user";

    fn me() -> User {
        User {
            id: ME.into(),
            name: "Demo User".into(),
            email: "demo@alma.com".into(),
            avatar: None,
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        remote: Arc<InMemoryRemote>,
        store: Arc<TreeStore>,
        clock: Arc<FixedClock>,
        manager: GiftManager,
    }

    async fn fixture() -> Fixture {
        let remote = Arc::new(InMemoryRemote::new());
        let mut tree = Tree::new(ME, "Demo tree");
        tree.apply(&TreePatch::AddBranch {
            branch: Branch::new("Family", "family"),
        })
        .unwrap();
        remote.insert_tree(tree);

        let store = Arc::new(TreeStore::new(ME, remote.clone(), BranchRemovalPolicy::Reject));
        store.fetch_my_tree().await;
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = GiftManager::new(me(), remote.clone(), store.clone(), clock.clone());
        Fixture {
            remote,
            store,
            clock,
            manager,
        }
    }

    fn incoming(fx: &Fixture, kind: GiftKind, content: GiftContent) -> String {
        let mut draft = GiftDraft::new(kind, ME, "content", "with love");
        if kind == GiftKind::TimeCapsule {
            draft = draft.with_unlock_date(fx.clock.now() + Duration::days(30));
        }
        let gift = draft.into_gift("grandma", "Grandma", fx.clock.now());
        let id = gift.id.clone();
        fx.remote.insert_gift(gift, content);
        id
    }

    fn travel_branch() -> GiftContent {
        let branch = Branch::new("Trips", "travel");
        let fruits = vec![
            Fruit::new(&branch.id, "Lisbon", ""),
            Fruit::new(&branch.id, "Porto", ""),
        ];
        GiftContent::Branch { branch, fruits }
    }

    #[tokio::test]
    async fn test_accept_branch_gift_copies_content() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::Branch, travel_branch());
        fx.manager.refresh().await.unwrap();

        let gift = fx.manager.accept(&gift_id).await.unwrap();

        assert_eq!(gift.status, GiftStatus::Accepted);
        assert!(gift.materialized_at.is_some());
        let tree = fx.store.tree().unwrap();
        assert_eq!(tree.branches.len(), 2);
        assert_eq!(tree.fruits.len(), 2);
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_accept_loads_unknown_gift() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::Branch, travel_branch());

        let gift = fx.manager.accept(&gift_id).await.unwrap();
        assert_eq!(gift.status, GiftStatus::Accepted);
    }

    #[tokio::test]
    async fn test_second_answer_conflicts_and_keeps_status() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::Branch, travel_branch());
        fx.manager.refresh().await.unwrap();
        fx.manager.reject(&gift_id).await.unwrap();

        let accept = fx.manager.accept(&gift_id).await.unwrap_err();
        let reject = fx.manager.reject(&gift_id).await.unwrap_err();

        assert!(matches!(accept, AppError::Conflict { .. }));
        assert!(matches!(reject, AppError::Conflict { .. }));
        let gift = fx.manager.gift(&gift_id).await.unwrap();
        assert_eq!(gift.status, GiftStatus::Rejected);
        assert_eq!(fx.remote.calls("respond_to_gift"), 1);
        assert_eq!(fx.store.tree().unwrap().branches.len(), 1);
        assert!(fx.manager.error().is_some());
    }

    #[tokio::test]
    async fn test_sender_cannot_answer_own_gift() {
        let fx = fixture().await;
        let branch_id = fx.store.tree().unwrap().branches[0].id.clone();
        let sent = fx
            .manager
            .send(&GiftDraft::new(GiftKind::Branch, "user_ana", branch_id, "for you"))
            .await
            .unwrap();

        let accept = fx.manager.accept(&sent.id).await.unwrap_err();
        let reject = fx.manager.reject(&sent.id).await.unwrap_err();

        assert!(matches!(accept, AppError::Validation { .. }));
        assert!(matches!(reject, AppError::Validation { .. }));
        assert_eq!(fx.remote.calls("respond_to_gift"), 0);
        assert_eq!(fx.manager.gift(&sent.id).await.unwrap().status, GiftStatus::Pending);
    }

    #[tokio::test]
    async fn test_time_capsule_waits_for_unlock_date() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::TimeCapsule, travel_branch());
        fx.manager.refresh().await.unwrap();

        let gift = fx.manager.accept(&gift_id).await.unwrap();
        assert_eq!(gift.status, GiftStatus::Accepted);
        assert!(gift.materialized_at.is_none());
        assert_eq!(fx.store.tree().unwrap().branches.len(), 1);

        fx.clock.advance(Duration::days(31));
        let received = fx.manager.received().await;
        assert!(received[0].materialized_at.is_some());
        assert_eq!(fx.store.tree().unwrap().branches.len(), 2);

        fx.manager.received().await;
        fx.manager.gift(&gift_id).await;
        assert_eq!(fx.store.tree().unwrap().branches.len(), 2);
        assert_eq!(fx.remote.calls("fetch_gift_content"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_access_copies_once() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::TimeCapsule, travel_branch());
        fx.manager.refresh().await.unwrap();
        fx.manager.accept(&gift_id).await.unwrap();
        fx.clock.advance(Duration::days(31));

        let (a, b) = tokio::join!(fx.manager.materialize_due(), fx.manager.materialize_due());

        assert_eq!(a + b, 1);
        assert_eq!(fx.store.tree().unwrap().branches.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_copy_is_retried_on_next_access() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::Branch, travel_branch());
        fx.manager.refresh().await.unwrap();
        fx.remote.fail_next("mutate_tree", AppError::network("offline"));

        let gift = fx.manager.accept(&gift_id).await.unwrap();
        assert_eq!(gift.status, GiftStatus::Accepted);
        assert!(gift.materialized_at.is_none());
        assert_eq!(fx.store.tree().unwrap().branches.len(), 1);

        fx.manager.received().await;
        assert_eq!(fx.store.tree().unwrap().branches.len(), 2);
    }

    #[tokio::test]
    async fn test_unrecorded_copy_is_not_repeated_after_refresh() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::Branch, travel_branch());
        fx.manager.refresh().await.unwrap();
        fx.remote
            .fail_next("mark_gift_materialized", AppError::network("offline"));

        let gift = fx.manager.accept(&gift_id).await.unwrap();
        assert!(gift.materialized_at.is_some());
        assert_eq!(fx.store.tree().unwrap().branches.len(), 2);

        fx.manager.refresh().await.unwrap();
        fx.manager.received().await;

        assert_eq!(fx.store.tree().unwrap().branches.len(), 2);
        assert_eq!(fx.remote.calls("fetch_gift_content"), 1);
        assert!(fx.manager.gift(&gift_id).await.unwrap().materialized_at.is_some());
    }

    #[tokio::test]
    async fn test_tree_gift_grafts_everything() {
        let fx = fixture().await;
        let mut gifted = Tree::new("grandma", "Grandma's tree");
        let branch = Branch::new("Work", "work");
        let branch_id = branch.id.clone();
        gifted.branches.push(branch);
        gifted.fruits.push(Fruit::new(&branch_id, "First shop", ""));
        gifted.roots.push(crate::domain::Root::new("Great-grandpa", "grandfather"));
        let gift_id = incoming(&fx, GiftKind::Tree, GiftContent::Tree { tree: gifted });

        fx.manager.accept(&gift_id).await.unwrap();

        let tree = fx.store.tree().unwrap();
        assert_eq!(tree.branches.len(), 2);
        assert_eq!(tree.fruits.len(), 1);
        assert_eq!(tree.roots.len(), 1);
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_mark_seen_is_independent_of_status() {
        let fx = fixture().await;
        let gift_id = incoming(&fx, GiftKind::Branch, travel_branch());
        fx.manager.refresh().await.unwrap();
        fx.manager.reject(&gift_id).await.unwrap();
        assert_eq!(fx.manager.unseen_count(), 1);

        let gift = fx.manager.mark_seen(&gift_id).await.unwrap();
        assert!(!gift.is_new);
        assert_eq!(gift.status, GiftStatus::Rejected);
        assert_eq!(fx.manager.unseen_count(), 0);
    }

    #[tokio::test]
    async fn test_send_validates_before_calling_backend() {
        let fx = fixture().await;
        let draft = GiftDraft::new(GiftKind::TimeCapsule, "friend", "content", "");

        let err = fx.manager.send(&draft).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(fx.remote.calls("send_gift"), 0);
    }

    #[tokio::test]
    async fn test_send_retry_returns_same_gift() {
        let fx = fixture().await;
        let branch_id = fx.store.tree().unwrap().branches[0].id.clone();
        let draft = GiftDraft::new(GiftKind::Branch, "friend", branch_id, "for you");

        let first = fx.manager.send(&draft).await.unwrap();
        let retry = fx.manager.send(&draft).await.unwrap();

        assert_eq!(first.id, retry.id);
        assert_eq!(fx.manager.sent().await.len(), 1);
    }
}
