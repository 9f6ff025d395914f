//! In-memory backend.
//!
//! Behaves like the real backend (authoritative patch application, gift
//! state machine, send deduplication) and adds knobs for tests: artificial
//! latency, scripted failures, call counters and a mutation concurrency probe.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::{
    AppError, Gift, GiftContent, GiftDecision, GiftDraft, Result, Tree, TreePatch, User,
};

use super::remote::{apply_on_backend, mint_share_token, snapshot_content, TreeRemote};

#[derive(Default)]
struct Backend {
    /// Keyed by tree id.
    trees: HashMap<String, Tree>,
    share_tokens: HashMap<String, String>,
    gifts: Vec<Gift>,
    contents: HashMap<String, GiftContent>,
    /// Client request id to gift id.
    requests: HashMap<String, String>,
}

impl Backend {
    fn tree_of(&self, owner_id: &str) -> Option<&Tree> {
        self.trees.values().find(|t| t.owner_id == owner_id)
    }

    fn gift_mut(&mut self, gift_id: &str) -> Result<&mut Gift> {
        self.gifts
            .iter_mut()
            .find(|g| g.id == gift_id)
            .ok_or_else(|| AppError::not_found(format!("gift {gift_id}")))
    }
}

/// In-memory [`TreeRemote`].
#[derive(Default)]
pub struct InMemoryRemote {
    backend: Mutex<Backend>,
    latency: Duration,
    failures: Mutex<HashMap<&'static str, VecDeque<AppError>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    patches: Mutex<Vec<TreePatch>>,
    mutations_in_flight: AtomicUsize,
    max_mutations_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Store a tree as-is, without validating it.
    pub fn insert_tree(&self, tree: Tree) {
        self.backend.lock().trees.insert(tree.id.clone(), tree);
    }

    /// Current backend copy of `owner_id`'s tree.
    #[must_use]
    pub fn tree_of(&self, owner_id: &str) -> Option<Tree> {
        self.backend.lock().tree_of(owner_id).cloned()
    }

    /// Register a share token for a tree.
    pub fn insert_share_token(&self, token: impl Into<String>, tree_id: impl Into<String>) {
        self.backend
            .lock()
            .share_tokens
            .insert(token.into(), tree_id.into());
    }

    /// Store a gift and its content snapshot directly.
    pub fn insert_gift(&self, gift: Gift, content: GiftContent) {
        let mut backend = self.backend.lock();
        backend.contents.insert(gift.id.clone(), content);
        backend.gifts.push(gift);
    }

    #[must_use]
    pub fn gift(&self, gift_id: &str) -> Option<Gift> {
        self.backend
            .lock()
            .gifts
            .iter()
            .find(|g| g.id == gift_id)
            .cloned()
    }

    /// Make the next call of `op` fail with `err`. Failures queue per operation.
    pub fn fail_next(&self, op: &'static str, err: AppError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    /// Number of calls received for `op` (e.g. `"fetch_tree"`).
    #[must_use]
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    /// Patches received by `mutate_tree`, in arrival order.
    #[must_use]
    pub fn patches(&self) -> Vec<TreePatch> {
        self.patches.lock().clone()
    }

    /// Highest number of `mutate_tree` calls observed running at once.
    #[must_use]
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_mutations_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &'static str) -> Result<()> {
        *self.calls.lock().entry(op).or_default() += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self.failures.lock().get_mut(op).and_then(VecDeque::pop_front);
        match scripted {
            Some(err) => {
                tracing::debug!(op, error = %err, "Scripted failure");
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TreeRemote for InMemoryRemote {
    async fn fetch_tree(&self, owner_id: &str) -> Result<Tree> {
        self.enter("fetch_tree").await?;
        self.backend
            .lock()
            .tree_of(owner_id)
            .cloned()
            .ok_or_else(|| AppError::not_found("tree"))
    }

    async fn create_tree(&self, owner_id: &str, name: &str) -> Result<Tree> {
        self.enter("create_tree").await?;
        let mut backend = self.backend.lock();
        if backend.tree_of(owner_id).is_some() {
            return Err(AppError::conflict(format!("{owner_id} already has a tree")));
        }
        let tree = Tree::new(owner_id, name);
        backend.trees.insert(tree.id.clone(), tree.clone());
        Ok(tree)
    }

    async fn fetch_shared_tree(&self, share_token: &str) -> Result<Tree> {
        self.enter("fetch_shared_tree").await?;
        let backend = self.backend.lock();
        backend
            .share_tokens
            .get(share_token)
            .and_then(|tree_id| backend.trees.get(tree_id))
            .cloned()
            .ok_or_else(|| AppError::not_found("shared tree"))
    }

    async fn create_share_token(&self, tree_id: &str) -> Result<String> {
        self.enter("create_share_token").await?;
        let mut backend = self.backend.lock();
        if !backend.trees.contains_key(tree_id) {
            return Err(AppError::not_found("tree"));
        }
        let token = mint_share_token();
        backend.share_tokens.insert(token.clone(), tree_id.to_string());
        Ok(token)
    }

    async fn mutate_tree(&self, tree_id: &str, patch: &TreePatch) -> Result<Tree> {
        let current = self.mutations_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.mutations_in_flight);
        self.max_mutations_in_flight.fetch_max(current, Ordering::SeqCst);

        self.patches.lock().push(patch.clone());
        self.enter("mutate_tree").await?;

        let mut backend = self.backend.lock();
        let tree = backend
            .trees
            .get_mut(tree_id)
            .ok_or_else(|| AppError::conflict(format!("tree {tree_id} no longer exists")))?;
        let mut next = tree.clone();
        apply_on_backend(&mut next, patch)?;
        *tree = next.clone();
        Ok(next)
    }

    async fn send_gift(&self, sender: &User, draft: &GiftDraft) -> Result<Gift> {
        self.enter("send_gift").await?;
        let mut backend = self.backend.lock();
        if let Some(existing) = backend
            .requests
            .get(&draft.request_id)
            .and_then(|id| backend.gifts.iter().find(|g| &g.id == id))
        {
            return Ok(existing.clone());
        }

        let content = snapshot_content(sender, backend.tree_of(&sender.id), draft)?;
        let gift = draft.clone().into_gift(&sender.id, &sender.name, Utc::now());
        backend.requests.insert(draft.request_id.clone(), gift.id.clone());
        backend.contents.insert(gift.id.clone(), content);
        backend.gifts.push(gift.clone());
        Ok(gift)
    }

    async fn respond_to_gift(&self, gift_id: &str, decision: GiftDecision) -> Result<Gift> {
        self.enter("respond_to_gift").await?;
        let mut backend = self.backend.lock();
        let gift = backend.gift_mut(gift_id)?;
        gift.respond(decision)?;
        Ok(gift.clone())
    }

    async fn fetch_gifts(&self, user_id: &str) -> Result<Vec<Gift>> {
        self.enter("fetch_gifts").await?;
        Ok(self
            .backend
            .lock()
            .gifts
            .iter()
            .filter(|g| g.sender_id == user_id || g.recipient_id == user_id)
            .cloned()
            .collect())
    }

    async fn fetch_gift_content(&self, gift_id: &str) -> Result<GiftContent> {
        self.enter("fetch_gift_content").await?;
        self.backend
            .lock()
            .contents
            .get(gift_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("content of gift {gift_id}")))
    }

    async fn mark_gift_seen(&self, gift_id: &str) -> Result<Gift> {
        self.enter("mark_gift_seen").await?;
        let mut backend = self.backend.lock();
        let gift = backend.gift_mut(gift_id)?;
        gift.is_new = false;
        Ok(gift.clone())
    }

    async fn mark_gift_materialized(&self, gift_id: &str, at: DateTime<Utc>) -> Result<Gift> {
        self.enter("mark_gift_materialized").await?;
        let mut backend = self.backend.lock();
        let gift = backend.gift_mut(gift_id)?;
        gift.materialized_at.get_or_insert(at);
        Ok(gift.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Branch, GiftKind, GiftStatus};

    fn alice() -> User {
        User {
            id: "alice".into(),
            name: "Alice".into(),
            email: "alice@alma.com".into(),
            avatar: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_send_gift_deduplicates_by_request_id() {
        let remote = InMemoryRemote::new();
        let tree = remote.create_tree("alice", "Alice").await.unwrap();
        let branch = Branch::new("Family", "family");
        let branch_id = branch.id.clone();
        remote
            .mutate_tree(&tree.id, &TreePatch::AddBranch { branch })
            .await
            .unwrap();

        let draft = GiftDraft::new(GiftKind::Branch, "bob", branch_id, "hi");
        let first = remote.send_gift(&alice(), &draft).await.unwrap();
        let retry = remote.send_gift(&alice(), &draft).await.unwrap();

        assert_eq!(first.id, retry.id);
        assert_eq!(remote.fetch_gifts("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_gift_requires_owned_content() {
        let remote = InMemoryRemote::new();
        remote.create_tree("alice", "Alice").await.unwrap();
        let draft = GiftDraft::new(GiftKind::Fruit, "bob", "not-mine", "");
        let err = remote.send_gift(&alice(), &draft).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_backend_rejection_is_conflict() {
        let remote = InMemoryRemote::new();
        let tree = remote.create_tree("alice", "Alice").await.unwrap();
        let err = remote
            .mutate_tree(
                &tree.id,
                &TreePatch::RemoveFruit {
                    fruit_id: "ghost".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_respond_twice_conflicts() {
        let remote = InMemoryRemote::new();
        let tree = Tree::new("alice", "Alice");
        let gift = GiftDraft::new(GiftKind::Tree, "bob", &tree.id, "").into_gift("alice", "Alice", Utc::now());
        let gift_id = gift.id.clone();
        remote.insert_gift(gift, GiftContent::Tree { tree });

        remote.respond_to_gift(&gift_id, GiftDecision::Rejected).await.unwrap();
        let err = remote
            .respond_to_gift(&gift_id, GiftDecision::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(remote.gift(&gift_id).unwrap().status, GiftStatus::Rejected);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let remote = InMemoryRemote::new();
        remote.create_tree("alice", "Alice").await.unwrap();
        remote.fail_next("fetch_tree", AppError::network("offline"));

        assert!(remote.fetch_tree("alice").await.is_err());
        assert!(remote.fetch_tree("alice").await.is_ok());
        assert_eq!(remote.calls("fetch_tree"), 2);
    }
}
