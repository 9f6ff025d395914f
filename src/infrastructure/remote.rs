//! Remote access boundary for trees and gifts.
//!
//! The actual transport is an external collaborator; implementations here are
//! the in-memory backend and the local SQLite backend.
//!
//! Every operation is safe to retry except [`TreeRemote::send_gift`], which is
//! deduplicated by the draft's `request_id` instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Gift, GiftContent, GiftDecision, GiftDraft, Result, Tree, TreePatch, User};

#[async_trait]
pub trait TreeRemote: Send + Sync {
    /// Fetch the tree owned by `owner_id`.
    async fn fetch_tree(&self, owner_id: &str) -> Result<Tree>;

    /// Create the first tree of `owner_id`. Fails with `Conflict` if one exists.
    async fn create_tree(&self, owner_id: &str, name: &str) -> Result<Tree>;

    /// Fetch a read-only snapshot of a tree by its share token.
    async fn fetch_shared_tree(&self, share_token: &str) -> Result<Tree>;

    /// Issue a share token for a tree.
    async fn create_share_token(&self, tree_id: &str) -> Result<String>;

    /// Apply a patch and return the authoritative tree. A patch the backend
    /// cannot apply is reported as `Conflict`.
    async fn mutate_tree(&self, tree_id: &str, patch: &TreePatch) -> Result<Tree>;

    /// Store a new pending gift from `sender`. A draft whose `request_id` was
    /// already seen returns the gift created the first time.
    async fn send_gift(&self, sender: &User, draft: &GiftDraft) -> Result<Gift>;

    async fn respond_to_gift(&self, gift_id: &str, decision: GiftDecision) -> Result<Gift>;

    /// Gifts sent by or addressed to `user_id`, oldest first.
    async fn fetch_gifts(&self, user_id: &str) -> Result<Vec<Gift>>;

    /// Content snapshot taken when the gift was sent.
    async fn fetch_gift_content(&self, gift_id: &str) -> Result<GiftContent>;

    async fn mark_gift_seen(&self, gift_id: &str) -> Result<Gift>;

    async fn mark_gift_materialized(&self, gift_id: &str, at: DateTime<Utc>) -> Result<Gift>;
}

/// Share tokens are opaque to clients; this is only how local backends mint them.
#[must_use]
pub fn mint_share_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Apply a client patch on the backend's copy of a tree.
///
/// # Errors
/// Any rejection of the patch is reported as `Conflict`.
pub fn apply_on_backend(tree: &mut Tree, patch: &TreePatch) -> Result<()> {
    tree.apply(patch)
        .map_err(|e| crate::domain::AppError::conflict(format!("{} rejected: {e}", patch.label())))
}

/// Validate a draft against the sender's tree and snapshot its content.
///
/// # Errors
/// Returns `Validation` if the draft is malformed or the content does not
/// exist in the sender's tree or does not match the gift type.
pub fn snapshot_content(sender: &User, sender_tree: Option<&Tree>, draft: &GiftDraft) -> Result<GiftContent> {
    use crate::domain::AppError;

    draft.validate(&sender.id)?;
    let content = sender_tree
        .and_then(|tree| tree.extract_content(&draft.content_id))
        .ok_or_else(|| AppError::validation(format!("content {} is not in your tree", draft.content_id)))?;
    if !content.fits(draft.kind) {
        return Err(AppError::validation(format!(
            "content {} cannot be sent as a {} gift",
            draft.content_id, draft.kind
        )));
    }
    Ok(content)
}
