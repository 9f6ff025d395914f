//! Optimistic tree mutation.
//!
//! A [`PendingMutation`] captures the tree before a change together with the
//! locally applied result. It is resolved exactly once: either committed with
//! the backend's confirmed tree or rolled back to the captured snapshot.

use crate::domain::{Result, Tree, TreePatch};

/// A local change awaiting backend confirmation.
#[derive(Debug, Clone)]
#[must_use = "a pending mutation must be committed or rolled back"]
pub struct PendingMutation {
    before: Tree,
    after: Tree,
    patch: TreePatch,
}

impl PendingMutation {
    /// Apply `patch` to a copy of `base`.
    ///
    /// # Errors
    /// Returns the validation error if the patch does not apply locally;
    /// `base` is never modified.
    pub fn begin(base: &Tree, patch: TreePatch) -> Result<Self> {
        let mut after = base.clone();
        after.apply(&patch)?;
        Ok(Self {
            before: base.clone(),
            after,
            patch,
        })
    }

    /// The tree to show while the backend call is in flight.
    #[must_use]
    pub const fn optimistic(&self) -> &Tree {
        &self.after
    }

    #[must_use]
    pub const fn patch(&self) -> &TreePatch {
        &self.patch
    }

    #[must_use]
    pub fn tree_id(&self) -> &str {
        &self.before.id
    }

    /// Resolve with the backend's authoritative tree.
    #[must_use]
    pub fn commit(self, confirmed: Tree) -> Tree {
        if confirmed != self.after {
            tracing::debug!(
                tree_id = %confirmed.id,
                op = self.patch.label(),
                "Backend result differs from optimistic state"
            );
        }
        confirmed
    }

    /// Resolve by restoring the pre-mutation snapshot.
    #[must_use]
    pub fn rollback(self) -> Tree {
        self.before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Branch;

    #[test]
    fn test_rollback_restores_snapshot() {
        let base = Tree::new("u", "Mine");
        let pending = PendingMutation::begin(
            &base,
            TreePatch::AddBranch {
                branch: Branch::new("Family", "family"),
            },
        )
        .unwrap();
        assert_eq!(pending.optimistic().branches.len(), 1);
        assert_eq!(pending.rollback(), base);
    }

    #[test]
    fn test_invalid_patch_never_begins() {
        let base = Tree::new("u", "Mine");
        let result = PendingMutation::begin(
            &base,
            TreePatch::RemoveBranch {
                branch_id: "ghost".into(),
                cascade: false,
            },
        );
        assert!(result.is_err());
    }
}
