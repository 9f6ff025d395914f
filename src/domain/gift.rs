//! Gifts: envelopes transferring a branch, fruit, tree or time capsule
//! from one user to another.
//!
//! Status machine: `pending -> accepted` and `pending -> rejected`, both
//! terminal. `is_new` is independent of status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AppError, Result};
use super::models::{category, new_id, reissue_branch, reissue_fruit, Branch, Fruit, Tree, TreePatch};

/// What a gift carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GiftKind {
    Branch,
    Fruit,
    Tree,
    /// Content withheld from the recipient's tree until `unlock_date`.
    TimeCapsule,
}

impl std::fmt::Display for GiftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Branch => write!(f, "branch"),
            Self::Fruit => write!(f, "fruit"),
            Self::Tree => write!(f, "tree"),
            Self::TimeCapsule => write!(f, "timeCapsule"),
        }
    }
}

impl std::str::FromStr for GiftKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "branch" => Ok(Self::Branch),
            "fruit" => Ok(Self::Fruit),
            "tree" => Ok(Self::Tree),
            "timecapsule" | "time-capsule" | "capsule" => Ok(Self::TimeCapsule),
            _ => Err(format!("Unknown gift type: {s}. Use: branch, fruit, tree, timeCapsule")),
        }
    }
}

/// Gift status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GiftStatus {
    Pending,
    Accepted,
    Rejected,
}

impl GiftStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for GiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// The recipient's answer to a pending gift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GiftDecision {
    Accepted,
    Rejected,
}

impl From<GiftDecision> for GiftStatus {
    fn from(decision: GiftDecision) -> Self {
        match decision {
            GiftDecision::Accepted => Self::Accepted,
            GiftDecision::Rejected => Self::Rejected,
        }
    }
}

/// A cross-user transfer envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: GiftKind,
    pub sender_id: String,
    /// Denormalized for display.
    pub sender_name: String,
    pub recipient_id: String,
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub status: GiftStatus,
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_new: bool,
    /// When the content was copied into the recipient's tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materialized_at: Option<DateTime<Utc>>,
}

impl Gift {
    /// Move a pending gift to its terminal status.
    ///
    /// # Errors
    /// Returns `Conflict` if the gift was already answered; the status is
    /// left unchanged.
    pub fn respond(&mut self, decision: GiftDecision) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "gift {} is already {}",
                self.id, self.status
            )));
        }
        self.status = decision.into();
        Ok(())
    }

    /// Whether the content may be shown in the recipient's tree at `now`.
    #[must_use]
    pub fn is_unlocked(&self, now: DateTime<Utc>) -> bool {
        match self.kind {
            GiftKind::TimeCapsule => self.unlock_date.map_or(true, |date| date <= now),
            GiftKind::Branch | GiftKind::Fruit | GiftKind::Tree => true,
        }
    }

    /// Accepted, unlocked and not yet copied into the recipient's tree.
    #[must_use]
    pub fn needs_materialization(&self, now: DateTime<Utc>) -> bool {
        self.status == GiftStatus::Accepted
            && self.materialized_at.is_none()
            && self.is_unlocked(now)
    }
}

/// A send request built by the client.
///
/// `request_id` is generated once per draft; retrying with the same draft
/// lets the backend return the original gift instead of a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftDraft {
    pub request_id: String,
    #[serde(rename = "type")]
    pub kind: GiftKind,
    pub recipient_id: String,
    pub content_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_date: Option<DateTime<Utc>>,
}

impl GiftDraft {
    #[must_use]
    pub fn new(
        kind: GiftKind,
        recipient_id: impl Into<String>,
        content_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            kind,
            recipient_id: recipient_id.into(),
            content_id: content_id.into(),
            message: message.into(),
            unlock_date: None,
        }
    }

    #[must_use]
    pub const fn with_unlock_date(mut self, unlock_date: DateTime<Utc>) -> Self {
        self.unlock_date = Some(unlock_date);
        self
    }

    /// Check the draft before it leaves the client.
    ///
    /// # Errors
    /// Returns `Validation` for a missing recipient or content, a gift to
    /// oneself, a time capsule without unlock date, or an unlock date on
    /// any other kind.
    pub fn validate(&self, sender_id: &str) -> Result<()> {
        if self.recipient_id.trim().is_empty() {
            return Err(AppError::validation("gift recipient is required"));
        }
        if self.recipient_id == sender_id {
            return Err(AppError::validation("cannot send a gift to yourself"));
        }
        if self.content_id.trim().is_empty() {
            return Err(AppError::validation("gift content is required"));
        }
        match (self.kind, self.unlock_date) {
            (GiftKind::TimeCapsule, None) => {
                Err(AppError::validation("a time capsule needs an unlock date"))
            }
            (GiftKind::Branch | GiftKind::Fruit | GiftKind::Tree, Some(_)) => Err(
                AppError::validation("only time capsules carry an unlock date"),
            ),
            _ => Ok(()),
        }
    }

    /// Build the pending gift a backend stores for this draft.
    #[must_use]
    pub fn into_gift(self, sender_id: &str, sender_name: &str, now: DateTime<Utc>) -> Gift {
        Gift {
            id: new_id(),
            kind: self.kind,
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            recipient_id: self.recipient_id,
            message: self.message,
            created_at: now,
            status: GiftStatus::Pending,
            content_id: self.content_id,
            unlock_date: self.unlock_date,
            is_new: true,
            materialized_at: None,
        }
    }
}

/// Snapshot of gifted content, taken when the gift is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GiftContent {
    Branch { branch: Branch, fruits: Vec<Fruit> },
    Fruit { fruit: Fruit, category_id: String },
    Tree { tree: Tree },
}

impl GiftContent {
    /// Whether this content may travel in a gift of `kind`.
    #[must_use]
    pub fn fits(&self, kind: GiftKind) -> bool {
        matches!(
            (kind, self),
            (GiftKind::TimeCapsule, _)
                | (GiftKind::Branch, Self::Branch { .. })
                | (GiftKind::Fruit, Self::Fruit { .. })
                | (GiftKind::Tree, Self::Tree { .. })
        )
    }

    /// The graft that copies this content into `target` under fresh ids.
    ///
    /// A gifted fruit joins the first branch of `target` with the same
    /// category, or a new branch named after the catalog entry.
    #[must_use]
    pub fn graft_into(&self, target: &Tree, now: DateTime<Utc>) -> TreePatch {
        match self {
            Self::Branch { branch, fruits } => {
                let copy = reissue_branch(branch, now);
                let fruits = fruits
                    .iter()
                    .map(|f| reissue_fruit(f, &copy.id, now))
                    .collect();
                TreePatch::Graft {
                    branches: vec![copy],
                    fruits,
                    roots: Vec::new(),
                }
            }
            Self::Fruit { fruit, category_id } => {
                if let Some(existing) = target.branches.iter().find(|b| &b.category_id == category_id) {
                    return TreePatch::Graft {
                        branches: Vec::new(),
                        fruits: vec![reissue_fruit(fruit, &existing.id, now)],
                        roots: Vec::new(),
                    };
                }
                let name = category(category_id).map_or("Gifts", |c| c.name);
                let mut branch = Branch::new(name, category_id.clone());
                branch.created_at = now;
                let fruit = reissue_fruit(fruit, &branch.id, now);
                TreePatch::Graft {
                    branches: vec![branch],
                    fruits: vec![fruit],
                    roots: Vec::new(),
                }
            }
            Self::Tree { tree } => {
                let (branches, fruits, roots) = tree.reissued_contents(now);
                TreePatch::Graft {
                    branches,
                    fruits,
                    roots,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn pending(kind: GiftKind) -> Gift {
        GiftDraft::new(kind, "bob", "content-1", "for you").into_gift("alice", "Alice", Utc::now())
    }

    #[test]
    fn test_transitions_are_terminal() {
        let mut gift = pending(GiftKind::Fruit);
        gift.respond(GiftDecision::Rejected).unwrap();
        assert_eq!(gift.status, GiftStatus::Rejected);

        let err = gift.respond(GiftDecision::Accepted).unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
        assert_eq!(gift.status, GiftStatus::Rejected);
    }

    #[test]
    fn test_time_capsule_unlock_predicate() {
        let now = Utc::now();
        let mut gift = pending(GiftKind::TimeCapsule);
        gift.unlock_date = Some(now + Duration::days(1));
        gift.respond(GiftDecision::Accepted).unwrap();

        assert!(!gift.is_unlocked(now));
        assert!(!gift.needs_materialization(now));
        assert!(gift.needs_materialization(now + Duration::days(2)));

        gift.materialized_at = Some(now + Duration::days(2));
        assert!(!gift.needs_materialization(now + Duration::days(3)));
    }

    #[test]
    fn test_draft_validation() {
        let draft = GiftDraft::new(GiftKind::Branch, "", "b1", "");
        assert!(draft.validate("alice").is_err());

        let draft = GiftDraft::new(GiftKind::Branch, "alice", "b1", "");
        assert!(draft.validate("alice").is_err());

        let draft = GiftDraft::new(GiftKind::TimeCapsule, "bob", "b1", "");
        assert!(draft.validate("alice").is_err());
        assert!(draft
            .with_unlock_date(Utc::now())
            .validate("alice")
            .is_ok());

        let draft = GiftDraft::new(GiftKind::Fruit, "bob", "f1", "").with_unlock_date(Utc::now());
        assert!(draft.validate("alice").is_err());
    }

    #[test]
    fn test_gift_wire_format() {
        let gift = pending(GiftKind::TimeCapsule);
        let json = serde_json::to_value(&gift).unwrap();
        assert_eq!(json["type"], "timeCapsule");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["isNew"], true);
        assert!(json.get("senderName").is_some());
        assert!(json.get("contentId").is_some());
    }

    #[test]
    fn test_fruit_joins_branch_of_same_category() {
        let mut target = Tree::new("bob", "Bob");
        let travel = Branch::new("Trips", "travel");
        let travel_id = travel.id.clone();
        target.branches.push(travel);

        let content = GiftContent::Fruit {
            fruit: Fruit::new("elsewhere", "Lisbon", "Tram 28"),
            category_id: "travel".into(),
        };
        match content.graft_into(&target, Utc::now()) {
            TreePatch::Graft { branches, fruits, .. } => {
                assert!(branches.is_empty());
                assert_eq!(fruits[0].branch_id, travel_id);
            }
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn test_fruit_creates_branch_when_category_missing() {
        let mut target = Tree::new("bob", "Bob");
        let content = GiftContent::Fruit {
            fruit: Fruit::new("elsewhere", "Graduation", ""),
            category_id: "education".into(),
        };
        let patch = content.graft_into(&target, Utc::now());
        target.apply(&patch).unwrap();
        assert_eq!(target.branches[0].name, "Education");
        assert_eq!(target.fruits[0].branch_id, target.branches[0].id);
    }

    #[test]
    fn test_content_fits_kind() {
        let content = GiftContent::Tree {
            tree: Tree::new("a", "A"),
        };
        assert!(content.fits(GiftKind::Tree));
        assert!(content.fits(GiftKind::TimeCapsule));
        assert!(!content.fits(GiftKind::Branch));
    }
}
