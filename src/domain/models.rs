//! Domain models for the memory tree.
//!
//! A [`Tree`] belongs to exactly one owner and holds three collections kept in
//! creation order: branches (life categories), fruits (memories attached to a
//! branch) and roots (ancestry entries).

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{AppError, Result};

/// Generate a fresh entity id.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// An entry of the fixed category catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    /// Stable identifier referenced by `Branch::category_id`.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Default display color.
    pub color: &'static str,
}

/// The fixed category catalog.
pub const CATEGORIES: &[Category] = &[
    Category { id: "family", name: "Family", color: "#E57373" },
    Category { id: "travel", name: "Travel", color: "#64B5F6" },
    Category { id: "work", name: "Work", color: "#FFB74D" },
    Category { id: "friends", name: "Friends", color: "#BA68C8" },
    Category { id: "education", name: "Education", color: "#4DB6AC" },
    Category { id: "hobbies", name: "Hobbies", color: "#AED581" },
    Category { id: "health", name: "Health", color: "#F06292" },
    Category { id: "milestones", name: "Milestones", color: "#FFD54F" },
];

/// Look up a catalog category by id.
#[must_use]
pub fn category(id: &str) -> Option<&'static Category> {
    CATEGORIES.iter().find(|c| c.id == id)
}

fn ensure_category(id: &str) -> Result<()> {
    category(id)
        .map(|_| ())
        .ok_or_else(|| AppError::validation(format!("unknown category: {id}")))
}

/// Position on the visualization canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Where a memory took place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

/// Reference to a media object stored elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    /// `image`, `video`, `audio`, ...
    pub kind: String,
}

/// A life category on the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: String,
    pub name: String,
    pub category_id: String,
    pub color: String,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    /// Create an unshared branch using the category's default color.
    #[must_use]
    pub fn new(name: impl Into<String>, category_id: impl Into<String>) -> Self {
        let category_id = category_id.into();
        let color = category(&category_id).map_or("#9E9E9E", |c| c.color);
        Self {
            id: new_id(),
            name: name.into(),
            category_id,
            color: color.to_string(),
            is_shared: false,
            shared_with: None,
            position: None,
            created_at: Utc::now(),
        }
    }
}

/// A single memory attached to a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fruit {
    pub id: String,
    pub branch_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    pub created_at: DateTime<Utc>,
}

impl Fruit {
    /// Create a memory on the given branch.
    #[must_use]
    pub fn new(
        branch_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            branch_id: branch_id.into(),
            title: title.into(),
            description: description.into(),
            media: Vec::new(),
            tags: Vec::new(),
            location: None,
            people: Vec::new(),
            emotions: Vec::new(),
            is_shared: false,
            shared_with: None,
            position: None,
            created_at: Utc::now(),
        }
    }
}

/// An ancestry or relationship entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    pub id: String,
    pub name: String,
    pub relation: String,
    /// The root person's own tree, if they have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Root {
    #[must_use]
    pub fn new(name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            relation: relation.into(),
            tree_id: None,
            created_at: Utc::now(),
        }
    }
}

/// The complete memory record of one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub fruits: Vec<Fruit>,
    #[serde(default)]
    pub roots: Vec<Root>,
}

/// Partial update of a branch. Only provided fields change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_shared: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Partial update of a fruit. Only provided fields change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FruitChanges {
    /// Moves the memory to another branch of the same tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<MediaRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_shared: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_with: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Partial update of a root. Only provided fields change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_id: Option<String>,
}

/// A single change to a tree, sent as-is to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TreePatch {
    AddBranch { branch: Branch },
    UpdateBranch { branch_id: String, changes: BranchChanges },
    /// Without `cascade`, removing a branch that still holds fruits is rejected.
    RemoveBranch { branch_id: String, cascade: bool },
    AddFruit { fruit: Fruit },
    UpdateFruit { fruit_id: String, changes: FruitChanges },
    RemoveFruit { fruit_id: String },
    AddRoot { root: Root },
    UpdateRoot { root_id: String, changes: RootChanges },
    RemoveRoot { root_id: String },
    /// Atomic multi-add, used when gifted content lands in a tree.
    Graft {
        branches: Vec<Branch>,
        fruits: Vec<Fruit>,
        roots: Vec<Root>,
    },
}

impl TreePatch {
    /// Short operation name for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::AddBranch { .. } => "add_branch",
            Self::UpdateBranch { .. } => "update_branch",
            Self::RemoveBranch { .. } => "remove_branch",
            Self::AddFruit { .. } => "add_fruit",
            Self::UpdateFruit { .. } => "update_fruit",
            Self::RemoveFruit { .. } => "remove_fruit",
            Self::AddRoot { .. } => "add_root",
            Self::UpdateRoot { .. } => "update_root",
            Self::RemoveRoot { .. } => "remove_root",
            Self::Graft { .. } => "graft",
        }
    }
}

impl Tree {
    /// Create an empty tree for the given owner.
    #[must_use]
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            owner_id: owner_id.into(),
            name: name.into(),
            created_at: Utc::now(),
            branches: Vec::new(),
            fruits: Vec::new(),
            roots: Vec::new(),
        }
    }

    #[must_use]
    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.id == id)
    }

    #[must_use]
    pub fn fruit(&self, id: &str) -> Option<&Fruit> {
        self.fruits.iter().find(|f| f.id == id)
    }

    #[must_use]
    pub fn root(&self, id: &str) -> Option<&Root> {
        self.roots.iter().find(|r| r.id == id)
    }

    /// Fruits attached to a branch, in creation order.
    pub fn fruits_of<'a>(&'a self, branch_id: &'a str) -> impl Iterator<Item = &'a Fruit> + 'a {
        self.fruits.iter().filter(move |f| f.branch_id == branch_id)
    }

    /// Check the structural invariants: unique ids and every fruit on a
    /// branch of this tree.
    ///
    /// # Errors
    /// Returns `CorruptTree` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let mut branch_ids = HashSet::new();
        for branch in &self.branches {
            if !branch_ids.insert(branch.id.as_str()) {
                return Err(AppError::corrupt(format!("duplicate branch id {}", branch.id)));
            }
        }

        let mut fruit_ids = HashSet::new();
        for fruit in &self.fruits {
            if !fruit_ids.insert(fruit.id.as_str()) {
                return Err(AppError::corrupt(format!("duplicate fruit id {}", fruit.id)));
            }
            if !branch_ids.contains(fruit.branch_id.as_str()) {
                return Err(AppError::corrupt(format!(
                    "fruit {} references missing branch {}",
                    fruit.id, fruit.branch_id
                )));
            }
        }

        let mut root_ids = HashSet::new();
        for root in &self.roots {
            if !root_ids.insert(root.id.as_str()) {
                return Err(AppError::corrupt(format!("duplicate root id {}", root.id)));
            }
        }

        Ok(())
    }

    /// Apply a patch in place. Either the whole patch applies or the tree is
    /// left untouched.
    ///
    /// # Errors
    /// `Validation` for duplicate ids, unknown categories, dangling branch
    /// references or a non-cascading removal of a non-empty branch;
    /// `NotFound` when the update/remove target does not exist.
    pub fn apply(&mut self, patch: &TreePatch) -> Result<()> {
        match patch {
            TreePatch::AddBranch { branch } => {
                if self.branch(&branch.id).is_some() {
                    return Err(AppError::validation(format!("branch {} already exists", branch.id)));
                }
                ensure_category(&branch.category_id)?;
                self.branches.push(branch.clone());
            }
            TreePatch::UpdateBranch { branch_id, changes } => {
                if let Some(category_id) = &changes.category_id {
                    ensure_category(category_id)?;
                }
                let branch = self
                    .branches
                    .iter_mut()
                    .find(|b| &b.id == branch_id)
                    .ok_or_else(|| AppError::not_found(format!("branch {branch_id}")))?;
                apply_branch_changes(branch, changes);
            }
            TreePatch::RemoveBranch { branch_id, cascade } => {
                if self.branch(branch_id).is_none() {
                    return Err(AppError::not_found(format!("branch {branch_id}")));
                }
                let fruit_count = self.fruits_of(branch_id).count();
                if fruit_count > 0 && !cascade {
                    return Err(AppError::validation(format!(
                        "branch {branch_id} still holds {fruit_count} memories"
                    )));
                }
                self.fruits.retain(|f| &f.branch_id != branch_id);
                self.branches.retain(|b| &b.id != branch_id);
            }
            TreePatch::AddFruit { fruit } => {
                if self.fruit(&fruit.id).is_some() {
                    return Err(AppError::validation(format!("fruit {} already exists", fruit.id)));
                }
                self.ensure_branch_ref(&fruit.branch_id)?;
                self.fruits.push(fruit.clone());
            }
            TreePatch::UpdateFruit { fruit_id, changes } => {
                if let Some(branch_id) = &changes.branch_id {
                    self.ensure_branch_ref(branch_id)?;
                }
                let fruit = self
                    .fruits
                    .iter_mut()
                    .find(|f| &f.id == fruit_id)
                    .ok_or_else(|| AppError::not_found(format!("fruit {fruit_id}")))?;
                apply_fruit_changes(fruit, changes);
            }
            TreePatch::RemoveFruit { fruit_id } => {
                let before = self.fruits.len();
                self.fruits.retain(|f| &f.id != fruit_id);
                if self.fruits.len() == before {
                    return Err(AppError::not_found(format!("fruit {fruit_id}")));
                }
            }
            TreePatch::AddRoot { root } => {
                if self.root(&root.id).is_some() {
                    return Err(AppError::validation(format!("root {} already exists", root.id)));
                }
                self.roots.push(root.clone());
            }
            TreePatch::UpdateRoot { root_id, changes } => {
                let root = self
                    .roots
                    .iter_mut()
                    .find(|r| &r.id == root_id)
                    .ok_or_else(|| AppError::not_found(format!("root {root_id}")))?;
                if let Some(name) = &changes.name {
                    root.name.clone_from(name);
                }
                if let Some(relation) = &changes.relation {
                    root.relation.clone_from(relation);
                }
                if let Some(tree_id) = &changes.tree_id {
                    root.tree_id = Some(tree_id.clone());
                }
            }
            TreePatch::RemoveRoot { root_id } => {
                let before = self.roots.len();
                self.roots.retain(|r| &r.id != root_id);
                if self.roots.len() == before {
                    return Err(AppError::not_found(format!("root {root_id}")));
                }
            }
            TreePatch::Graft {
                branches,
                fruits,
                roots,
            } => {
                let mut working = self.clone();
                for branch in branches {
                    working.apply(&TreePatch::AddBranch {
                        branch: branch.clone(),
                    })?;
                }
                for fruit in fruits {
                    working.apply(&TreePatch::AddFruit {
                        fruit: fruit.clone(),
                    })?;
                }
                for root in roots {
                    working.apply(&TreePatch::AddRoot { root: root.clone() })?;
                }
                *self = working;
            }
        }

        Ok(())
    }

    fn ensure_branch_ref(&self, branch_id: &str) -> Result<()> {
        if self.branch(branch_id).is_none() {
            return Err(AppError::validation(format!(
                "branch {branch_id} does not exist in tree {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Snapshot the tree, branch or fruit identified by `content_id` for gifting.
    #[must_use]
    pub fn extract_content(&self, content_id: &str) -> Option<super::GiftContent> {
        use super::GiftContent;

        if self.id == content_id {
            return Some(GiftContent::Tree { tree: self.clone() });
        }
        if let Some(branch) = self.branch(content_id) {
            return Some(GiftContent::Branch {
                branch: branch.clone(),
                fruits: self.fruits_of(content_id).cloned().collect(),
            });
        }
        self.fruit(content_id).map(|fruit| GiftContent::Fruit {
            fruit: fruit.clone(),
            category_id: self
                .branch(&fruit.branch_id)
                .map_or_else(|| "milestones".to_string(), |b| b.category_id.clone()),
        })
    }

    /// Copy of all branches, fruits and roots under fresh ids, with fruit
    /// branch references remapped.
    #[must_use]
    pub fn reissued_contents(&self, now: DateTime<Utc>) -> (Vec<Branch>, Vec<Fruit>, Vec<Root>) {
        let mut remap = HashMap::new();
        let branches = self
            .branches
            .iter()
            .map(|b| {
                let copy = reissue_branch(b, now);
                remap.insert(b.id.as_str(), copy.id.clone());
                copy
            })
            .collect();
        let fruits = self
            .fruits
            .iter()
            .filter_map(|f| remap.get(f.branch_id.as_str()).map(|id| reissue_fruit(f, id, now)))
            .collect();
        let roots = self
            .roots
            .iter()
            .map(|r| Root {
                id: new_id(),
                created_at: now,
                ..r.clone()
            })
            .collect();
        (branches, fruits, roots)
    }
}

/// Copy a branch under a fresh id, unshared and unplaced.
#[must_use]
pub fn reissue_branch(branch: &Branch, now: DateTime<Utc>) -> Branch {
    Branch {
        id: new_id(),
        is_shared: false,
        shared_with: None,
        position: None,
        created_at: now,
        ..branch.clone()
    }
}

/// Copy a fruit under a fresh id onto `branch_id`, unshared and unplaced.
#[must_use]
pub fn reissue_fruit(fruit: &Fruit, branch_id: &str, now: DateTime<Utc>) -> Fruit {
    Fruit {
        id: new_id(),
        branch_id: branch_id.to_string(),
        is_shared: false,
        shared_with: None,
        position: None,
        created_at: now,
        ..fruit.clone()
    }
}

fn apply_branch_changes(branch: &mut Branch, changes: &BranchChanges) {
    if let Some(name) = &changes.name {
        branch.name.clone_from(name);
    }
    if let Some(category_id) = &changes.category_id {
        branch.category_id.clone_from(category_id);
    }
    if let Some(color) = &changes.color {
        branch.color.clone_from(color);
    }
    if let Some(is_shared) = changes.is_shared {
        branch.is_shared = is_shared;
    }
    if let Some(shared_with) = &changes.shared_with {
        branch.shared_with = Some(shared_with.clone());
    }
    if let Some(position) = changes.position {
        branch.position = Some(position);
    }
}

fn apply_fruit_changes(fruit: &mut Fruit, changes: &FruitChanges) {
    if let Some(branch_id) = &changes.branch_id {
        fruit.branch_id.clone_from(branch_id);
    }
    if let Some(title) = &changes.title {
        fruit.title.clone_from(title);
    }
    if let Some(description) = &changes.description {
        fruit.description.clone_from(description);
    }
    if let Some(media) = &changes.media {
        fruit.media.clone_from(media);
    }
    if let Some(tags) = &changes.tags {
        fruit.tags.clone_from(tags);
    }
    if let Some(location) = &changes.location {
        fruit.location = Some(location.clone());
    }
    if let Some(people) = &changes.people {
        fruit.people.clone_from(people);
    }
    if let Some(emotions) = &changes.emotions {
        fruit.emotions.clone_from(emotions);
    }
    if let Some(is_shared) = changes.is_shared {
        fruit.is_shared = is_shared;
    }
    if let Some(shared_with) = &changes.shared_with {
        fruit.shared_with = Some(shared_with.clone());
    }
    if let Some(position) = changes.position {
        fruit.position = Some(position);
    }
}

/// An authenticated user as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Successful login or registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSuccess {
    pub success: bool,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (Tree, String) {
        let mut tree = Tree::new("demo_user", "My Tree");
        let branch = Branch::new("Family", "family");
        let branch_id = branch.id.clone();
        tree.apply(&TreePatch::AddBranch { branch }).unwrap();
        tree.apply(&TreePatch::AddFruit {
            fruit: Fruit::new(&branch_id, "First steps", "In the garden"),
        })
        .unwrap();
        (tree, branch_id)
    }

    #[test]
    fn test_add_fruit_requires_existing_branch() {
        let (mut tree, _) = sample_tree();
        let before = tree.clone();
        let err = tree
            .apply(&TreePatch::AddFruit {
                fruit: Fruit::new("missing", "Lost", ""),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
        assert_eq!(tree, before);
    }

    #[test]
    fn test_duplicate_branch_rejected() {
        let (mut tree, branch_id) = sample_tree();
        let mut dup = Branch::new("Again", "travel");
        dup.id = branch_id;
        assert!(tree.apply(&TreePatch::AddBranch { branch: dup }).is_err());
        assert_eq!(tree.branches.len(), 1);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let mut tree = Tree::new("u", "t");
        let err = tree
            .apply(&TreePatch::AddBranch {
                branch: Branch::new("Space", "astronautics"),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_remove_branch_policy() {
        let (mut tree, branch_id) = sample_tree();
        let keep = tree.apply(&TreePatch::RemoveBranch {
            branch_id: branch_id.clone(),
            cascade: false,
        });
        assert!(keep.is_err());
        assert_eq!(tree.fruits.len(), 1);

        tree.apply(&TreePatch::RemoveBranch {
            branch_id,
            cascade: true,
        })
        .unwrap();
        assert!(tree.branches.is_empty());
        assert!(tree.fruits.is_empty());
        tree.validate().unwrap();
    }

    #[test]
    fn test_partial_updates_compose() {
        let (mut tree, branch_id) = sample_tree();
        tree.apply(&TreePatch::UpdateBranch {
            branch_id: branch_id.clone(),
            changes: BranchChanges {
                name: Some("Kin".into()),
                ..Default::default()
            },
        })
        .unwrap();
        tree.apply(&TreePatch::UpdateBranch {
            branch_id: branch_id.clone(),
            changes: BranchChanges {
                color: Some("#000000".into()),
                ..Default::default()
            },
        })
        .unwrap();

        let branch = tree.branch(&branch_id).unwrap();
        assert_eq!(branch.name, "Kin");
        assert_eq!(branch.color, "#000000");
        assert_eq!(branch.category_id, "family");
    }

    #[test]
    fn test_move_fruit_to_missing_branch_rejected() {
        let (mut tree, _) = sample_tree();
        let fruit_id = tree.fruits[0].id.clone();
        let err = tree
            .apply(&TreePatch::UpdateFruit {
                fruit_id,
                changes: FruitChanges {
                    branch_id: Some("nowhere".into()),
                    ..Default::default()
                },
            })
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let (mut tree, _) = sample_tree();
        let err = tree
            .apply(&TreePatch::RemoveRoot {
                root_id: "ghost".into(),
            })
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn test_graft_is_atomic() {
        let (mut tree, _) = sample_tree();
        let before = tree.clone();
        let branch = Branch::new("Trips", "travel");
        let result = tree.apply(&TreePatch::Graft {
            branches: vec![branch],
            fruits: vec![Fruit::new("dangling", "x", "")],
            roots: Vec::new(),
        });
        assert!(result.is_err());
        assert_eq!(tree, before);
    }

    #[test]
    fn test_validate_detects_dangling_fruit() {
        let (mut tree, _) = sample_tree();
        tree.fruits[0].branch_id = "gone".into();
        assert!(matches!(tree.validate(), Err(AppError::CorruptTree { .. })));
    }

    #[test]
    fn test_serialized_field_names() {
        let (tree, _) = sample_tree();
        let json = serde_json::to_value(&tree).unwrap();
        assert!(json.get("ownerId").is_some());
        assert!(json.get("createdAt").is_some());
        let fruit = &json["fruits"][0];
        assert!(fruit.get("branchId").is_some());
        assert!(fruit.get("isShared").is_some());
        assert!(json["branches"][0].get("categoryId").is_some());
    }

    #[test]
    fn test_tree_round_trip_keeps_invariants() {
        let (tree, _) = sample_tree();
        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        back.validate().unwrap();
    }

    #[test]
    fn test_patch_tagging() {
        let patch = TreePatch::RemoveFruit {
            fruit_id: "f1".into(),
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["op"], "removeFruit");
        assert_eq!(json["fruitId"], "f1");
    }

    #[test]
    fn test_reissued_contents_remap_branches() {
        let (tree, branch_id) = sample_tree();
        let (branches, fruits, _) = tree.reissued_contents(Utc::now());
        assert_eq!(branches.len(), 1);
        assert_ne!(branches[0].id, branch_id);
        assert_eq!(fruits[0].branch_id, branches[0].id);
        assert_ne!(fruits[0].id, tree.fruits[0].id);
    }
}
