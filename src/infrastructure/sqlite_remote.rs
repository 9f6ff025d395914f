//! Local SQLite backend.
//!
//! Persists trees, share tokens and gifts as JSON documents so the CLI keeps
//! state between runs. Stands in for the remote server.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::domain::{
    AppError, Gift, GiftContent, GiftDecision, GiftDraft, Result, Tree, TreePatch, User,
};

use super::remote::{apply_on_backend, mint_share_token, snapshot_content, TreeRemote};

/// SQLite-backed [`TreeRemote`].
pub struct SqliteRemote {
    conn: Mutex<Connection>,
    latency: Duration,
}

impl SqliteRemote {
    /// Opens or creates the backend database.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or schema creation fails.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::io("Failed to create storage directory", e))?;
        }

        let conn = Connection::open(path).map_err(AppError::database)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(AppError::database)?;

        Self::with_connection(conn)
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(AppError::database)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let remote = Self {
            conn: Mutex::new(conn),
            latency: Duration::ZERO,
        };
        remote.init_schema()?;
        Ok(remote)
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r"
            CREATE TABLE IF NOT EXISTS trees (
                id TEXT PRIMARY KEY,
                owner_id TEXT UNIQUE NOT NULL,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS share_tokens (
                token TEXT PRIMARY KEY,
                tree_id TEXT NOT NULL REFERENCES trees(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS gifts (
                id TEXT PRIMARY KEY,
                request_id TEXT UNIQUE NOT NULL,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                body TEXT NOT NULL,
                content TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_gifts_sender ON gifts(sender_id);
            CREATE INDEX IF NOT EXISTS idx_gifts_recipient ON gifts(recipient_id);
            ",
            )
            .map_err(AppError::database)
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn load_tree_where(conn: &Connection, column: &str, value: &str) -> Result<Option<Tree>> {
        let sql = format!("SELECT body FROM trees WHERE {column} = ?1");
        let body: Option<String> = conn
            .query_row(&sql, [value], |row| row.get(0))
            .optional()
            .map_err(AppError::database)?;
        body.map(|b| serde_json::from_str(&b).map_err(AppError::json_parse))
            .transpose()
    }

    fn save_tree(conn: &Connection, tree: &Tree) -> Result<()> {
        let body = serde_json::to_string(tree).map_err(AppError::json_parse)?;
        conn.execute(
            r"
            INSERT INTO trees (id, owner_id, body) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                body = excluded.body,
                updated_at = datetime('now')
            ",
            params![&tree.id, &tree.owner_id, body],
        )
        .map_err(AppError::database)?;
        Ok(())
    }

    fn load_gift(conn: &Connection, gift_id: &str) -> Result<Gift> {
        let body: Option<String> = conn
            .query_row("SELECT body FROM gifts WHERE id = ?1", [gift_id], |row| row.get(0))
            .optional()
            .map_err(AppError::database)?;
        let body = body.ok_or_else(|| AppError::not_found(format!("gift {gift_id}")))?;
        serde_json::from_str(&body).map_err(AppError::json_parse)
    }

    fn save_gift(conn: &Connection, gift: &Gift) -> Result<()> {
        let body = serde_json::to_string(gift).map_err(AppError::json_parse)?;
        conn.execute("UPDATE gifts SET body = ?2 WHERE id = ?1", params![&gift.id, body])
            .map_err(AppError::database)?;
        Ok(())
    }

    fn update_gift(&self, gift_id: &str, change: impl FnOnce(&mut Gift) -> Result<()>) -> Result<Gift> {
        let conn = self.conn.lock();
        let mut gift = Self::load_gift(&conn, gift_id)?;
        change(&mut gift)?;
        Self::save_gift(&conn, &gift)?;
        Ok(gift)
    }
}

#[async_trait]
impl TreeRemote for SqliteRemote {
    async fn fetch_tree(&self, owner_id: &str) -> Result<Tree> {
        self.pause().await;
        let conn = self.conn.lock();
        Self::load_tree_where(&conn, "owner_id", owner_id)?.ok_or_else(|| AppError::not_found("tree"))
    }

    async fn create_tree(&self, owner_id: &str, name: &str) -> Result<Tree> {
        self.pause().await;
        let conn = self.conn.lock();
        if Self::load_tree_where(&conn, "owner_id", owner_id)?.is_some() {
            return Err(AppError::conflict(format!("{owner_id} already has a tree")));
        }
        let tree = Tree::new(owner_id, name);
        Self::save_tree(&conn, &tree)?;
        tracing::info!(tree_id = %tree.id, owner_id, "Tree created");
        Ok(tree)
    }

    async fn fetch_shared_tree(&self, share_token: &str) -> Result<Tree> {
        self.pause().await;
        let conn = self.conn.lock();
        let tree_id: Option<String> = conn
            .query_row(
                "SELECT tree_id FROM share_tokens WHERE token = ?1",
                [share_token],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::database)?;
        let Some(tree_id) = tree_id else {
            return Err(AppError::not_found("shared tree"));
        };
        Self::load_tree_where(&conn, "id", &tree_id)?.ok_or_else(|| AppError::not_found("shared tree"))
    }

    async fn create_share_token(&self, tree_id: &str) -> Result<String> {
        self.pause().await;
        let conn = self.conn.lock();
        if Self::load_tree_where(&conn, "id", tree_id)?.is_none() {
            return Err(AppError::not_found("tree"));
        }
        let token = mint_share_token();
        conn.execute(
            "INSERT INTO share_tokens (token, tree_id) VALUES (?1, ?2)",
            params![&token, tree_id],
        )
        .map_err(AppError::database)?;
        Ok(token)
    }

    async fn mutate_tree(&self, tree_id: &str, patch: &TreePatch) -> Result<Tree> {
        self.pause().await;
        let conn = self.conn.lock();
        let mut tree = Self::load_tree_where(&conn, "id", tree_id)?
            .ok_or_else(|| AppError::conflict(format!("tree {tree_id} no longer exists")))?;
        apply_on_backend(&mut tree, patch)?;
        Self::save_tree(&conn, &tree)?;
        tracing::debug!(tree_id, op = patch.label(), "Patch stored");
        Ok(tree)
    }

    async fn send_gift(&self, sender: &User, draft: &GiftDraft) -> Result<Gift> {
        self.pause().await;
        let conn = self.conn.lock();

        let existing: Option<String> = conn
            .query_row(
                "SELECT body FROM gifts WHERE request_id = ?1",
                [&draft.request_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(AppError::database)?;
        if let Some(body) = existing {
            tracing::debug!(request_id = %draft.request_id, "Duplicate send ignored");
            return serde_json::from_str(&body).map_err(AppError::json_parse);
        }

        let sender_tree = Self::load_tree_where(&conn, "owner_id", &sender.id)?;
        let content = snapshot_content(sender, sender_tree.as_ref(), draft)?;
        let gift = draft.clone().into_gift(&sender.id, &sender.name, Utc::now());

        conn.execute(
            r"
            INSERT INTO gifts (id, request_id, sender_id, recipient_id, created_at, body, content)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                &gift.id,
                &draft.request_id,
                &gift.sender_id,
                &gift.recipient_id,
                gift.created_at.to_rfc3339(),
                serde_json::to_string(&gift).map_err(AppError::json_parse)?,
                serde_json::to_string(&content).map_err(AppError::json_parse)?,
            ],
        )
        .map_err(AppError::database)?;

        Ok(gift)
    }

    async fn respond_to_gift(&self, gift_id: &str, decision: GiftDecision) -> Result<Gift> {
        self.pause().await;
        self.update_gift(gift_id, |gift| gift.respond(decision))
    }

    async fn fetch_gifts(&self, user_id: &str) -> Result<Vec<Gift>> {
        self.pause().await;
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT body FROM gifts WHERE sender_id = ?1 OR recipient_id = ?1 ORDER BY created_at",
            )
            .map_err(AppError::database)?;
        let rows = stmt
            .query_map([user_id], |row| row.get::<_, String>(0))
            .map_err(AppError::database)?;

        let mut gifts = Vec::new();
        for body in rows {
            let body = body.map_err(AppError::database)?;
            gifts.push(serde_json::from_str(&body).map_err(AppError::json_parse)?);
        }
        Ok(gifts)
    }

    async fn fetch_gift_content(&self, gift_id: &str) -> Result<GiftContent> {
        self.pause().await;
        let conn = self.conn.lock();
        let content: Option<String> = conn
            .query_row("SELECT content FROM gifts WHERE id = ?1", [gift_id], |row| row.get(0))
            .optional()
            .map_err(AppError::database)?;
        let content = content.ok_or_else(|| AppError::not_found(format!("gift {gift_id}")))?;
        serde_json::from_str(&content).map_err(AppError::json_parse)
    }

    async fn mark_gift_seen(&self, gift_id: &str) -> Result<Gift> {
        self.pause().await;
        self.update_gift(gift_id, |gift| {
            gift.is_new = false;
            Ok(())
        })
    }

    async fn mark_gift_materialized(&self, gift_id: &str, at: DateTime<Utc>) -> Result<Gift> {
        self.pause().await;
        self.update_gift(gift_id, |gift| {
            gift.materialized_at.get_or_insert(at);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Branch, Fruit, GiftKind, GiftStatus};
    use tempfile::tempdir;

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            name: id.to_uppercase(),
            email: format!("{id}@alma.com"),
            avatar: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_tree_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("alma.db");

        let tree_id = {
            let remote = SqliteRemote::open(&path).unwrap();
            let tree = remote.create_tree("alice", "Alice's tree").await.unwrap();
            let branch = Branch::new("Family", "family");
            let branch_id = branch.id.clone();
            remote
                .mutate_tree(&tree.id, &TreePatch::AddBranch { branch })
                .await
                .unwrap();
            remote
                .mutate_tree(
                    &tree.id,
                    &TreePatch::AddFruit {
                        fruit: Fruit::new(branch_id, "Wedding", ""),
                    },
                )
                .await
                .unwrap();
            tree.id
        };

        let remote = SqliteRemote::open(&path).unwrap();
        let tree = remote.fetch_tree("alice").await.unwrap();
        assert_eq!(tree.id, tree_id);
        assert_eq!(tree.fruits.len(), 1);
        tree.validate().unwrap();
    }

    #[tokio::test]
    async fn test_share_token_round_trip() {
        let remote = SqliteRemote::open_in_memory().unwrap();
        let tree = remote.create_tree("alice", "Alice").await.unwrap();
        let token = remote.create_share_token(&tree.id).await.unwrap();

        assert_eq!(remote.fetch_shared_tree(&token).await.unwrap().id, tree.id);
        assert!(matches!(
            remote.fetch_shared_tree("nope").await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_gift_lifecycle_persists() {
        let remote = SqliteRemote::open_in_memory().unwrap();
        let tree = remote.create_tree("alice", "Alice").await.unwrap();

        let draft = GiftDraft::new(GiftKind::Tree, "bob", &tree.id, "all of it");
        let gift = remote.send_gift(&user("alice"), &draft).await.unwrap();
        let again = remote.send_gift(&user("alice"), &draft).await.unwrap();
        assert_eq!(gift.id, again.id);

        let accepted = remote
            .respond_to_gift(&gift.id, GiftDecision::Accepted)
            .await
            .unwrap();
        assert_eq!(accepted.status, GiftStatus::Accepted);
        assert!(remote
            .respond_to_gift(&gift.id, GiftDecision::Rejected)
            .await
            .is_err());

        let seen = remote.mark_gift_seen(&gift.id).await.unwrap();
        assert!(!seen.is_new);
        assert_eq!(seen.status, GiftStatus::Accepted);

        let gifts = remote.fetch_gifts("bob").await.unwrap();
        assert_eq!(gifts.len(), 1);
        assert!(matches!(
            remote.fetch_gift_content(&gift.id).await.unwrap(),
            GiftContent::Tree { .. }
        ));
    }
}
