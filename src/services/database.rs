use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;
use uuid::Uuid;

use crate::models::{Conversation, Message, NewMessage, Role, Tag};
use crate::services::store::{ConversationStore, StoreError};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Create an in-memory database (used for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER NOT NULL
            );",
        )?;

        let version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < 1 {
            conn.execute_batch(
                "CREATE TABLE conversations (
                    id TEXT PRIMARY KEY,
                    owner_id TEXT,
                    title TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE messages (
                    id TEXT PRIMARY KEY,
                    conversation_id TEXT NOT NULL,
                    owner_id TEXT,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
                );

                CREATE TABLE tags (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    color TEXT NOT NULL,
                    icon TEXT
                );

                CREATE TABLE conversation_tags (
                    conversation_id TEXT NOT NULL,
                    tag_id TEXT NOT NULL,
                    PRIMARY KEY (conversation_id, tag_id),
                    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
                    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
                );

                CREATE TABLE settings (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE INDEX idx_conversations_owner ON conversations(owner_id);
                CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);

                INSERT INTO schema_version (version) VALUES (1);",
            )?;
        }

        if version < 2 {
            conn.execute_batch(
                "INSERT OR IGNORE INTO tags (id, name, color, icon) VALUES
                    ('anxiety', 'Anxiety', '#f87171', 'alert-circle'),
                    ('work', 'Work', '#38bdf8', 'briefcase'),
                    ('relationships', 'Relationships', '#fb7185', 'heart'),
                    ('family', 'Family', '#a78bfa', 'users'),
                    ('health', 'Health', '#34d399', 'activity'),
                    ('confidence', 'Confidence', '#fbbf24', 'star'),
                    ('energy', 'Energy', '#f97316', 'zap'),
                    ('sleep', 'Sleep', '#818cf8', 'moon'),
                    ('goals', 'Goals', '#4ade80', 'target'),
                    ('mood', 'Mood', '#facc15', 'sun');

                UPDATE schema_version SET version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Settings ---

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.clone();
        let key = key.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let result: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(result)
        })
        .await?
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let value = value.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![key, value],
            )?;
            Ok(())
        })
        .await?
    }

    // --- Row helpers ---

    fn row_to_conversation(row: &rusqlite::Row) -> Result<Conversation, StoreError> {
        let created_str: String = row.get(3)?;

        Ok(Conversation {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            created_at: parse_timestamp(&created_str)?,
        })
    }

    fn row_to_message(row: &rusqlite::Row) -> Result<Message, StoreError> {
        let role_str: String = row.get(3)?;
        let created_str: String = row.get(5)?;

        Ok(Message {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            owner_id: row.get(2)?,
            role: Role::from_str(&role_str)
                .ok_or_else(|| StoreError::MalformedRow(format!("Unknown role: {}", role_str)))?,
            content: row.get(4)?,
            created_at: parse_timestamp(&created_str)?,
        })
    }

    fn row_to_tag(row: &rusqlite::Row) -> Result<Tag, StoreError> {
        Ok(Tag {
            id: row.get(0)?,
            name: row.get(1)?,
            color: row.get(2)?,
            icon: row.get(3)?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::MalformedRow(format!("Bad timestamp {:?}: {}", raw, e)))
}

fn join_err(e: task::JoinError) -> StoreError {
    StoreError::QueryFailed(e.to_string())
}

#[async_trait]
impl ConversationStore for Database {
    async fn create_conversation(
        &self,
        owner_id: Option<&str>,
        title: &str,
    ) -> Result<String, StoreError> {
        let conn = self.conn.clone();
        let owner_id = owner_id.map(|s| s.to_string());
        let title = title.to_string();
        task::spawn_blocking(move || {
            let id = Uuid::new_v4().to_string();
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO conversations (id, owner_id, title, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, owner_id, title, Utc::now().to_rfc3339()],
            )?;
            Ok(id)
        })
        .await
        .map_err(join_err)?
    }

    async fn insert_messages(
        &self,
        conversation_id: &str,
        owner_id: Option<&str>,
        rows: &[NewMessage],
    ) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let owner_id = owner_id.map(|s| s.to_string());
        let rows = rows.to_vec();
        task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;
            for row in &rows {
                tx.execute(
                    "INSERT INTO messages (id, conversation_id, owner_id, role, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        Uuid::new_v4().to_string(),
                        conversation_id,
                        owner_id,
                        row.role.as_str(),
                        row.content,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        owner_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let owner_id = owner_id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            // rowid breaks ties between rows batch-inserted within the same
            // timestamp tick, keeping reload order equal to append order.
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, owner_id, role, content, created_at
                 FROM messages WHERE conversation_id = ?1 AND owner_id = ?2
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let messages = stmt
                .query_map(params![conversation_id, owner_id], |row| {
                    Ok(Database::row_to_message(row))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
        .await
        .map_err(join_err)?
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let conn = self.conn.clone();
        let owner_id = owner_id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, title, created_at
                 FROM conversations WHERE owner_id = ?1
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let conversations = stmt
                .query_map(params![owner_id], |row| {
                    Ok(Database::row_to_conversation(row))
                })?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(conversations)
        })
        .await
        .map_err(join_err)?
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, StoreError> {
        let conn = self.conn.clone();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT id, name, color, icon FROM tags ORDER BY name")?;
            let tags = stmt
                .query_map([], |row| Ok(Database::row_to_tag(row)))?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tags)
        })
        .await
        .map_err(join_err)?
    }

    async fn list_tag_associations(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT tag_id FROM conversation_tags WHERE conversation_id = ?1",
            )?;
            let tag_ids = stmt
                .query_map(params![conversation_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tag_ids)
        })
        .await
        .map_err(join_err)?
    }

    async fn insert_tag_association(
        &self,
        conversation_id: &str,
        tag_id: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let tag_id = tag_id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "INSERT INTO conversation_tags (conversation_id, tag_id) VALUES (?1, ?2)
                 ON CONFLICT (conversation_id, tag_id) DO NOTHING",
                params![conversation_id, tag_id],
            )?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }

    async fn delete_tag_association(
        &self,
        conversation_id: &str,
        tag_id: &str,
    ) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let conversation_id = conversation_id.to_string();
        let tag_id = tag_id.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute(
                "DELETE FROM conversation_tags WHERE conversation_id = ?1 AND tag_id = ?2",
                params![conversation_id, tag_id],
            )?;
            Ok(())
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_initialization_seeds_tags() {
        let db = Database::new_in_memory().unwrap();
        let tags = db.list_tags().await.unwrap();
        assert!(!tags.is_empty());
        assert!(tags.iter().any(|t| t.id == "anxiety"));

        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted, "tags are ordered by name");
    }

    #[tokio::test]
    async fn test_conversation_and_messages_scoped_by_owner() {
        let db = Database::new_in_memory().unwrap();

        let conv_id = db
            .create_conversation(Some("u1"), "I feel stuck")
            .await
            .unwrap();

        let rows = vec![
            NewMessage {
                role: Role::User,
                content: "I feel stuck".to_string(),
            },
            NewMessage {
                role: Role::Assistant,
                content: "What makes you feel that way?".to_string(),
            },
        ];
        db.insert_messages(&conv_id, Some("u1"), &rows).await.unwrap();

        let messages = db.list_messages(&conv_id, "u1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);

        // A different owner sees nothing even with the right handle.
        let foreign = db.list_messages(&conv_id, "u2").await.unwrap();
        assert!(foreign.is_empty());
    }

    #[tokio::test]
    async fn test_batch_insert_preserves_append_order() {
        let db = Database::new_in_memory().unwrap();
        let conv_id = db.create_conversation(Some("u1"), "ordering").await.unwrap();

        let rows: Vec<NewMessage> = (0..6)
            .map(|i| NewMessage {
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("turn {}", i),
            })
            .collect();
        db.insert_messages(&conv_id, Some("u1"), &rows).await.unwrap();

        let messages = db.list_messages(&conv_id, "u1").await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["turn 0", "turn 1", "turn 2", "turn 3", "turn 4", "turn 5"]
        );
    }

    #[tokio::test]
    async fn test_tag_association_is_idempotent_per_pair() {
        let db = Database::new_in_memory().unwrap();
        let conv_id = db.create_conversation(Some("u1"), "tags").await.unwrap();

        db.insert_tag_association(&conv_id, "anxiety").await.unwrap();
        db.insert_tag_association(&conv_id, "anxiety").await.unwrap();
        db.insert_tag_association(&conv_id, "sleep").await.unwrap();

        let mut tag_ids = db.list_tag_associations(&conv_id).await.unwrap();
        tag_ids.sort();
        assert_eq!(tag_ids, vec!["anxiety", "sleep"]);

        db.delete_tag_association(&conv_id, "anxiety").await.unwrap();
        let tag_ids = db.list_tag_associations(&conv_id).await.unwrap();
        assert_eq!(tag_ids, vec!["sleep"]);
    }

    #[tokio::test]
    async fn test_list_conversations_newest_first_and_owner_scoped() {
        let db = Database::new_in_memory().unwrap();

        db.create_conversation(Some("u1"), "first").await.unwrap();
        db.create_conversation(Some("u1"), "second").await.unwrap();
        db.create_conversation(None, "guest session").await.unwrap();

        let convos = db.list_conversations("u1").await.unwrap();
        assert_eq!(convos.len(), 2);
        assert_eq!(convos[0].title, "second");
        assert_eq!(convos[1].title, "first");
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.get_setting("session_config").await.unwrap().is_none());

        db.set_setting("session_config", "{}").await.unwrap();
        db.set_setting("session_config", "{\"a\":1}").await.unwrap();
        assert_eq!(
            db.get_setting("session_config").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
    }
}
