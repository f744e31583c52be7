//! # Message Repository
//!
//! Durable, append-only log of chat messages ordered by arrival.
//!
//! ## Example
//!
//! ```rust,no_run
//! use lib_core::{create_pool, MessageStore};
//!
//! # async fn example() -> lib_core::Result<()> {
//! let pool = create_pool("sqlite:data/chat_history.db").await?;
//! let store = MessageStore::new(pool);
//! store.initialize().await?;
//!
//! store.append("alice", "hi", Some("room-1")).await?;
//! let history = store.read_all(Some("room-1")).await?;
//! assert_eq!(history.last().map(|m| m.text.as_str()), Some("hi"));
//! # Ok(())
//! # }
//! ```

use super::models::Message;
use super::DbPool;
use crate::error::Result;
use tracing::{debug, error, info};

const CREATE_MESSAGES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        message TEXT NOT NULL,
        timestamp TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
        session_id TEXT
    )
"#;

const CREATE_SESSION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages (session_id, id)";

// The timestamp is clamped to the newest row's inside the same statement, so id
// order and timestamp order agree even if the wall clock steps back. The newest
// row is found through the primary key.
const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (username, message, session_id, timestamp)
    VALUES (?1, ?2, ?3, MAX(
        strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
        COALESCE((SELECT timestamp FROM messages ORDER BY id DESC LIMIT 1), '')
    ))
    RETURNING id, username, message, timestamp, session_id
"#;

/// Append-only message log backed by SQLite.
#[derive(Clone, Debug)]
pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Create the schema if absent.
    ///
    /// Idempotent and safe to race with itself: both statements are
    /// `IF NOT EXISTS` and run in one transaction.
    pub async fn initialize(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_MESSAGES_TABLE).execute(&mut *tx).await?;
        sqlx::query(CREATE_SESSION_INDEX).execute(&mut *tx).await?;
        tx.commit().await?;

        info!("[STORE] Message log schema ready");
        Ok(())
    }

    /// Insert one message and return it with its store-assigned id and timestamp.
    ///
    /// # Arguments
    ///
    /// * `username` - Author display name
    /// * `text` - Message body
    /// * `session_id` - Session scope, `None` for the global scope
    pub async fn append(&self, username: &str, text: &str, session_id: Option<&str>) -> Result<Message> {
        let message = sqlx::query_as::<_, Message>(INSERT_MESSAGE)
            .bind(username)
            .bind(text)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await?;

        debug!(
            id = message.id,
            username = %message.username,
            session_id = ?message.session_id,
            "[STORE] Appended message {} from '{}'",
            message.id,
            message.username
        );

        Ok(message)
    }

    /// All messages in ascending id order.
    ///
    /// `None` reads the whole log across every session; `Some(id)` reads only
    /// the messages sent in that session.
    pub async fn read_all(&self, session_id: Option<&str>) -> Result<Vec<Message>> {
        let messages = match session_id {
            Some(session_id) => {
                sqlx::query_as::<_, Message>(
                    r#"
                    SELECT id, username, message, timestamp, session_id
                    FROM messages
                    WHERE session_id = ?
                    ORDER BY id ASC
                    "#,
                )
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Message>(
                    "SELECT id, username, message, timestamp, session_id FROM messages ORDER BY id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        debug!(
            session_id = ?session_id,
            count = messages.len(),
            "[STORE] Retrieved {} messages",
            messages.len()
        );

        Ok(messages)
    }

    /// [`read_all`](Self::read_all) with the degraded-but-alive policy.
    ///
    /// Any failure is logged and yields an empty history. An empty result
    /// therefore does not prove the log is empty.
    pub async fn read_all_or_empty(&self, session_id: Option<&str>) -> Vec<Message> {
        match self.read_all(session_id).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(
                    session_id = ?session_id,
                    error = %e,
                    "[STORE] READ_FAILED - serving empty history: {}",
                    e
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::store::create_pool;
    use std::collections::HashSet;

    async fn setup_test_store() -> MessageStore {
        let pool = create_pool("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        let store = MessageStore::new(pool);
        store.initialize().await.expect("Failed to create messages table");
        store
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let store = setup_test_store().await;

        store.append("alice", "before", None).await.unwrap();
        store.initialize().await.unwrap();

        let (a, b) = tokio::join!(store.initialize(), store.initialize());
        assert!(a.is_ok());
        assert!(b.is_ok());

        let messages = store.read_all(None).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "before");
    }

    #[tokio::test]
    async fn test_append_round_trip() {
        let store = setup_test_store().await;

        let stored = store.append("alice", "hi there", None).await.unwrap();
        let messages = store.read_all(None).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], stored);
        assert_eq!(messages[0].username, "alice");
        assert_eq!(messages[0].text, "hi there");
        assert!(messages[0].session_id.is_none());
    }

    async fn assert_concurrent_appends_are_totally_ordered(store: MessageStore) {
        let mut handles = Vec::new();
        for i in 0..25 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append(&format!("user{}", i), &format!("message {}", i), None).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let messages = store.read_all(None).await.unwrap();
        assert_eq!(messages.len(), 25);

        let ids: HashSet<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 25, "identifiers must be unique");

        for pair in messages.windows(2) {
            assert!(pair[0].id < pair[1].id);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_totally_ordered() {
        assert_concurrent_appends_are_totally_ordered(setup_test_store().await).await;
    }

    #[tokio::test]
    async fn test_concurrent_appends_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("chat.db").display());

        let store = MessageStore::new(create_pool(&url).await.unwrap());
        store.initialize().await.unwrap();

        assert_concurrent_appends_are_totally_ordered(store.clone()).await;
        store.pool().close().await;
    }

    #[tokio::test]
    async fn test_timestamp_never_precedes_newest_row() {
        let store = setup_test_store().await;

        sqlx::query(
            "INSERT INTO messages (username, message, timestamp) \
             VALUES ('clock', 'from the future', '2999-01-01T00:00:00.000Z')",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let stored = store.append("alice", "now", None).await.unwrap();
        assert_eq!(stored.timestamp_rfc3339(), "2999-01-01T00:00:00.000Z");

        let messages = store.read_all(None).await.unwrap();
        assert_eq!(messages.last(), Some(&stored));
    }

    #[tokio::test]
    async fn test_read_is_scoped_by_session() {
        let store = setup_test_store().await;

        store.append("alice", "in room a", Some("a")).await.unwrap();
        store.append("bob", "in room b", Some("b")).await.unwrap();
        store.append("carol", "global", None).await.unwrap();
        store.append("dave", "again in a", Some("a")).await.unwrap();

        let room_a = store.read_all(Some("a")).await.unwrap();
        let texts: Vec<&str> = room_a.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["in room a", "again in a"]);

        assert_eq!(store.read_all(None).await.unwrap().len(), 4);
        assert!(store.read_all(Some("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_surface_as_errors_and_degrade_on_read() {
        let store = setup_test_store().await;
        store.append("alice", "hi", None).await.unwrap();

        store.pool().close().await;

        assert!(store.append("bob", "lost", None).await.is_err());
        assert!(store.read_all(None).await.is_err());
        assert!(store.read_all_or_empty(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_timestamp_format() {
        let store = setup_test_store().await;
        let stored = store.append("alice", "hi", None).await.unwrap();

        let formatted = stored.timestamp_rfc3339();
        assert!(formatted.ends_with('Z'));
        assert_eq!(formatted.len(), "2026-01-01T00:00:00.000Z".len());
        assert_eq!(stored.transcript_line(), "alice: hi");
    }
}
