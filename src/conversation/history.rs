//! Conversation message persistence (SQLite).

use crate::error::Result;
use crate::{ConversationKey, MediaItem};
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};

/// Persists inbound and outbound conversation messages.
///
/// Inbound turns are awaited (the engine reads them back as history within
/// the same run); the outbound summary write is fire-and-forget so delivery
/// never blocks on a log insert.
#[derive(Debug, Clone)]
pub struct MessageLog {
    pool: SqlitePool,
}

/// A persisted conversation message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl MessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the message table.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_messages (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                media TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create conversation_messages table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
             ON conversation_messages (tenant_id, contact_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create conversation index")?;

        Ok(())
    }

    /// Log the coalesced user turn. Awaited so the engine's history fetch in
    /// the same run observes it.
    pub async fn log_user_message(&self, key: &ConversationKey, content: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_messages (id, tenant_id, contact_id, role, content) \
             VALUES (?, ?, ?, 'user', ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(key.tenant_id.as_ref())
        .bind(key.contact_id.as_ref())
        .bind(content)
        .execute(&self.pool)
        .await
        .context("failed to persist user message")?;

        Ok(())
    }

    /// Log the delivered reply with a summary of which media were actually
    /// sent versus extracted-but-failed. Fire-and-forget.
    pub fn log_outbound(
        &self,
        key: &ConversationKey,
        content: &str,
        media_sent: &[MediaItem],
        media_failed: &[MediaItem],
    ) {
        let pool = self.pool.clone();
        let id = uuid::Uuid::new_v4().to_string();
        let tenant_id = key.tenant_id.to_string();
        let contact_id = key.contact_id.to_string();
        let content = content.to_string();
        let media_json = serde_json::to_string(&serde_json::json!({
            "sent": media_sent,
            "failed": media_failed,
        }))
        .ok();

        tokio::spawn(async move {
            if let Err(error) = sqlx::query(
                "INSERT INTO conversation_messages (id, tenant_id, contact_id, role, content, media) \
                 VALUES (?, ?, ?, 'assistant', ?, ?)",
            )
            .bind(&id)
            .bind(&tenant_id)
            .bind(&contact_id)
            .bind(&content)
            .bind(&media_json)
            .execute(&pool)
            .await
            {
                tracing::warn!(%error, "failed to persist outbound message");
            }
        });
    }

    /// Awaited variant of the outbound write, used by tests and callers that
    /// need the row visible immediately.
    pub async fn log_outbound_sync(
        &self,
        key: &ConversationKey,
        content: &str,
        media_sent: &[MediaItem],
        media_failed: &[MediaItem],
    ) -> Result<()> {
        let media_json = serde_json::to_string(&serde_json::json!({
            "sent": media_sent,
            "failed": media_failed,
        }))
        .ok();

        sqlx::query(
            "INSERT INTO conversation_messages (id, tenant_id, contact_id, role, content, media) \
             VALUES (?, ?, ?, 'assistant', ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(key.tenant_id.as_ref())
        .bind(key.contact_id.as_ref())
        .bind(content)
        .bind(&media_json)
        .execute(&self.pool)
        .await
        .context("failed to persist outbound message")?;

        Ok(())
    }

    /// Load recent messages for a conversation, oldest first.
    ///
    /// Fetched newest-first (so the LIMIT keeps the most recent window) and
    /// reversed to chronological order before returning.
    pub async fn load_recent(
        &self,
        key: &ConversationKey,
        limit: i64,
    ) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            "SELECT id, role, content, created_at \
             FROM conversation_messages \
             WHERE tenant_id = ? AND contact_id = ? \
             ORDER BY created_at DESC, rowid DESC \
             LIMIT ?",
        )
        .bind(key.tenant_id.as_ref())
        .bind(key.contact_id.as_ref())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to load conversation history")?;

        let mut messages: Vec<StoredMessage> = rows
            .into_iter()
            .map(|row| StoredMessage {
                id: row.try_get("id").unwrap_or_default(),
                role: row.try_get("role").unwrap_or_default(),
                content: row.try_get("content").unwrap_or_default(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect();

        messages.reverse();

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn setup() -> MessageLog {
        let pool = db::in_memory().await.expect("pool");
        let log = MessageLog::new(pool);
        log.initialize().await.expect("schema");
        log
    }

    #[tokio::test]
    async fn load_recent_returns_chronological_window() {
        let log = setup().await;
        let key = ConversationKey::new("t1", "c1");

        for i in 0..5 {
            log.log_user_message(&key, &format!("mensaje {i}"))
                .await
                .expect("insert");
        }

        let messages = log.load_recent(&key, 3).await.expect("load");
        assert_eq!(messages.len(), 3);
        // The limit keeps the newest three, returned oldest first.
        assert_eq!(messages[0].content, "mensaje 2");
        assert_eq!(messages[2].content, "mensaje 4");
    }

    #[tokio::test]
    async fn conversations_are_isolated_per_key() {
        let log = setup().await;
        let key_a = ConversationKey::new("t1", "alice");
        let key_b = ConversationKey::new("t1", "bob");

        log.log_user_message(&key_a, "hola").await.expect("insert");
        log.log_outbound_sync(&key_b, "respuesta", &[], &[])
            .await
            .expect("insert");

        let for_a = log.load_recent(&key_a, 10).await.expect("load");
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].role, "user");

        let for_b = log.load_recent(&key_b, 10).await.expect("load");
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].role, "assistant");
    }
}
