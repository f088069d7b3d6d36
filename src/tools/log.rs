//! Tool invocation log (SQLite).

use crate::error::Result;
use crate::tools::ToolOutcome;
use crate::ConversationKey;
use anyhow::Context as _;
use sqlx::SqlitePool;

/// Records every tool invocation for later inspection. Fire-and-forget: a
/// logging failure never affects the conversation.
#[derive(Debug, Clone)]
pub struct ToolCallLog {
    pool: SqlitePool,
}

impl ToolCallLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tool_calls (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                arguments TEXT,
                result TEXT,
                success INTEGER NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create tool_calls table")?;

        Ok(())
    }

    /// Record one invocation. A result that refuses to serialize is stored
    /// in its debug form instead of being dropped.
    pub fn record(
        &self,
        key: &ConversationKey,
        tool_name: &str,
        arguments: &serde_json::Value,
        outcome: &ToolOutcome,
        duration_ms: i64,
    ) {
        let pool = self.pool.clone();
        let id = uuid::Uuid::new_v4().to_string();
        let tenant_id = key.tenant_id.to_string();
        let contact_id = key.contact_id.to_string();
        let tool_name = tool_name.to_string();
        let arguments = serde_json::to_string(arguments)
            .unwrap_or_else(|_| format!("{arguments:?}"));
        let result = serde_json::to_string(outcome)
            .unwrap_or_else(|_| format!("{outcome:?}"));
        let success = outcome.success;
        let error = outcome.error.clone();

        tokio::spawn(async move {
            if let Err(error) = sqlx::query(
                "INSERT INTO tool_calls \
                 (id, tenant_id, contact_id, tool_name, arguments, result, success, error, duration_ms) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&tenant_id)
            .bind(&contact_id)
            .bind(&tool_name)
            .bind(&arguments)
            .bind(&result)
            .bind(success as i64)
            .bind(&error)
            .bind(duration_ms)
            .execute(&pool)
            .await
            {
                tracing::warn!(%error, tool = %tool_name, "failed to persist tool call");
            }
        });
    }
}
