//! Token-usage ledger (SQLite).

use crate::error::Result;
use crate::llm::TokenUsage;
use crate::ConversationKey;
use anyhow::Context as _;
use sqlx::SqlitePool;

/// Records accumulated token usage per engine run for downstream accounting.
/// Writes are fire-and-forget.
#[derive(Debug, Clone)]
pub struct UsageLog {
    pool: SqlitePool,
}

impl UsageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_usage (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                iterations INTEGER NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create token_usage table")?;

        Ok(())
    }

    /// Record one engine run's accumulated counters. Fire-and-forget.
    pub fn record(&self, key: &ConversationKey, model: &str, usage: TokenUsage, iterations: u32) {
        let pool = self.pool.clone();
        let id = uuid::Uuid::new_v4().to_string();
        let tenant_id = key.tenant_id.to_string();
        let contact_id = key.contact_id.to_string();
        let model = model.to_string();

        tokio::spawn(async move {
            if let Err(error) = sqlx::query(
                "INSERT INTO token_usage \
                 (id, tenant_id, contact_id, model, prompt_tokens, completion_tokens, iterations) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&tenant_id)
            .bind(&contact_id)
            .bind(&model)
            .bind(usage.prompt_tokens as i64)
            .bind(usage.completion_tokens as i64)
            .bind(iterations as i64)
            .execute(&pool)
            .await
            {
                tracing::warn!(%error, "failed to persist token usage");
            }
        });
    }
}
