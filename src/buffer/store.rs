//! Message buffer persistence and the claim lease (SQLite).
//!
//! The buffer row is the only shared mutable state in the core: appends,
//! claims, and the final drain all go through single atomic statements so
//! correctness holds across worker processes, not just within one.

use crate::error::Result;
use crate::ConversationKey;
use anyhow::Context as _;
use chrono::{DateTime, Utc};
use sqlx::{Row as _, SqlitePool};
use std::time::Duration;

/// Result of appending a fragment to a buffer.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub buffer_id: String,
    pub fragment_count: usize,
    pub expires_at: DateTime<Utc>,
    /// True when the row currently carries a live processing lease, meaning a
    /// worker is draining it right now and this fragment either rides along
    /// or starts the next buffer.
    pub claimed: bool,
}

/// A buffer found by the sweep: quiet period elapsed, no live lease.
#[derive(Debug, Clone)]
pub struct ExpiredBuffer {
    pub buffer_id: String,
    pub key: ConversationKey,
}

/// Fragments taken from a claimed buffer, in arrival order.
#[derive(Debug, Clone)]
pub struct ClaimedFragments {
    pub key: ConversationKey,
    pub fragments: Vec<String>,
}

/// Store for `message_buffers` rows.
#[derive(Debug, Clone)]
pub struct BufferStore {
    pool: SqlitePool,
}

impl BufferStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the buffer table.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS message_buffers (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                contact_id TEXT NOT NULL,
                fragments TEXT NOT NULL,
                fragment_count INTEGER NOT NULL DEFAULT 1,
                expires_at TIMESTAMP NOT NULL,
                processing_until TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (tenant_id, contact_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create message_buffers table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_buffers_expiry \
             ON message_buffers (expires_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create buffer expiry index")?;

        Ok(())
    }

    /// Append a fragment for `key`, creating the buffer on first contact.
    ///
    /// A single upsert keeps the append atomic under concurrent workers: the
    /// fragment lands in the JSON array via `json_insert('$[#]', …)` and the
    /// quiet-period deadline is pushed forward in the same statement.
    pub async fn append_fragment(
        &self,
        key: &ConversationKey,
        text: &str,
        quiet_period: Duration,
    ) -> Result<AppendOutcome> {
        let now = Utc::now();
        let expires_at = now + quiet_period;

        sqlx::query(
            r#"
            INSERT INTO message_buffers (id, tenant_id, contact_id, fragments, fragment_count, expires_at)
            VALUES (?, ?, ?, json_array(?), 1, ?)
            ON CONFLICT (tenant_id, contact_id) DO UPDATE SET
                fragments = json_insert(fragments, '$[#]', ?),
                fragment_count = fragment_count + 1,
                expires_at = ?
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(key.tenant_id.as_ref())
        .bind(key.contact_id.as_ref())
        .bind(text)
        .bind(expires_at)
        .bind(text)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("failed to append buffer fragment")?;

        let row = sqlx::query(
            "SELECT id, fragment_count, expires_at, processing_until \
             FROM message_buffers WHERE tenant_id = ? AND contact_id = ?",
        )
        .bind(key.tenant_id.as_ref())
        .bind(key.contact_id.as_ref())
        .fetch_one(&self.pool)
        .await
        .context("failed to read back buffer state")?;

        let processing_until: Option<DateTime<Utc>> = row.try_get("processing_until").ok();

        Ok(AppendOutcome {
            buffer_id: row.try_get("id").unwrap_or_default(),
            fragment_count: row.try_get::<i64, _>("fragment_count").unwrap_or(1) as usize,
            expires_at: row.try_get("expires_at").unwrap_or(expires_at),
            claimed: processing_until.is_some_and(|until| until > now),
        })
    }

    /// Attempt to claim a buffer for exclusive draining.
    ///
    /// One conditional update: the lease is taken only where no live lease
    /// exists, and the affected-row count is the verdict. Zero means another
    /// worker won — expected, silent, not an error.
    pub async fn try_claim(&self, buffer_id: &str, lease: Duration) -> Result<bool> {
        let now = Utc::now();
        let until = now + lease;

        let result = sqlx::query(
            "UPDATE message_buffers SET processing_until = ? \
             WHERE id = ? AND (processing_until IS NULL OR processing_until <= ?)",
        )
        .bind(until)
        .bind(buffer_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("failed to claim buffer")?;

        Ok(result.rows_affected() == 1)
    }

    /// Remove a claimed buffer and return its fragments in arrival order.
    ///
    /// `DELETE … RETURNING` keeps the read and the delete atomic: a fragment
    /// appended concurrently either rides along in the returned batch or
    /// creates a fresh buffer afterwards — it is never lost in between.
    /// The delete happens before the engine runs; a drain failure after this
    /// point does not resurrect the row.
    pub async fn take_fragments(&self, buffer_id: &str) -> Result<Option<ClaimedFragments>> {
        let row = sqlx::query(
            "DELETE FROM message_buffers WHERE id = ? \
             RETURNING tenant_id, contact_id, fragments",
        )
        .bind(buffer_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to take buffer fragments")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let tenant_id: String = row.try_get("tenant_id").unwrap_or_default();
        let contact_id: String = row.try_get("contact_id").unwrap_or_default();
        let raw: String = row.try_get("fragments").unwrap_or_else(|_| "[]".into());
        let fragments: Vec<String> =
            serde_json::from_str(&raw).context("buffer fragments column is not a JSON array")?;

        Ok(Some(ClaimedFragments {
            key: ConversationKey::new(tenant_id, contact_id),
            fragments,
        }))
    }

    /// Buffers whose quiet period has elapsed and whose lease is absent or
    /// stale. This is how buffers orphaned by a process restart get drained.
    pub async fn find_expired(&self) -> Result<Vec<ExpiredBuffer>> {
        let now = Utc::now();

        let rows = sqlx::query(
            "SELECT id, tenant_id, contact_id FROM message_buffers \
             WHERE expires_at <= ? AND (processing_until IS NULL OR processing_until <= ?)",
        )
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("failed to scan for expired buffers")?;

        Ok(rows
            .into_iter()
            .map(|row| ExpiredBuffer {
                buffer_id: row.try_get("id").unwrap_or_default(),
                key: ConversationKey::new(
                    row.try_get::<String, _>("tenant_id").unwrap_or_default(),
                    row.try_get::<String, _>("contact_id").unwrap_or_default(),
                ),
            })
            .collect())
    }
}
