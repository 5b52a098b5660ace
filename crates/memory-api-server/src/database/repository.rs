use anyhow::Result;
use pgvector::Vector;
use tracing::debug;
use uuid::Uuid;

use super::{DbPool, MemorySnapshot, NewTurn, ProductSnippet, TurnRow};
use crate::services::memory::manager::MemoryStore;
use crate::utils::error::MemoryError;

pub struct Repository {
    pub pool: DbPool,
}

impl Repository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ============ SCHEMA BOOTSTRAP ============

    /// Ensure conversation memory tables exist.
    pub async fn ensure_memory_tables(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        // 1. Turn log, append-only
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS chat_history (
                id BIGSERIAL PRIMARY KEY,
                customer_id TEXT NOT NULL,
                session_id UUID NOT NULL,
                user_message TEXT NOT NULL,
                assistant_reply TEXT NOT NULL,
                response_time_ms INT,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )"#,
        )
        .execute(pool)
        .await?;

        // 2. One profile row per customer; summary NULL until the first
        //    compaction lands
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS customer_profiles (
                customer_id TEXT PRIMARY KEY,
                summary TEXT,
                total_conversations BIGINT NOT NULL DEFAULT 0,
                first_interaction TIMESTAMP WITH TIME ZONE NOT NULL,
                last_interaction TIMESTAMP WITH TIME ZONE NOT NULL,
                customer_type TEXT NOT NULL DEFAULT 'new',
                interaction_frequency TEXT NOT NULL DEFAULT 'low',
                last_summary_turn BIGINT NOT NULL DEFAULT 0,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        debug!("Memory tables ensured");
        Ok(())
    }

    /// Ensure indexes backing the hot queries exist.
    pub async fn ensure_indices(&self) -> Result<()> {
        let pool = self.pool.get_pool();

        // Latest-turn lookup and recent-window fetches
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_chat_history_customer_created
               ON chat_history(customer_id, created_at DESC)"#,
        )
        .execute(pool)
        .await?;

        // Per-session scans and counts
        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_chat_history_customer_session
               ON chat_history(customer_id, session_id)"#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    // ============ KNOWLEDGE RETRIEVAL (external corpus) ============

    /// Vector search over the product corpus. The `products` table is owned
    /// by the CRM side; we only read it.
    pub async fn search_product_snippets(
        &self,
        query_embedding: Vector,
        similarity_threshold: f32,
        limit: i64,
    ) -> Result<Vec<String>> {
        let snippets = sqlx::query_as::<_, ProductSnippet>(
            r#"SELECT summary AS content,
                      (1 - (embeddings <=> $1))::float4 AS similarity
               FROM products
               WHERE embeddings IS NOT NULL
                 AND 1 - (embeddings <=> $1) > $2
               ORDER BY similarity DESC
               LIMIT $3"#,
        )
        .bind(query_embedding)
        .bind(similarity_threshold)
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        debug!("Found {} relevant product snippets", snippets.len());

        Ok(snippets.into_iter().map(|s| s.content).collect())
    }

    pub async fn fetch_company_snippets(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"SELECT description
               FROM company_info
               WHERE description IS NOT NULL AND description != ''
               ORDER BY updated_at DESC
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(rows)
    }
}

// ============ MEMORY STORE ============

#[async_trait::async_trait]
impl MemoryStore for Repository {
    /// Session head + profile in one round trip. Window count runs over the
    /// customer's rows before LIMIT, so it is the full per-session count.
    async fn load_snapshot(
        &self,
        customer_id: &str,
    ) -> Result<Option<MemorySnapshot>, MemoryError> {
        let snapshot = sqlx::query_as::<_, MemorySnapshot>(
            r#"
            WITH latest_turn AS (
                SELECT session_id,
                       created_at,
                       COUNT(*) OVER (PARTITION BY session_id) AS session_turn_count
                FROM chat_history
                WHERE customer_id = $1
                ORDER BY created_at DESC
                LIMIT 1
            ),
            profile AS (
                SELECT summary, total_conversations, last_summary_turn, last_interaction
                FROM customer_profiles
                WHERE customer_id = $1
            )
            SELECT lt.session_id,
                   lt.created_at AS last_created_at,
                   lt.session_turn_count,
                   p.summary,
                   p.total_conversations,
                   p.last_summary_turn,
                   p.last_interaction
            FROM latest_turn lt
            LEFT JOIN profile p ON true
            "#,
        )
        .bind(customer_id)
        .fetch_optional(self.pool.get_pool())
        .await?;

        Ok(snapshot)
    }

    async fn fetch_recent_turns(
        &self,
        customer_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TurnRow>, MemoryError> {
        let mut turns = sqlx::query_as::<_, TurnRow>(
            r#"SELECT user_message, assistant_reply, created_at
               FROM chat_history
               WHERE customer_id = $1 AND session_id = $2
               ORDER BY created_at DESC
               LIMIT $3"#,
        )
        .bind(customer_id)
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(self.pool.get_pool())
        .await?;

        // Chronological order for the prompt
        turns.reverse();
        Ok(turns)
    }

    async fn load_session_turns(
        &self,
        customer_id: &str,
        session_id: Uuid,
    ) -> Result<Vec<TurnRow>, MemoryError> {
        let turns = sqlx::query_as::<_, TurnRow>(
            r#"SELECT user_message, assistant_reply, created_at
               FROM chat_history
               WHERE customer_id = $1 AND session_id = $2
               ORDER BY created_at ASC"#,
        )
        .bind(customer_id)
        .bind(session_id)
        .fetch_all(self.pool.get_pool())
        .await?;

        Ok(turns)
    }

    /// Append one turn and maintain profile aggregates, all-or-nothing.
    /// Returns the session's turn count including the inserted row.
    async fn append_turn(&self, turn: &NewTurn) -> Result<i64, MemoryError> {
        let mut tx = self.pool.get_pool().begin().await?;

        sqlx::query(
            r#"INSERT INTO chat_history
               (customer_id, session_id, user_message, assistant_reply, response_time_ms, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(&turn.customer_id)
        .bind(turn.session_id)
        .bind(&turn.user_message)
        .bind(&turn.assistant_reply)
        .bind(turn.response_time_ms)
        .bind(turn.created_at)
        .execute(&mut *tx)
        .await?;

        // Counter arithmetic and derived fields happen server-side in the
        // conflict clause; concurrent appends both apply without a
        // read-modify-write race.
        sqlx::query(
            r#"INSERT INTO customer_profiles
               (customer_id, summary, total_conversations, first_interaction, last_interaction,
                customer_type, interaction_frequency, last_summary_turn, updated_at)
               VALUES ($1, NULL, 1, $2, $2, 'new', 'low', 0, $2)
               ON CONFLICT (customer_id)
               DO UPDATE SET
                   total_conversations = customer_profiles.total_conversations + 1,
                   last_interaction = $2,
                   customer_type = CASE
                       WHEN customer_profiles.total_conversations >= 10 THEN 'loyal'
                       WHEN customer_profiles.total_conversations >= 3 THEN 'returning'
                       ELSE 'new'
                   END,
                   interaction_frequency = CASE
                       WHEN EXTRACT(EPOCH FROM ($2 - customer_profiles.last_interaction)) / 3600 < 24 THEN 'high'
                       WHEN EXTRACT(EPOCH FROM ($2 - customer_profiles.last_interaction)) / 3600 < 168 THEN 'medium'
                       ELSE 'low'
                   END,
                   updated_at = $2"#,
        )
        .bind(&turn.customer_id)
        .bind(turn.created_at)
        .execute(&mut *tx)
        .await?;

        // Must see the row inserted above (read-after-write in the same tx)
        let turn_count = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM chat_history
               WHERE customer_id = $1 AND session_id = $2"#,
        )
        .bind(&turn.customer_id)
        .bind(turn.session_id)
        .fetch_one(&mut *tx)
        .await?;

        // First turn of a new session: the summary baseline restarts, so the
        // watermark from the previous session must not gate this session's
        // compactions.
        if turn_count == 1 {
            sqlx::query(
                r#"UPDATE customer_profiles
                   SET last_summary_turn = 0
                   WHERE customer_id = $1 AND last_summary_turn <> 0"#,
            )
            .bind(&turn.customer_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(turn_count)
    }

    /// Replace the long-term summary, gated on watermark monotonicity: a
    /// stale compaction (smaller watermark) is silently skipped.
    async fn persist_summary(
        &self,
        customer_id: &str,
        summary: &str,
        watermark: i64,
        updated_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            r#"UPDATE customer_profiles
               SET summary = $2, last_summary_turn = $3, updated_at = $4
               WHERE customer_id = $1 AND last_summary_turn <= $3"#,
        )
        .bind(customer_id)
        .bind(summary)
        .bind(watermark)
        .bind(updated_at)
        .execute(self.pool.get_pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
