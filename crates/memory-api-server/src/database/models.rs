use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// One stored conversation turn, as returned by history fetches.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TurnRow {
    pub user_message: String,
    pub assistant_reply: String,
    pub created_at: DateTime<Utc>,
}

/// A turn to be appended. Immutable once written.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub customer_id: String,
    pub session_id: Uuid,
    pub user_message: String,
    pub assistant_reply: String,
    pub response_time_ms: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Single-read join of the customer's most recent turn (with its session's
/// turn count) and the profile row. Profile fields are `Option` because the
/// profile is upserted on turn writes and may lag a concurrent first append.
#[derive(Debug, Clone, FromRow)]
pub struct MemorySnapshot {
    pub session_id: Uuid,
    pub last_created_at: DateTime<Utc>,
    pub session_turn_count: i64,
    pub summary: Option<String>,
    pub total_conversations: Option<i64>,
    pub last_summary_turn: Option<i64>,
    pub last_interaction: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductSnippet {
    pub content: String,
    pub similarity: f32,
}
