use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::TurnRow;

/// Outcome of resolving a customer's session, derived from the most recent
/// turn plus the profile row in a single read.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Customer has no turns at all.
    NoHistory,

    /// Most recent turn is within the session timeout window.
    Active {
        session_id: Uuid,
        turn_count: i64,
        last_summary_turn: i64,
        summary: Option<String>,
        total_conversations: i64,
        last_interaction: DateTime<Utc>,
    },

    /// Most recent turn is older than the session timeout window.
    Expired {
        previous_session_id: Uuid,
        previous_turn_count: i64,
        summary: Option<String>,
        total_conversations: i64,
        last_interaction: DateTime<Utc>,
    },
}

/// What to fetch for the incoming turn. Produced by the pure policy engine;
/// executed by the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    /// Session the new turn will be recorded under.
    pub session_id: Uuid,

    /// Session to read recent turns from. Differs from `session_id` when a
    /// short session expired and its turns carry across the boundary.
    pub fetch_from: Option<Uuid>,

    pub turns_to_fetch: usize,

    pub include_summary: bool,

    /// Formatted long-term summary; only present when `include_summary` and
    /// the stored summary is not the "no summary yet" sentinel.
    pub summary_text: Option<String>,

    /// Session whose turns were never summarized and should be compacted in
    /// the background (expired short sessions).
    pub schedule_compaction: Option<Uuid>,
}

/// Context handed back to the caller for one incoming message.
#[derive(Debug, Clone)]
pub struct MemoryContext {
    pub turns: Vec<TurnRow>,
    pub session_id: Uuid,
    pub summary: Option<String>,
    pub use_hybrid: bool,
}

impl MemoryContext {
    /// Degraded/no-history context: fresh session, nothing to surface.
    pub fn empty(session_id: Uuid) -> Self {
        Self {
            turns: Vec::new(),
            session_id,
            summary: None,
            use_hybrid: false,
        }
    }
}
