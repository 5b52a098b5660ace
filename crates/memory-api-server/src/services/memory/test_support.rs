//! In-memory fakes shared by the memory core's tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use uuid::Uuid;

use crate::database::{MemorySnapshot, NewTurn, TurnRow};
use crate::utils::error::MemoryError;

use super::clock::Clock;
use super::manager::MemoryStore;

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Default)]
struct StoreState {
    turns: Vec<NewTurn>,
    summary: Option<String>,
    last_summary_turn: i64,
    total_conversations: i64,
    last_interaction: Option<DateTime<Utc>>,
}

/// Store fake mirroring the repository's semantics, including the
/// watermark monotonicity guard and the session-rollover reset.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    /// Insert a pre-existing turn without going through `append_turn`'s
    /// trigger bookkeeping.
    pub fn seed(&self, turn: NewTurn) {
        let mut state = self.state.lock().unwrap();
        state.total_conversations += 1;
        state.last_interaction = Some(turn.created_at);
        state.turns.push(turn);
    }

    pub fn set_summary(&self, summary: &str, watermark: i64) {
        let mut state = self.state.lock().unwrap();
        state.summary = Some(summary.to_string());
        state.last_summary_turn = watermark;
    }

    pub fn summary(&self) -> Option<String> {
        self.state.lock().unwrap().summary.clone()
    }

    pub fn watermark(&self) -> i64 {
        self.state.lock().unwrap().last_summary_turn
    }

    pub fn turn_count(&self, session_id: Uuid) -> i64 {
        self.state
            .lock()
            .unwrap()
            .turns
            .iter()
            .filter(|t| t.session_id == session_id)
            .count() as i64
    }
}

fn to_row(turn: &NewTurn) -> TurnRow {
    TurnRow {
        user_message: turn.user_message.clone(),
        assistant_reply: turn.assistant_reply.clone(),
        created_at: turn.created_at,
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load_snapshot(
        &self,
        customer_id: &str,
    ) -> Result<Option<MemorySnapshot>, MemoryError> {
        let state = self.state.lock().unwrap();

        let latest = state
            .turns
            .iter()
            .filter(|t| t.customer_id == customer_id)
            .max_by_key(|t| t.created_at);

        let Some(latest) = latest else {
            return Ok(None);
        };

        let session_turn_count = state
            .turns
            .iter()
            .filter(|t| t.customer_id == customer_id && t.session_id == latest.session_id)
            .count() as i64;

        Ok(Some(MemorySnapshot {
            session_id: latest.session_id,
            last_created_at: latest.created_at,
            session_turn_count,
            summary: state.summary.clone(),
            total_conversations: Some(state.total_conversations),
            last_summary_turn: Some(state.last_summary_turn),
            last_interaction: state.last_interaction,
        }))
    }

    async fn fetch_recent_turns(
        &self,
        customer_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TurnRow>, MemoryError> {
        let state = self.state.lock().unwrap();

        let mut rows: Vec<TurnRow> = state
            .turns
            .iter()
            .filter(|t| t.customer_id == customer_id && t.session_id == session_id)
            .map(to_row)
            .collect();

        rows.sort_by_key(|r| r.created_at);
        if rows.len() > limit {
            rows.drain(0..rows.len() - limit);
        }
        Ok(rows)
    }

    async fn load_session_turns(
        &self,
        customer_id: &str,
        session_id: Uuid,
    ) -> Result<Vec<TurnRow>, MemoryError> {
        let state = self.state.lock().unwrap();

        let mut rows: Vec<TurnRow> = state
            .turns
            .iter()
            .filter(|t| t.customer_id == customer_id && t.session_id == session_id)
            .map(to_row)
            .collect();

        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn append_turn(&self, turn: &NewTurn) -> Result<i64, MemoryError> {
        let mut state = self.state.lock().unwrap();

        state.turns.push(turn.clone());
        state.total_conversations += 1;
        state.last_interaction = Some(turn.created_at);

        let turn_count = state
            .turns
            .iter()
            .filter(|t| t.customer_id == turn.customer_id && t.session_id == turn.session_id)
            .count() as i64;

        if turn_count == 1 {
            state.last_summary_turn = 0;
        }

        Ok(turn_count)
    }

    async fn persist_summary(
        &self,
        _customer_id: &str,
        summary: &str,
        watermark: i64,
        _updated_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let mut state = self.state.lock().unwrap();

        if state.last_summary_turn > watermark {
            return Ok(false);
        }

        state.summary = Some(summary.to_string());
        state.last_summary_turn = watermark;
        Ok(true)
    }
}

/// Store whose every call fails, for degradation tests.
pub struct FailingStore;

#[async_trait]
impl MemoryStore for FailingStore {
    async fn load_snapshot(&self, _: &str) -> Result<Option<MemorySnapshot>, MemoryError> {
        Err(MemoryError::StoreUnavailable(sqlx::Error::PoolTimedOut))
    }

    async fn fetch_recent_turns(
        &self,
        _: &str,
        _: Uuid,
        _: usize,
    ) -> Result<Vec<TurnRow>, MemoryError> {
        Err(MemoryError::StoreUnavailable(sqlx::Error::PoolTimedOut))
    }

    async fn load_session_turns(&self, _: &str, _: Uuid) -> Result<Vec<TurnRow>, MemoryError> {
        Err(MemoryError::StoreUnavailable(sqlx::Error::PoolTimedOut))
    }

    async fn append_turn(&self, _: &NewTurn) -> Result<i64, MemoryError> {
        Err(MemoryError::StoreUnavailable(sqlx::Error::PoolTimedOut))
    }

    async fn persist_summary(
        &self,
        _: &str,
        _: &str,
        _: i64,
        _: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        Err(MemoryError::StoreUnavailable(sqlx::Error::PoolTimedOut))
    }
}

pub fn seeded_turn(
    customer_id: &str,
    session_id: Uuid,
    ordinal: i64,
    base: DateTime<Utc>,
) -> NewTurn {
    NewTurn {
        customer_id: customer_id.to_string(),
        session_id,
        user_message: format!("question {}", ordinal + 1),
        assistant_reply: format!("answer {}", ordinal + 1),
        response_time_ms: Some(250),
        created_at: base + Duration::seconds(ordinal),
    }
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_until(timeout: std::time::Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached within {:?}", timeout);
}
