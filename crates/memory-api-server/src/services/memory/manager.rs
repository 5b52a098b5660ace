use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::database::{MemorySnapshot, NewTurn, TurnRow};
use crate::utils::error::MemoryError;

use super::clock::Clock;
use super::compactor::{MemoryJob, MemoryTaskQueue};
use super::policy;
use super::types::{MemoryContext, SessionState};

/// Durable history and profile access, as the memory core consumes it.
/// Implemented by `database::Repository`; in-memory fakes implement it in
/// tests.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn load_snapshot(&self, customer_id: &str)
        -> Result<Option<MemorySnapshot>, MemoryError>;

    async fn fetch_recent_turns(
        &self,
        customer_id: &str,
        session_id: Uuid,
        limit: usize,
    ) -> Result<Vec<TurnRow>, MemoryError>;

    async fn load_session_turns(
        &self,
        customer_id: &str,
        session_id: Uuid,
    ) -> Result<Vec<TurnRow>, MemoryError>;

    async fn append_turn(&self, turn: &NewTurn) -> Result<i64, MemoryError>;

    async fn persist_summary(
        &self,
        customer_id: &str,
        summary: &str,
        watermark: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, MemoryError>;
}

/// Summarization capability consumed by the compactor.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, turns: &[TurnRow]) -> Result<String, MemoryError>;

    async fn update_summary(
        &self,
        existing: &str,
        turns: &[TurnRow],
    ) -> Result<String, MemoryError>;
}

/// Classify the customer's session from one snapshot read.
pub fn resolve(
    snapshot: Option<MemorySnapshot>,
    now: DateTime<Utc>,
    session_timeout_hours: i64,
) -> SessionState {
    let Some(snap) = snapshot else {
        return SessionState::NoHistory;
    };

    // Profile fields can lag the turn log by one write; fall back to the
    // turn's own timestamp and zeroed counters.
    let last_interaction = snap.last_interaction.unwrap_or(snap.last_created_at);
    let total_conversations = snap.total_conversations.unwrap_or(0);

    let age = now.signed_duration_since(snap.last_created_at);

    if age > Duration::hours(session_timeout_hours) {
        SessionState::Expired {
            previous_session_id: snap.session_id,
            previous_turn_count: snap.session_turn_count,
            summary: snap.summary,
            total_conversations,
            last_interaction,
        }
    } else {
        SessionState::Active {
            session_id: snap.session_id,
            turn_count: snap.session_turn_count,
            last_summary_turn: snap.last_summary_turn.unwrap_or(0),
            summary: snap.summary,
            total_conversations,
            last_interaction,
        }
    }
}

pub fn generate_session_id() -> Uuid {
    Uuid::new_v4()
}

/// Entry point of the memory subsystem: synchronous context assembly on the
/// request path, fire-and-forget persistence and compaction off it.
pub struct MemoryManager {
    store: Arc<dyn MemoryStore>,
    queue: Arc<MemoryTaskQueue>,
    clock: Arc<dyn Clock>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        queue: Arc<MemoryTaskQueue>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            config,
        }
    }

    /// Resolve, plan and fetch the context for one incoming message.
    ///
    /// Memory is best-effort: any store failure degrades to the no-history
    /// context instead of failing the caller's turn.
    pub async fn get_context(&self, customer_id: &str) -> MemoryContext {
        match self.try_get_context(customer_id).await {
            Ok(context) => context,
            Err(e) => {
                warn!(
                    "Memory context failed for {}, degrading to empty: {}",
                    customer_id, e
                );
                MemoryContext::empty(generate_session_id())
            }
        }
    }

    async fn try_get_context(&self, customer_id: &str) -> Result<MemoryContext, MemoryError> {
        let now = self.clock.now();

        let snapshot = self.store.load_snapshot(customer_id).await?;
        let state = resolve(snapshot, now, self.config.session_timeout_hours);
        let plan = policy::plan(&state, now, generate_session_id(), &self.config);

        if let Some(stale_session) = plan.schedule_compaction {
            // The expired session never reached the summarization threshold;
            // fold it into the long-term summary in the background.
            self.queue.enqueue(MemoryJob::Compact {
                customer_id: customer_id.to_string(),
                session_id: stale_session,
                watermark: 0,
            });
        }

        let turns = match (plan.fetch_from, plan.turns_to_fetch) {
            (Some(session), n) if n > 0 => {
                self.store
                    .fetch_recent_turns(customer_id, session, n)
                    .await?
            }
            _ => Vec::new(),
        };

        debug!(
            "Context for {}: {} turns, hybrid={}, session={}",
            customer_id,
            turns.len(),
            plan.include_summary,
            plan.session_id
        );

        Ok(MemoryContext {
            turns,
            session_id: plan.session_id,
            summary: plan.summary_text,
            use_hybrid: plan.include_summary,
        })
    }

    /// Record a completed turn. Non-blocking: the append (and any compaction
    /// it triggers) happens on the worker pool; a full queue drops the turn
    /// with a warning.
    pub fn record_turn(
        &self,
        customer_id: &str,
        session_id: Uuid,
        user_message: String,
        assistant_reply: String,
        response_time_ms: Option<i32>,
    ) {
        let turn = NewTurn {
            customer_id: customer_id.to_string(),
            session_id,
            user_message,
            assistant_reply,
            response_time_ms,
            created_at: self.clock.now(),
        };

        self.queue.enqueue(MemoryJob::RecordTurn { turn });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::test_support::{
        seeded_turn, wait_until, FailingStore, FixedClock, InMemoryStore,
    };
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn snapshot(age_hours: i64, turn_count: i64) -> MemorySnapshot {
        MemorySnapshot {
            session_id: Uuid::new_v4(),
            last_created_at: now() - Duration::hours(age_hours),
            session_turn_count: turn_count,
            summary: Some("notes".to_string()),
            total_conversations: Some(turn_count),
            last_summary_turn: Some(0),
            last_interaction: Some(now() - Duration::hours(age_hours)),
        }
    }

    #[test]
    fn resolve_no_snapshot_is_no_history() {
        assert_eq!(resolve(None, now(), 24), SessionState::NoHistory);
    }

    #[test]
    fn resolve_recent_turn_is_active() {
        let state = resolve(Some(snapshot(2, 4)), now(), 24);
        match state {
            SessionState::Active { turn_count, .. } => assert_eq!(turn_count, 4),
            other => panic!("expected Active, got {:?}", other),
        }
    }

    #[test]
    fn resolve_old_turn_is_expired() {
        let state = resolve(Some(snapshot(25, 4)), now(), 24);
        match state {
            SessionState::Expired {
                previous_turn_count,
                ..
            } => assert_eq!(previous_turn_count, 4),
            other => panic!("expected Expired, got {:?}", other),
        }
    }

    #[test]
    fn resolve_missing_profile_defaults_to_zeroes() {
        let snap = MemorySnapshot {
            session_id: Uuid::new_v4(),
            last_created_at: now() - Duration::minutes(1),
            session_turn_count: 1,
            summary: None,
            total_conversations: None,
            last_summary_turn: None,
            last_interaction: None,
        };
        match resolve(Some(snap), now(), 24) {
            SessionState::Active {
                last_summary_turn,
                total_conversations,
                ..
            } => {
                assert_eq!(last_summary_turn, 0);
                assert_eq!(total_conversations, 0);
            }
            other => panic!("expected Active, got {:?}", other),
        }
    }

    fn build_manager(store: Arc<dyn MemoryStore>) -> MemoryManager {
        let summarizer = Arc::new(MockSummaryProvider::new());
        build_manager_with(store, summarizer)
    }

    fn build_manager_with(
        store: Arc<dyn MemoryStore>,
        summarizer: Arc<MockSummaryProvider>,
    ) -> MemoryManager {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(now()));
        let config = MemoryConfig::default();
        let queue = Arc::new(MemoryTaskQueue::new(
            store.clone(),
            summarizer,
            clock.clone(),
            config.clone(),
        ));
        MemoryManager::new(store, queue, clock, config)
    }

    #[tokio::test]
    async fn no_history_context_is_empty() {
        let store = Arc::new(InMemoryStore::default());
        let manager = build_manager(store);

        let context = manager.get_context("cust-1").await;

        assert!(context.turns.is_empty());
        assert!(context.summary.is_none());
        assert!(!context.use_hybrid);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty_context() {
        let manager = build_manager(Arc::new(FailingStore));

        let context = manager.get_context("cust-1").await;

        assert!(context.turns.is_empty());
        assert!(context.summary.is_none());
        assert!(!context.use_hybrid);
    }

    #[tokio::test]
    async fn repeated_get_context_returns_identical_plan() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        for i in 0..3 {
            store.seed(seeded_turn("cust-1", session, i, now()));
        }
        let manager = build_manager(store);

        let first = manager.get_context("cust-1").await;
        let second = manager.get_context("cust-1").await;

        assert_eq!(first.session_id, session);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.turns.len(), 3);
        assert_eq!(second.turns.len(), 3);
        assert!(!first.use_hybrid && !second.use_hybrid);
    }

    #[tokio::test]
    async fn record_turn_appends_and_triggers_first_compaction() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        for i in 0..5 {
            store.seed(seeded_turn("cust-1", session, i, now()));
        }

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_summarize()
            .returning(|_| Ok("fresh summary".to_string()));
        let manager = build_manager_with(store.clone(), Arc::new(summarizer));

        manager.record_turn(
            "cust-1",
            session,
            "sixth question".to_string(),
            "sixth answer".to_string(),
            Some(120),
        );

        wait_until(StdDuration::from_secs(2), || {
            store.summary() == Some("fresh summary".to_string())
        })
        .await;

        assert_eq!(store.turn_count(session), 6);
        assert_eq!(store.watermark(), 5);
    }

    #[tokio::test]
    async fn expired_short_session_schedules_background_compaction() {
        let store = Arc::new(InMemoryStore::default());
        let session = Uuid::new_v4();
        let old = now() - Duration::days(2);
        for i in 0..3 {
            store.seed(seeded_turn("cust-1", session, i, old));
        }

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_summarize()
            .returning(|_| Ok("catch-up summary".to_string()));
        let manager = build_manager_with(store.clone(), Arc::new(summarizer));

        let context = manager.get_context("cust-1").await;

        // Turns carry across the session boundary under a fresh session id
        assert_eq!(context.turns.len(), 3);
        assert_ne!(context.session_id, session);

        wait_until(StdDuration::from_secs(2), || {
            store.summary() == Some("catch-up summary".to_string())
        })
        .await;
        assert_eq!(store.watermark(), 0);
    }
}
