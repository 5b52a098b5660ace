use flume::{bounded, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::database::NewTurn;
use crate::utils::error::MemoryError;

use super::clock::Clock;
use super::manager::{MemoryStore, SummaryProvider};
use super::policy;

/// Background work detached from the request path. Turn persistence and
/// summary compaction both run here so neither blocks a caller.
#[derive(Debug)]
pub enum MemoryJob {
    RecordTurn {
        turn: NewTurn,
    },
    Compact {
        customer_id: String,
        session_id: Uuid,
        /// Watermark to persist with the new summary: `turn_count - 1` at the
        /// trigger, 0 for catch-up jobs on expired short sessions.
        watermark: i64,
    },
}

/// Bounded queue with a fixed worker pool. Enqueueing never blocks; when the
/// queue is full the job is dropped with a warning (memory is best-effort).
pub struct MemoryTaskQueue {
    sender: Sender<MemoryJob>,
}

impl MemoryTaskQueue {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        summarizer: Arc<dyn SummaryProvider>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing memory task queue: capacity={}, workers={}",
            config.queue_capacity, config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let store = store.clone();
            let summarizer = summarizer.clone();
            let clock = clock.clone();
            let sender = sender.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                worker_loop(worker_id, store, summarizer, clock, sender, receiver, config).await;
            });
        }

        Self { sender }
    }

    pub fn enqueue(&self, job: MemoryJob) {
        if let Err(e) = self.sender.try_send(job) {
            warn!("Failed to enqueue memory job (queue full?): {}", e);
        }
    }

    /// Queue statistics (for monitoring)
    pub fn queue_len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_queue_full(&self) -> bool {
        self.sender.is_full()
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn MemoryStore>,
    summarizer: Arc<dyn SummaryProvider>,
    clock: Arc<dyn Clock>,
    sender: Sender<MemoryJob>,
    receiver: Receiver<MemoryJob>,
    config: MemoryConfig,
) {
    info!("Memory worker {} started", worker_id);

    while let Ok(job) = receiver.recv_async().await {
        match job {
            MemoryJob::RecordTurn { turn } => {
                handle_record(&store, &sender, &config, turn).await;
            }
            MemoryJob::Compact {
                customer_id,
                session_id,
                watermark,
            } => {
                // Best-effort: a failed compaction leaves the previous
                // summary and watermark untouched and is retried at the
                // next trigger.
                if let Err(e) = run_compaction(
                    store.as_ref(),
                    summarizer.as_ref(),
                    clock.as_ref(),
                    &config,
                    &customer_id,
                    session_id,
                    watermark,
                )
                .await
                {
                    warn!("Compaction failed for {}: {}", customer_id, e);
                }
            }
        }
    }

    info!("Memory worker {} shutting down (channel closed)", worker_id);
}

/// Persist one turn; failures are logged and swallowed (the caller already
/// answered). A successful append evaluates the compaction trigger.
async fn handle_record(
    store: &Arc<dyn MemoryStore>,
    sender: &Sender<MemoryJob>,
    config: &MemoryConfig,
    turn: NewTurn,
) {
    match store.append_turn(&turn).await {
        Ok(turn_count) => {
            debug!(
                "Turn persisted for {} (session {}, count {})",
                turn.customer_id, turn.session_id, turn_count
            );

            if policy::should_compact(turn_count, config) {
                let job = MemoryJob::Compact {
                    customer_id: turn.customer_id.clone(),
                    session_id: turn.session_id,
                    watermark: turn_count - 1,
                };
                if sender.try_send(job).is_err() {
                    warn!(
                        "Dropping compaction for {} (queue full); next trigger will fold more turns",
                        turn.customer_id
                    );
                }
            }
        }
        Err(e) => {
            warn!("Failed to persist turn for {}: {}", turn.customer_id, e);
        }
    }
}

/// Fold the session's turns into the long-term summary.
///
/// The persisted update is gated on watermark monotonicity in the store, so
/// two racing compactions settle on the newer watermark regardless of
/// completion order.
pub(crate) async fn run_compaction(
    store: &dyn MemoryStore,
    summarizer: &dyn SummaryProvider,
    clock: &dyn Clock,
    config: &MemoryConfig,
    customer_id: &str,
    session_id: Uuid,
    watermark: i64,
) -> Result<(), MemoryError> {
    let turns = store.load_session_turns(customer_id, session_id).await?;

    if turns.is_empty() {
        debug!("No turns to compact for {} in {}", customer_id, session_id);
        return Ok(());
    }

    // Live triggers re-check the threshold; catch-up jobs for expired short
    // sessions (watermark 0) exist precisely because it was never reached.
    if watermark > 0 && (turns.len() as i64) < config.summarization_threshold {
        debug!(
            "Skipping compaction for {}: {} turns below threshold",
            customer_id,
            turns.len()
        );
        return Ok(());
    }

    let existing = store
        .load_snapshot(customer_id)
        .await?
        .and_then(|snapshot| snapshot.summary);

    let new_summary = match existing {
        Some(existing) => {
            debug!("Updating existing summary for {}", customer_id);
            summarizer.update_summary(&existing, &turns).await?
        }
        None => {
            debug!("Creating first summary for {}", customer_id);
            summarizer.summarize(&turns).await?
        }
    };

    let applied = store
        .persist_summary(customer_id, &new_summary, watermark, clock.now())
        .await?;

    if applied {
        info!(
            "Summary updated for {} (watermark {}, {} chars)",
            customer_id,
            watermark,
            new_summary.len()
        );
    } else {
        debug!(
            "Skipped stale summary for {} (watermark {} behind current)",
            customer_id, watermark
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::manager::MockSummaryProvider;
    use crate::services::memory::test_support::{seeded_turn, FixedClock, InMemoryStore};
    use chrono::{TimeZone, Utc};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn seeded_store(turn_count: usize, session: Uuid) -> InMemoryStore {
        let store = InMemoryStore::default();
        for i in 0..turn_count {
            store.seed(seeded_turn("cust-1", session, i as i64, now()));
        }
        store
    }

    async fn compact(
        store: &InMemoryStore,
        summarizer: &MockSummaryProvider,
        session: Uuid,
        watermark: i64,
    ) -> Result<(), MemoryError> {
        run_compaction(
            store,
            summarizer,
            &FixedClock(now()),
            &MemoryConfig::default(),
            "cust-1",
            session,
            watermark,
        )
        .await
    }

    #[tokio::test]
    async fn first_compaction_sets_summary_and_watermark() {
        let session = Uuid::new_v4();
        let store = seeded_store(6, session);

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_summarize()
            .returning(|_| Ok("first summary".to_string()));

        compact(&store, &summarizer, session, 5).await.unwrap();

        assert_eq!(store.summary(), Some("first summary".to_string()));
        assert_eq!(store.watermark(), 5);
    }

    #[tokio::test]
    async fn later_compaction_merges_into_existing_summary() {
        let session = Uuid::new_v4();
        let store = seeded_store(11, session);
        store.set_summary("first summary", 5);

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_update_summary()
            .returning(|existing, _| Ok(format!("{} + more", existing)));

        compact(&store, &summarizer, session, 10).await.unwrap();

        assert_eq!(store.summary(), Some("first summary + more".to_string()));
        assert_eq!(store.watermark(), 10);
    }

    #[tokio::test]
    async fn stale_compaction_never_regresses_watermark() {
        let session = Uuid::new_v4();
        let store = seeded_store(11, session);

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_summarize()
            .returning(|_| Ok("newer summary".to_string()));
        summarizer
            .expect_update_summary()
            .returning(|_, _| Ok("stale summary".to_string()));

        // Newer compaction completes first, the stale one second
        compact(&store, &summarizer, session, 10).await.unwrap();
        compact(&store, &summarizer, session, 5).await.unwrap();

        assert_eq!(store.watermark(), 10);
        assert_eq!(store.summary(), Some("newer summary".to_string()));
    }

    #[tokio::test]
    async fn racing_compactions_settle_on_newest_watermark_in_either_order() {
        let session = Uuid::new_v4();
        let store = seeded_store(11, session);

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_summarize()
            .returning(|_| Ok("summary".to_string()));
        summarizer
            .expect_update_summary()
            .returning(|_, _| Ok("merged summary".to_string()));

        compact(&store, &summarizer, session, 5).await.unwrap();
        compact(&store, &summarizer, session, 10).await.unwrap();

        assert_eq!(store.watermark(), 10);
    }

    #[tokio::test]
    async fn failed_summarization_leaves_profile_untouched() {
        let session = Uuid::new_v4();
        let store = seeded_store(11, session);
        store.set_summary("old summary", 5);

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_update_summary()
            .returning(|_, _| Err(MemoryError::Summarization("upstream down".to_string())));

        let result = compact(&store, &summarizer, session, 10).await;

        assert!(result.is_err());
        assert_eq!(store.summary(), Some("old summary".to_string()));
        assert_eq!(store.watermark(), 5);
    }

    #[tokio::test]
    async fn stale_session_catchup_compacts_below_threshold() {
        let session = Uuid::new_v4();
        let store = seeded_store(3, session);

        let mut summarizer = MockSummaryProvider::new();
        summarizer
            .expect_summarize()
            .returning(|_| Ok("catch-up".to_string()));

        compact(&store, &summarizer, session, 0).await.unwrap();

        assert_eq!(store.summary(), Some("catch-up".to_string()));
        assert_eq!(store.watermark(), 0);
    }

    #[tokio::test]
    async fn live_compaction_below_threshold_is_skipped() {
        let session = Uuid::new_v4();
        let store = seeded_store(3, session);

        // No expectations: any summarizer call would panic the test
        let summarizer = MockSummaryProvider::new();

        compact(&store, &summarizer, session, 2).await.unwrap();

        assert_eq!(store.summary(), None);
    }
}
