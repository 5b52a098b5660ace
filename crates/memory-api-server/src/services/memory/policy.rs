use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::MemoryConfig;

use super::types::{RetrievalPlan, SessionState};

/// Map session state to a retrieval plan. Pure: the fresh session id is
/// supplied by the caller so repeated calls over the same state are
/// deterministic apart from that id.
pub fn plan(
    state: &SessionState,
    now: DateTime<Utc>,
    fresh_session_id: Uuid,
    config: &MemoryConfig,
) -> RetrievalPlan {
    match state {
        SessionState::NoHistory => RetrievalPlan {
            session_id: fresh_session_id,
            fetch_from: None,
            turns_to_fetch: 0,
            include_summary: false,
            summary_text: None,
            schedule_compaction: None,
        },

        SessionState::Expired {
            previous_session_id,
            previous_turn_count,
            summary,
            total_conversations,
            last_interaction,
        } => {
            let summary_text = format_customer_summary(
                summary.as_deref(),
                *total_conversations,
                *last_interaction,
                now,
            );

            if *previous_turn_count <= config.max_recent_turns as i64 {
                // Short session: its turns never reached the summarization
                // threshold, so they carry across the boundary and the stale
                // session gets a catch-up compaction.
                RetrievalPlan {
                    session_id: fresh_session_id,
                    fetch_from: Some(*previous_session_id),
                    turns_to_fetch: (*previous_turn_count as usize).min(config.max_recent_turns),
                    include_summary: summary.is_some(),
                    summary_text,
                    schedule_compaction: Some(*previous_session_id),
                }
            } else {
                // Long session: everything worth keeping is already folded
                // into the summary.
                RetrievalPlan {
                    session_id: fresh_session_id,
                    fetch_from: None,
                    turns_to_fetch: 0,
                    include_summary: true,
                    summary_text,
                    schedule_compaction: None,
                }
            }
        }

        SessionState::Active {
            session_id,
            turn_count,
            last_summary_turn,
            summary,
            total_conversations,
            last_interaction,
        } => {
            if *turn_count < config.summarization_threshold {
                // Pure recency, no compaction pressure yet
                return RetrievalPlan {
                    session_id: *session_id,
                    fetch_from: Some(*session_id),
                    turns_to_fetch: (*turn_count as usize).min(config.max_recent_turns),
                    include_summary: false,
                    summary_text: None,
                    schedule_compaction: None,
                };
            }

            // Hybrid mode: summary plus the turns appended since the last
            // compaction trigger (the watermark names the last turn covered,
            // one before the trigger turn).
            let since_summary = (*turn_count - *last_summary_turn - 1).max(0) as usize;

            let turns_to_fetch =
                if *turn_count == config.summarization_threshold && since_summary == 0 {
                    // First compaction just landed: keep the opening turns
                    // visible so the plan at this turn count is stable across
                    // the landing.
                    config.max_recent_turns
                } else {
                    since_summary.min(config.max_recent_turns)
                };

            RetrievalPlan {
                session_id: *session_id,
                fetch_from: Some(*session_id),
                turns_to_fetch,
                include_summary: true,
                summary_text: format_customer_summary(
                    summary.as_deref(),
                    *total_conversations,
                    *last_interaction,
                    now,
                ),
                schedule_compaction: None,
            }
        }
    }
}

/// First compaction at the threshold turn, then one every interval:
/// 6, 11, 16, 21, ... with the defaults. Keeps the un-summarized window in
/// hybrid mode bounded by the interval.
pub fn should_compact(turn_count: i64, config: &MemoryConfig) -> bool {
    turn_count == config.summarization_threshold
        || (turn_count > config.summarization_threshold
            && (turn_count - config.summarization_threshold) % config.compaction_interval == 0)
}

/// Prefix the stored summary with recency context. Returns None for the
/// "no summary yet" sentinel.
pub fn format_customer_summary(
    summary: Option<&str>,
    total_conversations: i64,
    last_interaction: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<String> {
    let summary = summary.filter(|s| !s.is_empty())?;

    let gap = now.signed_duration_since(last_interaction);

    let intro = if gap.num_seconds() > 86_400 {
        let days_ago = gap.num_days().max(1);
        format!(
            "Returning customer (last seen {} days ago, {} total conversations):\n\n",
            days_ago, total_conversations
        )
    } else {
        format!(
            "Active customer ({} conversations today):\n\n",
            total_conversations
        )
    };

    Some(format!("{}{}", intro, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn active(
        turn_count: i64,
        last_summary_turn: i64,
        summary: Option<&str>,
    ) -> (SessionState, Uuid) {
        let session_id = Uuid::new_v4();
        let state = SessionState::Active {
            session_id,
            turn_count,
            last_summary_turn,
            summary: summary.map(|s| s.to_string()),
            total_conversations: turn_count,
            last_interaction: now() - Duration::minutes(5),
        };
        (state, session_id)
    }

    fn expired(previous_turn_count: i64, summary: Option<&str>) -> (SessionState, Uuid) {
        let previous_session_id = Uuid::new_v4();
        let state = SessionState::Expired {
            previous_session_id,
            previous_turn_count,
            summary: summary.map(|s| s.to_string()),
            total_conversations: previous_turn_count,
            last_interaction: now() - Duration::days(3),
        };
        (state, previous_session_id)
    }

    fn cfg() -> MemoryConfig {
        MemoryConfig::default()
    }

    #[test]
    fn no_history_yields_fresh_empty_plan() {
        let fresh = Uuid::new_v4();
        let p = plan(&SessionState::NoHistory, now(), fresh, &cfg());

        assert_eq!(p.session_id, fresh);
        assert_eq!(p.turns_to_fetch, 0);
        assert!(p.fetch_from.is_none());
        assert!(!p.include_summary);
        assert!(p.summary_text.is_none());
        assert!(p.schedule_compaction.is_none());
    }

    #[test]
    fn active_under_threshold_fetches_all_turns_without_summary() {
        for count in 1..=5 {
            let (state, session_id) = active(count, 0, Some("notes"));
            let p = plan(&state, now(), Uuid::new_v4(), &cfg());

            assert_eq!(p.session_id, session_id);
            assert_eq!(p.fetch_from, Some(session_id));
            assert_eq!(p.turns_to_fetch, count as usize);
            assert!(!p.include_summary);
            assert!(p.summary_text.is_none());
        }
    }

    #[test]
    fn fetch_window_never_exceeds_five() {
        for turn_count in 1..=60 {
            for watermark in 0..turn_count {
                let (state, _) = active(turn_count, watermark, Some("notes"));
                let p = plan(&state, now(), Uuid::new_v4(), &cfg());
                assert!(
                    p.turns_to_fetch <= 5,
                    "turn_count={} watermark={} fetched {}",
                    turn_count,
                    watermark,
                    p.turns_to_fetch
                );
            }
        }
    }

    #[test]
    fn turn_six_is_hybrid_before_first_compaction_lands() {
        let (state, _) = active(6, 0, None);
        let p = plan(&state, now(), Uuid::new_v4(), &cfg());

        assert!(p.include_summary);
        assert_eq!(p.turns_to_fetch, 5);
        // Sentinel: no summary text yet even though the mode is hybrid
        assert!(p.summary_text.is_none());
    }

    #[test]
    fn turn_six_plan_is_stable_after_first_compaction_lands() {
        let (state, _) = active(6, 5, Some("notes"));
        let p = plan(&state, now(), Uuid::new_v4(), &cfg());

        assert!(p.include_summary);
        assert_eq!(p.turns_to_fetch, 5);
        assert!(p.summary_text.is_some());
    }

    #[test]
    fn hybrid_window_tracks_turns_since_compaction() {
        // watermark 5 set by the turn-6 compaction
        let cases: [(i64, i64, usize); 4] = [(7, 5, 1), (8, 5, 2), (10, 5, 4), (11, 5, 5)];
        for (turn_count, watermark, expected) in cases {
            let (state, _) = active(turn_count, watermark, Some("notes"));
            let p = plan(&state, now(), Uuid::new_v4(), &cfg());
            assert_eq!(
                p.turns_to_fetch, expected,
                "turn_count={} watermark={}",
                turn_count, watermark
            );
            assert!(p.include_summary);
        }
    }

    #[test]
    fn hybrid_window_resets_after_each_compaction() {
        // Compaction at turn 11 moved the watermark to 10
        let (state, _) = active(11, 10, Some("notes"));
        let p = plan(&state, now(), Uuid::new_v4(), &cfg());
        assert_eq!(p.turns_to_fetch, 0);

        let (state, _) = active(12, 10, Some("notes"));
        let p = plan(&state, now(), Uuid::new_v4(), &cfg());
        assert_eq!(p.turns_to_fetch, 1);
    }

    #[test]
    fn expired_short_session_carries_turns_and_schedules_compaction() {
        let (state, previous_id) = expired(3, Some("notes"));
        let fresh = Uuid::new_v4();
        let p = plan(&state, now(), fresh, &cfg());

        assert_eq!(p.session_id, fresh);
        assert_eq!(p.fetch_from, Some(previous_id));
        assert_eq!(p.turns_to_fetch, 3);
        assert!(p.include_summary);
        assert!(p.summary_text.is_some());
        assert_eq!(p.schedule_compaction, Some(previous_id));
    }

    #[test]
    fn expired_short_session_without_summary_skips_summary() {
        let (state, previous_id) = expired(2, None);
        let p = plan(&state, now(), Uuid::new_v4(), &cfg());

        assert_eq!(p.turns_to_fetch, 2);
        assert!(!p.include_summary);
        assert!(p.summary_text.is_none());
        assert_eq!(p.schedule_compaction, Some(previous_id));
    }

    #[test]
    fn expired_long_session_is_summary_only() {
        let (state, _) = expired(8, Some("notes"));
        let fresh = Uuid::new_v4();
        let p = plan(&state, now(), fresh, &cfg());

        assert_eq!(p.session_id, fresh);
        assert!(p.fetch_from.is_none());
        assert_eq!(p.turns_to_fetch, 0);
        assert!(p.include_summary);
        assert!(p.summary_text.is_some());
        assert!(p.schedule_compaction.is_none());
    }

    #[test]
    fn compaction_fires_at_threshold_then_every_interval() {
        let config = cfg();
        let triggers: Vec<i64> = (1..=30).filter(|&n| should_compact(n, &config)).collect();
        assert_eq!(triggers, vec![6, 11, 16, 21, 26]);
    }

    #[test]
    fn summary_prefix_for_returning_customer_floors_days_at_one() {
        let last = now() - Duration::hours(30);
        let text = format_customer_summary(Some("prefers decaf"), 12, last, now()).unwrap();

        assert!(text.starts_with("Returning customer (last seen 1 days ago, 12 total conversations):"));
        assert!(text.ends_with("prefers decaf"));
    }

    #[test]
    fn summary_prefix_for_active_customer() {
        let last = now() - Duration::hours(2);
        let text = format_customer_summary(Some("asked about shipping"), 4, last, now()).unwrap();

        assert!(text.starts_with("Active customer (4 conversations today):"));
    }

    #[test]
    fn summary_sentinel_formats_to_none() {
        assert!(format_customer_summary(None, 9, now(), now()).is_none());
        assert!(format_customer_summary(Some(""), 9, now(), now()).is_none());
    }
}
