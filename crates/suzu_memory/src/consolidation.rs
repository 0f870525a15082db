//! Consolidation: fold the oldest slice of working history into an episodic
//! summary, then maybe evolve traits and impressions.
//!
//! Evolution is the expensive part, so it runs behind a pity gate: each
//! consolidation that skips evolution raises the odds for the next one, and
//! a triggered evolution resets the counter. The summarizer itself can also
//! demand evolution when it saw something significant.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use serde_json::Value;
use suzu_core::{
    raw_fallback_text, ChatMessage, DecisionOracle, EpisodicSummary, MemoryConfig, OracleOptions,
    PersonaSessionId,
};

use crate::evolution::{evolve_impressions, evolve_traits};
use crate::store::MemoryStore;

/// Sentinel summary meaning "nothing worth remembering in this window".
const SKIP_SENTINEL: &str = "SKIP";

/// Probability that a consolidation pass triggers evolution, given the pity
/// counter value after this pass. Low and flat early, ramping steeply after
/// eight dry passes, certain from the thirteenth.
pub fn evolution_chance(pity: u32) -> f64 {
    if pity <= 8 {
        0.05
    } else if pity <= 12 {
        0.05 + (pity - 8) as f64 * 0.2
    } else {
        1.0
    }
}

pub struct ConsolidationEngine {
    store: Arc<MemoryStore>,
    oracle: Arc<dyn DecisionOracle>,
    config: MemoryConfig,
    in_flight: Mutex<HashSet<PersonaSessionId>>,
    roll: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl ConsolidationEngine {
    pub fn new(store: Arc<MemoryStore>, oracle: Arc<dyn DecisionOracle>) -> Self {
        let config = store.config().clone();
        Self {
            store,
            oracle,
            config,
            in_flight: Mutex::new(HashSet::new()),
            roll: Box::new(rand::random::<f64>),
        }
    }

    /// Replace the evolution-gate randomness, for deterministic tests.
    pub fn with_roll(mut self, roll: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.roll = Box::new(roll);
        self
    }

    /// Consolidate in the background if the backlog crossed the watermark.
    /// Returns whether a pass was started. At most one pass per persona
    /// session runs at a time; overlapping triggers are dropped.
    pub async fn maybe_consolidate(
        self: &Arc<Self>,
        id: &PersonaSessionId,
        is_group: bool,
    ) -> bool {
        if self.store.unconsolidated_count(id).await < self.config.high_watermark {
            return false;
        }
        if !self.claim(id).await {
            return false;
        }

        let window = self.store.oldest_window(id, self.config.summary_interval).await;
        if window.is_empty() {
            self.release(id).await;
            return false;
        }

        let engine = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            engine.run(&id, is_group, window, false).await;
            engine.release(&id).await;
        });
        true
    }

    /// Consolidate the entire backlog right now, evolution included. Used on
    /// explicit persona switches and shutdown.
    pub async fn force_consolidate(&self, id: &PersonaSessionId, is_group: bool) {
        if !self.claim(id).await {
            return;
        }
        let window = self.store.oldest_window(id, usize::MAX).await;
        if !window.is_empty() {
            self.run(id, is_group, window, true).await;
        }
        self.release(id).await;
    }

    async fn claim(&self, id: &PersonaSessionId) -> bool {
        self.in_flight.lock().await.insert(id.clone())
    }

    async fn release(&self, id: &PersonaSessionId) {
        self.in_flight.lock().await.remove(id);
    }

    async fn run(&self, id: &PersonaSessionId, is_group: bool, window: Vec<ChatMessage>, force: bool) {
        let transcript = window
            .iter()
            .map(ChatMessage::transcript_line)
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Summarize the following conversation excerpt into one concise \
             episodic memory, written from the agent's point of view. If the \
             excerpt contains nothing worth remembering, answer with the \
             single word {SKIP_SENTINEL}. Set trigger_evolution to true only \
             if the excerpt reveals something significant about the people \
             involved.\n\n{transcript}"
        );

        let response = self
            .oracle
            .complete_json(
                &prompt,
                r#"{"summary": "...", "trigger_evolution": false}"#,
                OracleOptions::default(),
            )
            .await;
        let value = match response {
            Ok(v) => v,
            Err(e) => {
                // Backlog stays put; the next watermark crossing retries.
                tracing::warn!("consolidation summary for {id} failed: {e}");
                return;
            }
        };

        let time_range = format!(
            "{} to {}",
            window[0].timestamp.format("%Y-%m-%d %H:%M"),
            window[window.len() - 1].timestamp.format("%Y-%m-%d %H:%M"),
        );

        let mut ai_wants_evolution = false;
        if let Some(raw) = raw_fallback_text(&value) {
            // Unparseable output is still a summary of sorts. Keep it.
            self.store
                .append_episode(
                    id,
                    EpisodicSummary {
                        summary: raw.to_string(),
                        time_range,
                    },
                )
                .await;
        } else {
            let summary = value
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string();
            ai_wants_evolution = value
                .get("trigger_evolution")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if summary.is_empty() || summary.to_uppercase().contains(SKIP_SENTINEL) {
                tracing::debug!("consolidation window for {id} judged not memorable");
            } else {
                self.store
                    .append_episode(id, EpisodicSummary { summary, time_range })
                    .await;
            }
        }

        let pity = self.store.increment_pity(id).await;
        let chance = evolution_chance(pity);
        let triggered = force || ai_wants_evolution || (self.roll)() < chance;
        tracing::debug!(
            "consolidated {} messages for {id} (pity {pity}, chance {chance:.2}, evolution {triggered})",
            window.len()
        );
        if triggered {
            tokio::join!(
                evolve_traits(&self.store, self.oracle.as_ref(), id, &window),
                evolve_impressions(&self.store, self.oracle.as_ref(), id, &window, is_group),
            );
            self.store.reset_pity(id).await;
        }

        self.store.shrink_history(id, window.len()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::NullRepository;
    use crate::testutil::ScriptedOracle;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;
    use suzu_core::{MemoryConfig, PersonaConfig, SessionId};

    fn small_config() -> MemoryConfig {
        MemoryConfig {
            high_watermark: 6,
            summary_interval: 4,
            ..MemoryConfig::default()
        }
    }

    fn pid() -> PersonaSessionId {
        PersonaSessionId::new(SessionId::from("10001"), "default")
    }

    async fn filled_store(config: MemoryConfig, n: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(
            Arc::new(NullRepository),
            config,
            PersonaConfig::default(),
        ));
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        for i in 0..n {
            store
                .record_message(
                    &pid(),
                    suzu_core::ChatMessage::user(
                        "42",
                        "mio",
                        format!("m{i}"),
                        base + ChronoDuration::seconds(i as i64),
                    ),
                )
                .await;
        }
        store
    }

    async fn wait_until_backlog(store: &MemoryStore, id: &PersonaSessionId, expected: usize) {
        for _ in 0..200 {
            if store.unconsolidated_count(id).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("backlog never reached {expected}");
    }

    #[test]
    fn test_evolution_chance_curve() {
        assert!((evolution_chance(0) - 0.05).abs() < 1e-9);
        assert!((evolution_chance(8) - 0.05).abs() < 1e-9);
        assert!((evolution_chance(9) - 0.25).abs() < 1e-9);
        assert!((evolution_chance(12) - 0.85).abs() < 1e-9);
        assert_eq!(evolution_chance(13), 1.0);
        assert_eq!(evolution_chance(100), 1.0);
    }

    proptest::proptest! {
        #[test]
        fn test_evolution_chance_bounded_and_monotone(pity in 0u32..64) {
            let chance = evolution_chance(pity);
            proptest::prop_assert!((0.0..=1.0).contains(&chance));
            proptest::prop_assert!(evolution_chance(pity + 1) >= chance);
        }
    }

    #[tokio::test]
    async fn test_below_watermark_does_nothing() {
        let store = filled_store(small_config(), 5).await;
        let oracle = Arc::new(ScriptedOracle::with(vec![]));
        let engine = Arc::new(ConsolidationEngine::new(store, oracle.clone()));
        assert!(!engine.maybe_consolidate(&pid(), false).await);
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_watermark_pass_summarizes_and_shrinks() {
        let store = filled_store(small_config(), 7).await;
        let oracle = Arc::new(ScriptedOracle::with(vec![Ok(
            json!({"summary": "mio talked about m0..m3", "trigger_evolution": false}),
        )]));
        let engine = Arc::new(
            ConsolidationEngine::new(store.clone(), oracle.clone()).with_roll(|| 0.99),
        );

        assert!(engine.maybe_consolidate(&pid(), false).await);
        // Second trigger while the first pass is in flight is dropped.
        assert!(!engine.maybe_consolidate(&pid(), false).await);

        wait_until_backlog(&store, &pid(), 3).await;
        let episodes = store.episodes(&pid()).await;
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].time_range.contains("2024-05-01"));
        assert_eq!(store.oldest_window(&pid(), 1).await[0].text, "m4");
        // Dry pass: pity advanced, no evolution calls beyond the summary.
        assert_eq!(oracle.call_count(), 1);
        assert_eq!(store.increment_pity(&pid()).await, 2);
    }

    #[tokio::test]
    async fn test_skip_sentinel_drops_episode_but_still_shrinks() {
        let store = filled_store(small_config(), 7).await;
        let oracle = Arc::new(ScriptedOracle::with(vec![Ok(
            json!({"summary": "SKIP", "trigger_evolution": false}),
        )]));
        let engine =
            Arc::new(ConsolidationEngine::new(store.clone(), oracle).with_roll(|| 0.99));

        assert!(engine.maybe_consolidate(&pid(), false).await);
        wait_until_backlog(&store, &pid(), 3).await;
        assert!(store.episodes(&pid()).await.is_empty());
    }

    #[tokio::test]
    async fn test_skip_sentinel_is_case_insensitive_substring() {
        // Models restate the sentinel in their own casing or wrap it in a
        // sentence; any mention of it means "nothing worth keeping".
        for verdict in ["skip", "Skip: nothing notable happened."] {
            let store = filled_store(small_config(), 7).await;
            let oracle = Arc::new(ScriptedOracle::with(vec![Ok(
                json!({"summary": verdict, "trigger_evolution": false}),
            )]));
            let engine =
                Arc::new(ConsolidationEngine::new(store.clone(), oracle).with_roll(|| 0.99));

            assert!(engine.maybe_consolidate(&pid(), false).await);
            wait_until_backlog(&store, &pid(), 3).await;
            assert!(
                store.episodes(&pid()).await.is_empty(),
                "summary {verdict:?} should not be stored"
            );
        }
    }

    #[tokio::test]
    async fn test_raw_fallback_is_kept_verbatim() {
        let store = filled_store(small_config(), 7).await;
        let oracle = Arc::new(ScriptedOracle::with(vec![Ok(
            json!({"raw_content": "mio: climbing gym chatter"}),
        )]));
        let engine =
            Arc::new(ConsolidationEngine::new(store.clone(), oracle).with_roll(|| 0.99));

        assert!(engine.maybe_consolidate(&pid(), false).await);
        wait_until_backlog(&store, &pid(), 3).await;
        let episodes = store.episodes(&pid()).await;
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].summary, "mio: climbing gym chatter");
    }

    #[tokio::test]
    async fn test_summary_failure_leaves_backlog_intact() {
        let store = filled_store(small_config(), 7).await;
        let oracle = Arc::new(ScriptedOracle::with(vec![Err(
            suzu_core::CoreError::OracleTimeout(Duration::from_secs(30)),
        )]));
        let engine =
            Arc::new(ConsolidationEngine::new(store.clone(), oracle.clone()).with_roll(|| 0.99));

        assert!(engine.maybe_consolidate(&pid(), false).await);
        // Give the spawned pass time to fail.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if oracle.call_count() == 1 {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.unconsolidated_count(&pid()).await, 7);
        assert!(store.episodes(&pid()).await.is_empty());

        // The claim was released, so the next trigger runs again.
        assert!(engine.maybe_consolidate(&pid(), false).await);
    }

    #[tokio::test]
    async fn test_evolution_gate_roll_and_reset() {
        let store = filled_store(small_config(), 7).await;
        let oracle = Arc::new(ScriptedOracle::with_keyed(vec![
            ("summary", Ok(json!({"summary": "first window", "trigger_evolution": false}))),
            ("new_traits", Ok(json!({"new_traits": ["chatty"]}))),
            ("new_impressions", Ok(json!({"new_impressions": ["likes climbing"]}))),
        ]));
        // Roll under the 0.05 base chance: evolution fires on a dry summary.
        let engine = Arc::new(
            ConsolidationEngine::new(store.clone(), oracle.clone()).with_roll(|| 0.01),
        );

        assert!(engine.maybe_consolidate(&pid(), false).await);
        wait_until_backlog(&store, &pid(), 3).await;
        assert_eq!(oracle.call_count(), 3);
        assert_eq!(store.traits(&pid()).await, vec!["chatty".to_string()]);
        assert_eq!(store.impressions(&pid()).await, vec!["likes climbing".to_string()]);
        // Pity was reset by the triggered evolution.
        assert_eq!(store.increment_pity(&pid()).await, 1);
    }

    #[tokio::test]
    async fn test_force_consolidate_takes_whole_backlog_and_evolves() {
        let store = filled_store(small_config(), 7).await;
        let oracle = Arc::new(ScriptedOracle::with_keyed(vec![
            ("summary", Ok(json!({"summary": "everything so far", "trigger_evolution": false}))),
            ("new_traits", Ok(json!({"new_traits": []}))),
            ("new_impressions", Ok(json!({"new_impressions": []}))),
        ]));
        let engine =
            Arc::new(ConsolidationEngine::new(store.clone(), oracle.clone()).with_roll(|| 0.99));

        engine.force_consolidate(&pid(), false).await;
        assert_eq!(store.unconsolidated_count(&pid()).await, 0);
        assert!(store.history_window(&pid(), 10).await.is_empty());
        assert_eq!(store.episodes(&pid()).await.len(), 1);
        // Forced passes always evolve, roll notwithstanding.
        assert_eq!(oracle.call_count(), 3);
    }
}
