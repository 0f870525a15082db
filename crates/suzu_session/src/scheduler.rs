//! The attention state machine.
//!
//! One `SessionState` per conversation. Inbound messages either queue for a
//! running focus loop or (re)arm the debounce timer; a settled burst goes
//! through the entry decision, which may reply and may start the focus loop.
//! The focus loop wakes every micro interval, runs the macro re-evaluation on
//! its own cadence, and never drops a drained batch: any failure puts it back
//! at the front of the queue.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};

use suzu_core::{
    ChatMessage, InboundMessage, OutboundContent, ReplyGenerator, SessionId, SuzuConfig, Transport,
};
use suzu_memory::{ConsolidationEngine, MemoryStore, SocialEnergyModel};
use suzu_reasoning::{DecisionCycle, MicroAction};

use crate::state::{SessionEntry, SessionMode, SessionState};

/// Consecutive focus-loop failures after which the requeue loop starts
/// complaining loudly. The batch is still retried; see the focus loop.
const MICRO_FAILURE_ALERT: u32 = 3;

pub struct SessionScheduler {
    config: SuzuConfig,
    store: Arc<MemoryStore>,
    social: Arc<SocialEnergyModel>,
    cycle: Arc<DecisionCycle>,
    consolidation: Arc<ConsolidationEngine>,
    transport: Arc<dyn Transport>,
    replier: Arc<dyn ReplyGenerator>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
}

impl SessionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SuzuConfig,
        store: Arc<MemoryStore>,
        social: Arc<SocialEnergyModel>,
        cycle: Arc<DecisionCycle>,
        consolidation: Arc<ConsolidationEngine>,
        transport: Arc<dyn Transport>,
        replier: Arc<dyn ReplyGenerator>,
    ) -> Self {
        Self {
            config,
            store,
            social,
            cycle,
            consolidation,
            transport,
            replier,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn entry(&self, session: &SessionId, is_group: bool) -> Arc<SessionEntry> {
        {
            let sessions = self.sessions.read().await;
            if let Some(entry) = sessions.get(session) {
                return entry.clone();
            }
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session.clone())
            .or_insert_with(|| Arc::new(SessionEntry::new(is_group)))
            .clone()
    }

    /// Most recent decision for a session, for diagnostics.
    pub async fn last_decision(&self, session: &SessionId) -> Option<serde_json::Value> {
        let entry = {
            let sessions = self.sessions.read().await;
            sessions.get(session).cloned()
        };
        match entry {
            Some(entry) => entry.state.lock().await.last_decision.clone(),
            None => None,
        }
    }

    // ========================================================================
    // Inbound path
    // ========================================================================

    pub async fn on_message(
        self: &Arc<Self>,
        session: &SessionId,
        is_group: bool,
        msg: InboundMessage,
    ) {
        let entry = self.entry(session, is_group).await;
        let mut state = entry.state.lock().await;
        if !state.note_seen(&msg.message_id, self.config.interaction.dedup_capacity) {
            return;
        }

        if state.mode == SessionMode::Focused {
            // The focus loop owns this session; just record and queue.
            self.record_inbound(session, &msg, is_group).await;
            state.pending.push(msg);
            return;
        }

        if !is_group {
            self.record_inbound(session, &msg, is_group).await;
            state.pending.push(msg);
            self.arm_debounce(&mut state, session, is_group, false);
            return;
        }

        // Group gating: an explicit trigger or a warm focus window engages;
        // everything else is background noise that is only sampled.
        let triggered = msg.mentions_agent
            || msg
                .text
                .to_lowercase()
                .contains(&self.config.interaction.trigger_name.to_lowercase());
        let warm = state.in_focus_window(self.config.interaction.focus_window());
        let sampled = rand::random::<f64>() < self.config.interaction.passive_record_chance;

        if triggered || warm || sampled {
            self.record_inbound(session, &msg, is_group).await;
        } else {
            return;
        }

        if triggered || warm {
            if msg.mentions_agent {
                self.spawn_backfill(session, is_group);
            }
            state.pending.push(msg);
            self.arm_debounce(&mut state, session, is_group, false);
            return;
        }

        // Sampled background message: count toward the jump-in threshold.
        state.passive_count += 1;
        if state.passive_count >= self.config.interaction.passive_sample_threshold {
            tracing::info!("session {session} passive sampling threshold reached, auto-trigger");
            state.passive_count = 0;
            self.spawn_backfill(session, is_group);
            state.pending.push(msg);
            self.arm_debounce(&mut state, session, is_group, true);
        }
    }

    async fn record_inbound(&self, session: &SessionId, msg: &InboundMessage, is_group: bool) {
        let id = self.store.active_persona(session).await;
        self.store.record_message(&id, msg.to_chat_message()).await;
        self.consolidation.maybe_consolidate(&id, is_group).await;
    }

    /// Cancel-then-replace: the last armed timer wins, a cancelled timer
    /// never dispatches.
    fn arm_debounce(
        self: &Arc<Self>,
        state: &mut SessionState,
        session: &SessionId,
        is_group: bool,
        is_auto: bool,
    ) {
        state.cancel_debounce();
        state.mode = SessionMode::Debouncing;
        let wait = self.config.interaction.wait_window(is_group);
        let scheduler = Arc::clone(self);
        let session = session.clone();
        state.debounce = Some(tokio::spawn(async move {
            sleep(wait).await;
            // Detach so an abort landing after the timer fired cannot cancel
            // a decision mid-flight.
            tokio::spawn(async move {
                scheduler.process_settled(&session, is_group, is_auto).await;
            });
        }));
    }

    // ========================================================================
    // Entry decision processing
    // ========================================================================

    async fn process_settled(self: &Arc<Self>, session: &SessionId, is_group: bool, is_auto: bool) {
        let entry = self.entry(session, is_group).await;
        let batch = {
            let mut state = entry.state.lock().await;
            if state.deciding || state.mode == SessionMode::Focused {
                return;
            }
            let batch = state.take_pending();
            if batch.is_empty() {
                state.mode = SessionMode::Idle;
                return;
            }
            state.deciding = true;
            state.mode = SessionMode::Deciding;
            batch
        };

        let decision = self
            .cycle
            .entry_decision(session, &batch, is_group, is_auto)
            .await;
        {
            let mut state = entry.state.lock().await;
            state.last_decision = serde_json::to_value(&decision).ok();
        }

        // Reaction first: think-emoji while composing, plain ack otherwise.
        // A silent auto-trigger outcome sends nothing at all.
        let mut emoji_msg = None;
        if !(is_auto && !decision.reply) {
            let target = decision.emoji_id.unwrap_or(if decision.reply {
                self.config.interaction.emoji_think
            } else {
                self.config.interaction.emoji_ack
            });
            emoji_msg = self.send_emoji(session, is_group, target).await;
        }

        if decision.reply {
            let replied = self.send_reply(session, &batch, is_group).await;
            if replied {
                let mut state = entry.state.lock().await;
                state.last_interaction = Some(Instant::now());
                state.passive_count = 0;
            }
            if replied && decision.withdraw_emoji {
                self.withdraw(emoji_msg.take()).await;
            }
        }

        if decision.enter_focus {
            self.enter_focus(session, is_group).await;
        }

        let mut state = entry.state.lock().await;
        state.deciding = false;
        if state.mode != SessionMode::Focused {
            if state.pending.is_empty() {
                state.mode = SessionMode::Idle;
            } else {
                // A burst landed while deciding; treat it as a new one.
                self.arm_debounce(&mut state, session, is_group, false);
            }
        }
    }

    // ========================================================================
    // Focus mode
    // ========================================================================

    pub async fn enter_focus(self: &Arc<Self>, session: &SessionId, is_group: bool) {
        let entry = self.entry(session, is_group).await;
        let mut state = entry.state.lock().await;
        if state.mode == SessionMode::Focused {
            state.last_interaction = Some(Instant::now());
            return;
        }
        state.cancel_debounce();
        state.mode = SessionMode::Focused;
        state.last_macro_eval = Instant::now();
        state.micro_failures = 0;

        self.spawn_backfill(session, is_group);

        let scheduler = Arc::clone(self);
        let loop_session = session.clone();
        state.focus = Some(tokio::spawn(async move {
            scheduler.focus_loop(&loop_session, is_group).await;
        }));
        tracing::info!("session {session} entered focus mode");
    }

    pub async fn exit_focus(&self, session: &SessionId) {
        let entry = {
            let sessions = self.sessions.read().await;
            sessions.get(session).cloned()
        };
        let Some(entry) = entry else { return };
        let mut state = entry.state.lock().await;
        state.cancel_focus();
        state.mode = SessionMode::Idle;
        state.micro_failures = 0;
        tracing::info!("session {session} exited focus mode");
    }

    /// Focus-loop self-termination: drop the handle without aborting the
    /// running task (we are that task).
    async fn finish_focus(&self, session: &SessionId) {
        let entry = {
            let sessions = self.sessions.read().await;
            sessions.get(session).cloned()
        };
        let Some(entry) = entry else { return };
        let mut state = entry.state.lock().await;
        state.focus = None;
        state.mode = SessionMode::Idle;
        state.micro_failures = 0;
        tracing::info!("session {session} exited focus mode");
    }

    async fn focus_loop(self: Arc<Self>, session: &SessionId, is_group: bool) {
        let entry = self.entry(session, is_group).await;
        loop {
            sleep(self.config.interaction.micro_interval()).await;

            let macro_due = {
                let state = entry.state.lock().await;
                if state.mode != SessionMode::Focused {
                    return;
                }
                state.last_macro_eval.elapsed() >= self.config.interaction.macro_interval()
            };
            if macro_due {
                let decision = self.cycle.macro_decision(session, is_group).await;
                let mut state = entry.state.lock().await;
                state.last_decision = serde_json::to_value(&decision).ok();
                state.last_macro_eval = Instant::now();
                drop(state);
                if !decision.stay_focus {
                    self.finish_focus(session).await;
                    return;
                }
            }

            let batch = {
                let mut state = entry.state.lock().await;
                state.take_pending()
            };
            if batch.is_empty() {
                continue;
            }

            match self.cycle.micro_decision(session, &batch, is_group).await {
                Err(e) => {
                    // Not lost, retried next tick.
                    let mut state = entry.state.lock().await;
                    state.requeue_front(batch);
                    state.micro_failures += 1;
                    if state.micro_failures >= MICRO_FAILURE_ALERT {
                        tracing::warn!(
                            "session {session} micro decision failed {} times in a row: {e}",
                            state.micro_failures
                        );
                    } else {
                        tracing::warn!("session {session} micro decision failed, requeued: {e}");
                    }
                }
                Ok(decision) => {
                    {
                        let mut state = entry.state.lock().await;
                        state.micro_failures = 0;
                        state.last_decision = serde_json::to_value(&decision).ok();
                    }
                    if decision.exit_focus {
                        self.finish_focus(session).await;
                        return;
                    }
                    if decision.action == MicroAction::Ignore {
                        continue;
                    }

                    let target = decision
                        .emoji_id
                        .unwrap_or(self.config.interaction.emoji_ack);
                    let mut emoji_msg = self.send_emoji(session, is_group, target).await;

                    if decision.action == MicroAction::Reply {
                        let replied = self.send_reply(session, &batch, is_group).await;
                        let mut state = entry.state.lock().await;
                        if replied {
                            let now = Instant::now();
                            state.last_interaction = Some(now);
                            state.last_macro_eval = now;
                            drop(state);
                            if decision.withdraw_emoji {
                                self.withdraw(emoji_msg.take()).await;
                            }
                        } else {
                            state.requeue_front(batch);
                            state.micro_failures += 1;
                        }
                    }
                }
            }
        }
    }

    // ========================================================================
    // Outbound helpers
    // ========================================================================

    async fn send_emoji(
        &self,
        session: &SessionId,
        is_group: bool,
        emoji_id: u32,
    ) -> Option<String> {
        match self
            .transport
            .send_message(session, is_group, OutboundContent::Emoji(emoji_id))
            .await
        {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                tracing::warn!("failed to send reaction to {session}: {e}");
                None
            }
        }
    }

    async fn withdraw(&self, message_id: Option<String>) {
        if let Some(message_id) = message_id {
            if let Err(e) = self.transport.delete_message(&message_id).await {
                tracing::warn!("failed to withdraw reaction {message_id}: {e}");
            }
        }
    }

    /// Generate and send the reply fragments with pacing. Returns whether at
    /// least the generation succeeded; send failures are logged per fragment.
    async fn send_reply(
        &self,
        session: &SessionId,
        batch: &[InboundMessage],
        is_group: bool,
    ) -> bool {
        let fragments = match self.replier.generate(session, batch, is_group).await {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::warn!("reply generation for {session} failed: {e}");
                return false;
            }
        };
        if fragments.is_empty() {
            tracing::debug!("reply generation for {session} produced nothing to send");
            return true;
        }

        let id = self.store.active_persona(session).await;
        let mut sent = 0usize;
        for (i, fragment) in fragments.iter().enumerate() {
            if i > 0 {
                sleep(Duration::from_millis(
                    self.config.interaction.reply_fragment_gap_ms,
                ))
                .await;
            }
            match self
                .transport
                .send_message(session, is_group, OutboundContent::Text(fragment.clone()))
                .await
            {
                Ok(_) => {
                    sent += 1;
                    self.store
                        .record_message(&id, ChatMessage::assistant(fragment.clone(), Utc::now()))
                        .await;
                    self.consolidation.maybe_consolidate(&id, is_group).await;
                }
                Err(e) => {
                    tracing::warn!("failed to send reply fragment to {session}: {e}");
                }
            }
        }
        if sent > 0 {
            // Each outbound fragment costs one point of social energy.
            self.social.consume(session, sent as f64).await;
        }
        true
    }

    fn spawn_backfill(self: &Arc<Self>, session: &SessionId, is_group: bool) {
        let scheduler = Arc::clone(self);
        let session = session.clone();
        tokio::spawn(async move {
            scheduler.backfill(&session, is_group).await;
        });
    }

    /// Best-effort platform history injection; failure only costs context.
    async fn backfill(&self, session: &SessionId, _is_group: bool) {
        let count = self.config.interaction.history_inject_count;
        let history = match self.transport.fetch_recent_history(session, count).await {
            Ok(history) => history,
            Err(e) => {
                tracing::debug!("history backfill for {session} failed: {e}");
                return;
            }
        };
        if history.is_empty() {
            return;
        }
        let id = self.store.active_persona(session).await;
        let incoming: Vec<ChatMessage> = history.iter().map(InboundMessage::to_chat_message).collect();
        self.store.merge_backfill(&id, incoming).await;
    }

    /// Cancel every live timer and loop. In-flight consolidations are left to
    /// finish on their own.
    pub async fn shutdown(&self) {
        let sessions = self.sessions.read().await;
        for entry in sessions.values() {
            let mut state = entry.state.lock().await;
            state.cancel_debounce();
            state.cancel_focus();
            state.mode = SessionMode::Idle;
        }
        tracing::info!("session scheduler shut down ({} sessions)", sessions.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;
    use suzu_core::{
        CoreError, DecisionOracle, MessageId, NullMonitor, OracleOptions, SuzuConfig,
    };
    use suzu_memory::{NullRepository, Repository};

    // ------------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------------

    /// Scripted oracle: responses are keyed by a substring of the schema so
    /// the entry, micro and macro calls each find their own answer.
    struct ScriptedOracle {
        responses: StdMutex<Vec<(String, Result<Value, CoreError>)>>,
        schemas_seen: StdMutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(responses: Vec<(&str, Result<Value, CoreError>)>) -> Self {
            Self {
                responses: StdMutex::new(
                    responses
                        .into_iter()
                        .map(|(k, r)| (k.to_string(), r))
                        .collect(),
                ),
                schemas_seen: StdMutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.schemas_seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl DecisionOracle for ScriptedOracle {
        async fn complete_json(
            &self,
            _prompt: &str,
            schema: &str,
            _options: OracleOptions,
        ) -> Result<Value, CoreError> {
            self.schemas_seen.lock().unwrap().push(schema.to_string());
            let mut responses = self.responses.lock().unwrap();
            if let Some(pos) = responses.iter().position(|(k, _)| schema.contains(k)) {
                return responses.remove(pos).1;
            }
            Ok(json!({"raw_content": "script exhausted"}))
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        ops: StdMutex<Vec<String>>,
        next_id: StdMutex<u64>,
    }

    impl RecordingTransport {
        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send_message(
            &self,
            _session: &SessionId,
            _is_group: bool,
            content: OutboundContent,
        ) -> Result<MessageId, CoreError> {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = format!("m{next}");
            let op = match content {
                OutboundContent::Text(text) => format!("text:{text}"),
                OutboundContent::Emoji(emoji) => format!("emoji:{emoji}"),
            };
            self.ops.lock().unwrap().push(op);
            Ok(id)
        }

        async fn delete_message(&self, message_id: &MessageId) -> Result<(), CoreError> {
            self.ops.lock().unwrap().push(format!("delete:{message_id}"));
            Ok(())
        }

        async fn fetch_recent_history(
            &self,
            _session: &SessionId,
            _count: usize,
        ) -> Result<Vec<InboundMessage>, CoreError> {
            Ok(Vec::new())
        }
    }

    struct StaticReplier {
        fragments: Vec<String>,
        batches: StdMutex<Vec<Vec<String>>>,
    }

    impl StaticReplier {
        fn new(fragments: Vec<&str>) -> Self {
            Self {
                fragments: fragments.into_iter().map(String::from).collect(),
                batches: StdMutex::new(Vec::new()),
            }
        }

        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplyGenerator for StaticReplier {
        async fn generate(
            &self,
            _session: &SessionId,
            batch: &[InboundMessage],
            _is_group: bool,
        ) -> Result<Vec<String>, CoreError> {
            self.batches
                .lock()
                .unwrap()
                .push(batch.iter().map(|m| m.text.clone()).collect());
            Ok(self.fragments.clone())
        }
    }

    // ------------------------------------------------------------------------
    // Harness
    // ------------------------------------------------------------------------

    struct Harness {
        scheduler: Arc<SessionScheduler>,
        oracle: Arc<ScriptedOracle>,
        transport: Arc<RecordingTransport>,
        replier: Arc<StaticReplier>,
        social: Arc<SocialEnergyModel>,
    }

    fn harness(
        oracle: ScriptedOracle,
        fragments: Vec<&str>,
        tweak: impl FnOnce(&mut SuzuConfig),
    ) -> Harness {
        let mut config = SuzuConfig::default();
        tweak(&mut config);
        let repo: Arc<dyn Repository> = Arc::new(NullRepository);
        let store = Arc::new(MemoryStore::new(
            repo.clone(),
            config.memory.clone(),
            config.persona.clone(),
        ));
        let social = Arc::new(SocialEnergyModel::new(config.social.clone(), repo));
        let oracle = Arc::new(oracle);
        let cycle = Arc::new(DecisionCycle::new(
            store.clone(),
            social.clone(),
            oracle.clone(),
            Arc::new(NullMonitor),
            config.clone(),
        ));
        let consolidation = Arc::new(ConsolidationEngine::new(store.clone(), oracle.clone()));
        let transport = Arc::new(RecordingTransport::default());
        let replier = Arc::new(StaticReplier::new(fragments));
        let scheduler = Arc::new(SessionScheduler::new(
            config,
            store,
            social.clone(),
            cycle,
            consolidation,
            transport.clone(),
            replier.clone(),
        ));
        Harness {
            scheduler,
            oracle,
            transport,
            replier,
            social,
        }
    }

    fn msg(id: &str, text: &str, mentions: bool) -> InboundMessage {
        InboundMessage {
            message_id: id.to_string(),
            sender_id: "42".into(),
            sender_name: "mio".into(),
            text: text.to_string(),
            mentions_agent: mentions,
            timestamp: Utc::now(),
        }
    }

    fn sid() -> SessionId {
        SessionId::from("10001")
    }

    /// Poll under paused time; the sleeps auto-advance the clock.
    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..600 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not met in time");
    }

    // ------------------------------------------------------------------------
    // Entry path
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_burst_settles_into_one_decision() {
        let h = harness(
            ScriptedOracle::new(vec![(
                "enter_focus",
                Ok(json!({"reply": true, "enter_focus": false, "reason": "greet"})),
            )]),
            vec!["ok", "done"],
            |_| {},
        );

        h.scheduler.on_message(&sid(), false, msg("1", "one", false)).await;
        sleep(Duration::from_millis(500)).await;
        h.scheduler.on_message(&sid(), false, msg("2", "two", false)).await;
        sleep(Duration::from_millis(500)).await;
        h.scheduler.on_message(&sid(), false, msg("3", "three", false)).await;

        wait_for(|| h.transport.ops().len() == 4).await;

        // The whole burst is one decision, one reply.
        assert_eq!(h.replier.batches(), vec![vec!["one", "two", "three"]]);
        assert_eq!(h.oracle.call_count(), 1);

        // Think reaction first, both fragments, then the reaction withdrawn.
        assert_eq!(
            h.transport.ops(),
            vec!["emoji:324", "text:ok", "text:done", "delete:m1"]
        );

        // Two fragments cost two points of energy.
        let energy = h.social.snapshot(&sid()).await.energy;
        assert!((energy - 198.0).abs() < 1e-6, "energy was {energy}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_message_id_dropped() {
        let h = harness(
            ScriptedOracle::new(vec![(
                "enter_focus",
                Ok(json!({"reply": true, "enter_focus": false, "reason": "hi"})),
            )]),
            vec!["ok"],
            |_| {},
        );

        h.scheduler.on_message(&sid(), false, msg("1", "hello", false)).await;
        h.scheduler.on_message(&sid(), false, msg("1", "hello", false)).await;

        wait_for(|| !h.replier.batches().is_empty()).await;
        assert_eq!(h.replier.batches(), vec![vec!["hello"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_threshold_auto_trigger_stays_silent_on_fallback() {
        // Record every background message, auto-trigger after three. The
        // scripted oracle is empty so the entry decision is the raw fallback,
        // which for an auto trigger means total silence.
        let h = harness(ScriptedOracle::new(vec![]), vec!["ok"], |cfg| {
            cfg.interaction.passive_record_chance = 1.0;
            cfg.interaction.passive_sample_threshold = 3;
        });

        h.scheduler.on_message(&sid(), true, msg("1", "weather", false)).await;
        h.scheduler.on_message(&sid(), true, msg("2", "lunch", false)).await;
        h.scheduler.on_message(&sid(), true, msg("3", "plans", false)).await;

        wait_for(|| h.oracle.call_count() >= 1).await;
        sleep(Duration::from_secs(2)).await;

        assert!(h.replier.batches().is_empty());
        assert!(h.transport.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_message_without_trigger_is_not_decided() {
        let h = harness(ScriptedOracle::new(vec![]), vec!["ok"], |cfg| {
            cfg.interaction.passive_record_chance = 0.0;
        });

        h.scheduler.on_message(&sid(), true, msg("1", "nothing for us", false)).await;
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.oracle.call_count(), 0);

        // The wake word engages even without an @-mention.
        h.scheduler
            .on_message(&sid(), true, msg("2", "hey Suzu, you there?", false))
            .await;
        wait_for(|| h.oracle.call_count() >= 1).await;
    }

    // ------------------------------------------------------------------------
    // Focus mode
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_focus_micro_failure_requeues_batch() {
        let h = harness(
            ScriptedOracle::new(vec![
                (
                    "exit_focus",
                    Err(CoreError::OracleTimeout(Duration::from_secs(15))),
                ),
                ("exit_focus", Ok(json!({"action": "reply", "reason": "go"}))),
            ]),
            vec!["ok"],
            |cfg| {
                cfg.interaction.macro_interval_secs = 3600.0;
            },
        );

        h.scheduler.enter_focus(&sid(), true).await;
        h.scheduler.on_message(&sid(), true, msg("1", "one", false)).await;
        h.scheduler.on_message(&sid(), true, msg("2", "two", false)).await;

        wait_for(|| !h.replier.batches().is_empty()).await;

        // The first tick timed out; the retried batch kept its order.
        assert_eq!(h.replier.batches(), vec![vec!["one", "two"]]);
        assert!(h.oracle.call_count() >= 2);
        h.scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_macro_stop_exits_focus() {
        let h = harness(
            ScriptedOracle::new(vec![(
                "stay_focus",
                Ok(json!({"stay_focus": false, "reason": "conversation died"})),
            )]),
            vec!["ok"],
            |cfg| {
                cfg.interaction.micro_interval_secs = 1.0;
                cfg.interaction.macro_interval_secs = 1.0;
            },
        );

        h.scheduler.enter_focus(&sid(), true).await;
        wait_for(|| h.oracle.call_count() >= 1).await;

        let decision = h.scheduler.last_decision(&sid()).await;
        assert_eq!(
            decision.and_then(|d| d.get("stay_focus").cloned()),
            Some(json!(false))
        );

        // The loop is gone: no further oracle traffic however long we wait.
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.oracle.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focused_session_queues_without_deciding() {
        let h = harness(
            ScriptedOracle::new(vec![(
                "exit_focus",
                Ok(json!({"action": "ignore", "exit_focus": true, "reason": "done here"})),
            )]),
            vec!["ok"],
            |cfg| {
                cfg.interaction.macro_interval_secs = 3600.0;
            },
        );

        h.scheduler.enter_focus(&sid(), true).await;
        // A direct mention while focused must not start a second decision
        // path; the focus loop owns it.
        h.scheduler.on_message(&sid(), true, msg("1", "@bot bye", true)).await;

        wait_for(|| h.oracle.call_count() >= 1).await;
        // exit_focus from the micro decision tore the loop down silently.
        sleep(Duration::from_secs(10)).await;
        assert_eq!(h.oracle.call_count(), 1);
        assert!(h.replier.batches().is_empty());
        assert!(h.transport.ops().is_empty());
    }
}
