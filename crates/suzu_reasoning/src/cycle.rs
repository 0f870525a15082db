//! The three decision operations: entry, micro, macro.
//!
//! Entry and macro are infallible: whatever goes wrong, the caller gets a
//! decision (the conservative fallback). Micro is the exception: an oracle
//! that does not answer inside its budget surfaces as an error, because the
//! focus loop must requeue the batch rather than silently drop it.

use std::sync::Arc;
use std::time::Instant;

use suzu_core::{
    CoreError, DecisionKind, DecisionMonitor, DecisionOracle, DecisionRecord, InboundMessage,
    OracleOptions, PersonaSessionId, SessionId, SuzuConfig,
};
use suzu_memory::{MemoryStore, SocialEnergyModel};

use crate::context;
use crate::decision::{
    EntryDecision, MacroDecision, MicroDecision, ENTRY_SCHEMA, MACRO_SCHEMA, MICRO_SCHEMA,
};

const EPISODE_CONTEXT_LIMIT: usize = 5;

pub struct DecisionCycle {
    store: Arc<MemoryStore>,
    social: Arc<SocialEnergyModel>,
    oracle: Arc<dyn DecisionOracle>,
    monitor: Arc<dyn DecisionMonitor>,
    config: SuzuConfig,
}

impl DecisionCycle {
    pub fn new(
        store: Arc<MemoryStore>,
        social: Arc<SocialEnergyModel>,
        oracle: Arc<dyn DecisionOracle>,
        monitor: Arc<dyn DecisionMonitor>,
        config: SuzuConfig,
    ) -> Self {
        Self {
            store,
            social,
            oracle,
            monitor,
            config,
        }
    }

    /// Decide how to respond to a settled batch. `is_auto` marks batches that
    /// arrived via passive sampling rather than being addressed to the agent.
    pub async fn entry_decision(
        &self,
        session: &SessionId,
        batch: &[InboundMessage],
        is_group: bool,
        is_auto: bool,
    ) -> EntryDecision {
        let started = Instant::now();
        self.social.update(session).await;
        let id = self.store.active_persona(session).await;

        let instruction = if is_auto {
            "You were not addressed directly; you overheard this. Decide whether \
             joining in is natural. reply: send a message. enter_focus: keep \
             actively following this conversation. emoji_id: react instead of \
             or before replying."
        } else {
            "Decide how to respond. reply: send a message. enter_focus: keep \
             actively following this conversation. emoji_id: react instead of \
             or before replying."
        };
        let prompt = self
            .render_prompt(&id, session, batch, is_group, instruction)
            .await;

        let decision = match self
            .oracle
            .complete_json(
                &prompt,
                ENTRY_SCHEMA,
                OracleOptions::with_timeout(self.config.oracle.entry_timeout()),
            )
            .await
        {
            Ok(value) => EntryDecision::decode(&value, is_auto),
            Err(e) => {
                tracing::warn!("entry decision for {session} failed: {e}");
                EntryDecision::fallback(is_auto)
            }
        };

        self.track_topic(&id, decision.current_topic.as_deref()).await;
        self.record(DecisionKind::Entry, session, &decision, &decision.reason, started)
            .await;
        decision
    }

    /// Decide what to do with the batch queued during one focus-loop tick.
    ///
    /// Timeouts and transport failures propagate so the caller can requeue
    /// the batch; a malformed answer decodes to the silent fallback.
    pub async fn micro_decision(
        &self,
        session: &SessionId,
        batch: &[InboundMessage],
        is_group: bool,
    ) -> Result<MicroDecision, CoreError> {
        let started = Instant::now();
        self.social.update(session).await;
        let id = self.store.active_persona(session).await;

        let instruction = "You are actively following this conversation. Decide \
             what to do with the new messages: ignore, react with an emoji, or \
             reply. Set exit_focus if the conversation has moved on without you.";
        let prompt = self
            .render_prompt(&id, session, batch, is_group, instruction)
            .await;

        let value = self
            .oracle
            .complete_json(
                &prompt,
                MICRO_SCHEMA,
                OracleOptions::with_timeout(self.config.oracle.micro_timeout()),
            )
            .await?;
        let decision = MicroDecision::decode(&value);

        self.track_topic(&id, decision.current_topic.as_deref()).await;
        self.record(DecisionKind::Micro, session, &decision, &decision.reason, started)
            .await;
        Ok(decision)
    }

    /// Periodic re-evaluation of whether focus mode is still worth holding.
    pub async fn macro_decision(&self, session: &SessionId, is_group: bool) -> MacroDecision {
        let started = Instant::now();
        self.social.update(session).await;
        let id = self.store.active_persona(session).await;

        let instruction = "You have been actively following this conversation \
             for a while. Decide whether it is still worth following. Set \
             stay_focus to false to step back and wait to be addressed again.";
        let prompt = self
            .render_prompt(&id, session, &[], is_group, instruction)
            .await;

        let decision = match self
            .oracle
            .complete_json(
                &prompt,
                MACRO_SCHEMA,
                OracleOptions::with_timeout(self.config.oracle.macro_timeout()),
            )
            .await
        {
            Ok(value) => MacroDecision::decode(&value),
            Err(e) => {
                tracing::warn!("macro decision for {session} failed: {e}");
                MacroDecision::fallback()
            }
        };

        self.track_topic(&id, decision.current_topic.as_deref()).await;
        self.record(DecisionKind::Macro, session, &decision, &decision.reason, started)
            .await;
        decision
    }

    // ========================================================================
    // Shared plumbing
    // ========================================================================

    async fn render_prompt(
        &self,
        id: &PersonaSessionId,
        session: &SessionId,
        batch: &[InboundMessage],
        is_group: bool,
        instruction: &str,
    ) -> String {
        let traits = self.store.traits(id).await;
        let impressions = self.store.impressions(id).await;
        let episodes = self.store.episodes(id).await;
        let topic = self.store.topic(id).await;
        let history = self
            .store
            .history_window(id, self.config.memory.decision_history_limit)
            .await;
        let social = self.social.snapshot(session).await;

        let mut prompt = String::new();
        prompt.push_str(&context::render_list_section("Your traits", &traits));
        let impressions_title = if is_group {
            "Your impressions of this group"
        } else {
            "Your impressions of this user"
        };
        prompt.push_str(&context::render_list_section(impressions_title, &impressions));

        if is_group {
            for sender in unique_senders(batch) {
                let list = self.store.member_impressions(&id.member(&sender)).await;
                if !list.is_empty() {
                    prompt.push_str(&context::render_list_section(
                        &format!("Your impressions of member {sender}"),
                        &list,
                    ));
                }
            }
        }

        prompt.push_str(&context::render_episodes(&episodes, EPISODE_CONTEXT_LIMIT));
        prompt.push_str(&context::render_topic_line(topic.as_deref()));
        prompt.push_str(&context::render_social_line(&social, self.social.max_energy()));
        prompt.push_str("\n\n");

        if !history.is_empty() {
            prompt.push_str("## Recent conversation\n");
            prompt.push_str(&context::render_history(&history));
            prompt.push_str("\n\n");
        }
        if !batch.is_empty() {
            prompt.push_str("## New messages awaiting your decision\n");
            prompt.push_str(&context::render_batch(batch));
            prompt.push_str("\n\n");
        }
        prompt.push_str(instruction);
        prompt
    }

    async fn track_topic(&self, id: &PersonaSessionId, topic: Option<&str>) {
        if !self.config.interaction.topic_tracking {
            return;
        }
        if let Some(topic) = topic {
            self.store.set_topic(id, topic).await;
        }
    }

    async fn record<D: serde::Serialize>(
        &self,
        kind: DecisionKind,
        session: &SessionId,
        decision: &D,
        reason: &str,
        started: Instant,
    ) {
        let result = serde_json::to_value(decision).unwrap_or_default();
        self.monitor
            .record_decision(DecisionRecord {
                kind,
                session: session.clone(),
                result,
                reason: reason.to_string(),
                latency: started.elapsed(),
            })
            .await;
    }
}

fn unique_senders(batch: &[InboundMessage]) -> Vec<String> {
    let mut seen = Vec::new();
    for m in batch {
        if !seen.contains(&m.sender_id) {
            seen.push(m.sender_id.clone());
        }
    }
    seen
}
