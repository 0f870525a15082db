//! Reply generation through the oracle.
//!
//! Replies come back as short fragments sent as separate messages, plus a
//! mood label that feeds the social simulation. If every parse attempt fails
//! the raw text becomes a single fragment; losing a composed reply to a
//! formatting slip would be worse than an unformatted one.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use suzu_core::{
    raw_fallback_text, CoreError, DecisionOracle, InboundMessage, OracleOptions, ReplyGenerator,
    SessionId, SuzuConfig,
};
use suzu_memory::{MemoryStore, SocialEnergyModel};

use crate::context;

pub const REPLY_SCHEMA: &str = r#"{"fragments": ["..."], "mood": "normal"}"#;

pub struct OracleReplier {
    store: Arc<MemoryStore>,
    social: Arc<SocialEnergyModel>,
    oracle: Arc<dyn DecisionOracle>,
    config: SuzuConfig,
}

impl OracleReplier {
    pub fn new(
        store: Arc<MemoryStore>,
        social: Arc<SocialEnergyModel>,
        oracle: Arc<dyn DecisionOracle>,
        config: SuzuConfig,
    ) -> Self {
        Self {
            store,
            social,
            oracle,
            config,
        }
    }
}

#[async_trait]
impl ReplyGenerator for OracleReplier {
    async fn generate(
        &self,
        session: &SessionId,
        batch: &[InboundMessage],
        is_group: bool,
    ) -> Result<Vec<String>, CoreError> {
        let id = self.store.active_persona(session).await;
        let traits = self.store.traits(&id).await;
        let impressions = self.store.impressions(&id).await;
        let episodes = self.store.episodes(&id).await;
        let history = self
            .store
            .history_window(&id, self.config.memory.decision_history_limit)
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
        prompt.push_str(&context::render_episodes(&episodes, 5));
        prompt.push_str(&context::render_social_line(&social, self.social.max_energy()));
        prompt.push_str("\n\n");
        if !history.is_empty() {
            prompt.push_str("## Recent conversation\n");
            prompt.push_str(&context::render_history(&history));
            prompt.push_str("\n\n");
        }
        prompt.push_str("## Messages you decided to answer\n");
        prompt.push_str(&context::render_batch(batch));
        prompt.push_str(
            "\n\nWrite your reply in character, split into short chat-sized \
             fragments (usually one to three). Also report your mood after \
             this exchange: positive, normal, or negative.",
        );

        let value = self
            .oracle
            .complete_json(
                &prompt,
                REPLY_SCHEMA,
                OracleOptions::with_timeout(self.config.oracle.reply_timeout()),
            )
            .await?;

        if let Some(raw) = raw_fallback_text(&value) {
            let raw = raw.trim();
            return Ok(if raw.is_empty() {
                Vec::new()
            } else {
                vec![raw.to_string()]
            });
        }

        if let Some(mood) = value.get("mood").and_then(Value::as_str) {
            self.social.set_mood(session, mood).await;
        }

        let fragments = value
            .get("fragments")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(fragments)
    }
}
