//! In-memory working state with write-through persistence.
//!
//! The store is the single owner of working history, episodic summaries,
//! traits, impressions, and the consolidation counters. All reads are served
//! from memory; writes go through to the repository best-effort, so a broken
//! database degrades durability but never the conversation.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use anyhow::Result;
use suzu_core::{
    ChatMessage, EpisodicSummary, MemberKey, MemoryConfig, PersonaConfig, PersonaSessionId,
    SessionId,
};

use crate::repository::{CounterState, Repository};
use crate::social::SocialState;

#[derive(Default)]
struct StoreInner {
    history: HashMap<PersonaSessionId, Vec<ChatMessage>>,
    episodic: HashMap<PersonaSessionId, Vec<EpisodicSummary>>,
    traits: HashMap<PersonaSessionId, Vec<String>>,
    impressions: HashMap<PersonaSessionId, Vec<String>>,
    member_impressions: HashMap<MemberKey, Vec<String>>,
    counters: HashMap<PersonaSessionId, CounterState>,
    active_personas: HashMap<SessionId, String>,
}

pub struct MemoryStore {
    repo: Arc<dyn Repository>,
    config: MemoryConfig,
    persona_config: PersonaConfig,
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new(
        repo: Arc<dyn Repository>,
        config: MemoryConfig,
        persona_config: PersonaConfig,
    ) -> Self {
        Self {
            repo,
            config,
            persona_config,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Load persisted state. Returns the social states for the social model
    /// to take over; everything else stays here.
    pub async fn load(&self) -> Result<HashMap<SessionId, SocialState>> {
        let snapshot = self.repo.load().await?;
        let mut inner = self.inner.write().await;
        inner.history = snapshot.history;
        inner.episodic = snapshot.episodic;
        inner.traits = snapshot.traits;
        inner.impressions = snapshot.impressions;
        inner.member_impressions = snapshot.member_impressions;
        inner.counters = snapshot.counters;
        inner.active_personas = snapshot.active_personas;
        Ok(snapshot.social)
    }

    // ========================================================================
    // Personas
    // ========================================================================

    /// The persona session currently active for this channel. First contact
    /// activates the configured default persona and seeds its initial traits.
    pub async fn active_persona(&self, session: &SessionId) -> PersonaSessionId {
        {
            let inner = self.inner.read().await;
            if let Some(name) = inner.active_personas.get(session) {
                return PersonaSessionId::new(session.clone(), name.clone());
            }
        }
        self.activate_persona(session, self.persona_config.default_persona.clone())
            .await
    }

    /// Switch this channel to another persona. Memory under the previous
    /// persona is kept untouched and comes back on switching back.
    pub async fn switch_persona(
        &self,
        session: &SessionId,
        persona: impl Into<String>,
    ) -> PersonaSessionId {
        self.activate_persona(session, persona.into()).await
    }

    async fn activate_persona(&self, session: &SessionId, persona: String) -> PersonaSessionId {
        let id = PersonaSessionId::new(session.clone(), persona.clone());
        let seeded = {
            let mut inner = self.inner.write().await;
            inner.active_personas.insert(session.clone(), persona.clone());
            if !inner.traits.contains_key(&id) {
                let initial = self
                    .persona_config
                    .initial_traits
                    .get(&persona)
                    .cloned()
                    .unwrap_or_default();
                inner.traits.insert(id.clone(), initial.clone());
                Some(initial)
            } else {
                None
            }
        };

        if let Err(e) = self.repo.save_active_persona(session, &persona).await {
            tracing::warn!("failed to persist active persona for {session}: {e}");
        }
        if let Some(initial) = seeded {
            if !initial.is_empty() {
                if let Err(e) = self.repo.save_traits(&id, &initial).await {
                    tracing::warn!("failed to persist seeded traits for {id}: {e}");
                }
            }
        }
        id
    }

    // ========================================================================
    // Working history
    // ========================================================================

    /// Append one message and bump the unconsolidated counter.
    pub async fn record_message(&self, id: &PersonaSessionId, msg: ChatMessage) {
        let counters = {
            let mut inner = self.inner.write().await;
            inner.history.entry(id.clone()).or_default().push(msg.clone());
            let counters = inner.counters.entry(id.clone()).or_default();
            counters.unconsolidated += 1;
            counters.clone()
        };

        if let Err(e) = self.repo.append_message(id, &msg).await {
            tracing::warn!("failed to persist message for {id}: {e}");
        }
        self.persist_counters(id, &counters).await;
    }

    /// The most recent `k` messages.
    pub async fn history_window(&self, id: &PersonaSessionId, k: usize) -> Vec<ChatMessage> {
        let inner = self.inner.read().await;
        let history = inner.history.get(id).map(Vec::as_slice).unwrap_or(&[]);
        history[history.len().saturating_sub(k)..].to_vec()
    }

    /// The oldest `n` messages, the consolidation window.
    pub async fn oldest_window(&self, id: &PersonaSessionId, n: usize) -> Vec<ChatMessage> {
        let inner = self.inner.read().await;
        let history = inner.history.get(id).map(Vec::as_slice).unwrap_or(&[]);
        history[..n.min(history.len())].to_vec()
    }

    /// Drop the oldest `n` messages after they were consolidated, and settle
    /// the unconsolidated counter.
    pub async fn shrink_history(&self, id: &PersonaSessionId, n: usize) {
        let counters = {
            let mut inner = self.inner.write().await;
            if let Some(history) = inner.history.get_mut(id) {
                let n = n.min(history.len());
                history.drain(..n);
            }
            let counters = inner.counters.entry(id.clone()).or_default();
            counters.unconsolidated = counters.unconsolidated.saturating_sub(n);
            counters.clone()
        };

        if let Err(e) = self.repo.mark_consolidated(id, n).await {
            tracing::warn!("failed to mark messages consolidated for {id}: {e}");
        }
        self.persist_counters(id, &counters).await;
    }

    /// Merge platform-side history into the working view. Duplicates (same
    /// text and timestamp) are dropped, the result is re-sorted by time and
    /// truncated to twice the working cap. Backfilled lines are context only:
    /// they are neither persisted nor counted toward consolidation.
    pub async fn merge_backfill(&self, id: &PersonaSessionId, incoming: Vec<ChatMessage>) {
        if incoming.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        let history = inner.history.entry(id.clone()).or_default();
        for msg in incoming {
            let dup = history
                .iter()
                .any(|m| m.text == msg.text && m.timestamp == msg.timestamp);
            if !dup {
                history.push(msg);
            }
        }
        history.sort_by_key(|m| m.timestamp);
        let cap = self.config.max_history_length * 2;
        if history.len() > cap {
            let excess = history.len() - cap;
            history.drain(..excess);
        }
    }

    // ========================================================================
    // Long-term memory
    // ========================================================================

    pub async fn episodes(&self, id: &PersonaSessionId) -> Vec<EpisodicSummary> {
        let inner = self.inner.read().await;
        inner.episodic.get(id).cloned().unwrap_or_default()
    }

    pub async fn append_episode(&self, id: &PersonaSessionId, episode: EpisodicSummary) {
        {
            let mut inner = self.inner.write().await;
            inner.episodic.entry(id.clone()).or_default().push(episode.clone());
        }
        if let Err(e) = self.repo.append_episode(id, &episode).await {
            tracing::warn!("failed to persist episode for {id}: {e}");
        }
    }

    pub async fn traits(&self, id: &PersonaSessionId) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.traits.get(id).cloned().unwrap_or_default()
    }

    pub async fn set_traits(&self, id: &PersonaSessionId, traits: Vec<String>) {
        {
            let mut inner = self.inner.write().await;
            inner.traits.insert(id.clone(), traits.clone());
        }
        if let Err(e) = self.repo.save_traits(id, &traits).await {
            tracing::warn!("failed to persist traits for {id}: {e}");
        }
    }

    pub async fn impressions(&self, id: &PersonaSessionId) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.impressions.get(id).cloned().unwrap_or_default()
    }

    pub async fn set_impressions(&self, id: &PersonaSessionId, impressions: Vec<String>) {
        {
            let mut inner = self.inner.write().await;
            inner.impressions.insert(id.clone(), impressions.clone());
        }
        if let Err(e) = self.repo.save_impressions(id, &impressions).await {
            tracing::warn!("failed to persist impressions for {id}: {e}");
        }
    }

    pub async fn member_impressions(&self, key: &MemberKey) -> Vec<String> {
        let inner = self.inner.read().await;
        inner.member_impressions.get(key).cloned().unwrap_or_default()
    }

    pub async fn set_member_impressions(&self, key: &MemberKey, impressions: Vec<String>) {
        {
            let mut inner = self.inner.write().await;
            inner
                .member_impressions
                .insert(key.clone(), impressions.clone());
        }
        if let Err(e) = self.repo.save_member_impressions(key, &impressions).await {
            tracing::warn!("failed to persist member impressions for {key}: {e}");
        }
    }

    // ========================================================================
    // Counters and topic
    // ========================================================================

    pub async fn unconsolidated_count(&self, id: &PersonaSessionId) -> usize {
        let inner = self.inner.read().await;
        inner
            .counters
            .get(id)
            .map(|c| c.unconsolidated)
            .unwrap_or(0)
    }

    /// Bump the pity counter and return its new value.
    pub async fn increment_pity(&self, id: &PersonaSessionId) -> u32 {
        let counters = {
            let mut inner = self.inner.write().await;
            let counters = inner.counters.entry(id.clone()).or_default();
            counters.pity += 1;
            counters.clone()
        };
        self.persist_counters(id, &counters).await;
        counters.pity
    }

    pub async fn reset_pity(&self, id: &PersonaSessionId) {
        let counters = {
            let mut inner = self.inner.write().await;
            let counters = inner.counters.entry(id.clone()).or_default();
            counters.pity = 0;
            counters.clone()
        };
        self.persist_counters(id, &counters).await;
    }

    pub async fn topic(&self, id: &PersonaSessionId) -> Option<String> {
        let inner = self.inner.read().await;
        inner.counters.get(id).and_then(|c| c.topic.clone())
    }

    /// Update the tracked topic. Empty labels are ignored so a reticent
    /// decision never wipes the topic.
    pub async fn set_topic(&self, id: &PersonaSessionId, topic: &str) {
        if topic.trim().is_empty() {
            return;
        }
        let counters = {
            let mut inner = self.inner.write().await;
            let counters = inner.counters.entry(id.clone()).or_default();
            counters.topic = Some(topic.trim().to_string());
            counters.clone()
        };
        self.persist_counters(id, &counters).await;
    }

    async fn persist_counters(&self, id: &PersonaSessionId, counters: &CounterState) {
        if let Err(e) = self.repo.save_counters(id, counters).await {
            tracing::warn!("failed to persist counters for {id}: {e}");
        }
    }
}
