//! Social energy and mood simulation.
//!
//! One continuous resource per base session id, shared across personas of the
//! same conversation. Energy recovers at a mood-dependent rate, decays while
//! above a threshold, and hard-resets to full at every calendar-day boundary
//! in the configured timezone.

use chrono::{DateTime, Datelike, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use suzu_core::{Mood, SessionId, SocialConfig};

use crate::repository::Repository;

/// Persisted social state for one base session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialState {
    pub energy: f64,
    pub mood: Mood,
    pub last_update: DateTime<Utc>,
}

impl SocialState {
    fn fresh(max_energy: f64, now: DateTime<Utc>) -> Self {
        Self {
            energy: max_energy,
            mood: Mood::Normal,
            last_update: now,
        }
    }
}

pub struct SocialEnergyModel {
    config: SocialConfig,
    repo: Arc<dyn Repository>,
    states: RwLock<HashMap<SessionId, SocialState>>,
}

impl SocialEnergyModel {
    pub fn new(config: SocialConfig, repo: Arc<dyn Repository>) -> Self {
        Self {
            config,
            repo,
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Seed from a loaded snapshot.
    pub fn with_states(
        config: SocialConfig,
        repo: Arc<dyn Repository>,
        states: HashMap<SessionId, SocialState>,
    ) -> Self {
        Self {
            config,
            repo,
            states: RwLock::new(states),
        }
    }

    fn tz(&self) -> FixedOffset {
        FixedOffset::east_opt(self.config.timezone_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }

    /// Catch the state up to now: day-boundary reset, then recovery/decay.
    pub async fn update(&self, session: &SessionId) {
        self.update_at(session, Utc::now()).await;
    }

    /// `update` with an explicit clock, for tests.
    pub async fn update_at(&self, session: &SessionId, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }

        let changed = {
            let mut states = self.states.write().await;
            let state = states
                .entry(session.clone())
                .or_insert_with(|| SocialState::fresh(self.config.max_energy, now));
            Self::advance(&self.config, self.tz(), state, now)
        };

        if let Some(state) = changed {
            self.persist(session, &state).await;
        }
    }

    /// Apply elapsed time to one state. Returns the new state if it changed.
    fn advance(
        config: &SocialConfig,
        tz: FixedOffset,
        state: &mut SocialState,
        now: DateTime<Utc>,
    ) -> Option<SocialState> {
        // Day boundary in the configured timezone: hard reset, not gradual.
        let last_day = state.last_update.with_timezone(&tz);
        let today = now.with_timezone(&tz);
        if today.num_days_from_ce() > last_day.num_days_from_ce() {
            state.energy = config.max_energy;
            state.mood = Mood::Normal;
            state.last_update = now;
            tracing::info!("new day, social energy reset to {}", config.max_energy);
            return Some(state.clone());
        }

        let elapsed_min = (now - state.last_update).num_milliseconds() as f64 / 60_000.0;
        if elapsed_min < config.min_update_secs / 60.0 {
            return None;
        }

        let recovered = elapsed_min * (config.recovery_per_hour(state.mood) / 60.0);
        let decay = if state.energy > config.decay_threshold {
            elapsed_min * (config.decay_per_hour / 60.0)
        } else {
            0.0
        };

        state.energy = (state.energy + recovered - decay).clamp(0.0, config.max_energy);
        state.last_update = now;
        tracing::debug!(
            "social energy {:.2} (+{:.2}/-{:.2})",
            state.energy,
            recovered,
            decay
        );
        Some(state.clone())
    }

    /// Spend energy on an interaction. Catches up decay/recovery first.
    pub async fn consume(&self, session: &SessionId, amount: f64) {
        self.consume_at(session, amount, Utc::now()).await;
    }

    pub async fn consume_at(&self, session: &SessionId, amount: f64, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        self.update_at(session, now).await;

        let state = {
            let mut states = self.states.write().await;
            let state = states
                .entry(session.clone())
                .or_insert_with(|| SocialState::fresh(self.config.max_energy, now));
            state.energy = (state.energy - amount).max(0.0);
            state.clone()
        };
        self.persist(session, &state).await;
    }

    /// Set the mood if the label is a known value; otherwise no-op.
    pub async fn set_mood(&self, session: &SessionId, mood: &str) {
        if !self.config.enabled {
            return;
        }
        let Some(mood) = Mood::parse(mood) else {
            tracing::warn!("ignoring unknown mood label: {mood:?}");
            return;
        };
        let state = {
            let mut states = self.states.write().await;
            let state = states
                .entry(session.clone())
                .or_insert_with(|| SocialState::fresh(self.config.max_energy, Utc::now()));
            state.mood = mood;
            state.clone()
        };
        self.persist(session, &state).await;
    }

    /// Current state (full energy / normal mood if never touched or disabled).
    pub async fn snapshot(&self, session: &SessionId) -> SocialState {
        if !self.config.enabled {
            return SocialState::fresh(self.config.max_energy, Utc::now());
        }
        let states = self.states.read().await;
        states
            .get(session)
            .cloned()
            .unwrap_or_else(|| SocialState::fresh(self.config.max_energy, Utc::now()))
    }

    pub fn max_energy(&self) -> f64 {
        self.config.max_energy
    }

    async fn persist(&self, session: &SessionId, state: &SocialState) {
        if let Err(e) = self.repo.save_social(session, state).await {
            tracing::warn!("failed to persist social state for {session}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::NullRepository;
    use chrono::TimeZone;

    fn model() -> SocialEnergyModel {
        SocialEnergyModel::new(SocialConfig::default(), Arc::new(NullRepository))
    }

    fn sid() -> SessionId {
        SessionId::from("10001")
    }

    #[tokio::test]
    async fn test_energy_stays_in_bounds() {
        let m = model();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        m.update_at(&sid(), t0).await;

        // Massive consumption clamps at 0.
        m.consume_at(&sid(), 10_000.0, t0 + chrono::Duration::seconds(30))
            .await;
        assert_eq!(m.snapshot(&sid()).await.energy, 0.0);

        // Hours of recovery never exceed max.
        m.update_at(&sid(), t0 + chrono::Duration::hours(10)).await;
        let s = m.snapshot(&sid()).await;
        assert!(s.energy >= 0.0 && s.energy <= 200.0);
    }

    #[tokio::test]
    async fn test_day_boundary_hard_reset() {
        let m = model();
        // 23:30 local (+8) on May 1 = 15:30 UTC.
        let before = Utc.with_ymd_and_hms(2024, 5, 1, 15, 30, 0).unwrap();
        m.update_at(&sid(), before).await;
        m.consume_at(&sid(), 150.0, before + chrono::Duration::seconds(15))
            .await;
        m.set_mood(&sid(), "negative").await;
        assert!(m.snapshot(&sid()).await.energy < 60.0);

        // One hour later it is 00:30 local on May 2: hard reset.
        m.update_at(&sid(), before + chrono::Duration::hours(1)).await;
        let s = m.snapshot(&sid()).await;
        assert_eq!(s.energy, 200.0);
        assert_eq!(s.mood, Mood::Normal);
    }

    #[tokio::test]
    async fn test_sub_granularity_update_is_noop() {
        let m = model();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        m.update_at(&sid(), t0).await;
        m.consume_at(&sid(), 50.0, t0 + chrono::Duration::seconds(11))
            .await;
        let before = m.snapshot(&sid()).await;

        // 5 seconds later: below the 10s granularity, nothing moves.
        m.update_at(&sid(), t0 + chrono::Duration::seconds(16)).await;
        let after = m.snapshot(&sid()).await;
        assert_eq!(before.energy, after.energy);
        assert_eq!(before.last_update, after.last_update);
    }

    #[tokio::test]
    async fn test_decay_only_above_threshold() {
        let m = model();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        m.update_at(&sid(), t0).await;

        // Full energy (200) is above the 100 threshold: net rate is
        // recovery(normal 5/h) - decay(5/h) = 0.
        m.update_at(&sid(), t0 + chrono::Duration::hours(1)).await;
        let s = m.snapshot(&sid()).await;
        assert!((s.energy - 200.0).abs() < 1e-6);

        // Drop below the threshold: only recovery applies.
        let t1 = t0 + chrono::Duration::hours(1);
        m.consume_at(&sid(), 150.0, t1 + chrono::Duration::seconds(15))
            .await;
        let low = m.snapshot(&sid()).await.energy;
        m.update_at(&sid(), t1 + chrono::Duration::hours(2)).await;
        let s = m.snapshot(&sid()).await;
        assert!(s.energy > low + 9.0, "expected ~10 recovery, got {}", s.energy - low);
    }

    #[tokio::test]
    async fn test_unknown_mood_rejected() {
        let m = model();
        m.set_mood(&sid(), "positive").await;
        assert_eq!(m.snapshot(&sid()).await.mood, Mood::Positive);
        m.set_mood(&sid(), "elated").await;
        assert_eq!(m.snapshot(&sid()).await.mood, Mood::Positive);
    }
}
