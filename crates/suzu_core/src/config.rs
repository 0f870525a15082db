use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SuzuConfig {
    pub memory: MemoryConfig,
    pub interaction: InteractionConfig,
    pub social: SocialConfig,
    pub oracle: OracleConfig,
    pub persona: PersonaConfig,
}

impl SuzuConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. Env var overrides are applied after.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: SuzuConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file is missing or invalid, use defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SUZU_ORACLE_URL") {
            self.oracle.base_url = v;
        }
        if let Ok(v) = std::env::var("SUZU_ORACLE_API_KEY") {
            self.oracle.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SUZU_ORACLE_MODEL") {
            self.oracle.model = v;
        }
        if let Ok(v) = std::env::var("SUZU_DEFAULT_PERSONA") {
            self.persona.default_persona = v;
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// Consolidation watermarks and history windows.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Unconsolidated-message count that triggers a consolidation pass.
    pub high_watermark: usize,
    /// How many of the oldest messages one pass consolidates.
    pub summary_interval: usize,
    /// Recent-history window handed to the decision prompts.
    pub decision_history_limit: usize,
    /// Working-history hard cap after platform backfill merges.
    pub max_history_length: usize,
    /// Trait / top-level impression cap before a compression pass is required.
    pub trait_cap: usize,
    /// Per-member impression cap inside group sessions.
    pub member_impression_cap: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            high_watermark: 50,
            summary_interval: 35,
            decision_history_limit: 50,
            max_history_length: 50,
            trait_cap: 25,
            member_impression_cap: 15,
        }
    }
}

/// Attention state machine timings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InteractionConfig {
    /// Debounce window for private sessions (seconds).
    pub wait_window_secs: f64,
    /// Debounce window for group sessions (seconds).
    pub group_wait_window_secs: f64,
    /// Recency window after a reply during which a group stays "warm".
    pub focus_window_secs: f64,
    /// Focus loop wake interval.
    pub micro_interval_secs: f64,
    /// Cadence of the stay-in-focus (macro) re-evaluation.
    pub macro_interval_secs: f64,
    /// Probability of recording a non-triggering background group message.
    pub passive_record_chance: f64,
    /// Recorded background messages needed to auto-trigger an entry decision.
    pub passive_sample_threshold: u32,
    /// De-duplication set capacity; cleared wholesale on overflow.
    pub dedup_capacity: usize,
    /// Messages to backfill from the platform on focus entry.
    pub history_inject_count: usize,
    /// Artificial pause between outbound reply fragments (milliseconds).
    pub reply_fragment_gap_ms: u64,
    /// Wake word: a group message containing this name counts as a trigger.
    pub trigger_name: String,
    /// Whether decisions track and update the current topic label.
    pub topic_tracking: bool,
    /// Reaction id sent while thinking about a reply.
    pub emoji_think: u32,
    /// Reaction id sent as a bare acknowledgement.
    pub emoji_ack: u32,
}

impl Default for InteractionConfig {
    fn default() -> Self {
        Self {
            wait_window_secs: 2.0,
            group_wait_window_secs: 5.0,
            focus_window_secs: 300.0,
            micro_interval_secs: 5.0,
            macro_interval_secs: 60.0,
            passive_record_chance: 0.1,
            passive_sample_threshold: 10,
            dedup_capacity: 100,
            history_inject_count: 20,
            reply_fragment_gap_ms: 800,
            trigger_name: "suzu".to_string(),
            topic_tracking: true,
            emoji_think: 324,
            emoji_ack: 76,
        }
    }
}

impl InteractionConfig {
    pub fn wait_window(&self, is_group: bool) -> Duration {
        Duration::from_secs_f64(if is_group {
            self.group_wait_window_secs
        } else {
            self.wait_window_secs
        })
    }

    pub fn micro_interval(&self) -> Duration {
        Duration::from_secs_f64(self.micro_interval_secs)
    }

    pub fn macro_interval(&self) -> Duration {
        Duration::from_secs_f64(self.macro_interval_secs)
    }

    pub fn focus_window(&self) -> Duration {
        Duration::from_secs_f64(self.focus_window_secs)
    }
}

/// Social energy / mood simulation parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocialConfig {
    pub enabled: bool,
    pub max_energy: f64,
    /// Energy only decays while above this threshold.
    pub decay_threshold: f64,
    pub decay_per_hour: f64,
    pub recovery_positive_per_hour: f64,
    pub recovery_normal_per_hour: f64,
    pub recovery_negative_per_hour: f64,
    /// Updates closer together than this are skipped to avoid write thrash.
    pub min_update_secs: f64,
    /// Fixed offset (hours) defining the calendar day for the hard reset.
    pub timezone_offset_hours: i32,
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_energy: 200.0,
            decay_threshold: 100.0,
            decay_per_hour: 5.0,
            recovery_positive_per_hour: 10.0,
            recovery_normal_per_hour: 5.0,
            recovery_negative_per_hour: 2.0,
            min_update_secs: 10.0,
            timezone_offset_hours: 8,
        }
    }
}

impl SocialConfig {
    pub fn recovery_per_hour(&self, mood: crate::Mood) -> f64 {
        match mood {
            crate::Mood::Positive => self.recovery_positive_per_hour,
            crate::Mood::Normal => self.recovery_normal_per_hour,
            crate::Mood::Negative => self.recovery_negative_per_hour,
        }
    }
}

/// Decision Oracle endpoint and timeout budgets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Bounded retries for malformed (unparseable) responses.
    pub parse_retries: u32,
    pub entry_timeout_secs: u64,
    pub micro_timeout_secs: u64,
    pub macro_timeout_secs: u64,
    pub reply_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            model: "gemini-flash".to_string(),
            parse_retries: 3,
            entry_timeout_secs: 30,
            micro_timeout_secs: 15,
            macro_timeout_secs: 15,
            reply_timeout_secs: 45,
        }
    }
}

impl OracleConfig {
    pub fn entry_timeout(&self) -> Duration {
        Duration::from_secs(self.entry_timeout_secs)
    }

    pub fn micro_timeout(&self) -> Duration {
        Duration::from_secs(self.micro_timeout_secs)
    }

    pub fn macro_timeout(&self) -> Duration {
        Duration::from_secs(self.macro_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

/// Persona defaults seeded on first contact.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub default_persona: String,
    /// Initial trait list per persona name.
    pub initial_traits: HashMap<String, Vec<String>>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default_persona: "default".to_string(),
            initial_traits: HashMap::new(),
        }
    }
}
