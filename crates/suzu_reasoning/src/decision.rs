//! Decision shapes and their fallback decoding.
//!
//! Every decoder here is total: a malformed or raw-fallback oracle value maps
//! to a conservative default instead of an error. The only failure the caller
//! ever has to handle is the oracle not answering at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use suzu_core::is_raw_fallback;

/// Schema examples embedded verbatim in the decision prompts.
pub const ENTRY_SCHEMA: &str = r#"{"reply": true, "enter_focus": false, "emoji_id": null, "withdraw_emoji": true, "reason": "...", "current_topic": null}"#;
pub const MICRO_SCHEMA: &str = r#"{"action": "ignore", "emoji_id": null, "withdraw_emoji": true, "exit_focus": false, "reason": "...", "current_topic": null}"#;
pub const MACRO_SCHEMA: &str = r#"{"stay_focus": true, "reason": "...", "current_topic": null}"#;

// ============================================================================
// Entry
// ============================================================================

/// Outcome of the entry decision made once per settled debounce batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EntryDecision {
    pub reply: bool,
    pub enter_focus: bool,
    /// Reaction to attach instead of (or before) a textual reply.
    pub emoji_id: Option<u32>,
    /// Whether a pre-reply reaction should be deleted once the reply is out.
    pub withdraw_emoji: bool,
    pub reason: String,
    pub current_topic: Option<String>,
}

impl Default for EntryDecision {
    fn default() -> Self {
        Self {
            reply: true,
            enter_focus: true,
            emoji_id: None,
            withdraw_emoji: true,
            reason: String::new(),
            current_topic: None,
        }
    }
}

impl EntryDecision {
    /// Default when the oracle gave nothing usable. A user who addressed the
    /// agent gets a reply; an automatic (passively sampled) trigger stays
    /// silent rather than barging in on a failure.
    pub fn fallback(is_auto: bool) -> Self {
        Self {
            reply: !is_auto,
            enter_focus: !is_auto,
            emoji_id: None,
            withdraw_emoji: true,
            reason: "fallback".to_string(),
            current_topic: None,
        }
    }

    pub fn decode(value: &Value, is_auto: bool) -> Self {
        if is_raw_fallback(value) {
            return Self::fallback(is_auto);
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::fallback(is_auto))
    }
}

// ============================================================================
// Micro
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MicroAction {
    #[default]
    Ignore,
    Emoji,
    Reply,
}

/// Outcome of one focus-loop evaluation of the queued batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MicroDecision {
    pub action: MicroAction,
    pub emoji_id: Option<u32>,
    pub withdraw_emoji: bool,
    /// The decision itself can ask to leave focus mode early.
    pub exit_focus: bool,
    pub reason: String,
    pub current_topic: Option<String>,
}

impl Default for MicroDecision {
    fn default() -> Self {
        Self {
            action: MicroAction::Ignore,
            emoji_id: None,
            withdraw_emoji: true,
            exit_focus: false,
            reason: String::new(),
            current_topic: None,
        }
    }
}

impl MicroDecision {
    /// Staying silent is always safe inside focus mode.
    pub fn fallback() -> Self {
        Self {
            reason: "fallback".to_string(),
            ..Self::default()
        }
    }

    pub fn decode(value: &Value) -> Self {
        if is_raw_fallback(value) {
            return Self::fallback();
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::fallback())
    }
}

// ============================================================================
// Macro
// ============================================================================

/// Outcome of the periodic stay-in-focus re-evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MacroDecision {
    pub stay_focus: bool,
    pub reason: String,
    pub current_topic: Option<String>,
}

impl Default for MacroDecision {
    fn default() -> Self {
        Self {
            stay_focus: true,
            reason: String::new(),
            current_topic: None,
        }
    }
}

impl MacroDecision {
    /// An undecidable check keeps focus; the next cycle gets another chance.
    pub fn fallback() -> Self {
        Self {
            stay_focus: true,
            reason: "fallback".to_string(),
            current_topic: None,
        }
    }

    pub fn decode(value: &Value) -> Self {
        if is_raw_fallback(value) {
            return Self::fallback();
        }
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::fallback())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_decode_partial_fills_defaults() {
        let d = EntryDecision::decode(&json!({"reply": false, "reason": "quiet hour"}), false);
        assert!(!d.reply);
        assert!(d.enter_focus);
        assert_eq!(d.reason, "quiet hour");
    }

    #[test]
    fn test_entry_fallback_depends_on_trigger_kind() {
        let addressed = EntryDecision::decode(&json!({"raw_content": "???"}), false);
        assert!(addressed.reply && addressed.enter_focus);

        let auto = EntryDecision::decode(&json!({"raw_content": "???"}), true);
        assert!(!auto.reply && !auto.enter_focus);
    }

    #[test]
    fn test_micro_decode_actions() {
        let d = MicroDecision::decode(&json!({"action": "emoji", "emoji_id": 76}));
        assert_eq!(d.action, MicroAction::Emoji);
        assert_eq!(d.emoji_id, Some(76));
        assert!(!d.exit_focus);

        let d = MicroDecision::decode(&json!({"action": "nonsense"}));
        assert_eq!(d.action, MicroAction::Ignore);

        let d = MicroDecision::decode(&json!({"action": "ignore", "exit_focus": true}));
        assert!(d.exit_focus);
    }

    proptest::proptest! {
        // Decoding is total: any action label yields a decision, and only the
        // two known non-ignore labels change the action.
        #[test]
        fn test_micro_decode_total_over_action_labels(label in ".*") {
            let d = MicroDecision::decode(&json!({"action": label.clone()}));
            let expected = match label.as_str() {
                "emoji" => MicroAction::Emoji,
                "reply" => MicroAction::Reply,
                "ignore" => MicroAction::Ignore,
                _ => MicroAction::Ignore,
            };
            proptest::prop_assert_eq!(d.action, expected);
        }
    }

    #[test]
    fn test_macro_fallback_keeps_focus() {
        let d = MacroDecision::decode(&json!({"raw_content": "mush"}));
        assert!(d.stay_focus);
        let d = MacroDecision::decode(&json!({"stay_focus": false, "reason": "topic died"}));
        assert!(!d.stay_focus);
    }
}
