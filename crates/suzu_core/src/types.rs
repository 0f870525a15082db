//! Shared identifier and message types.
//!
//! A conversation channel (one private user or one group) is a `SessionId`.
//! Memory is partitioned one level deeper: `PersonaSessionId` adds the active
//! persona name, so switching persona switches the whole memory view without
//! deleting anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque identifier for one conversation channel (user or group).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The true memory partition key: session plus active persona.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonaSessionId {
    pub session: SessionId,
    pub persona: String,
}

impl PersonaSessionId {
    pub fn new(session: SessionId, persona: impl Into<String>) -> Self {
        Self {
            session,
            persona: persona.into(),
        }
    }

    /// Key for the impression set of one group member under this persona.
    pub fn member(&self, member_id: &str) -> MemberKey {
        MemberKey {
            group: self.session.clone(),
            member_id: member_id.to_string(),
            persona: self.persona.clone(),
        }
    }
}

impl fmt::Display for PersonaSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session, self.persona)
    }
}

/// Partition key for per-member impressions inside a group session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberKey {
    pub group: SessionId,
    pub member_id: String,
    pub persona: String,
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.member_id, self.persona)
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Who produced a recorded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Speaker {
    Assistant,
    User {
        id: String,
        #[serde(default)]
        name: String,
    },
}

impl Speaker {
    pub fn is_assistant(&self) -> bool {
        matches!(self, Speaker::Assistant)
    }
}

/// One recorded line of dialogue in a persona session's working history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn assistant(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(
        id: impl Into<String>,
        name: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            speaker: Speaker::User {
                id: id.into(),
                name: name.into(),
            },
            text: text.into(),
            timestamp,
        }
    }

    /// One plain transcript line, used for summarization and evolution input.
    pub fn transcript_line(&self) -> String {
        let when = self.timestamp.format("%Y-%m-%d %H:%M:%S");
        match &self.speaker {
            Speaker::Assistant => format!("[{when}] AI(assistant): {}", self.text),
            Speaker::User { id, name } => format!("[{when}] {name}({id}): {}", self.text),
        }
    }
}

/// An inbound platform message awaiting a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-assigned id, used only for de-duplication.
    pub message_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    /// Whether the message @-mentioned the agent directly.
    #[serde(default)]
    pub mentions_agent: bool,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::user(
            self.sender_id.clone(),
            self.sender_name.clone(),
            self.text.clone(),
            self.timestamp,
        )
    }
}

/// One durable episodic record produced by consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicSummary {
    pub summary: String,
    /// Human-readable span of the consolidated window, e.g. "a to b".
    pub time_range: String,
}

// ============================================================================
// Mood
// ============================================================================

/// Mood of the social-energy simulation. Drives the recovery rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Positive,
    Normal,
    Negative,
}

impl Mood {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Positive => "positive",
            Mood::Normal => "normal",
            Mood::Negative => "negative",
        }
    }

    /// Parse a mood label; unknown labels are rejected so a garbled oracle
    /// answer can never corrupt the state.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "positive" => Some(Mood::Positive),
            "normal" => Some(Mood::Normal),
            "negative" => Some(Mood::Negative),
            _ => None,
        }
    }
}

impl Default for Mood {
    fn default() -> Self {
        Mood::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_session_key_format() {
        let id = PersonaSessionId::new(SessionId::from("10001"), "default");
        assert_eq!(id.to_string(), "10001:default");

        let member = id.member("42");
        assert_eq!(member.to_string(), "10001:42:default");
    }

    #[test]
    fn test_mood_parse_rejects_unknown() {
        assert_eq!(Mood::parse("positive"), Some(Mood::Positive));
        assert_eq!(Mood::parse("ecstatic"), None);
        assert_eq!(Mood::parse(""), None);
    }

    #[test]
    fn test_transcript_line_shapes() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let user = ChatMessage::user("42", "mio", "hello", ts);
        assert!(user.transcript_line().contains("mio(42): hello"));

        let ai = ChatMessage::assistant("hi", ts);
        assert!(ai.transcript_line().contains("AI(assistant): hi"));
    }
}
