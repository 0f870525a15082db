//! Prompt assembly for decisions and replies.
//!
//! Conversation snippets are rendered as simple XML-ish turns; memory and
//! social state go in labeled sections. Prompt text stays in one place so the
//! decision cycle and the replier render context identically.

use suzu_core::{ChatMessage, EpisodicSummary, InboundMessage, Speaker};
use suzu_memory::SocialState;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Render an undecided inbound batch.
pub fn render_batch(batch: &[InboundMessage]) -> String {
    batch
        .iter()
        .map(|m| {
            format!(
                r#"<turn role="user" name="{}" id="{}" time="{}">{}</turn>"#,
                escape(&m.sender_name),
                m.sender_id,
                m.timestamp.format("%H:%M:%S"),
                escape(&m.text),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render recorded history.
pub fn render_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| match &m.speaker {
            Speaker::Assistant => format!(
                r#"<turn role="assistant" time="{}">{}</turn>"#,
                m.timestamp.format("%H:%M:%S"),
                escape(&m.text),
            ),
            Speaker::User { id, name } => format!(
                r#"<turn role="user" name="{}" id="{}" time="{}">{}</turn>"#,
                escape(name),
                id,
                m.timestamp.format("%H:%M:%S"),
                escape(&m.text),
            ),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_list_section(title: &str, items: &[String]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let body = items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("## {title}\n{body}\n\n")
}

pub fn render_episodes(episodes: &[EpisodicSummary], limit: usize) -> String {
    if episodes.is_empty() {
        return String::new();
    }
    let body = episodes
        .iter()
        .rev()
        .take(limit)
        .rev()
        .map(|e| format!("- [{}] {}", e.time_range, e.summary))
        .collect::<Vec<_>>()
        .join("\n");
    format!("## Past episodes\n{body}\n\n")
}

/// One line the decisions use to weigh reluctance against engagement.
pub fn render_social_line(state: &SocialState, max_energy: f64) -> String {
    format!(
        "Social energy: {:.0}/{:.0}, mood: {}. Low energy means you prefer \
         short responses or silence.",
        state.energy,
        max_energy,
        state.mood.as_str(),
    )
}

pub fn render_topic_line(topic: Option<&str>) -> String {
    match topic {
        Some(topic) => format!("Current topic: {topic}\n\n"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use suzu_core::Mood;

    #[test]
    fn test_batch_rendering_escapes_markup() {
        let batch = vec![InboundMessage {
            message_id: "1".into(),
            sender_id: "42".into(),
            sender_name: "mio".into(),
            text: "a < b & c".into(),
            mentions_agent: false,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap(),
        }];
        let xml = render_batch(&batch);
        assert!(xml.contains(r#"name="mio" id="42" time="12:00:05""#));
        assert!(xml.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn test_history_marks_roles() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let xml = render_history(&[
            ChatMessage::user("42", "mio", "hi", ts),
            ChatMessage::assistant("hello", ts),
        ]);
        assert!(xml.contains(r#"role="user" name="mio""#));
        assert!(xml.contains(r#"role="assistant""#));
    }

    #[test]
    fn test_empty_sections_render_nothing() {
        assert_eq!(render_list_section("Traits", &[]), "");
        assert_eq!(render_episodes(&[], 5), "");
        assert_eq!(render_topic_line(None), "");
    }

    #[test]
    fn test_social_line() {
        let state = SocialState {
            energy: 42.4,
            mood: Mood::Negative,
            last_update: Utc::now(),
        };
        let line = render_social_line(&state, 200.0);
        assert!(line.contains("42/200"));
        assert!(line.contains("negative"));
    }
}
