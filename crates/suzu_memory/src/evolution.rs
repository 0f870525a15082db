//! Trait and impression evolution.
//!
//! Evolution turns a consolidated window of dialogue into durable persona
//! traits and per-user (or per-group, per-member) impressions. Lists grow by
//! dedup-append and are compressed back down by a dedicated oracle call once
//! they exceed their cap; a failed compression truncates instead, so a cap is
//! a hard bound either way.

use serde_json::Value;

use suzu_core::{is_raw_fallback, ChatMessage, DecisionOracle, OracleOptions, PersonaSessionId};

use crate::store::MemoryStore;

/// How far compression shrinks an over-cap list.
pub const COMPRESSED_LEN: usize = 15;

/// Which kind of list an oracle call is shaping. Only affects prompt wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Traits,
    Impressions,
}

impl ListKind {
    fn label(&self) -> &'static str {
        match self {
            ListKind::Traits => "personality traits",
            ListKind::Impressions => "impressions of the user",
        }
    }
}

/// Transcript of the window with assistant lines removed. Traits and
/// impressions describe the humans in the conversation; the agent's own
/// lines must not feed back into them.
fn user_transcript(window: &[ChatMessage]) -> String {
    window
        .iter()
        .filter(|m| !m.speaker.is_assistant())
        .map(ChatMessage::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Append `additions` to `current`, skipping exact duplicates.
fn dedup_append(current: &mut Vec<String>, additions: Vec<String>) {
    for item in additions {
        let item = item.trim().to_string();
        if !item.is_empty() && !current.iter().any(|existing| existing == &item) {
            current.push(item);
        }
    }
}

// ============================================================================
// Trait evolution
// ============================================================================

pub async fn evolve_traits(
    store: &MemoryStore,
    oracle: &dyn DecisionOracle,
    id: &PersonaSessionId,
    window: &[ChatMessage],
) {
    let transcript = user_transcript(window);
    if transcript.is_empty() {
        return;
    }
    let current = store.traits(id).await;
    let prompt = format!(
        "You maintain the evolving personality traits of a conversational agent.\n\
         Current traits:\n{}\n\n\
         Recent conversation (user messages only):\n{}\n\n\
         List only genuinely NEW traits this conversation reveals. Return an \
         empty list if nothing new emerged.",
        render_list(&current),
        transcript,
    );

    let response = oracle
        .complete_json(&prompt, r#"{"new_traits": ["..."]}"#, OracleOptions::default())
        .await;
    let value = match response {
        Ok(v) if !is_raw_fallback(&v) => v,
        Ok(_) => {
            tracing::warn!("trait evolution for {id} returned unparseable output, skipping");
            return;
        }
        Err(e) => {
            tracing::warn!("trait evolution for {id} failed: {e}");
            return;
        }
    };

    let mut traits = current;
    dedup_append(&mut traits, string_array(&value, "new_traits"));
    if traits.len() > store.config().trait_cap {
        traits = compress_list(oracle, ListKind::Traits, traits).await;
    }
    store.set_traits(id, traits).await;
}

// ============================================================================
// Impression evolution
// ============================================================================

/// Evolve impressions from a consolidated window. Private sessions keep a
/// single list; group sessions keep a whole-group list plus one list per
/// member who spoke.
pub async fn evolve_impressions(
    store: &MemoryStore,
    oracle: &dyn DecisionOracle,
    id: &PersonaSessionId,
    window: &[ChatMessage],
    is_group: bool,
) {
    let transcript = user_transcript(window);
    if transcript.is_empty() {
        return;
    }
    if is_group {
        evolve_group_impressions(store, oracle, id, &transcript).await;
    } else {
        evolve_private_impressions(store, oracle, id, &transcript).await;
    }
}

async fn evolve_private_impressions(
    store: &MemoryStore,
    oracle: &dyn DecisionOracle,
    id: &PersonaSessionId,
    transcript: &str,
) {
    let current = store.impressions(id).await;
    let prompt = format!(
        "You maintain the agent's impressions of its conversation partner.\n\
         Current impressions:\n{}\n\n\
         Recent conversation (user messages only):\n{}\n\n\
         List only NEW impressions. Return an empty list if nothing new emerged.",
        render_list(&current),
        transcript,
    );

    let response = oracle
        .complete_json(
            &prompt,
            r#"{"new_impressions": ["..."]}"#,
            OracleOptions::default(),
        )
        .await;
    let value = match response {
        Ok(v) if !is_raw_fallback(&v) => v,
        Ok(_) | Err(_) => {
            tracing::warn!("impression evolution for {id} produced no usable output");
            return;
        }
    };

    let mut impressions = current;
    dedup_append(&mut impressions, string_array(&value, "new_impressions"));
    if impressions.len() > store.config().trait_cap {
        impressions = compress_list(oracle, ListKind::Impressions, impressions).await;
    }
    store.set_impressions(id, impressions).await;
}

async fn evolve_group_impressions(
    store: &MemoryStore,
    oracle: &dyn DecisionOracle,
    id: &PersonaSessionId,
    transcript: &str,
) {
    let current = store.impressions(id).await;
    let prompt = format!(
        "You maintain the agent's impressions of a group chat: one list for \
         the group's overall atmosphere and one list per member, keyed by the \
         member id in parentheses.\n\
         Current group impressions:\n{}\n\n\
         Recent conversation (user messages only):\n{}\n\n\
         List only NEW impressions. Omit members with nothing new.",
        render_list(&current),
        transcript,
    );

    let response = oracle
        .complete_json(
            &prompt,
            r#"{"group": ["..."], "members": {"member_id": ["..."]}}"#,
            OracleOptions::default(),
        )
        .await;
    let value = match response {
        Ok(v) if !is_raw_fallback(&v) => v,
        Ok(_) | Err(_) => {
            tracing::warn!("group impression evolution for {id} produced no usable output");
            return;
        }
    };

    let mut group = current;
    dedup_append(&mut group, string_array(&value, "group"));
    if group.len() > store.config().trait_cap {
        group = compress_list(oracle, ListKind::Impressions, group).await;
    }
    store.set_impressions(id, group).await;

    let member_cap = store.config().member_impression_cap;
    if let Some(members) = value.get("members").and_then(Value::as_object) {
        for (member_id, additions) in members {
            let additions: Vec<String> = additions
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if additions.is_empty() {
                continue;
            }
            let key = id.member(member_id);
            let mut list = store.member_impressions(&key).await;
            dedup_append(&mut list, additions);
            if list.len() > member_cap {
                list = compress_list(oracle, ListKind::Impressions, list).await;
            }
            store.set_member_impressions(&key, list).await;
        }
    }
}

// ============================================================================
// Compression
// ============================================================================

/// Ask the oracle to merge an over-cap list down to `COMPRESSED_LEN` entries.
/// If the call fails or comes back unusable, truncate to the same length so
/// the list never stays over cap.
pub async fn compress_list(
    oracle: &dyn DecisionOracle,
    kind: ListKind,
    items: Vec<String>,
) -> Vec<String> {
    let prompt = format!(
        "The following list of {} has grown too long. Merge overlapping \
         entries and drop the least significant ones, keeping at most {} \
         entries. Preserve the original wording where possible.\n\n{}",
        kind.label(),
        COMPRESSED_LEN,
        render_list(&items),
    );

    let response = oracle
        .complete_json(
            &prompt,
            r#"{"consolidated_list": ["..."]}"#,
            OracleOptions::default(),
        )
        .await;
    match response {
        Ok(v) if !is_raw_fallback(&v) => {
            let compressed = string_array(&v, "consolidated_list");
            if compressed.is_empty() || compressed.len() > items.len() {
                truncate_to(items, COMPRESSED_LEN)
            } else {
                truncate_to(compressed, COMPRESSED_LEN)
            }
        }
        Ok(_) | Err(_) => {
            tracing::warn!("list compression failed, truncating to {COMPRESSED_LEN}");
            truncate_to(items, COMPRESSED_LEN)
        }
    }
}

fn truncate_to(mut items: Vec<String>, len: usize) -> Vec<String> {
    items.truncate(len);
    items
}

fn render_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
