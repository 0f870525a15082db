//! Offline oracle for demos and wiring tests. Answers every schema with a
//! plausible canned decision, keyed off the schema shape.

use async_trait::async_trait;
use serde_json::{json, Value};

use suzu_core::{CoreError, DecisionOracle, OracleOptions};

pub struct MockOracle;

#[async_trait]
impl DecisionOracle for MockOracle {
    async fn complete_json(
        &self,
        _prompt: &str,
        schema: &str,
        _options: OracleOptions,
    ) -> Result<Value, CoreError> {
        let value = if schema.contains("enter_focus") {
            json!({"reply": true, "enter_focus": false, "emoji_id": null,
                   "reason": "mock entry decision", "current_topic": null})
        } else if schema.contains("exit_focus") {
            json!({"action": "ignore", "emoji_id": null, "exit_focus": false,
                   "reason": "mock micro decision", "current_topic": null})
        } else if schema.contains("stay_focus") {
            json!({"stay_focus": false, "reason": "mock macro decision", "current_topic": null})
        } else if schema.contains("fragments") {
            json!({"fragments": ["(mock reply)"], "mood": "normal"})
        } else if schema.contains("summary") {
            json!({"summary": "SKIP", "trigger_evolution": false})
        } else if schema.contains("new_traits") {
            json!({"new_traits": []})
        } else if schema.contains("new_impressions") {
            json!({"new_impressions": []})
        } else if schema.contains("consolidated_list") {
            json!({"consolidated_list": []})
        } else {
            json!({"group": [], "members": {}})
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{EntryDecision, MicroAction, MicroDecision, ENTRY_SCHEMA, MICRO_SCHEMA};

    #[tokio::test]
    async fn test_mock_answers_match_decision_schemas() {
        let oracle = MockOracle;
        let entry = oracle
            .complete_json("p", ENTRY_SCHEMA, OracleOptions::default())
            .await
            .unwrap();
        let entry = EntryDecision::decode(&entry, false);
        assert!(entry.reply && !entry.enter_focus);

        let micro = oracle
            .complete_json("p", MICRO_SCHEMA, OracleOptions::default())
            .await
            .unwrap();
        assert_eq!(MicroDecision::decode(&micro).action, MicroAction::Ignore);
    }
}
