//! Test-only oracle that replays scripted responses.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

use suzu_core::{CoreError, DecisionOracle, OracleOptions};

struct Scripted {
    /// Substring of the schema this response is reserved for, if any.
    schema_key: Option<String>,
    response: Result<Value, CoreError>,
}

/// Replays queued responses in order. Keyed entries are matched against the
/// call's schema instead, so concurrent calls cannot steal each other's
/// response.
pub struct ScriptedOracle {
    responses: Mutex<Vec<Scripted>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn with(responses: Vec<Result<Value, CoreError>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|response| Scripted {
                        schema_key: None,
                        response,
                    })
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_keyed(responses: Vec<(&str, Result<Value, CoreError>)>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|(key, response)| Scripted {
                        schema_key: Some(key.to_string()),
                        response,
                    })
                    .collect(),
            ),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete_json(
        &self,
        prompt: &str,
        schema: &str,
        _options: OracleOptions,
    ) -> Result<Value, CoreError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        let pos = responses.iter().position(|s| match &s.schema_key {
            Some(key) => schema.contains(key.as_str()),
            None => true,
        });
        match pos {
            Some(pos) => responses.remove(pos).response,
            None => Ok(json!({"raw_content": "script exhausted"})),
        }
    }
}
