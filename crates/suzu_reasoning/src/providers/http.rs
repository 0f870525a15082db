//! OpenAI-compatible chat-completions provider for the decision oracle.
//!
//! The wall-clock budget in `OracleOptions` bounds the whole call, HTTP
//! retries and parse retries included. A response that survives transport but
//! never parses comes back as the raw-content fallback, never as an error.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use suzu_core::{
    CoreError, DecisionMonitor, DecisionOracle, OracleCallRecord, OracleConfig, OracleOptions,
    RAW_CONTENT_KEY,
};

use crate::retry::{with_retry, RetryConfig};

pub struct HttpOracle {
    client: Client,
    config: OracleConfig,
    retry: RetryConfig,
    monitor: Arc<dyn DecisionMonitor>,
}

impl HttpOracle {
    pub fn new(config: OracleConfig, monitor: Arc<dyn DecisionMonitor>) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| CoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
            monitor,
        })
    }

    async fn call_model(&self, prompt: &str, system: Option<&str>) -> Result<String, CoreError> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));
        let payload = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.7,
        });
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let started = Instant::now();
        let response = with_retry(&self.retry, "oracle", || {
            let payload = payload.clone();
            let url = url.clone();
            async move {
                let mut request = self.client.post(&url).json(&payload);
                if let Some(key) = &self.config.api_key {
                    request = request.bearer_auth(key);
                }
                request.send().await.map_err(Into::into)
            }
        })
        .await
        .map_err(|e| CoreError::Transport(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| CoreError::Transport(format!("invalid response body: {e}")))?;
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.monitor
            .record_oracle_call(OracleCallRecord {
                prompt: prompt.to_string(),
                response: text.clone(),
                model: self.config.model.clone(),
                duration: started.elapsed(),
            })
            .await;
        Ok(text)
    }

    async fn complete_inner(
        &self,
        prompt: &str,
        schema: &str,
        system: Option<&str>,
    ) -> Result<Value, CoreError> {
        let full_prompt = format!(
            "{prompt}\n\nAnswer with a single JSON object of exactly this shape:\n{schema}"
        );
        let attempts = self.config.parse_retries.max(1);
        let mut last_text = String::new();

        for attempt in 1..=attempts {
            let text = self.call_model(&full_prompt, system).await?;
            match parse_json_response(&text) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!("attempt {attempt}/{attempts}: {e}");
                    last_text = text;
                }
            }
        }
        // Out of retries; degrade to raw text rather than losing the answer.
        Ok(json!({ RAW_CONTENT_KEY: last_text }))
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn complete_json(
        &self,
        prompt: &str,
        schema: &str,
        options: OracleOptions,
    ) -> Result<Value, CoreError> {
        let inner = self.complete_inner(prompt, schema, options.system_instruction.as_deref());
        match tokio::time::timeout(options.timeout, inner).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::OracleTimeout(options.timeout)),
        }
    }
}

/// Pull a JSON object out of a model response that may wrap it in markdown
/// fences or surrounding chatter.
fn parse_json_response(text: &str) -> Result<Value, CoreError> {
    let trimmed = text.trim();
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(CoreError::OracleMalformed(
                "no JSON object in response".to_string(),
            ))
        }
    };
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err(CoreError::OracleMalformed(
            "response is JSON but not an object".to_string(),
        )),
        Err(e) => Err(CoreError::OracleMalformed(e.to_string())),
    }
}
