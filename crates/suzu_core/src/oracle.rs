//! The Decision Oracle seam.
//!
//! Every structured call the core makes — the three decision kinds, the two
//! evolution calls, the two summarization calls — goes through this single
//! interface. Providers own their retry and timeout handling; callers only
//! see a decoded JSON value or a `CoreError`.

use crate::error::CoreError;
use async_trait::async_trait;
use std::time::Duration;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct OracleOptions {
    /// Wall-clock budget for the whole call, retries included.
    pub timeout: Duration,
    pub system_instruction: Option<String>,
}

impl Default for OracleOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            system_instruction: None,
        }
    }
}

impl OracleOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Key carrying the raw response text when every parse attempt failed.
///
/// A value containing this key is the degraded-but-usable fallback: decision
/// decoding treats it as a failure, summarization stores it verbatim.
pub const RAW_CONTENT_KEY: &str = "raw_content";

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// Complete `prompt` into JSON matching `schema` (a literal example of the
    /// expected shape, embedded in the prompt).
    ///
    /// Implementations must retry transient parse failures a bounded number
    /// of times; after that they return `Ok` with a `{RAW_CONTENT_KEY: text}`
    /// object rather than losing the response entirely. `Err` is reserved for
    /// timeouts and transport-level failures.
    async fn complete_json(
        &self,
        prompt: &str,
        schema: &str,
        options: OracleOptions,
    ) -> Result<serde_json::Value, CoreError>;
}

/// Whether a response is the raw-content fallback rather than decoded JSON.
pub fn is_raw_fallback(value: &serde_json::Value) -> bool {
    value.get(RAW_CONTENT_KEY).is_some()
}

/// Extract the raw fallback text, if this value is one.
pub fn raw_fallback_text(value: &serde_json::Value) -> Option<&str> {
    value.get(RAW_CONTENT_KEY).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_fallback_detection() {
        assert!(is_raw_fallback(&json!({"raw_content": "garbled"})));
        assert!(!is_raw_fallback(&json!({"reply": true})));
        assert_eq!(
            raw_fallback_text(&json!({"raw_content": "garbled"})),
            Some("garbled")
        );
    }
}
