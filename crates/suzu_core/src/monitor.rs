//! Observability sink for decisions and oracle interactions.
//!
//! Fire-and-forget: implementations swallow their own failures and must never
//! block or fail the calling operation.

use crate::types::SessionId;
use async_trait::async_trait;
use std::time::Duration;

/// Which decision produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Entry,
    Micro,
    Macro,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Entry => "entry",
            DecisionKind::Micro => "micro",
            DecisionKind::Macro => "macro",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub kind: DecisionKind,
    pub session: SessionId,
    /// The decoded result, or the fallback that replaced it.
    pub result: serde_json::Value,
    pub reason: String,
    pub latency: Duration,
}

#[derive(Debug, Clone)]
pub struct OracleCallRecord {
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub duration: Duration,
}

#[async_trait]
pub trait DecisionMonitor: Send + Sync {
    async fn record_decision(&self, record: DecisionRecord);
    async fn record_oracle_call(&self, record: OracleCallRecord);
}

/// Sink that drops everything. Useful default for tests and embedding.
pub struct NullMonitor;

#[async_trait]
impl DecisionMonitor for NullMonitor {
    async fn record_decision(&self, record: DecisionRecord) {
        tracing::debug!(
            kind = record.kind.as_str(),
            session = %record.session,
            latency_ms = record.latency.as_millis() as u64,
            "decision: {}",
            record.reason
        );
    }

    async fn record_oracle_call(&self, record: OracleCallRecord) {
        tracing::trace!(
            model = %record.model,
            duration_ms = record.duration.as_millis() as u64,
            "oracle call ({} prompt chars)",
            record.prompt.len()
        );
    }
}
