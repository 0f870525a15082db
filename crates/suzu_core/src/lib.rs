//! suzu_core — shared types, config, and external-interface seams for the
//! Suzu decision/session engine.

pub mod config;
pub mod error;
pub mod monitor;
pub mod oracle;
pub mod transport;
pub mod types;

pub use config::{
    InteractionConfig, MemoryConfig, OracleConfig, PersonaConfig, SocialConfig, SuzuConfig,
};
pub use error::CoreError;
pub use monitor::{DecisionKind, DecisionMonitor, DecisionRecord, NullMonitor, OracleCallRecord};
pub use oracle::{is_raw_fallback, raw_fallback_text, DecisionOracle, OracleOptions, RAW_CONTENT_KEY};
pub use transport::{MessageId, OutboundContent, ReplyGenerator, Transport};
pub use types::{
    ChatMessage, EpisodicSummary, InboundMessage, MemberKey, Mood, PersonaSessionId, SessionId,
    Speaker,
};
