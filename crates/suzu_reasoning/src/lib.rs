//! suzu_reasoning — the decision oracle providers, the three decision
//! operations, and reply generation.

pub mod context;
pub mod cycle;
pub mod decision;
pub mod providers;
pub mod replier;
pub mod retry;

pub use cycle::DecisionCycle;
pub use decision::{
    EntryDecision, MacroDecision, MicroAction, MicroDecision, ENTRY_SCHEMA, MACRO_SCHEMA,
    MICRO_SCHEMA,
};
pub use providers::{HttpOracle, MockOracle};
pub use replier::{OracleReplier, REPLY_SCHEMA};
pub use retry::{with_retry, RetryConfig};
