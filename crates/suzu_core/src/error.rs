use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy for the session/decision core.
///
/// Nothing here is fatal to the process: every variant is recovered at the
/// session-loop boundary with a conservative default, a requeue, or a logged
/// skip.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The oracle did not answer within its timeout budget.
    #[error("oracle call timed out after {0:?}")]
    OracleTimeout(Duration),

    /// The oracle answered, but the response could not be decoded even after
    /// bounded retries.
    #[error("oracle returned malformed output: {0}")]
    OracleMalformed(String),

    /// A send/delete/fetch against the chat platform failed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A repository write failed. In-memory state stays authoritative.
    #[error("persistence failure: {0}")]
    Persistence(String),
}
