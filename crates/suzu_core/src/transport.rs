//! External collaborator seams: the chat platform and the reply generator.

use crate::error::CoreError;
use crate::types::{InboundMessage, SessionId};
use async_trait::async_trait;

/// Platform-assigned id of a sent message, needed to withdraw it later.
pub type MessageId = String;

/// What the scheduler can put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundContent {
    Text(String),
    /// A reaction/emoji by platform id.
    Emoji(u32),
}

/// The chat-platform transport. Send/delete failures are logged and swallowed
/// by callers — they must never crash a session loop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_message(
        &self,
        session: &SessionId,
        is_group: bool,
        content: OutboundContent,
    ) -> Result<MessageId, CoreError>;

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), CoreError>;

    /// Best-effort history backfill; callers treat failure as an empty result.
    async fn fetch_recent_history(
        &self,
        session: &SessionId,
        count: usize,
    ) -> Result<Vec<InboundMessage>, CoreError>;
}

/// Turns a settled batch into outbound reply fragments.
///
/// The model call behind this is out of core scope; the scheduler only relies
/// on the fragment list and on the call respecting cancellation.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        session: &SessionId,
        batch: &[InboundMessage],
        is_group: bool,
    ) -> Result<Vec<String>, CoreError>;
}
