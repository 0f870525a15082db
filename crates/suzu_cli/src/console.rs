//! Console transport: outbound messages go to stdout, history backfill is
//! empty. Good enough to exercise the whole decision pipeline offline.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use suzu_core::{CoreError, InboundMessage, MessageId, OutboundContent, SessionId, Transport};

#[derive(Default)]
pub struct ConsoleTransport {
    next_id: AtomicU64,
}

#[async_trait]
impl Transport for ConsoleTransport {
    async fn send_message(
        &self,
        _session: &SessionId,
        _is_group: bool,
        content: OutboundContent,
    ) -> Result<MessageId, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match content {
            OutboundContent::Text(text) => println!("suzu: {text}"),
            OutboundContent::Emoji(emoji) => println!("suzu: [reaction {emoji}]"),
        }
        Ok(format!("console-{id}"))
    }

    async fn delete_message(&self, message_id: &MessageId) -> Result<(), CoreError> {
        println!("suzu: [withdrew {message_id}]");
        Ok(())
    }

    async fn fetch_recent_history(
        &self,
        _session: &SessionId,
        _count: usize,
    ) -> Result<Vec<InboundMessage>, CoreError> {
        Ok(Vec::new())
    }
}
