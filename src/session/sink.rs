//! Persistence hand-off for finalized messages.

use crate::types::Message;

/// Receives every finalized message exactly once.
///
/// `index` is the message's position in the conversation. Interrupted and
/// partial assistant messages are delivered too.
pub trait MessageSink: Send + Sync {
    fn save(&self, message: &Message, index: usize);
}

impl<F> MessageSink for F
where
    F: Fn(&Message, usize) + Send + Sync,
{
    fn save(&self, message: &Message, index: usize) {
        self(message, index)
    }
}

/// Sink that only logs; used when the caller keeps no store.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn save(&self, message: &Message, index: usize) {
        tracing::debug!(
            message_id = %message.id,
            index,
            parts = message.parts.len(),
            interrupted = message.interrupted,
            "message finalized"
        );
    }
}
