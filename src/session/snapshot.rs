//! Read-only session state published to callers.

use crate::stats::CumulativeStats;
use crate::types::{Message, MessageStats};
use serde::Serialize;

/// Facade lifecycle.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Ready,
    Streaming,
    Error,
}

/// Consistent view of everything the session owns.
///
/// Each update replaces the previous snapshot as a whole; readers never see a
/// half-applied change.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Finalized messages in conversation order.
    pub messages: Vec<Message>,
    /// The assistant message currently being streamed.
    pub streaming: Option<Message>,
    pub cumulative: CumulativeStats,
    /// Failure of the current turn; cleared by the next send.
    pub error: Option<String>,
    /// Sandbox to reuse on the next request.
    pub sandbox_id: Option<String>,
    /// Highest agent-loop iteration of the streaming turn.
    pub iteration: Option<u32>,
    #[serde(skip)]
    pub(crate) epoch: u64,
}

impl SessionSnapshot {
    /// Store final stats for a message and fold them into the totals once.
    ///
    /// Returns `true` when the totals changed.
    pub(crate) fn apply_stats(&mut self, message_id: &str, stats: MessageStats) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|message| message.id == message_id)
        else {
            return false;
        };
        if !message.apply_stats(stats.clone()) {
            return false;
        }
        self.cumulative = self.cumulative.fold(&stats);
        true
    }

    /// Messages still waiting for stats, as `(message_id, stats)`.
    pub fn pending_stats(&self) -> Vec<(String, MessageStats)> {
        self.messages
            .iter()
            .filter(|message| message.pending_root_span().is_some())
            .filter_map(|message| {
                message
                    .stats
                    .clone()
                    .map(|stats| (message.id.clone(), stats))
            })
            .collect()
    }
}
