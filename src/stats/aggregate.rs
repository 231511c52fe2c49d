//! Conversation-wide usage totals.

use crate::types::{Message, MessageStats, Role, StatsStatus};
use serde::{Deserialize, Serialize};

/// Running totals across all assistant messages with final stats.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeStats {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_cached_tokens: u64,
    pub total_reasoning_tokens: u64,
    pub total_execution_time_ms: u64,
    pub message_count: u64,
    pub tokens_unavailable_count: u64,
}

impl CumulativeStats {
    /// Fold one message's final stats into the totals.
    ///
    /// Pending stats leave the totals untouched. Token counts are added only
    /// for resolved stats; every other terminal state counts as unavailable.
    /// Execution time always adds.
    pub fn fold(self, stats: &MessageStats) -> Self {
        if !stats.stats_status.is_terminal() {
            return self;
        }
        let mut next = self;
        next.message_count = next.message_count.saturating_add(1);
        next.total_execution_time_ms = next
            .total_execution_time_ms
            .saturating_add(stats.execution_time_ms);
        if counts_tokens(stats) {
            let tokens = stats.tokens;
            next.total_prompt_tokens = next.total_prompt_tokens.saturating_add(tokens.prompt_tokens);
            next.total_completion_tokens = next
                .total_completion_tokens
                .saturating_add(tokens.completion_tokens);
            next.total_cached_tokens = next.total_cached_tokens.saturating_add(tokens.cached_tokens);
            next.total_reasoning_tokens = next
                .total_reasoning_tokens
                .saturating_add(tokens.reasoning_tokens);
        } else {
            next.tokens_unavailable_count = next.tokens_unavailable_count.saturating_add(1);
        }
        next
    }

    /// Rebuild totals from a full message list, e.g. a loaded conversation.
    pub fn from_messages(messages: &[Message]) -> Self {
        messages
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .filter_map(|message| message.stats.as_ref())
            .fold(Self::default(), |totals, stats| totals.fold(stats))
    }

    /// Sum of prompt and completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens
            .saturating_add(self.total_completion_tokens)
    }
}

fn counts_tokens(stats: &MessageStats) -> bool {
    stats.stats_status == StatsStatus::Resolved && !stats.tokens_unavailable
}
