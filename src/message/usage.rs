//! Running usage totals for one streamed message.

use crate::types::{MessageStats, StatsStatus, TokenUsage};

/// Sums incremental `usage` events from a multi-step agent loop.
#[derive(Debug, Clone, Default)]
pub struct UsageAccumulator {
    seen: bool,
    tokens: TokenUsage,
    execution_time_ms: Option<u64>,
    tokens_unavailable: bool,
    root_span_id: Option<String>,
    awaiting_backend: bool,
}

impl UsageAccumulator {
    /// Fold one `usage` event.
    ///
    /// Token fields and execution time add up across events. A missing token
    /// payload marks the message as uncountable but its time still counts.
    pub fn merge(
        &mut self,
        usage: Option<TokenUsage>,
        execution_time_ms: Option<u64>,
        root_span_id: Option<String>,
        stats_status: Option<StatsStatus>,
    ) {
        self.seen = true;
        match usage {
            Some(tokens) => self.tokens = self.tokens.saturating_add(tokens),
            None => self.tokens_unavailable = true,
        }
        if let Some(ms) = execution_time_ms {
            self.execution_time_ms = Some(self.execution_time_ms.unwrap_or(0).saturating_add(ms));
        }
        if let Some(span) = root_span_id.filter(|span| !span.trim().is_empty()) {
            self.root_span_id = Some(span);
        }
        if stats_status == Some(StatsStatus::Pending) {
            self.awaiting_backend = true;
        }
    }

    /// Final per-message stats, or `None` when no usage was reported.
    ///
    /// `fallback_ms` is used when the server never reported execution time.
    pub fn into_stats(self, fallback_ms: u64) -> Option<MessageStats> {
        if !self.seen {
            return None;
        }
        let stats_status = if self.awaiting_backend && self.root_span_id.is_some() {
            StatsStatus::Pending
        } else if self.tokens_unavailable {
            StatsStatus::Unavailable
        } else {
            StatsStatus::Resolved
        };
        Some(MessageStats {
            tokens: self.tokens,
            execution_time_ms: self.execution_time_ms.unwrap_or(fallback_ms),
            stats_status,
            tokens_unavailable: self.tokens_unavailable,
            root_span_id: self.root_span_id,
        })
    }
}
