//! Per-message stats polling with a stability acceptance rule.
//!
//! The observability backend aggregates asynchronously and may report partial
//! totals for a while. A value is accepted only after it was observed
//! identically on several consecutive polls; attempts are bounded and spaced
//! by a fixed interval.

use super::client::{StatsResponse, StatsSource};
use crate::error::ApiError;
use crate::types::{MessageStats, StatsStatus, TokenUsage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Fixed delay before every attempt.
    pub base_interval: Duration,
    /// Hard ceiling on attempts.
    pub max_attempts: u32,
    /// Identical consecutive observations needed to accept a value.
    pub consecutive_matches_required: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(2000),
            max_attempts: 8,
            consecutive_matches_required: 3,
        }
    }
}

/// Result of folding one attempt into a [`PollState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Schedule another attempt.
    Continue,
    /// A value was stable for the required number of polls.
    Stable(TokenUsage),
    /// The backend has no record of this span.
    NotFound,
    /// Attempts ran out; carries the last observation, if any.
    Exhausted(Option<TokenUsage>),
}

impl PollStep {
    /// Terminal stats for this step, built on the stream-side `base` stats.
    pub fn into_stats(self, base: &MessageStats) -> Option<MessageStats> {
        let (tokens, stats_status, tokens_unavailable) = match self {
            Self::Continue => return None,
            Self::Stable(tokens) => (tokens, StatsStatus::Resolved, false),
            Self::NotFound => (base.tokens, StatsStatus::Failed, true),
            Self::Exhausted(last) => (last.unwrap_or(base.tokens), StatsStatus::Failed, true),
        };
        Some(MessageStats {
            tokens,
            execution_time_ms: base.execution_time_ms,
            stats_status,
            tokens_unavailable,
            root_span_id: base.root_span_id.clone(),
        })
    }
}

/// Private state of one message's poll loop.
#[derive(Debug, Default)]
pub struct PollState {
    attempt: u32,
    consecutive_matches: u32,
    last_observed: Option<TokenUsage>,
    aborted: Arc<AtomicBool>,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn consecutive_matches(&self) -> u32 {
        self.consecutive_matches
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn abort_flag(&self) -> Arc<AtomicBool> {
        self.aborted.clone()
    }

    /// Fold the outcome of one attempt.
    pub fn observe(
        &mut self,
        outcome: Result<StatsResponse, ApiError>,
        config: &PollConfig,
    ) -> PollStep {
        self.attempt = self.attempt.saturating_add(1);
        match outcome {
            Err(err) if err.is_not_found() => return PollStep::NotFound,
            Err(err) => {
                tracing::warn!(attempt = self.attempt, error = %err, "stats poll failed; retrying");
            }
            Ok(StatsResponse::Resolved {
                stats: Some(observed),
            }) => {
                if self.last_observed == Some(observed) {
                    self.consecutive_matches = self.consecutive_matches.saturating_add(1);
                } else {
                    self.consecutive_matches = 1;
                    self.last_observed = Some(observed);
                }
                if self.consecutive_matches >= config.consecutive_matches_required {
                    return PollStep::Stable(observed);
                }
            }
            Ok(StatsResponse::Resolved { stats: None }) | Ok(StatsResponse::Pending) => {}
        }
        if self.attempt >= config.max_attempts {
            PollStep::Exhausted(self.last_observed)
        } else {
            PollStep::Continue
        }
    }
}

/// Callback receiving `(message_id, final_stats)` once per finished poll.
pub type ResolutionCallback = Arc<dyn Fn(String, MessageStats) + Send + Sync>;

struct PollHandle {
    generation: u64,
    aborted: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    fn cancel(self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.task.abort();
    }
}

type Registry = Arc<Mutex<HashMap<String, PollHandle>>>;

/// Registry of in-flight polls keyed by message id.
///
/// Each poll runs as its own task. Polls are independent of any stream
/// cancellation; they end on resolution, [`StatsPoller::stop`], or
/// [`StatsPoller::stop_all`] (also run on drop).
pub struct StatsPoller {
    source: Arc<dyn StatsSource>,
    config: PollConfig,
    registry: Registry,
    next_generation: AtomicU64,
}

impl StatsPoller {
    pub fn new(source: Arc<dyn StatsSource>, config: PollConfig) -> Self {
        Self {
            source,
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Begin polling for a message whose stats are pending.
    ///
    /// Returns `false` when a poll for `message_id` is already active or the
    /// stats carry no root span id to query.
    pub fn start(
        &self,
        message_id: &str,
        conversation_id: &str,
        base: MessageStats,
        on_resolved: ResolutionCallback,
    ) -> bool {
        let Some(root_span_id) = base.root_span_id.clone() else {
            tracing::debug!(message_id, "pending stats without root span; not polling");
            return false;
        };
        let Ok(mut registry) = self.registry.lock() else {
            return false;
        };
        if registry.contains_key(message_id) {
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let state = PollState::new();
        let aborted = state.abort_flag();
        let job = PollJob {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            root_span_id,
            base,
            generation,
            state,
            source: self.source.clone(),
            config: self.config,
            registry: self.registry.clone(),
            on_resolved,
        };
        // The registry lock is held until the handle is stored, so the task
        // cannot try to deregister before it is registered.
        let task = tokio::spawn(job.run());
        registry.insert(
            message_id.to_string(),
            PollHandle {
                generation,
                aborted,
                task,
            },
        );
        true
    }

    /// Cancel the poll for one message. No attempt fires afterwards.
    pub fn stop(&self, message_id: &str) -> bool {
        let handle = match self.registry.lock() {
            Ok(mut registry) => registry.remove(message_id),
            Err(_) => None,
        };
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every poll.
    pub fn stop_all(&self) {
        let handles: Vec<PollHandle> = match self.registry.lock() {
            Ok(mut registry) => registry.drain().map(|(_, handle)| handle).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            handle.cancel();
        }
    }

    pub fn is_polling(&self, message_id: &str) -> bool {
        self.registry
            .lock()
            .map(|registry| registry.contains_key(message_id))
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.registry
            .lock()
            .map(|registry| registry.len())
            .unwrap_or(0)
    }
}

impl Drop for StatsPoller {
    fn drop(&mut self) {
        self.stop_all();
    }
}

struct PollJob {
    message_id: String,
    conversation_id: String,
    root_span_id: String,
    base: MessageStats,
    generation: u64,
    state: PollState,
    source: Arc<dyn StatsSource>,
    config: PollConfig,
    registry: Registry,
    on_resolved: ResolutionCallback,
}

impl PollJob {
    async fn run(mut self) {
        loop {
            tokio::time::sleep(self.config.base_interval).await;
            if self.state.is_aborted() {
                return;
            }
            let outcome = self
                .source
                .fetch(&self.root_span_id, &self.conversation_id)
                .await;
            if self.state.is_aborted() {
                return;
            }
            let step = self.state.observe(outcome, &self.config);
            let Some(stats) = step.into_stats(&self.base) else {
                continue;
            };
            if !self.deregister() {
                return;
            }
            tracing::info!(
                message_id = %self.message_id,
                attempts = self.state.attempt(),
                status = ?stats.stats_status,
                "stats poll finished"
            );
            (self.on_resolved)(self.message_id.clone(), stats);
            return;
        }
    }

    /// Remove this poll's registry entry; `false` if it was already stopped.
    fn deregister(&self) -> bool {
        let Ok(mut registry) = self.registry.lock() else {
            return false;
        };
        let owned = registry
            .get(&self.message_id)
            .is_some_and(|handle| handle.generation == self.generation);
        if owned {
            registry.remove(&self.message_id);
        }
        owned && !self.state.is_aborted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::ScriptedStats;

    fn usage(prompt: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: 1,
            ..TokenUsage::default()
        }
    }

    fn resolved(prompt: u64) -> Result<StatsResponse, ApiError> {
        Ok(StatsResponse::Resolved {
            stats: Some(usage(prompt)),
        })
    }

    fn base_stats() -> MessageStats {
        MessageStats {
            execution_time_ms: 900,
            stats_status: StatsStatus::Pending,
            root_span_id: Some("span".into()),
            ..MessageStats::default()
        }
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            base_interval: Duration::from_millis(1),
            max_attempts: 8,
            consecutive_matches_required: 3,
        }
    }

    #[test]
    fn stable_after_three_identical_observations() {
        let config = PollConfig::default();
        let mut state = PollState::new();
        assert_eq!(state.observe(Ok(StatsResponse::Pending), &config), PollStep::Continue);
        assert_eq!(state.observe(resolved(5), &config), PollStep::Continue);
        assert_eq!(state.observe(resolved(5), &config), PollStep::Continue);
        assert_eq!(state.observe(resolved(5), &config), PollStep::Stable(usage(5)));
        assert_eq!(state.attempt(), 4);
    }

    #[test]
    fn mismatch_resets_counter_to_one() {
        let config = PollConfig::default();
        let mut state = PollState::new();
        state.observe(resolved(5), &config);
        state.observe(resolved(5), &config);
        assert_eq!(state.consecutive_matches(), 2);
        state.observe(resolved(6), &config);
        assert_eq!(state.consecutive_matches(), 1);
        state.observe(resolved(6), &config);
        assert_eq!(state.observe(resolved(6), &config), PollStep::Stable(usage(6)));
    }

    #[test]
    fn transient_errors_do_not_end_the_poll() {
        let config = PollConfig::default();
        let mut state = PollState::new();
        let step = state.observe(Err(ApiError::status(503, "busy")), &config);
        assert_eq!(step, PollStep::Continue);
        let step = state.observe(Err(ApiError::InvalidResponse("x".into())), &config);
        assert_eq!(step, PollStep::Continue);
    }

    #[test]
    fn not_found_ends_immediately() {
        let mut state = PollState::new();
        let step = state.observe(Err(ApiError::status(404, "")), &PollConfig::default());
        assert_eq!(step, PollStep::NotFound);
        let stats = step.into_stats(&base_stats()).unwrap();
        assert_eq!(stats.stats_status, StatsStatus::Failed);
        assert_eq!(stats.execution_time_ms, 900);
    }

    #[test]
    fn never_matching_exhausts_after_max_attempts() {
        let config = PollConfig::default();
        let mut state = PollState::new();
        let mut last = PollStep::Continue;
        for attempt in 0..config.max_attempts {
            last = state.observe(resolved(u64::from(attempt)), &config);
            if attempt + 1 < config.max_attempts {
                assert_eq!(last, PollStep::Continue);
            }
        }
        assert_eq!(last, PollStep::Exhausted(Some(usage(7))));
        let stats = last.into_stats(&base_stats()).unwrap();
        assert_eq!(stats.stats_status, StatsStatus::Failed);
        assert_eq!(stats.tokens, usage(7));
        assert_eq!(stats.root_span_id.as_deref(), Some("span"));
    }

    #[test]
    fn stable_step_keeps_stream_side_fields() {
        let stats = PollStep::Stable(usage(4)).into_stats(&base_stats()).unwrap();
        assert_eq!(stats.stats_status, StatsStatus::Resolved);
        assert!(!stats.tokens_unavailable);
        assert_eq!(stats.execution_time_ms, 900);
        assert!(PollStep::Continue.into_stats(&base_stats()).is_none());
    }

    type Resolutions = tokio::sync::mpsc::UnboundedReceiver<(String, MessageStats)>;

    fn collecting_callback() -> (ResolutionCallback, Resolutions) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: ResolutionCallback = Arc::new(move |id, stats| {
            let _ = tx.send((id, stats));
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn poller_resolves_on_fourth_attempt() {
        let source = Arc::new(ScriptedStats::new(vec![
            Ok(StatsResponse::Pending),
            resolved(9),
            resolved(9),
            resolved(9),
        ]));
        let poller = StatsPoller::new(source.clone(), fast_config());
        let (callback, mut rx) = collecting_callback();
        assert!(poller.start("m1", "conv", base_stats(), callback));
        let (id, stats) = rx.recv().await.expect("resolution");
        assert_eq!(id, "m1");
        assert_eq!(stats.stats_status, StatsStatus::Resolved);
        assert_eq!(stats.tokens, usage(9));
        assert_eq!(source.calls(), 4);
        assert!(!poller.is_polling("m1"));
    }

    #[tokio::test]
    async fn poller_performs_exactly_max_attempts() {
        let script = (0..20).map(resolved).collect();
        let source = Arc::new(ScriptedStats::new(script));
        let poller = StatsPoller::new(source.clone(), fast_config());
        let (callback, mut rx) = collecting_callback();
        poller.start("m1", "conv", base_stats(), callback);
        let (_, stats) = rx.recv().await.expect("resolution");
        assert_eq!(stats.stats_status, StatsStatus::Failed);
        assert_eq!(source.calls(), 8);
    }

    #[tokio::test]
    async fn missing_span_fails_once_and_leaves_registry() {
        let source = Arc::new(ScriptedStats::new(vec![Err(ApiError::status(404, ""))]));
        let poller = StatsPoller::new(source.clone(), fast_config());
        let (callback, mut rx) = collecting_callback();
        assert!(poller.start("m1", "conv", base_stats(), callback));
        let (id, stats) = rx.recv().await.expect("resolution");
        assert_eq!(id, "m1");
        assert_eq!(stats.stats_status, StatsStatus::Failed);
        assert!(stats.tokens_unavailable);
        assert_eq!(stats.execution_time_ms, 900);
        assert_eq!(poller.active_count(), 0);
        assert!(!poller.is_polling("m1"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn second_start_for_same_message_is_a_no_op() {
        let source = Arc::new(ScriptedStats::new(Vec::new()));
        let poller = StatsPoller::new(
            source,
            PollConfig {
                base_interval: Duration::from_secs(60),
                ..fast_config()
            },
        );
        let (callback, _rx) = collecting_callback();
        assert!(poller.start("m1", "conv", base_stats(), callback.clone()));
        assert!(!poller.start("m1", "conv", base_stats(), callback.clone()));
        assert!(poller.start("m2", "conv", base_stats(), callback.clone()));
        let mut no_span = base_stats();
        no_span.root_span_id = None;
        assert!(!poller.start("m3", "conv", no_span, callback));
        assert_eq!(poller.active_count(), 2);
        poller.stop_all();
        assert_eq!(poller.active_count(), 0);
    }

    #[tokio::test]
    async fn stopped_poll_never_fires() {
        let source = Arc::new(ScriptedStats::new(vec![resolved(1), resolved(1), resolved(1)]));
        let poller = StatsPoller::new(
            source.clone(),
            PollConfig {
                base_interval: Duration::from_millis(20),
                ..fast_config()
            },
        );
        let (callback, mut rx) = collecting_callback();
        poller.start("m1", "conv", base_stats(), callback);
        assert!(poller.stop("m1"));
        assert!(!poller.stop("m1"));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(source.calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn polls_for_different_messages_run_independently() {
        let source = Arc::new(ScriptedStats::new(Vec::new()).with_default(StatsResponse::Resolved {
            stats: Some(usage(2)),
        }));
        let poller = StatsPoller::new(source, fast_config());
        let (callback, mut rx) = collecting_callback();
        poller.start("a", "conv", base_stats(), callback.clone());
        poller.start("b", "conv", base_stats(), callback);
        let mut ids = vec![rx.recv().await.unwrap().0, rx.recv().await.unwrap().0];
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
