//! Chat session facade.
//!
//! Owns the message list, the streaming message, cumulative stats and the
//! sandbox id for one conversation. State is published through a
//! `tokio::sync::watch` channel so the CLI and tests observe whole snapshots.

mod sink;
mod snapshot;
mod transport;

pub use sink::{LogSink, MessageSink};
pub use snapshot::{SessionSnapshot, SessionStatus};
pub use transport::{
    context_messages, ChatRequestBody, ChatTransport, ContextMessage, HttpChatTransport,
};

use crate::error::SessionError;
use crate::message::{MessageBuilder, SandboxState, Step};
use crate::stats::{CumulativeStats, ResolutionCallback, StatsPoller};
use crate::stream::EventReader;
use crate::types::{AgentKind, Message, MessageStats};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::watch;

/// Per-send options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub mode: AgentKind,
    /// Conversation id sent with this turn; the session's id when unset.
    pub context_id: Option<String>,
    /// Merged over the session's environment for this turn only.
    pub env: BTreeMap<String, String>,
}

impl SendOptions {
    pub fn new(mode: AgentKind) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_context_id(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// How one turn's stream ended.
enum TurnOutcome {
    Done,
    Interrupted,
    /// The backend sent an explicit error event.
    Failed(String),
    /// Transport failure or premature end of stream.
    Broken(SessionError),
}

/// Cancel signal for the active turn, tagged so a stale turn cannot clear a
/// newer one's signal.
struct ActiveTurn {
    id: u64,
    cancel: watch::Sender<bool>,
}

pub struct ChatSession {
    conversation_id: String,
    env: BTreeMap<String, String>,
    transport: Arc<dyn ChatTransport>,
    sink: Arc<dyn MessageSink>,
    poller: StatsPoller,
    state: Arc<watch::Sender<SessionSnapshot>>,
    active: Mutex<Option<ActiveTurn>>,
    next_turn: AtomicU64,
}

impl ChatSession {
    pub fn new(
        conversation_id: impl Into<String>,
        transport: Arc<dyn ChatTransport>,
        poller: StatsPoller,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            conversation_id: conversation_id.into(),
            env: BTreeMap::new(),
            transport,
            sink,
            poller,
            state: Arc::new(state),
            active: Mutex::new(None),
            next_turn: AtomicU64::new(1),
        }
    }

    /// Environment sent with every turn.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages.clone()
    }

    pub fn cumulative(&self) -> CumulativeStats {
        self.state.borrow().cumulative
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn is_polling_stats(&self) -> bool {
        self.poller.active_count() > 0
    }

    /// Send one user turn and stream the assistant's reply.
    ///
    /// Returns [`SessionError::Busy`] without side effects while another turn
    /// is streaming. A turn stopped through [`ChatSession::stop`] returns
    /// `Ok(())` with the interrupted message appended.
    pub async fn send(&self, content: &str, options: SendOptions) -> Result<(), SessionError> {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let turn_id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let mut epoch = 0;
        // The cancel sender is installed under the same lock that `stop` takes,
        // so a stop issued once `Streaming` is visible always reaches this turn.
        let accepted = {
            let mut active = match self.active.lock() {
                Ok(active) => active,
                Err(poisoned) => poisoned.into_inner(),
            };
            let accepted = self.state.send_if_modified(|s| {
                if s.status == SessionStatus::Streaming {
                    return false;
                }
                s.status = SessionStatus::Streaming;
                s.error = None;
                s.streaming = None;
                s.iteration = None;
                epoch = s.epoch;
                true
            });
            if accepted {
                *active = Some(ActiveTurn {
                    id: turn_id,
                    cancel: cancel_tx,
                });
            }
            accepted
        };
        if !accepted {
            tracing::debug!("send rejected; a response is already streaming");
            return Err(SessionError::Busy);
        }

        let conversation_id = options
            .context_id
            .clone()
            .unwrap_or_else(|| self.conversation_id.clone());
        let user = Message::user(content, options.mode);
        let mut user_index = 0;
        self.state.send_modify(|s| {
            s.messages.push(user.clone());
            user_index = s.messages.len() - 1;
        });
        self.sink.save(&user, user_index);
        let body = {
            let s = self.state.borrow();
            ChatRequestBody {
                messages: context_messages(&s.messages, options.mode),
                mode: options.mode,
                conversation_id: conversation_id.clone(),
                env: self.merged_env(&options.env),
                sandbox_id: s.sandbox_id.clone(),
            }
        };

        tracing::info!(
            conversation_id = %conversation_id,
            mode = options.mode.as_str(),
            context = body.messages.len(),
            "sending turn"
        );

        let mut builder = MessageBuilder::with_start(options.mode, Instant::now());
        let outcome = self.stream_turn(&body, &mut builder, &mut cancel_rx).await;
        self.release_turn(turn_id);
        let sandbox = builder.sandbox().clone();
        self.state.send_if_modified(|s| {
            if s.epoch != epoch {
                return false;
            }
            apply_sandbox(s, &sandbox);
            true
        });

        match outcome {
            TurnOutcome::Done => {
                let message = builder.finish();
                tracing::info!(message_id = %message.id, parts = message.parts.len(), "turn complete");
                self.commit(epoch, message, &conversation_id, None);
                Ok(())
            }
            TurnOutcome::Interrupted => {
                let message = builder.interrupt();
                tracing::info!(message_id = %message.id, "turn interrupted");
                self.commit(epoch, message, &conversation_id, None);
                Ok(())
            }
            TurnOutcome::Failed(reason) => {
                tracing::warn!(reason = %reason, "backend reported an error");
                self.state.send_modify(|s| {
                    if s.epoch != epoch {
                        return;
                    }
                    s.status = SessionStatus::Error;
                    s.streaming = None;
                    s.error = Some(reason.clone());
                });
                Err(SessionError::Stream(reason))
            }
            TurnOutcome::Broken(err) => {
                tracing::warn!(error = %err, "stream ended without completion");
                let partial = builder.into_partial();
                if partial.parts.is_empty() {
                    self.state.send_modify(|s| {
                        if s.epoch != epoch {
                            return;
                        }
                        s.status = SessionStatus::Error;
                        s.streaming = None;
                        s.error = Some(err.to_string());
                    });
                } else {
                    self.commit(epoch, partial, &conversation_id, Some(err.to_string()));
                }
                Err(err)
            }
        }
    }

    /// Interrupt the streaming turn. Returns `false` when nothing is streaming.
    pub fn stop(&self) -> bool {
        let Ok(active) = self.active.lock() else {
            return false;
        };
        match active.as_ref() {
            Some(turn) => {
                tracing::debug!(turn = turn.id, "stop requested");
                let _ = turn.cancel.send(true);
                true
            }
            None => false,
        }
    }

    /// Drop all conversation state, interrupting any stream and poll.
    pub fn clear(&self) {
        self.stop();
        self.poller.stop_all();
        self.state.send_modify(|s| {
            let epoch = s.epoch + 1;
            *s = SessionSnapshot {
                epoch,
                ..SessionSnapshot::default()
            };
        });
        tracing::debug!(conversation_id = %self.conversation_id, "session cleared");
    }

    /// Replace the conversation with previously saved messages.
    ///
    /// Totals are recomputed from scratch and polling resumes for messages
    /// whose stats were still pending, so this must run inside a Tokio runtime.
    pub fn load(&self, messages: Vec<Message>) {
        self.poller.stop_all();
        let mut epoch = 0;
        self.state.send_modify(|s| {
            epoch = s.epoch + 1;
            *s = SessionSnapshot {
                cumulative: CumulativeStats::from_messages(&messages),
                messages,
                epoch,
                ..SessionSnapshot::default()
            };
        });
        let pending = self.state.borrow().pending_stats();
        for (message_id, stats) in pending {
            self.poll_stats(epoch, &message_id, &self.conversation_id, stats);
        }
    }

    fn merged_env(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    async fn stream_turn(
        &self,
        body: &ChatRequestBody,
        builder: &mut MessageBuilder,
        cancel: &mut watch::Receiver<bool>,
    ) -> TurnOutcome {
        let source = tokio::select! {
            biased;
            _ = cancelled(cancel) => return TurnOutcome::Interrupted,
            opened = self.transport.open(body) => match opened {
                Ok(source) => source,
                Err(err) => return TurnOutcome::Broken(err.into()),
            },
        };
        let mut reader = EventReader::new(source);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(cancel) => return TurnOutcome::Interrupted,
                next = reader.next_event() => next,
            };
            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => return TurnOutcome::Broken(SessionError::closed_unexpectedly()),
                Err(err) => return TurnOutcome::Broken(err.into()),
            };
            match builder.apply(event) {
                Step::Continue => self.publish_progress(builder),
                Step::Done => return TurnOutcome::Done,
                Step::Failed(reason) => return TurnOutcome::Failed(reason),
            }
        }
    }

    fn publish_progress(&self, builder: &MessageBuilder) {
        let message = builder.snapshot();
        let iteration = builder.iteration();
        let sandbox = builder.sandbox().clone();
        self.state.send_modify(|s| {
            s.streaming = Some(message);
            s.iteration = iteration;
            apply_sandbox(s, &sandbox);
        });
    }

    /// Append a finalized assistant message, persist it and settle its stats.
    fn commit(
        &self,
        epoch: u64,
        message: Message,
        conversation_id: &str,
        error: Option<String>,
    ) {
        let mut index = None;
        self.state.send_modify(|s| {
            if s.epoch != epoch {
                return;
            }
            s.streaming = None;
            s.messages.push(message.clone());
            index = Some(s.messages.len() - 1);
            if let Some(stats) = message.stats.as_ref() {
                if stats.stats_status.is_terminal() {
                    s.cumulative = s.cumulative.fold(stats);
                }
            }
            match error {
                Some(ref reason) => {
                    s.status = SessionStatus::Error;
                    s.error = Some(reason.clone());
                }
                None => s.status = SessionStatus::Ready,
            }
        });
        let Some(index) = index else {
            tracing::debug!(message_id = %message.id, "session cleared during turn; message dropped");
            return;
        };
        self.sink.save(&message, index);

        if let Some(stats) = message.stats.clone() {
            if !stats.stats_status.is_terminal() {
                self.poll_stats(epoch, &message.id, conversation_id, stats);
            }
        }
    }

    fn poll_stats(&self, epoch: u64, message_id: &str, conversation_id: &str, stats: MessageStats) {
        let state = self.state.clone();
        let on_resolved: ResolutionCallback = Arc::new(move |message_id, stats| {
            state.send_if_modified(|s| s.epoch == epoch && s.apply_stats(&message_id, stats));
        });
        if self.poller.start(message_id, conversation_id, stats, on_resolved) {
            tracing::debug!(message_id, "polling for stats");
        }
    }

    fn release_turn(&self, turn_id: u64) {
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().is_some_and(|turn| turn.id == turn_id) {
                *active = None;
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.stop();
        self.poller.stop_all();
    }
}

fn apply_sandbox(snapshot: &mut SessionSnapshot, sandbox: &SandboxState) {
    match sandbox {
        SandboxState::Unknown => {}
        SandboxState::Active(id) => snapshot.sandbox_id = Some(id.clone()),
        SandboxState::Terminated | SandboxState::TimedOut => snapshot.sandbox_id = None,
    }
}

/// Resolves once the cancel flag is raised; never resolves if it cannot be.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
