//! Incremental reconstruction of one assistant message from stream events.

use super::correlator::{Correlator, SandboxState};
use super::normalize::normalize_text;
use super::usage::UsageAccumulator;
use crate::stream::StreamEvent;
use crate::types::{AgentKind, Message, MessagePart, Source, ToolStatus};
use serde_json::Value;
use std::time::Instant;

/// Content written into tool calls cut short by a user stop.
pub const INTERRUPTED_CONTENT: &str = "Interrupted";

/// Tool name of the synthesized grounding part.
pub const GROUNDING_TOOL_NAME: &str = "grounded_search";

/// Correlation id of the synthesized grounding part.
const GROUNDING_CALL_ID: &str = "grounding";

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Keep reading.
    Continue,
    /// The stream reported `done`; call [`MessageBuilder::finish`].
    Done,
    /// The stream reported an `error`; the message is abandoned.
    Failed(String),
}

/// Per-turn state machine that turns ordered events into message parts.
///
/// One builder exists per `send` call and is owned by its read loop.
#[derive(Debug)]
pub struct MessageBuilder {
    message: Message,
    pending_text: String,
    correlator: Correlator,
    sources: Vec<Source>,
    usage: UsageAccumulator,
    started: Instant,
}

impl MessageBuilder {
    /// Start building an assistant message for `agent`.
    pub fn new(agent: AgentKind) -> Self {
        Self::with_start(agent, Instant::now())
    }

    /// Start building with an explicit wall-clock origin for execution time.
    pub fn with_start(agent: AgentKind, started: Instant) -> Self {
        Self {
            message: Message::assistant(agent),
            pending_text: String::new(),
            correlator: Correlator::new(),
            sources: Vec::new(),
            usage: UsageAccumulator::default(),
            started,
        }
    }

    /// Current sandbox lifecycle state.
    pub fn sandbox(&self) -> &SandboxState {
        self.correlator.sandbox()
    }

    /// Highest agent-loop iteration reported so far.
    pub fn iteration(&self) -> Option<u32> {
        self.correlator.iteration()
    }

    /// Apply one event in arrival order.
    pub fn apply(&mut self, event: StreamEvent) -> Step {
        match event {
            StreamEvent::Text { content } => self.pending_text.push_str(&content),
            StreamEvent::Reasoning { content } => self.push_reasoning(&content),
            StreamEvent::ToolCall {
                command_id,
                command,
                iteration,
            } => {
                self.flush_text();
                self.correlator.note_iteration(iteration);
                let index = self.message.parts.len();
                self.message.parts.push(MessagePart::Tool {
                    command,
                    command_id: command_id.clone(),
                    content: String::new(),
                    status: ToolStatus::Queued,
                });
                self.correlator.register_tool(&command_id, index);
            }
            StreamEvent::ToolStart { command_id } => {
                self.update_tool(&command_id, None, ToolStatus::Running);
            }
            StreamEvent::ToolResult { command_id, result } => {
                self.update_tool(&command_id, Some(result), ToolStatus::Completed);
            }
            StreamEvent::AgentToolCall {
                tool_call_id,
                tool_name,
                args,
                iteration,
            } => {
                self.flush_text();
                self.correlator.note_iteration(iteration);
                let index = self.message.parts.len();
                self.message.parts.push(MessagePart::AgentTool {
                    tool_name,
                    tool_args: args,
                    tool_call_id: tool_call_id.clone(),
                    content: None,
                    sources: None,
                });
                self.correlator.register_agent_tool(&tool_call_id, index);
            }
            StreamEvent::AgentToolResult {
                tool_call_id,
                result,
            } => self.complete_agent_tool(&tool_call_id, result),
            StreamEvent::Source(source) => self.push_source(source),
            StreamEvent::Usage {
                usage,
                execution_time_ms,
                root_span_id,
                stats_status,
            } => self
                .usage
                .merge(usage, execution_time_ms, root_span_id, stats_status),
            StreamEvent::SandboxActive { sandbox_id } => {
                self.correlator.set_sandbox(SandboxState::Active(sandbox_id));
            }
            StreamEvent::SandboxTerminated => self.correlator.set_sandbox(SandboxState::Terminated),
            StreamEvent::SandboxTimeout => self.correlator.set_sandbox(SandboxState::TimedOut),
            StreamEvent::Done => return Step::Done,
            StreamEvent::Error { message } => {
                let message = if message.trim().is_empty() {
                    "stream reported an error".to_string()
                } else {
                    message
                };
                return Step::Failed(message);
            }
            // Unrecognized kinds are ignored.
            StreamEvent::Unknown => {}
        }
        Step::Continue
    }

    /// Commit pending text as a `text` part.
    ///
    /// Calling this again without new text is a no-op.
    pub fn flush_text(&mut self) {
        if self.pending_text.is_empty() {
            return;
        }
        let text = normalize_text(&std::mem::take(&mut self.pending_text));
        if !text.trim().is_empty() {
            self.message.parts.push(MessagePart::Text { content: text });
        }
    }

    /// Render the in-progress message, including uncommitted text.
    pub fn snapshot(&self) -> Message {
        let mut message = self.message.clone();
        let pending = normalize_text(&self.pending_text);
        if !pending.trim().is_empty() {
            message.parts.push(MessagePart::Text { content: pending });
        }
        message.raw_content = raw_content(&message.parts);
        message
    }

    /// Finalize after `done`.
    pub fn finish(self) -> Message {
        self.finalize(false)
    }

    /// Finalize after a user stop.
    ///
    /// Tool calls without a result are closed with [`INTERRUPTED_CONTENT`].
    pub fn interrupt(self) -> Message {
        self.finalize(true)
    }

    /// Finalize whatever arrived before the transport failed.
    ///
    /// Usage that already arrived is kept, so the message still gets stats.
    pub fn into_partial(mut self) -> Message {
        self.seal();
        self.message
    }

    fn finalize(mut self, interrupted: bool) -> Message {
        self.seal();
        if interrupted {
            for part in &mut self.message.parts {
                close_interrupted(part);
            }
            self.message.interrupted = true;
        }
        self.message
    }

    /// Flush buffered text, attach sources and settle stats and raw content.
    fn seal(&mut self) {
        self.flush_text();
        self.attach_sources();
        let elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.message.stats = std::mem::take(&mut self.usage).into_stats(elapsed_ms);
        self.message.raw_content = raw_content(&self.message.parts);
    }

    fn push_reasoning(&mut self, content: &str) {
        self.flush_text();
        if let Some(MessagePart::Reasoning { content: existing }) = self.message.parts.last_mut() {
            existing.push_str(content);
            return;
        }
        self.message.parts.push(MessagePart::Reasoning {
            content: content.to_string(),
        });
    }

    fn update_tool(&mut self, command_id: &str, result: Option<String>, status: ToolStatus) {
        let Some(index) = self.correlator.tool_index(command_id) else {
            tracing::debug!(command_id, ?status, "no tool call for id; ignoring");
            return;
        };
        if let Some(MessagePart::Tool {
            content,
            status: current,
            ..
        }) = self.message.parts.get_mut(index)
        {
            if current.is_terminal() && *current != ToolStatus::Completed {
                return;
            }
            if let Some(result) = result {
                *content = result;
            }
            *current = current.advance(status);
        }
    }

    fn complete_agent_tool(&mut self, tool_call_id: &str, result: Value) {
        let Some(index) = self.correlator.agent_tool_index(tool_call_id) else {
            tracing::debug!(tool_call_id, "no agent tool call for id; ignoring");
            return;
        };
        if let Some(MessagePart::AgentTool { content, .. }) = self.message.parts.get_mut(index) {
            *content = Some(match result {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            });
        }
    }

    fn push_source(&mut self, source: Source) {
        if self.sources.is_empty() {
            // Grounding happened before any text that cites it.
            self.message.parts.insert(
                0,
                MessagePart::AgentTool {
                    tool_name: GROUNDING_TOOL_NAME.to_string(),
                    tool_args: Value::Null,
                    tool_call_id: GROUNDING_CALL_ID.to_string(),
                    content: None,
                    sources: None,
                },
            );
            self.correlator.shift_from(0);
            self.correlator.register_agent_tool(GROUNDING_CALL_ID, 0);
        }
        self.sources.push(source);
    }

    fn attach_sources(&mut self) {
        if self.sources.is_empty() {
            return;
        }
        let sources = std::mem::take(&mut self.sources);
        if let Some(index) = self.correlator.agent_tool_index(GROUNDING_CALL_ID) {
            if let Some(MessagePart::AgentTool {
                content,
                sources: attached,
                ..
            }) = self.message.parts.get_mut(index)
            {
                *content = Some(format!("Found {} sources", sources.len()));
                *attached = Some(sources.clone());
            }
        }
        self.message.parts.push(MessagePart::Sources { sources });
    }
}

fn close_interrupted(part: &mut MessagePart) {
    match part {
        MessagePart::Tool {
            content, status, ..
        } if !status.is_terminal() => {
            *content = INTERRUPTED_CONTENT.to_string();
            *status = ToolStatus::Error;
        }
        MessagePart::AgentTool { content, .. } if content.is_none() => {
            *content = Some(INTERRUPTED_CONTENT.to_string());
        }
        _ => {}
    }
}

/// Flat text used when this message is replayed as conversational context.
pub fn raw_content(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { content } => Some(content.trim()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
