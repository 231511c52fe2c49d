//! Typed events carried by the agent stream.

use crate::types::{Source, StatsStatus, TokenUsage};
use serde::Deserialize;
use serde_json::Value;

/// One typed record from the agent event stream.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Text {
        #[serde(alias = "delta")]
        content: String,
    },
    Reasoning {
        #[serde(alias = "delta")]
        content: String,
    },
    ToolCall {
        command_id: String,
        #[serde(default)]
        command: String,
        #[serde(default)]
        iteration: Option<u32>,
    },
    ToolStart {
        command_id: String,
    },
    ToolResult {
        command_id: String,
        #[serde(default)]
        result: String,
    },
    AgentToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, alias = "toolArgs")]
        args: Value,
        #[serde(default)]
        iteration: Option<u32>,
    },
    AgentToolResult {
        tool_call_id: String,
        #[serde(default)]
        result: Value,
    },
    Source(Source),
    Usage {
        /// `None` when the observability backend could not be reached.
        #[serde(default)]
        usage: Option<TokenUsage>,
        #[serde(default)]
        execution_time_ms: Option<u64>,
        #[serde(default)]
        root_span_id: Option<String>,
        #[serde(default)]
        stats_status: Option<StatsStatus>,
    },
    #[serde(rename = "sandbox_active")]
    SandboxActive {
        sandbox_id: String,
    },
    #[serde(rename = "sandbox_terminated")]
    SandboxTerminated,
    #[serde(rename = "sandbox_timeout")]
    SandboxTimeout,
    Done,
    Error {
        #[serde(default, alias = "error")]
        message: String,
    },
    /// Event kinds this client does not know; ignored by the builder.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Reasoning { .. } => "reasoning",
            Self::ToolCall { .. } => "tool-call",
            Self::ToolStart { .. } => "tool-start",
            Self::ToolResult { .. } => "tool-result",
            Self::AgentToolCall { .. } => "agent-tool-call",
            Self::AgentToolResult { .. } => "agent-tool-result",
            Self::Source(_) => "source",
            Self::Usage { .. } => "usage",
            Self::SandboxActive { .. } => "sandbox_active",
            Self::SandboxTerminated => "sandbox_terminated",
            Self::SandboxTimeout => "sandbox_timeout",
            Self::Done => "done",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Map one raw frame to a typed event.
///
/// Frames without a data payload, the `[DONE]` sentinel and payloads that do
/// not parse are dropped with `None`; one bad record never ends the stream.
pub fn parse_frame(frame: &str) -> Option<StreamEvent> {
    let payload = frame_payload(frame)?;
    if payload == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamEvent>(&payload) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(error = %err, "dropping malformed stream frame");
            None
        }
    }
}

/// Join the `data:` lines of one frame.
///
/// Multi-line payloads join with `\n`; comments and other SSE fields are
/// ignored.
fn frame_payload(frame: &str) -> Option<String> {
    let mut data_lines = Vec::<&str>::new();
    for raw_line in frame.lines() {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            data_lines.push(value);
        }
    }
    if data_lines.is_empty() {
        return None;
    }
    let payload = data_lines.join("\n");
    if payload.trim().is_empty() {
        None
    } else {
        Some(payload)
    }
}
