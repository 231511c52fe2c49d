//! Conversation data model.
//!
//! These types are the structured form of one conversation turn as rebuilt
//! from the event stream. They serialize with camelCase field names so a
//! persisted message reads the same as the wire records it was built from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Roles and sub-agents
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user message.
    User,
    /// Assistant/model message.
    Assistant,
}

/// Logical sub-agent that owns a turn.
///
/// Each sub-agent keeps an independent history inside one conversation; the
/// request context for a turn only includes messages of the same kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Task,
    Skill,
}

impl AgentKind {
    /// Wire name used in request bodies and CLI flags.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Skill => "skill",
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "skill" => Ok(Self::Skill),
            other => Err(format!("unknown mode `{other}` (expected `task` or `skill`)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Message parts
// ---------------------------------------------------------------------------

/// Lifecycle of a shell tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Queued,
    Running,
    Completed,
    /// Terminal state for calls cut short by an interrupted stream.
    Error,
}

impl ToolStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    /// True once the call can no longer change.
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    /// Move forward to `next`; backward or sideways moves keep `self`.
    pub fn advance(self, next: ToolStatus) -> ToolStatus {
        if next.rank() > self.rank() {
            next
        } else {
            self
        }
    }
}

/// One citation attached to a grounded answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// One semantically distinct segment of a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum MessagePart {
    Text {
        content: String,
    },
    Reasoning {
        content: String,
    },
    Tool {
        command: String,
        command_id: String,
        #[serde(default)]
        content: String,
        status: ToolStatus,
    },
    AgentTool {
        tool_name: String,
        #[serde(default)]
        tool_args: Value,
        tool_call_id: String,
        /// `None` until the call's result arrives.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources: Option<Vec<Source>>,
    },
    Sources {
        sources: Vec<Source>,
    },
}

impl MessagePart {
    /// Build a text part.
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Correlation id for tool-like parts.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Tool { command_id, .. } => Some(command_id),
            Self::AgentTool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Resolution state of a message's usage statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatsStatus {
    #[default]
    Pending,
    Resolved,
    Unavailable,
    Failed,
}

impl StatsStatus {
    /// True for states that will never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The four token counters compared by the stability check.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
}

impl TokenUsage {
    /// Field-wise saturating sum.
    pub fn saturating_add(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.saturating_add(other.prompt_tokens),
            completion_tokens: self
                .completion_tokens
                .saturating_add(other.completion_tokens),
            cached_tokens: self.cached_tokens.saturating_add(other.cached_tokens),
            reasoning_tokens: self.reasoning_tokens.saturating_add(other.reasoning_tokens),
        }
    }
}

/// Per-message usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStats {
    #[serde(flatten)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub stats_status: StatsStatus,
    /// Token counts could not be obtained from the observability backend.
    #[serde(default)]
    pub tokens_unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_span_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// One turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub raw_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<MessageStats>,
    #[serde(default)]
    pub agent: AgentKind,
    #[serde(default)]
    pub interrupted: bool,
}

impl Message {
    /// Create a user message addressed to `agent`.
    pub fn user(content: impl Into<String>, agent: AgentKind) -> Self {
        let content = content.into();
        Self {
            id: generate_message_id(),
            role: Role::User,
            parts: vec![MessagePart::text(content.clone())],
            raw_content: content,
            stats: None,
            agent,
            interrupted: false,
        }
    }

    /// Create an empty assistant message produced by `agent`.
    pub fn assistant(agent: AgentKind) -> Self {
        Self {
            id: generate_message_id(),
            role: Role::Assistant,
            parts: Vec::new(),
            raw_content: String::new(),
            stats: None,
            agent,
            interrupted: false,
        }
    }

    /// Store new stats unless the current ones are already final.
    ///
    /// Returns `true` only when this call moved the message into a terminal
    /// stats state, which is the single moment it may be counted in totals.
    pub fn apply_stats(&mut self, stats: MessageStats) -> bool {
        if self
            .stats
            .as_ref()
            .is_some_and(|current| current.stats_status.is_terminal())
        {
            return false;
        }
        let terminal = stats.stats_status.is_terminal();
        self.stats = Some(stats);
        terminal
    }

    /// Stats still waiting on the observability backend.
    pub fn pending_root_span(&self) -> Option<&str> {
        self.stats
            .as_ref()
            .filter(|stats| stats.stats_status == StatsStatus::Pending)
            .and_then(|stats| stats.root_span_id.as_deref())
    }
}

/// Generate a random message id.
pub fn generate_message_id() -> String {
    format!("msg_{:016x}", rand::random::<u64>())
}
