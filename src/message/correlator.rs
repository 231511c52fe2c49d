//! Correlation of asynchronous tool call/result pairs and sandbox lifecycle.

use std::collections::HashMap;

/// Lifecycle of the remote sandbox the agent executes commands in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SandboxState {
    /// No sandbox signal seen on this stream.
    #[default]
    Unknown,
    Active(String),
    Terminated,
    TimedOut,
}

impl SandboxState {
    /// Sandbox id to reuse on the next request, if one is still alive.
    pub fn active_id(&self) -> Option<&str> {
        match self {
            Self::Active(id) => Some(id),
            _ => None,
        }
    }
}

/// Index of open correlation handles for one in-progress message.
///
/// Maps `commandId` / `toolCallId` to the position of their part. Lookups are
/// by exact id; when an id is reused the newest part owns it, so a later
/// event never matches two parts.
#[derive(Debug, Default)]
pub struct Correlator {
    tools: HashMap<String, usize>,
    agent_tools: HashMap<String, usize>,
    iteration: Option<u32>,
    sandbox: SandboxState,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a shell tool part at `index`.
    pub fn register_tool(&mut self, command_id: &str, index: usize) {
        if self.tools.insert(command_id.to_string(), index).is_some() {
            tracing::warn!(command_id, "tool call id reused; newest call takes over");
        }
    }

    /// Record a grounded/agent tool part at `index`.
    pub fn register_agent_tool(&mut self, tool_call_id: &str, index: usize) {
        if self
            .agent_tools
            .insert(tool_call_id.to_string(), index)
            .is_some()
        {
            tracing::warn!(tool_call_id, "agent tool call id reused; newest call takes over");
        }
    }

    pub fn tool_index(&self, command_id: &str) -> Option<usize> {
        self.tools.get(command_id).copied()
    }

    pub fn agent_tool_index(&self, tool_call_id: &str) -> Option<usize> {
        self.agent_tools.get(tool_call_id).copied()
    }

    /// Adjust indices after a part was inserted at `at`.
    pub fn shift_from(&mut self, at: usize) {
        for index in self.tools.values_mut().chain(self.agent_tools.values_mut()) {
            if *index >= at {
                *index += 1;
            }
        }
    }

    /// Track the highest agent-loop iteration seen so far.
    pub fn note_iteration(&mut self, iteration: Option<u32>) {
        if let Some(step) = iteration {
            self.iteration = Some(self.iteration.map_or(step, |seen| seen.max(step)));
        }
    }

    pub fn iteration(&self) -> Option<u32> {
        self.iteration
    }

    pub fn sandbox(&self) -> &SandboxState {
        &self.sandbox
    }

    pub fn set_sandbox(&mut self, state: SandboxState) {
        tracing::debug!(?state, "sandbox lifecycle");
        self.sandbox = state;
    }
}
