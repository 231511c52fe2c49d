//! Outbound chat request and stream transport.

use crate::error::ApiError;
use crate::stream::ChunkSource;
use crate::types::{AgentKind, Message, Role};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// One prior turn replayed as context.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: Role,
    pub content: String,
}

/// Body of the request that opens one turn's event stream.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    pub messages: Vec<ContextMessage>,
    pub mode: AgentKind,
    pub conversation_id: String,
    pub env: BTreeMap<String, String>,
    pub sandbox_id: Option<String>,
}

/// Prior turns belonging to `mode`, flattened for re-submission.
///
/// Each sub-agent has its own history; turns with no text are skipped.
pub fn context_messages(history: &[Message], mode: AgentKind) -> Vec<ContextMessage> {
    history
        .iter()
        .filter(|message| message.agent == mode)
        .filter(|message| !message.raw_content.trim().is_empty())
        .map(|message| ContextMessage {
            role: message.role,
            content: message.raw_content.clone(),
        })
        .collect()
}

/// Opens the event stream for one turn.
///
/// This trait lets tests script streams without network calls while the
/// production path uses [`HttpChatTransport`].
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open(&self, body: &ChatRequestBody) -> Result<Box<dyn ChunkSource>, ApiError>;
}

/// `POST <chat-url>` transport returning the response body as chunks.
pub struct HttpChatTransport {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpChatTransport {
    /// Build a transport. `timeout` bounds connection setup, not the stream.
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Self {
        // Fall back to reqwest defaults if builder creation fails for any reason.
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            url: url.to_string(),
            api_key: api_key.trim().to_string(),
        }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, body: &ChatRequestBody) -> Result<Box<dyn ChunkSource>, ApiError> {
        let mut req = self
            .http
            .post(&self.url)
            .header("Accept", "text/event-stream")
            .json(body);
        // Only add auth for non-empty keys (local backends skip this).
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }
        let response = req.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::status(status, body));
        }
        Ok(Box::new(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_only_includes_matching_sub_agent_turns() {
        let mut skill_answer = Message::assistant(AgentKind::Skill);
        skill_answer.raw_content = "skill reply".into();
        let mut empty_task = Message::assistant(AgentKind::Task);
        empty_task.raw_content = "   ".into();
        let mut task_answer = Message::assistant(AgentKind::Task);
        task_answer.raw_content = "task reply".into();
        let history = vec![
            Message::user("task q", AgentKind::Task),
            Message::user("skill q", AgentKind::Skill),
            skill_answer,
            empty_task,
            task_answer,
        ];
        let context = context_messages(&history, AgentKind::Task);
        assert_eq!(
            context,
            vec![
                ContextMessage {
                    role: Role::User,
                    content: "task q".into()
                },
                ContextMessage {
                    role: Role::Assistant,
                    content: "task reply".into()
                },
            ]
        );
    }

    #[test]
    fn request_body_serializes_camel_case() {
        let body = ChatRequestBody {
            messages: vec![ContextMessage {
                role: Role::User,
                content: "hi".into(),
            }],
            mode: AgentKind::Skill,
            conversation_id: "c1".into(),
            env: BTreeMap::from([("REGION".to_string(), "eu".to_string())]),
            sandbox_id: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "mode": "skill",
                "conversationId": "c1",
                "env": {"REGION": "eu"},
                "sandboxId": null
            })
        );
    }
}
