//! Client for the external observability stats endpoint.

use crate::error::ApiError;
use crate::types::TokenUsage;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;

/// One answer from the stats endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatsResponse {
    Resolved {
        #[serde(default)]
        stats: Option<TokenUsage>,
    },
    /// Still aggregating; unknown statuses are treated the same way.
    #[serde(other)]
    Pending,
}

/// Minimal stats lookup interface used by the poller.
///
/// Tests provide scripted answers through this trait while production code
/// uses [`HttpStatsClient`].
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch(
        &self,
        root_span_id: &str,
        conversation_id: &str,
    ) -> Result<StatsResponse, ApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    #[serde(default)]
    project_id: Option<String>,
}

/// HTTP client for `GET <stats-endpoint>/{rootSpanId}`.
///
/// The observability project id is resolved at most once per client and
/// cached in the instance. Transport failures during that lookup are not
/// cached; a definitive answer (including "none") is.
pub struct HttpStatsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    project_id: OnceCell<Option<String>>,
}

impl HttpStatsClient {
    /// Build a client for `base_url` with a request timeout.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        // Fall back to reqwest defaults if builder creation fails for any reason.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            project_id: OnceCell::new(),
        }
    }

    /// Use a known project id instead of resolving it from the endpoint.
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = OnceCell::new_with(Some(Some(project_id.into())));
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.http.get(url);
        if self.api_key.is_empty() {
            req
        } else {
            req.header("Authorization", format!("Bearer {}", self.api_key))
        }
    }

    /// Cached observability project id.
    pub async fn project_id(&self) -> Option<String> {
        let resolved = self
            .project_id
            .get_or_try_init(|| self.resolve_project_id())
            .await;
        match resolved {
            Ok(project) => project.clone(),
            Err(err) => {
                tracing::debug!(error = %err, "project id lookup failed; will retry");
                None
            }
        }
    }

    async fn resolve_project_id(&self) -> Result<Option<String>, ApiError> {
        let url = format!("{}/project", self.base_url);
        let response = self.get(&url).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::status(status, body));
        }
        let payload: ProjectResponse = response.json().await?;
        Ok(payload.project_id.filter(|id| !id.trim().is_empty()))
    }
}

#[async_trait]
impl StatsSource for HttpStatsClient {
    async fn fetch(
        &self,
        root_span_id: &str,
        conversation_id: &str,
    ) -> Result<StatsResponse, ApiError> {
        let url = format!("{}/{}", self.base_url, root_span_id);
        let mut query = vec![("conversationId", conversation_id.to_string())];
        if let Some(project) = self.project_id().await {
            query.push(("projectId", project));
        }
        let response = self.get(&url).query(&query).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::status(status, body));
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|err| ApiError::InvalidResponse(format!("invalid stats payload: {err}")))
    }
}
