//! Pull Client
//!
//! Single-shot HTTP requests against the research API. Safe to call
//! repeatedly; every call is one request with no client-side state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::routes::ApiRoutes;
use crate::snapshot::Snapshot;

/// Source of on-demand snapshots (the controller's polling seam)
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch_snapshot(&self, session_id: &str) -> Result<Snapshot>;
}

/// Body of `POST /research/start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_instructions: Option<String>,
}

/// Reply of `POST /research/start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    #[serde(default)]
    pub message: String,
}

/// HTTP client for the research API
#[derive(Debug, Clone)]
pub struct PullClient {
    http: reqwest::Client,
    routes: ApiRoutes,
}

impl PullClient {
    pub fn new(routes: ApiRoutes) -> Self {
        Self::with_client(reqwest::Client::new(), routes)
    }

    pub fn with_client(http: reqwest::Client, routes: ApiRoutes) -> Self {
        Self { http, routes }
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(SyncError::transport)?;
        Ok(Self::with_client(http, config.routes()?))
    }

    pub fn routes(&self) -> &ApiRoutes {
        &self.routes
    }

    /// Fetch the current snapshot of a session
    pub async fn fetch_snapshot(&self, session_id: &str) -> Result<Snapshot> {
        let url = self.routes.progress(session_id);
        debug!(session_id, %url, "Fetching progress");
        let body = self.get(url).await?;
        Snapshot::from_json(&body)
    }

    /// Identifiers of all sessions the server is currently running
    pub async fn fetch_active_sessions(&self) -> Result<Vec<String>> {
        let body = self.get(self.routes.active_sessions()).await?;
        serde_json::from_slice(&body).map_err(SyncError::decode)
    }

    /// Begin a new research session
    pub async fn start_research(&self, request: &ResearchRequest) -> Result<StartResponse> {
        let url = self.routes.start();
        debug!(%url, "Starting research session");
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(SyncError::transport)?;
        let body = Self::success_body(response).await?;
        serde_json::from_slice(&body).map_err(SyncError::decode)
    }

    async fn get(&self, url: url::Url) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await.map_err(SyncError::transport)?;
        Self::success_body(response).await
    }

    async fn success_body(response: reqwest::Response) -> Result<Vec<u8>> {
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Protocol {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }
        let body = response.bytes().await.map_err(SyncError::transport)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl SnapshotFetcher for PullClient {
    async fn fetch_snapshot(&self, session_id: &str) -> Result<Snapshot> {
        PullClient::fetch_snapshot(self, session_id).await
    }
}
