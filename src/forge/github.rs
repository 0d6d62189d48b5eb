//! GitHub / GitHub Enterprise backend implementation.
//!
//! Answers access queries with a single GraphQL round-trip that fetches the
//! repository's privacy flag together with the collaborator record matching
//! the requested login.

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::metrics::{AccessMetrics, QueryOutcome};

use super::rate_limit::RateLimitState;
use super::{AccessQuery, Collaborator, RepoAccessResponse};

const REPO_ACCESS_QUERY: &str = "\
query($owner: String!, $name: String!, $username: String!) {
  repository(owner: $owner, name: $name) {
    isPrivate
    collaborators(query: $username, first: 1) {
      edges {
        permission
        node { login }
      }
    }
  }
}";

// ---------------------------------------------------------------------------
// Backend struct
// ---------------------------------------------------------------------------

pub struct GitHubBackend {
    http_client: reqwest::Client,
    graphql_url: String,
    token: Option<String>,
    rate_limit: RateLimitState,
    metrics: AccessMetrics,
}

impl GitHubBackend {
    pub fn new(config: &Config, metrics: AccessMetrics) -> Result<Self> {
        let token = std::env::var(&config.upstream.token_env).ok();
        if token.is_none() {
            warn!(
                token_env = %config.upstream.token_env,
                "upstream token not set; access queries will be unauthenticated"
            );
        }

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("forgelock/", env!("CARGO_PKG_VERSION")))
            .timeout(config.upstream.request_timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self::with_client(
            http_client,
            config.upstream.graphql_url.clone(),
            token,
            metrics,
        ))
    }

    pub fn with_client(
        http_client: reqwest::Client,
        graphql_url: String,
        token: Option<String>,
        metrics: AccessMetrics,
    ) -> Self {
        let rate_limit = RateLimitState::new(metrics.upstream_rate_limit_remaining.clone());
        Self {
            http_client,
            graphql_url,
            token,
            rate_limit,
            metrics,
        }
    }

    pub fn rate_limit(&self) -> &RateLimitState {
        &self.rate_limit
    }

    async fn execute(&self, owner: &str, repo: &str, username: &str) -> Result<RepoAccessResponse> {
        let body = json!({
            "query": REPO_ACCESS_QUERY,
            "variables": {
                "owner": owner,
                "name": repo,
                "username": username,
            },
        });

        let mut request = self.http_client.post(&self.graphql_url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request
            .send()
            .await
            .context("upstream GraphQL request failed")?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("upstream GraphQL returned {status}: {}", text.trim());
        }

        let envelope: GraphQlEnvelope = resp
            .json()
            .await
            .context("failed to parse upstream GraphQL response")?;

        envelope.into_access_response()
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl AccessQuery for GitHubBackend {
    async fn query_repo_access(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
    ) -> Result<RepoAccessResponse> {
        let result = self.execute(owner, repo, username).await;
        match &result {
            Ok(resp) => {
                self.metrics.record_query(QueryOutcome::Success);
                debug!(
                    owner,
                    repo,
                    user = username,
                    is_private = resp.is_private,
                    collaborators = resp.collaborators.len(),
                    "repo access queried"
                );
            }
            Err(e) => {
                self.metrics.record_query(QueryOutcome::Failure);
                warn!(owner, repo, user = username, error = %e, "repo access query failed");
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphQlEnvelope {
    data: Option<QueryData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    repository: Option<Repository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Repository {
    is_private: bool,
    collaborators: Option<CollaboratorConnection>,
}

#[derive(Debug, Deserialize)]
struct CollaboratorConnection {
    #[serde(default)]
    edges: Vec<CollaboratorEdge>,
}

#[derive(Debug, Deserialize)]
struct CollaboratorEdge {
    permission: String,
    node: CollaboratorNode,
}

#[derive(Debug, Deserialize)]
struct CollaboratorNode {
    login: String,
}

impl GraphQlEnvelope {
    fn into_access_response(self) -> Result<RepoAccessResponse> {
        if !self.errors.is_empty() {
            let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
            bail!("upstream GraphQL errors: {}", messages.join("; "));
        }

        let repository = self
            .data
            .and_then(|d| d.repository)
            .ok_or_else(|| anyhow!("upstream GraphQL response has no repository"))?;

        let collaborators = repository
            .collaborators
            .map(|c| c.edges)
            .unwrap_or_default()
            .into_iter()
            .map(|edge| Collaborator {
                login: edge.node.login,
                permission: edge.permission,
            })
            .collect();

        Ok(RepoAccessResponse {
            is_private: repository.is_private,
            collaborators,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
