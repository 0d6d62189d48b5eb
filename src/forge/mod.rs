//! Forge backend abstraction layer.
//!
//! Provides the [`AccessQuery`] trait through which the access cache asks the
//! upstream forge whether a repository is private and what permission a user
//! holds on it.  No forge-specific request construction or response parsing
//! leaks outside this module.

pub mod github;
pub mod rate_limit;

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::metrics::AccessMetrics;

// ---------------------------------------------------------------------------
// Query result
// ---------------------------------------------------------------------------

/// A collaborator record returned by the upstream access query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub login: String,
    /// Canonical permission name as reported upstream (`READ`, `TRIAGE`,
    /// `WRITE`, `MAINTAIN`, `ADMIN`).
    pub permission: String,
}

/// Raw answer of one upstream access query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoAccessResponse {
    pub is_private: bool,
    /// Collaborators matching the queried username.  Upstream bounds this to
    /// a handful of records.
    pub collaborators: Vec<Collaborator>,
}

impl RepoAccessResponse {
    /// Whether `username` appears in the collaborator list with push access.
    ///
    /// Logins are compared after Unicode lowercasing, the same folding the
    /// cache applies to its keys.  A missing record is not an error; it
    /// simply means no push access.
    pub fn has_push(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        self.collaborators
            .iter()
            .find(|c| c.login.to_lowercase() == username)
            .is_some_and(|c| permission_grants_push(&c.permission))
    }
}

/// `WRITE`, `MAINTAIN` and `ADMIN` grant push; everything else does not.
///
/// The match is case-sensitive against the canonical upstream spelling.
pub fn permission_grants_push(permission: &str) -> bool {
    matches!(permission, "WRITE" | "ADMIN" | "MAINTAIN")
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Remote capability answering "is this repo private, and what can this user
/// do on it?".
#[async_trait::async_trait]
pub trait AccessQuery: Send + Sync {
    async fn query_repo_access(
        &self,
        owner: &str,
        repo: &str,
        username: &str,
    ) -> Result<RepoAccessResponse>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the upstream [`AccessQuery`] for the configured forge.
pub fn build_backend(config: &Config, metrics: &AccessMetrics) -> Result<Arc<dyn AccessQuery>> {
    let backend = github::GitHubBackend::new(config, metrics.clone())?;
    Ok(Arc::new(backend))
}
