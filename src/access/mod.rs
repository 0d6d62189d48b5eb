//! Repository access cache.
//!
//! Answers "is `owner/repo` private, and can `user` push to it?" for
//! lockdown checks.  Answers are cached per repository with a sliding idle
//! TTL, and each repository entry accumulates the push-access results of
//! every user asked about so far.  Misses are resolved through an
//! [`AccessQuery`](crate::forge::AccessQuery).

mod cache;
pub mod global;
mod store;

use std::ops::Deref;
use std::time::Duration;

use serde::Serialize;

pub use cache::{
    with_logger, with_metrics, with_ttl, CacheStats, RepoAccessCache, RepoAccessOption,
};

/// Idle TTL applied when no [`with_ttl`] option is given.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Result of one access lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RepoAccess {
    pub is_private: bool,
    pub has_push: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// The caller has no cache to consult.
    #[error("repo access cache is not configured")]
    Unavailable,
    /// The cache was built without an upstream query.
    #[error("no repository access query configured")]
    MissingQuery,
    #[error("failed to query repository access info")]
    Query(#[source] anyhow::Error),
}

/// Normalized `owner/repo` key.
pub fn cache_key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner.to_lowercase(), repo.to_lowercase())
}

/// Lookups through a cache handle that may be absent.
///
/// Callers that treat the cache as optional get
/// [`AccessError::Unavailable`] instead of having to special-case `None`.
#[async_trait::async_trait]
pub trait OptionalAccessCache {
    async fn get_repo_access_info(
        &self,
        username: &str,
        owner: &str,
        repo: &str,
    ) -> Result<RepoAccess, AccessError>;
}

#[async_trait::async_trait]
impl<C> OptionalAccessCache for Option<C>
where
    C: Deref<Target = RepoAccessCache> + Send + Sync,
{
    async fn get_repo_access_info(
        &self,
        username: &str,
        owner: &str,
        repo: &str,
    ) -> Result<RepoAccess, AccessError> {
        match self {
            Some(cache) => cache.get_repo_access_info(username, owner, repo).await,
            None => Err(AccessError::Unavailable),
        }
    }
}
