//! Process-wide [`RepoAccessCache`].
//!
//! The first call to [`get_instance`] builds the shared cache.  **Every later
//! call returns that same instance and discards its own arguments**,
//! including the query: the first caller's configuration wins.  Code that
//! only needs the already-built cache should use [`instance`], which returns
//! `None` before initialization instead of silently building one.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{RepoAccessCache, RepoAccessOption};
use crate::forge::AccessQuery;

static INSTANCE: RwLock<Option<Arc<RepoAccessCache>>> = parking_lot::const_rwlock(None);

/// Return the shared cache, building it from `query` and `options` if this is
/// the first call.
pub fn get_instance(
    query: Option<Arc<dyn AccessQuery>>,
    options: impl IntoIterator<Item = RepoAccessOption>,
) -> Arc<RepoAccessCache> {
    if let Some(existing) = INSTANCE.read().as_ref() {
        debug!("repo access cache already initialized; ignoring new arguments");
        return Arc::clone(existing);
    }

    let mut slot = INSTANCE.write();
    if let Some(existing) = slot.as_ref() {
        return Arc::clone(existing);
    }
    let cache = Arc::new(RepoAccessCache::new(query, options));
    *slot = Some(Arc::clone(&cache));
    cache
}

/// The shared cache, if [`get_instance`] has run.
pub fn instance() -> Option<Arc<RepoAccessCache>> {
    INSTANCE.read().clone()
}

/// Flush and forget the shared cache so the next [`get_instance`] builds a
/// new one.  Holders of the old `Arc` keep a working (now empty) cache.
pub fn reset_instance() {
    if let Some(cache) = INSTANCE.write().take() {
        cache.flush();
    }
}
