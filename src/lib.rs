//! Repository access decisions for lockdown mode.
//!
//! [`access::RepoAccessCache`] answers whether a repository is private and
//! whether a user can push to it, caching upstream answers per repository.
//! [`forge`] holds the upstream query capability and its GitHub
//! implementation; [`config`] and [`metrics`] carry the ambient plumbing.

pub mod access;
pub mod config;
pub mod forge;
pub mod metrics;

pub use access::{AccessError, OptionalAccessCache, RepoAccess, RepoAccessCache};
pub use forge::AccessQuery;
