//! Conflict detection and merging for divergent page heads.
//!
//! The merging subsystem is responsible for:
//! 1. **Ancestor search** -- locating the lowest common ancestor of two
//!    heads in the commit DAG.
//! 2. **Strategies** -- producing a merge commit from two heads and their
//!    ancestor, either automatically or by delegating to an external
//!    resolver.
//! 3. **Resolution** -- the per-page [`MergeResolver`] that watches commit
//!    arrivals and drives one merge at a time until a single head remains.

pub mod ancestor;
pub mod diff;
pub mod last_one_wins;
pub mod resolver;
pub mod resolver_client;
pub mod strategy;

pub use ancestor::find_common_ancestor;
pub use diff::compute_page_change;
pub use last_one_wins::LastOneWinsStrategy;
pub use resolver::MergeResolver;
pub use resolver_client::{MergeResultProvider, RemoteResolverStrategy};
pub use strategy::{MergeOutcome, MergeStrategy};
