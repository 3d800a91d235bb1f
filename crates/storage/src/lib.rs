//! Converge storage contracts.
//!
//! This crate defines the interfaces the Converge core programs against: the
//! [`Commit`] view of a page's history DAG, the [`Journal`] builder for new
//! commits, and the [`PageStorage`] collaborator that owns both. It also
//! ships [`memory::MemoryPageStorage`], a complete content-addressed
//! in-memory backend used by tests and by embedders that do not need
//! durability.

pub mod commit;
pub mod error;
pub mod journal;
pub mod memory;
pub mod store;
pub mod types;

// Re-exports for convenience.
pub use commit::Commit;
pub use error::StorageError;
pub use journal::Journal;
pub use memory::MemoryPageStorage;
pub use store::{CommitWatcher, PageStorage, WatcherToken};
pub use types::{
    ChangeSource, CommitId, Entry, JournalType, KeyPriority, ObjectId, COMMIT_ID_SIZE,
    FIRST_PAGE_COMMIT_ID,
};
