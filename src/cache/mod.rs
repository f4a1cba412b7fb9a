//! In-memory entity cache with change detection.
//!
//! Holds the last-known-good entity set per resource kind, diffs each
//! freshly fetched collection against it, and tags every entity as
//! added/updated/removed/unchanged. Nothing here persists across
//! restarts; the cache lives and dies with the process.

mod snapshot;
mod store;

pub use snapshot::{ChangeKind, ChangeRecord, Snapshot, StaleKind};
pub use store::{CacheError, EntityCache};
