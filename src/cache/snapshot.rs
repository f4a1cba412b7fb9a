//! Change records and the published snapshot type.

use chrono::{DateTime, Utc};

use crate::pagerduty::types::{Entity, ResourceKind};

/// How one entity changed between two cache generations.
///
/// Declaration order doubles as emit order within a snapshot: removals
/// first, then updates, additions and finally unchanged entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
  Removed,
  Updated,
  Added,
  Unchanged,
}

/// One entity's transition within a refresh cycle. Immutable once
/// produced.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
  pub kind: ResourceKind,
  pub id: String,
  pub change: ChangeKind,
  /// Populated for `Removed` and `Updated`.
  pub previous: Option<Entity>,
  /// Populated for everything except `Removed`.
  pub current: Option<Entity>,
}

/// A resource kind serving entities from a previous generation because
/// its refresh failed or timed out.
#[derive(Debug, Clone)]
pub struct StaleKind {
  pub kind: ResourceKind,
  /// When the kind last refreshed successfully turned stale.
  pub since: DateTime<Utc>,
  pub reason: String,
}

/// The published, immutable result of one refresh cycle. Ownership
/// transfers to the sink; only the most recent snapshot matters there.
#[derive(Debug, Clone)]
pub struct Snapshot {
  /// Cache generation after this cycle's diffs.
  pub generation: u64,
  /// Deterministically ordered: by kind, then change group, then id.
  pub changes: Vec<ChangeRecord>,
  /// When the cycle started fetching.
  pub fetched_at: DateTime<Utc>,
  /// True when one or more kinds failed to refresh and the snapshot
  /// mixes fresh and stale entities.
  pub partial: bool,
  pub stale: Vec<StaleKind>,
}

impl Snapshot {
  /// Current entities of one kind, in record order. Every live entity
  /// appears in exactly one non-`Removed` record, so this reconstructs
  /// the kind's full set.
  pub fn entities_of(&self, kind: ResourceKind) -> impl Iterator<Item = &Entity> {
    self
      .changes
      .iter()
      .filter(move |record| record.kind == kind && record.change != ChangeKind::Removed)
      .filter_map(|record| record.current.as_ref())
  }

  pub fn stale_for(&self, kind: ResourceKind) -> Option<&StaleKind> {
    self.stale.iter().find(|marker| marker.kind == kind)
  }

  /// Count of records that represent an actual change.
  pub fn changed_count(&self) -> usize {
    self
      .changes
      .iter()
      .filter(|record| record.change != ChangeKind::Unchanged)
      .count()
  }
}
