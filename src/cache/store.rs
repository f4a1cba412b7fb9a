//! The in-memory entity cache and its diff operation.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use crate::pagerduty::types::{Collection, Entity, ResourceKind};

use super::snapshot::{ChangeKind, ChangeRecord};

/// Reserved for optimistic-concurrency use; nothing in the diff path
/// produces it today.
#[allow(dead_code)]
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("conflicting update for {kind} entity {id}")]
  Conflict { kind: ResourceKind, id: String },
}

/// Last-known-good entity sets, one mapping per kind, plus a global
/// generation counter bumped on every successful diff.
///
/// The cache has a single mutator: the refresh coordinator calls
/// [`EntityCache::diff`] and nothing else writes, so no locking is
/// needed around the mappings.
#[derive(Debug, Default)]
pub struct EntityCache {
  entities: HashMap<ResourceKind, HashMap<String, Entity>>,
  generation: u64,
}

impl EntityCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }

  pub fn len(&self, kind: ResourceKind) -> usize {
    self.entities.get(&kind).map_or(0, HashMap::len)
  }

  pub fn get(&self, kind: ResourceKind, id: &str) -> Option<&Entity> {
    self.entities.get(&kind)?.get(id)
  }

  /// Ingest a freshly fetched collection, emit what changed since the
  /// previous generation, and atomically replace the kind's mapping.
  ///
  /// Record order is deterministic: removals, then updates, additions
  /// and unchanged entities, each group sorted by id. Entities whose
  /// revision matches but whose payload differs are reported as
  /// `Updated`: content equality is the final arbiter, revision
  /// equality just a shortcut.
  pub fn diff(&mut self, collection: Collection) -> Vec<ChangeRecord> {
    let kind = collection.kind;
    let fresh: HashMap<String, Entity> = collection
      .into_entities()
      .into_iter()
      .map(|entity| (entity.id.clone(), entity))
      .collect();
    let old = self.entities.entry(kind).or_default();

    let mut removed = Vec::new();
    let mut updated = Vec::new();
    let mut added = Vec::new();
    let mut unchanged = Vec::new();

    for (id, previous) in old.iter() {
      if !fresh.contains_key(id) {
        removed.push(ChangeRecord {
          kind,
          id: id.clone(),
          change: ChangeKind::Removed,
          previous: Some(previous.clone()),
          current: None,
        });
      }
    }

    for (id, current) in fresh.iter() {
      match old.get(id) {
        None => added.push(ChangeRecord {
          kind,
          id: id.clone(),
          change: ChangeKind::Added,
          previous: None,
          current: Some(current.clone()),
        }),
        Some(previous) if previous.revision == current.revision && previous.same_content(current) => {
          unchanged.push(ChangeRecord {
            kind,
            id: id.clone(),
            change: ChangeKind::Unchanged,
            previous: None,
            current: Some(current.clone()),
          });
        }
        Some(previous) => updated.push(ChangeRecord {
          kind,
          id: id.clone(),
          change: ChangeKind::Updated,
          previous: Some(previous.clone()),
          current: Some(current.clone()),
        }),
      }
    }

    let mut records = Vec::with_capacity(removed.len() + updated.len() + added.len() + unchanged.len());
    for mut group in [removed, updated, added, unchanged] {
      group.sort_by(|a, b| a.id.cmp(&b.id));
      records.append(&mut group);
    }

    *old = fresh;
    self.generation += 1;

    debug!(
      kind = %kind,
      generation = self.generation,
      records = records.len(),
      "cache diffed"
    );

    records
  }

  /// Unchanged records for every cached entity of one kind, sorted by
  /// id. Used when a kind's fetch failed and the cycle reuses the prior
  /// collection; the cache itself is not touched.
  pub fn unchanged_records(&self, kind: ResourceKind) -> Vec<ChangeRecord> {
    let mut records: Vec<ChangeRecord> = self
      .entities
      .get(&kind)
      .into_iter()
      .flat_map(HashMap::values)
      .map(|entity| ChangeRecord {
        kind,
        id: entity.id.clone(),
        change: ChangeKind::Unchanged,
        previous: None,
        current: Some(entity.clone()),
      })
      .collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    records
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::pagerduty::types::content_revision;
  use chrono::Utc;
  use serde_json::{json, Value};

  fn entity(id: &str, revision: u32, status: &str) -> Entity {
    let fields = match json!({ "id": id, "status": status, "rev": revision }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    };
    Entity {
      id: id.to_string(),
      kind: ResourceKind::Incidents,
      revision: revision.to_string(),
      fields,
      fetched_at: Utc::now(),
    }
  }

  fn collection(entities: Vec<Entity>) -> Collection {
    Collection::from_entities(ResourceKind::Incidents, entities)
  }

  fn ids_with(records: &[ChangeRecord], change: ChangeKind) -> Vec<&str> {
    records
      .iter()
      .filter(|r| r.change == change)
      .map(|r| r.id.as_str())
      .collect()
  }

  #[test]
  fn test_update_and_add_ordering() {
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![entity("INC1", 1, "triggered")]));

    let records = cache.diff(collection(vec![
      entity("INC2", 1, "triggered"),
      entity("INC1", 2, "acknowledged"),
    ]));

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].change, ChangeKind::Updated);
    assert_eq!(records[0].id, "INC1");
    assert_eq!(records[0].previous.as_ref().map(|e| e.revision.as_str()), Some("1"));
    assert_eq!(records[0].current.as_ref().map(|e| e.revision.as_str()), Some("2"));
    assert_eq!(records[1].change, ChangeKind::Added);
    assert_eq!(records[1].id, "INC2");
  }

  #[test]
  fn test_same_revision_is_unchanged() {
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![entity("INC1", 1, "triggered")]));

    let records = cache.diff(collection(vec![entity("INC1", 1, "triggered")]));

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].change, ChangeKind::Unchanged);
    assert!(records[0].current.is_some());
  }

  #[test]
  fn test_equal_revision_different_content_is_updated() {
    // Non-monotonic backend tokens: the payload changed but the token
    // did not. Content equality decides.
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![entity("INC1", 1, "triggered")]));

    let records = cache.diff(collection(vec![entity("INC1", 1, "acknowledged")]));

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].change, ChangeKind::Updated);
  }

  #[test]
  fn test_empty_collection_removes_everything() {
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![
      entity("INC1", 1, "triggered"),
      entity("INC2", 1, "triggered"),
    ]));

    let records = cache.diff(collection(vec![]));

    assert_eq!(ids_with(&records, ChangeKind::Removed), vec!["INC1", "INC2"]);
    assert_eq!(records.len(), 2);
    assert_eq!(cache.len(ResourceKind::Incidents), 0);
  }

  #[test]
  fn test_group_order_and_id_sort() {
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![
      entity("B", 1, "triggered"),
      entity("D", 1, "triggered"),
      entity("A", 1, "triggered"),
    ]));

    // A removed, B updated, C added, D unchanged.
    let records = cache.diff(collection(vec![
      entity("D", 1, "triggered"),
      entity("C", 1, "triggered"),
      entity("B", 2, "triggered"),
    ]));

    let order: Vec<(ChangeKind, &str)> = records
      .iter()
      .map(|r| (r.change, r.id.as_str()))
      .collect();
    assert_eq!(
      order,
      vec![
        (ChangeKind::Removed, "A"),
        (ChangeKind::Updated, "B"),
        (ChangeKind::Added, "C"),
        (ChangeKind::Unchanged, "D"),
      ]
    );
  }

  #[test]
  fn test_state_is_path_independent() {
    let c1 = vec![entity("INC1", 1, "triggered"), entity("INC2", 3, "triggered")];
    let c2 = vec![entity("INC2", 4, "acknowledged"), entity("INC3", 1, "triggered")];

    let mut walked = EntityCache::new();
    walked.diff(collection(c1.clone()));
    walked.diff(collection(c2));
    walked.diff(collection(c1.clone()));

    let mut direct = EntityCache::new();
    direct.diff(collection(c1.clone()));

    for wanted in &c1 {
      let via_walk = walked.get(ResourceKind::Incidents, &wanted.id).expect("walked entry");
      let via_direct = direct.get(ResourceKind::Incidents, &wanted.id).expect("direct entry");
      assert_eq!(via_walk.revision, via_direct.revision);
      assert!(via_walk.same_content(via_direct));
    }
    assert_eq!(
      walked.len(ResourceKind::Incidents),
      direct.len(ResourceKind::Incidents)
    );
  }

  #[test]
  fn test_generation_increments_per_diff() {
    let mut cache = EntityCache::new();
    assert_eq!(cache.generation(), 0);

    cache.diff(collection(vec![entity("INC1", 1, "triggered")]));
    assert_eq!(cache.generation(), 1);

    cache.diff(collection(vec![entity("INC1", 2, "triggered")]));
    assert_eq!(cache.generation(), 2);
  }

  #[test]
  fn test_unchanged_records_leave_cache_untouched() {
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![
      entity("INC2", 1, "triggered"),
      entity("INC1", 1, "triggered"),
    ]));
    let generation = cache.generation();

    let records = cache.unchanged_records(ResourceKind::Incidents);

    assert_eq!(ids_with(&records, ChangeKind::Unchanged), vec!["INC1", "INC2"]);
    assert_eq!(cache.generation(), generation);
    assert_eq!(cache.len(ResourceKind::Incidents), 2);
  }

  #[test]
  fn test_kinds_diff_independently() {
    let mut cache = EntityCache::new();
    cache.diff(collection(vec![entity("INC1", 1, "triggered")]));

    let oncall_fields = match json!({ "user": { "id": "U1" } }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    };
    let oncall = Entity {
      id: "EP1:S1:U1:1:t0".to_string(),
      kind: ResourceKind::Oncalls,
      revision: content_revision(&oncall_fields),
      fields: oncall_fields,
      fetched_at: Utc::now(),
    };
    let records = cache.diff(Collection::from_entities(ResourceKind::Oncalls, vec![oncall]));

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].change, ChangeKind::Added);
    assert_eq!(cache.len(ResourceKind::Incidents), 1);
    assert_eq!(cache.len(ResourceKind::Oncalls), 1);
  }
}
