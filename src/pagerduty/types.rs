//! Domain types shared by the client, cache and scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Resource kinds tracked by the dashboard.
///
/// A closed set: adding a kind means adding a variant here and teaching
/// the client how to reach its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
  Incidents,
  Oncalls,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 2] = [ResourceKind::Incidents, ResourceKind::Oncalls];

  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceKind::Incidents => "incidents",
      ResourceKind::Oncalls => "oncalls",
    }
  }

  /// Path of the list endpoint relative to the API base URL.
  pub fn endpoint_path(&self) -> &'static str {
    self.as_str()
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One remote object tracked by the cache.
///
/// The payload stays a schema-flexible key/value bag so backend schema
/// additions survive deserialization; change detection only depends on
/// `id`, `revision` and field equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub id: String,
  pub kind: ResourceKind,
  /// Change token from the backend, or a content hash when the backend
  /// supplies none.
  pub revision: String,
  pub fields: Map<String, Value>,
  pub fetched_at: DateTime<Utc>,
}

impl Entity {
  /// Field lookup for string-valued payload fields.
  pub fn field_str(&self, key: &str) -> Option<&str> {
    self.fields.get(key).and_then(Value::as_str)
  }

  /// Lookup for string fields one object deep (e.g. `service.summary`).
  pub fn nested_str(&self, key: &str, sub: &str) -> Option<&str> {
    self.fields.get(key)?.get(sub)?.as_str()
  }

  /// Payload equality, ignoring fetch bookkeeping.
  pub fn same_content(&self, other: &Entity) -> bool {
    self.fields == other.fields
  }
}

/// Content hash used as a fallback revision when the backend supplies no
/// change token. `serde_json::Map` keeps keys sorted, so the hash is
/// stable across payloads that differ only in key order.
pub fn content_revision(fields: &Map<String, Value>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(Value::Object(fields.clone()).to_string().as_bytes());
  hex::encode(hasher.finalize())
}

/// One response unit from the backend.
#[derive(Debug, Clone)]
pub struct Page {
  pub items: Vec<Entity>,
  /// Opaque token for the next page. Absent on the last page.
  pub cursor: Option<String>,
}

impl Page {
  pub fn has_more(&self) -> bool {
    self.cursor.is_some()
  }
}

/// The complete, reassembled set of entities of one kind after
/// exhausting pagination for one fetch cycle. Ids are unique; when pages
/// overlap, the later page wins.
#[derive(Debug, Clone)]
pub struct Collection {
  pub kind: ResourceKind,
  entities: Vec<Entity>,
  index: HashMap<String, usize>,
}

impl Collection {
  pub fn new(kind: ResourceKind) -> Self {
    Self {
      kind,
      entities: Vec::new(),
      index: HashMap::new(),
    }
  }

  pub fn from_entities(kind: ResourceKind, entities: impl IntoIterator<Item = Entity>) -> Self {
    let mut collection = Self::new(kind);
    for entity in entities {
      collection.push(entity);
    }
    collection
  }

  /// Append one page in response order, replacing earlier duplicates.
  pub fn push_page(&mut self, page: Page) {
    for entity in page.items {
      self.push(entity);
    }
  }

  pub fn push(&mut self, entity: Entity) {
    match self.index.get(&entity.id) {
      Some(&pos) => self.entities[pos] = entity,
      None => {
        self.index.insert(entity.id.clone(), self.entities.len());
        self.entities.push(entity);
      }
    }
  }

  pub fn entities(&self) -> &[Entity] {
    &self.entities
  }

  pub fn into_entities(self) -> Vec<Entity> {
    self.entities
  }

  pub fn len(&self) -> usize {
    self.entities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entities.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn entity(id: &str, status: &str) -> Entity {
    let fields = match json!({ "id": id, "status": status }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    };
    Entity {
      id: id.to_string(),
      kind: ResourceKind::Incidents,
      revision: content_revision(&fields),
      fields,
      fetched_at: Utc::now(),
    }
  }

  #[test]
  fn test_collection_dedupes_last_page_wins() {
    let mut collection = Collection::new(ResourceKind::Incidents);
    collection.push_page(Page {
      items: vec![entity("A", "triggered"), entity("B", "triggered")],
      cursor: Some("2".to_string()),
    });
    collection.push_page(Page {
      items: vec![entity("A", "acknowledged"), entity("C", "triggered")],
      cursor: None,
    });

    assert_eq!(collection.len(), 3);
    let a = collection
      .entities()
      .iter()
      .find(|e| e.id == "A")
      .expect("A present");
    assert_eq!(a.field_str("status"), Some("acknowledged"));
  }

  #[test]
  fn test_content_revision_tracks_payload() {
    let first = entity("A", "triggered");
    let second = entity("A", "triggered");
    let changed = entity("A", "acknowledged");

    assert_eq!(first.revision, second.revision);
    assert_ne!(first.revision, changed.revision);
  }

  #[test]
  fn test_page_has_more_follows_cursor() {
    let page = Page {
      items: vec![],
      cursor: Some("100".to_string()),
    };
    assert!(page.has_more());

    let last = Page {
      items: vec![],
      cursor: None,
    };
    assert!(!last.has_more());
  }
}
