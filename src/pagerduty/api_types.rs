//! Serde-deserializable types matching PagerDuty API responses.
//!
//! List payloads stay generic JSON objects rather than rigid structs so
//! backend schema additions pass through untouched; only the fields the
//! core depends on (ids, change tokens, pagination metadata) are
//! interpreted here.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::types::{content_revision, Entity, ResourceKind};

/// Raw JSON object for one API resource.
pub type ApiObject = Map<String, Value>;

/// Envelope shared by the classic list endpoints: one array named after
/// the resource, plus `limit`/`offset`/`more` pagination metadata.
#[derive(Debug, Default, Deserialize)]
pub struct ApiListResponse {
  #[serde(default)]
  pub incidents: Vec<ApiObject>,
  #[serde(default)]
  pub oncalls: Vec<ApiObject>,
  #[serde(default)]
  pub limit: Option<u64>,
  #[serde(default)]
  pub offset: Option<u64>,
  #[serde(default)]
  pub more: bool,
}

impl ApiListResponse {
  pub fn take_items(self, kind: ResourceKind) -> Vec<ApiObject> {
    match kind {
      ResourceKind::Incidents => self.incidents,
      ResourceKind::Oncalls => self.oncalls,
    }
  }
}

/// Extract the unique id for one raw object.
///
/// Incidents carry a backend id. On-call rows have none, so one is
/// synthesized from the escalation policy, schedule, user, level and
/// start time that together identify the shift.
pub fn entity_id(kind: ResourceKind, obj: &ApiObject) -> Option<String> {
  match kind {
    ResourceKind::Incidents => obj.get("id").and_then(Value::as_str).map(String::from),
    ResourceKind::Oncalls => {
      let policy = nested_id(obj, "escalation_policy")?;
      let user = nested_id(obj, "user")?;
      let schedule = nested_id(obj, "schedule").unwrap_or("-");
      let level = obj
        .get("escalation_level")
        .and_then(Value::as_u64)
        .unwrap_or(0);
      let start = obj.get("start").and_then(Value::as_str).unwrap_or("-");
      Some(format!("{}:{}:{}:{}:{}", policy, schedule, user, level, start))
    }
  }
}

fn nested_id<'a>(obj: &'a ApiObject, key: &str) -> Option<&'a str> {
  obj.get(key)?.get("id")?.as_str()
}

/// Pick the revision token for one raw object.
///
/// Incidents report status changes through `last_status_change_at`
/// (falling back to `updated_at`); on-call rows carry no change token at
/// all. Anything without a usable token gets a content hash, and the
/// diff falls back to content equality on token collisions anyway.
pub fn revision(kind: ResourceKind, obj: &ApiObject) -> String {
  let token = match kind {
    ResourceKind::Incidents => obj
      .get("last_status_change_at")
      .or_else(|| obj.get("updated_at"))
      .and_then(Value::as_str),
    ResourceKind::Oncalls => None,
  };

  match token {
    Some(token) => token.to_string(),
    None => content_revision(obj),
  }
}

/// Convert one raw API object into a cache entity. Objects without a
/// derivable id are dropped (the caller logs how many).
pub fn into_entity(kind: ResourceKind, obj: ApiObject, fetched_at: DateTime<Utc>) -> Option<Entity> {
  let id = entity_id(kind, &obj)?;
  let revision = revision(kind, &obj);
  Some(Entity {
    id,
    kind,
    revision,
    fields: obj,
    fetched_at,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn obj(value: Value) -> ApiObject {
    match value {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  #[test]
  fn test_incident_entity_uses_backend_id_and_token() {
    let raw = obj(json!({
      "id": "PABC123",
      "title": "Disk full",
      "status": "triggered",
      "last_status_change_at": "2024-03-01T10:00:00Z",
    }));

    let entity = into_entity(ResourceKind::Incidents, raw, Utc::now()).expect("entity");
    assert_eq!(entity.id, "PABC123");
    assert_eq!(entity.revision, "2024-03-01T10:00:00Z");
    assert_eq!(entity.field_str("title"), Some("Disk full"));
  }

  #[test]
  fn test_incident_without_token_hashes_content() {
    let raw = obj(json!({ "id": "PABC123", "title": "Disk full" }));
    let entity = into_entity(ResourceKind::Incidents, raw.clone(), Utc::now()).expect("entity");
    assert_eq!(entity.revision, content_revision(&raw));
  }

  #[test]
  fn test_oncall_id_is_synthesized() {
    let raw = obj(json!({
      "escalation_policy": { "id": "PEP1" },
      "schedule": { "id": "PSCH1" },
      "user": { "id": "PUSR1" },
      "escalation_level": 2,
      "start": "2024-03-01T00:00:00Z",
    }));

    let entity = into_entity(ResourceKind::Oncalls, raw, Utc::now()).expect("entity");
    assert_eq!(entity.id, "PEP1:PSCH1:PUSR1:2:2024-03-01T00:00:00Z");
  }

  #[test]
  fn test_oncall_without_policy_is_dropped() {
    let raw = obj(json!({ "user": { "id": "PUSR1" } }));
    assert!(into_entity(ResourceKind::Oncalls, raw, Utc::now()).is_none());
  }

  #[test]
  fn test_envelope_defaults() {
    let body: ApiListResponse = serde_json::from_value(json!({
      "incidents": [{ "id": "P1" }],
    }))
    .expect("parse");

    assert!(!body.more);
    assert_eq!(body.take_items(ResourceKind::Incidents).len(), 1);
  }
}
