use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::form_urlencoded;

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Task states reported by the controller. The server owns transitions.
pub const TASK_STATUSES: &[&str] = &[
  "PENDING",
  "RUNNING",
  "COMPLETE",
  "ERROR",
  "CANCELLED",
  "DIED",
  "TIMEOUT",
  "MISSING",
  "MOVED",
  "DEFERRED",
  "IMPOSSIBLE",
];

pub const WORKER_STATUSES: &[&str] = &["IDLE", "BUSY", "EXITED", "LOST", "PAUSED"];

/// A queue known to the API, as listed by `/controllers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
  pub id: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub time: String,
  #[serde(default)]
  pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControllerList {
  #[serde(default)]
  pub controllers: Vec<Controller>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEvent {
  #[serde(default, deserialize_with = "null_as_default")]
  pub time: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerEventList {
  #[serde(default)]
  pub events: Vec<WorkerEvent>,
}

impl ControllerList {
  /// Lenient decode: anything that doesn't fit yields no suggestions.
  pub fn from_data(data: &Value) -> Self {
    serde_json::from_value(data.clone()).unwrap_or_default()
  }
}

impl WorkerEventList {
  pub fn from_data(data: &Value) -> Self {
    serde_json::from_value(data.clone()).unwrap_or_default()
  }
}

pub const CONTROLLERS_PATH: &str = "/controllers";

/// Percent-encodes an id for use as one path segment.
fn segment(id: &str) -> String {
  // form encoding writes spaces as '+' and escapes a literal '+' as %2B
  form_urlencoded::byte_serialize(id.as_bytes())
    .collect::<String>()
    .replace('+', "%20")
}

/// Prefix shared by every endpoint of one queue.
pub fn controller_scope(queue_id: &str) -> String {
  format!("/controller/{}/", segment(queue_id))
}

pub fn tasks_path(queue_id: &str) -> String {
  format!("{}tasks", controller_scope(queue_id))
}

pub fn workers_path(queue_id: &str) -> String {
  format!("{}workers", controller_scope(queue_id))
}

pub fn worker_config_path(queue_id: &str) -> String {
  format!("{}worker_config", controller_scope(queue_id))
}

pub fn worker_events_path(queue_id: &str, worker_id: &str) -> String {
  format!("{}worker/{}/events", controller_scope(queue_id), segment(worker_id))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn controller_list_tolerates_missing_fields() {
    let list = ControllerList::from_data(&json!({"controllers": [{"id": "q1"}]}));
    assert_eq!(list.controllers[0].id, "q1");
    assert_eq!(list.controllers[0].username, None);
    assert!(ControllerList::from_data(&Value::Null).controllers.is_empty());
    assert!(ControllerList::from_data(&json!({})).controllers.is_empty());
  }

  #[test]
  fn null_event_fields_read_as_empty() {
    let list = WorkerEventList::from_data(&json!({"events": [{"time": null, "message": "started"}]}));
    assert_eq!(list.events, vec![WorkerEvent { time: String::new(), message: "started".into() }]);
  }

  #[test]
  fn event_path_scopes_worker_under_queue() {
    assert_eq!(worker_events_path("q1", "w7"), "/controller/q1/worker/w7/events");
    assert_eq!(worker_config_path("q1"), "/controller/q1/worker_config");
  }

  #[test]
  fn ids_are_encoded_as_single_segments() {
    assert_eq!(tasks_path("team a/b"), "/controller/team%20a%2Fb/tasks");
    assert_eq!(worker_events_path("q?1", "w#1+x"), "/controller/q%3F1/worker/w%231%2Bx/events");
    assert_eq!(controller_scope("default-q_1.x"), "/controller/default-q_1.x/");
  }
}
