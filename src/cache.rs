use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::FetchError;

/// Identifies one dispatched request for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(Uuid);

impl Ticket {
  fn new() -> Self {
    Ticket(Uuid::new_v4())
  }
}

/// A fetch the runtime should perform and hand back through [`QueryCache::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
  pub key: String,
  pub ticket: Ticket,
}

#[derive(Debug, Default)]
struct Entry {
  data: Option<Value>,
  error: Option<Arc<FetchError>>,
  in_flight: Option<Ticket>,
}

/// What a view sees for one key.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  pub data: Option<Value>,
  pub error: Option<Arc<FetchError>>,
  pub is_loading: bool,
  pub is_validating: bool,
}

/// Results cached by request path.
///
/// Each key holds its last data and last error. A key has at most one
/// request in flight. A result is applied only when it carries the ticket of
/// that request. Anything else is a leftover from a refresh that was
/// superseded, or from a key that was dropped, and gets discarded. Failed
/// keys are never revalidated on their own.
#[derive(Debug, Default)]
pub struct QueryCache {
  entries: HashMap<String, Entry>,
}

impl QueryCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// First use of a key starts a fetch. Later calls reuse what is cached.
  pub fn request(&mut self, key: &str) -> Option<FetchRequest> {
    if self.entries.contains_key(key) {
      return None;
    }
    self.dispatch(key)
  }

  /// Background refresh. Skips keys that are in flight or whose last
  /// outcome was an error.
  pub fn revalidate(&mut self, key: &str) -> Option<FetchRequest> {
    match self.entries.get(key) {
      Some(entry) if entry.in_flight.is_none() && entry.error.is_none() => self.dispatch(key),
      Some(_) => None,
      None => self.dispatch(key),
    }
  }

  /// Explicit user refresh: re-fetches even after an error.
  pub fn refresh(&mut self, key: &str) -> Option<FetchRequest> {
    match self.entries.get(key) {
      Some(entry) if entry.in_flight.is_some() => None,
      _ => self.dispatch(key),
    }
  }

  fn dispatch(&mut self, key: &str) -> Option<FetchRequest> {
    let ticket = Ticket::new();
    self.entries.entry(key.to_string()).or_default().in_flight = Some(ticket);
    debug!("dispatching fetch for {}", key);
    Some(FetchRequest {
      key: key.to_string(),
      ticket,
    })
  }

  /// Returns whether the outcome was applied.
  pub fn resolve(&mut self, request: &FetchRequest, outcome: Result<Value, FetchError>) -> bool {
    let Some(entry) = self.entries.get_mut(&request.key) else {
      debug!("discarding result for abandoned key {}", request.key);
      return false;
    };
    if entry.in_flight != Some(request.ticket) {
      debug!("discarding superseded result for {}", request.key);
      return false;
    }
    entry.in_flight = None;
    match outcome {
      Ok(data) => {
        entry.data = Some(data);
        entry.error = None;
      }
      Err(e) => entry.error = Some(Arc::new(e)),
    }
    true
  }

  /// Drops every key the predicate rejects, including its in-flight request.
  pub fn retain<F>(&mut self, mut keep: F)
  where
    F: FnMut(&str) -> bool,
  {
    self.entries.retain(|key, _| keep(key));
  }

  /// `None` keys are never fetched and read as an idle, empty snapshot.
  pub fn snapshot(&self, key: Option<&str>) -> Snapshot {
    let Some(entry) = key.and_then(|k| self.entries.get(k)) else {
      return Snapshot::default();
    };
    let validating = entry.in_flight.is_some();
    Snapshot {
      data: entry.data.clone(),
      error: entry.error.clone(),
      is_loading: validating && entry.data.is_none() && entry.error.is_none(),
      is_validating: validating,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn api_error(message: &str) -> FetchError {
    FetchError::Api { message: message.into(), status: 500 }
  }

  #[test]
  fn first_request_dispatches_and_repeat_is_memoized() {
    let mut cache = QueryCache::new();
    let req = cache.request("/controllers").unwrap();
    assert!(cache.request("/controllers").is_none());
    assert!(cache.snapshot(Some("/controllers")).is_loading);

    assert!(cache.resolve(&req, Ok(json!({"controllers": []}))));
    let snap = cache.snapshot(Some("/controllers"));
    assert!(!snap.is_loading);
    assert_eq!(snap.data, Some(json!({"controllers": []})));
    assert!(cache.request("/controllers").is_none());
  }

  #[test]
  fn none_key_is_idle_and_empty() {
    let cache = QueryCache::new();
    let snap = cache.snapshot(None);
    assert!(snap.data.is_none() && snap.error.is_none());
    assert!(!snap.is_loading);
  }

  #[test]
  fn superseded_ticket_is_discarded() {
    let mut cache = QueryCache::new();
    let first = cache.request("/k").unwrap();
    assert!(cache.resolve(&first, Ok(json!(1))));
    let second = cache.revalidate("/k").unwrap();
    // a stale duplicate of the first request must not land
    assert!(!cache.resolve(&first, Ok(json!("stale"))));
    assert_eq!(cache.snapshot(Some("/k")).data, Some(json!(1)));
    assert!(cache.snapshot(Some("/k")).is_validating);
    assert!(cache.resolve(&second, Ok(json!(2))));
    assert_eq!(cache.snapshot(Some("/k")).data, Some(json!(2)));
  }

  #[test]
  fn abandoned_key_result_is_dropped() {
    let mut cache = QueryCache::new();
    let old = cache.request("/controller/Q1/tasks").unwrap();
    cache.retain(|key| key != "/controller/Q1/tasks");
    assert!(!cache.resolve(&old, Ok(json!({"tasks": [1]}))));
    assert!(cache.entries.is_empty());
  }

  #[test]
  fn errors_are_not_revalidated_but_manual_refresh_retries() {
    let mut cache = QueryCache::new();
    let req = cache.request("/k").unwrap();
    cache.resolve(&req, Err(api_error("boom")));
    let snap = cache.snapshot(Some("/k"));
    assert_eq!(snap.error.unwrap().message(), "boom");
    assert!(!snap.is_loading);

    assert!(cache.revalidate("/k").is_none());
    assert!(cache.request("/k").is_none());
    let retry = cache.refresh("/k").unwrap();
    assert!(cache.refresh("/k").is_none());
    cache.resolve(&retry, Ok(json!({"ok": true})));
    let snap = cache.snapshot(Some("/k"));
    assert!(snap.error.is_none());
    assert_eq!(snap.data, Some(json!({"ok": true})));
  }

  #[test]
  fn error_after_data_keeps_previous_data() {
    let mut cache = QueryCache::new();
    let req = cache.request("/k").unwrap();
    cache.resolve(&req, Ok(json!([1, 2])));
    let again = cache.revalidate("/k").unwrap();
    cache.resolve(&again, Err(api_error("down")));
    let snap = cache.snapshot(Some("/k"));
    assert_eq!(snap.data, Some(json!([1, 2])));
    assert_eq!(snap.error.unwrap().message(), "down");
  }
}
