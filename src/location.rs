//! Query-string backed UI state.
//!
//! The location is the only place the dashboard persists anything. Every
//! `Param` handle reads from and writes to the same shared parameter list, and
//! writes always go through [`Location::update`] so they are computed from the
//! latest snapshot rather than one captured earlier.

use std::sync::{Arc, Mutex, MutexGuard};

use url::{Url, form_urlencoded};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
  pairs: Vec<(String, String)>,
}

impl SearchParams {
  pub fn parse(query: &str) -> Self {
    let query = query.strip_prefix('?').unwrap_or(query);
    Self {
      pairs: form_urlencoded::parse(query.as_bytes()).into_owned().collect(),
    }
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self.pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
  }

  /// Replaces the first `name` entry in place and drops any duplicates,
  /// appending when absent.
  pub fn set(&mut self, name: &str, value: &str) {
    let mut seen = false;
    self.pairs.retain_mut(|(k, v)| {
      if k != name {
        return true;
      }
      if seen {
        return false;
      }
      seen = true;
      *v = value.to_string();
      true
    });
    if !seen {
      self.pairs.push((name.to_string(), value.to_string()));
    }
  }

  pub fn to_query_string(&self) -> String {
    form_urlencoded::Serializer::new(String::new())
      .extend_pairs(self.pairs.iter())
      .finish()
  }
}

#[derive(Debug, Clone, Default)]
pub struct Location {
  inner: Arc<Mutex<LocationState>>,
}

#[derive(Debug, Default)]
struct LocationState {
  params: SearchParams,
  revision: u64,
}

impl Location {
  /// Accepts a bare query (`tab=workers`), a `?`-prefixed one, or a full URL.
  pub fn parse(raw: &str) -> Self {
    let params = match Url::parse(raw) {
      Ok(url) => SearchParams::parse(url.query().unwrap_or_default()),
      Err(_) => SearchParams::parse(raw),
    };
    Self {
      inner: Arc::new(Mutex::new(LocationState { params, revision: 0 })),
    }
  }

  fn lock(&self) -> MutexGuard<'_, LocationState> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn get(&self, name: &str) -> Option<String> {
    self.lock().params.get(name).map(str::to_string)
  }

  /// Applies `f` to the current parameters while holding the lock.
  pub fn update<F>(&self, f: F)
  where
    F: FnOnce(&mut SearchParams),
  {
    let mut state = self.lock();
    let before = state.params.clone();
    f(&mut state.params);
    if state.params != before {
      state.revision += 1;
    }
  }

  /// Bumped on every write that changed something.
  pub fn revision(&self) -> u64 {
    self.lock().revision
  }

  pub fn to_query_string(&self) -> String {
    self.lock().params.to_query_string()
  }

  pub fn param(&self, name: &'static str, default: &'static str) -> Param {
    Param {
      location: self.clone(),
      name,
      default,
    }
  }
}

/// A single named parameter with a read default.
#[derive(Debug, Clone)]
pub struct Param {
  location: Location,
  name: &'static str,
  default: &'static str,
}

impl Param {
  /// Absent parameters read as the default, which is never written back.
  pub fn get(&self) -> String {
    self.location.get(self.name).unwrap_or_else(|| self.default.to_string())
  }

  pub fn set(&self, value: &str) {
    let name = self.name;
    self.location.update(|params| params.set(name, value));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn absent_param_reads_default_without_writing_it() {
    let location = Location::parse("");
    let tab = location.param("tab", "tasks");
    assert_eq!(tab.get(), "tasks");
    assert_eq!(location.to_query_string(), "");
    assert_eq!(location.revision(), 0);
  }

  #[test]
  fn set_then_get_and_other_writes_preserve_it() {
    let location = Location::parse("?tab=workers");
    let queue_id = location.param("queueId", "");
    let worker_id = location.param("workerId", "");
    queue_id.set("Q1");
    assert_eq!(queue_id.get(), "Q1");
    worker_id.set("w-9");
    assert_eq!(queue_id.get(), "Q1");
    assert_eq!(location.to_query_string(), "tab=workers&queueId=Q1&workerId=w-9");
  }

  #[test]
  fn handles_share_the_latest_snapshot() {
    let location = Location::parse("");
    let a = location.param("queueId", "");
    let b = location.clone().param("tab", "tasks");
    a.set("Q1");
    b.set("workers");
    a.set("Q2");
    assert_eq!(location.get("queueId").as_deref(), Some("Q2"));
    assert_eq!(location.get("tab").as_deref(), Some("workers"));
  }

  #[test]
  fn parses_full_urls_and_encoded_values() {
    let location = Location::parse("http://localhost:3000/?queueId=my%20queue&tab=worker_config");
    assert_eq!(location.get("queueId").as_deref(), Some("my queue"));
    assert_eq!(location.get("tab").as_deref(), Some("worker_config"));
    assert_eq!(location.to_query_string(), "queueId=my+queue&tab=worker_config");
  }

  #[test]
  fn set_replaces_first_and_drops_duplicates() {
    let mut params = SearchParams::parse("a=1&b=2&a=3");
    params.set("a", "x");
    assert_eq!(params.to_query_string(), "a=x&b=2");
    params.set("c", "");
    assert_eq!(params.to_query_string(), "a=x&b=2&c=");
  }

  #[test]
  fn revision_only_moves_on_real_changes() {
    let location = Location::parse("queueId=Q1");
    let queue_id = location.param("queueId", "");
    queue_id.set("Q1");
    assert_eq!(location.revision(), 0);
    queue_id.set("Q2");
    assert_eq!(location.revision(), 1);
  }
}
