//! Tab composition over the query-string state.
//!
//! `Dashboard` owns the table states and the fetch cache. The `tab`,
//! `queueId` and `workerId` values live only in the [`Location`]. The rendered
//! view is a pure function of those parameters and the cached fetch results.
//! Interactions mutate the location, then [`Dashboard::pending_requests`]
//! reports which fetches the runtime still has to perform.

use serde_json::Value;
use tracing::info;

use crate::cache::{FetchRequest, QueryCache};
use crate::columns::{FormatContext, TASK_COLUMNS, WORKER_COLUMNS, WORKER_CONFIG_COLUMNS, parse_timestamp, relative_time};
use crate::config::DateLocale;
use crate::error::FetchError;
use crate::location::{Location, Param};
use crate::models::{self, ControllerList, WorkerEventList};
use crate::table::{TableModel, TableView, toggle_selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
  Tasks,
  Workers,
  WorkerConfig,
}

impl Tab {
  pub const ALL: [Tab; 3] = [Tab::Tasks, Tab::Workers, Tab::WorkerConfig];

  pub fn as_param(self) -> &'static str {
    match self {
      Tab::Tasks => "tasks",
      Tab::Workers => "workers",
      Tab::WorkerConfig => "worker_config",
    }
  }

  pub fn from_param(raw: &str) -> Option<Tab> {
    Tab::ALL.into_iter().find(|t| t.as_param() == raw)
  }

  pub fn title(self) -> &'static str {
    match self {
      Tab::Tasks => "Tasks",
      Tab::Workers => "Workers",
      Tab::WorkerConfig => "Worker configuration",
    }
  }

  pub fn index(self) -> usize {
    match self {
      Tab::Tasks => 0,
      Tab::Workers => 1,
      Tab::WorkerConfig => 2,
    }
  }

  pub fn next(self) -> Tab {
    Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
  }

  pub fn previous(self) -> Tab {
    Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
  pub id: String,
  pub label: String,
}

/// Free-text queue entry with a dropdown of known queues.
#[derive(Debug, Clone, Default)]
pub struct QueueSelector {
  input: String,
  open: bool,
  highlighted: Option<usize>,
}

impl QueueSelector {
  pub fn new(initial: &str) -> Self {
    Self {
      input: initial.to_string(),
      ..Self::default()
    }
  }

  pub fn input(&self) -> &str {
    &self.input
  }

  pub fn is_open(&self) -> bool {
    self.open
  }

  pub fn highlighted(&self) -> Option<usize> {
    self.highlighted
  }

  pub fn open(&mut self) {
    self.open = true;
  }

  pub fn push_char(&mut self, c: char) {
    self.input.push(c);
    self.open = true;
  }

  pub fn backspace(&mut self) {
    self.input.pop();
  }

  pub fn highlight_next(&mut self, len: usize) {
    if len == 0 {
      self.highlighted = None;
      return;
    }
    self.highlighted = Some(self.highlighted.map_or(0, |i| (i + 1) % len));
  }

  pub fn highlight_previous(&mut self, len: usize) {
    if len == 0 {
      self.highlighted = None;
      return;
    }
    self.highlighted = Some(self.highlighted.map_or(len - 1, |i| (i + len - 1) % len));
  }

  /// Enter or blur: submits whatever was typed.
  pub fn submit_input(&mut self) -> String {
    self.close();
    self.input.clone()
  }

  /// Picking a suggestion also replaces the typed text.
  pub fn pick(&mut self, value: &str) -> String {
    self.input = value.to_string();
    self.close();
    value.to_string()
  }

  fn close(&mut self) {
    self.open = false;
    self.highlighted = None;
  }

  /// Known queues, most recently used first.
  pub fn suggestions(data: Option<&Value>, now: chrono::DateTime<chrono::Utc>) -> Vec<Suggestion> {
    let mut controllers = data.map(ControllerList::from_data).unwrap_or_default().controllers;
    controllers.sort_by(|a, b| b.time.cmp(&a.time));
    controllers
      .into_iter()
      .map(|c| {
        let used = parse_timestamp(&Value::String(c.time.clone()))
          .map(|at| relative_time(at, now))
          .unwrap_or(c.time);
        let by = c.username.map(|u| format!(" by {}", u)).unwrap_or_default();
        Suggestion {
          label: format!("Last used {}{}", used, by),
          id: c.id,
        }
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsView {
  pub worker_id: String,
  pub lines: Vec<String>,
  pub is_loading: bool,
  pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorView {
  pub input: String,
  pub open: bool,
  pub highlighted: Option<usize>,
  pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
  pub tab: Tab,
  pub queue_id: String,
  pub selector: SelectorView,
  pub table: TableModel,
  pub events: Option<EventsView>,
}

pub struct Dashboard {
  location: Location,
  tab: Param,
  queue_id: Param,
  worker_id: Param,
  observed_queue: String,
  selector: QueueSelector,
  tasks: TableView,
  workers: TableView,
  worker_config: TableView,
  cache: QueryCache,
  locale: DateLocale,
}

impl Dashboard {
  /// A worker selection already in the location survives startup. Only a
  /// later queue change clears it.
  pub fn new(location: Location, locale: DateLocale) -> Self {
    let tab = location.param("tab", "tasks");
    let queue_id = location.param("queueId", "");
    let worker_id = location.param("workerId", "");
    let observed_queue = queue_id.get();
    Self {
      selector: QueueSelector::new(&observed_queue),
      location,
      tab,
      queue_id,
      worker_id,
      observed_queue,
      tasks: TableView::new("tasks", TASK_COLUMNS)
        .with_initial_sort("start_time", true)
        .with_row_selection("id"),
      workers: TableView::new("workers", WORKER_COLUMNS)
        .with_initial_sort("start_time", true)
        .with_row_selection("id"),
      worker_config: TableView::new("worker_config", WORKER_CONFIG_COLUMNS),
      cache: QueryCache::new(),
      locale,
    }
  }

  pub fn location(&self) -> &Location {
    &self.location
  }

  /// Unknown `tab` values fall back to the tasks tab.
  pub fn active_tab(&self) -> Tab {
    Tab::from_param(&self.tab.get()).unwrap_or(Tab::Tasks)
  }

  pub fn set_tab(&mut self, tab: Tab) {
    self.tab.set(tab.as_param());
  }

  pub fn queue_id(&self) -> String {
    self.queue_id.get()
  }

  pub fn worker_id(&self) -> String {
    self.worker_id.get()
  }

  pub fn selector(&self) -> &QueueSelector {
    &self.selector
  }

  pub fn selector_mut(&mut self) -> &mut QueueSelector {
    &mut self.selector
  }

  pub fn submit_queue(&mut self, value: &str) {
    self.queue_id.set(value);
    self.sync_queue();
  }

  pub fn submit_selector_input(&mut self) {
    let value = self.selector.submit_input();
    self.submit_queue(&value);
  }

  pub fn pick_suggestion(&mut self, value: &str) {
    let value = self.selector.pick(value);
    self.submit_queue(&value);
  }

  /// Submits the highlighted suggestion, or the typed text if none is.
  pub fn confirm_selector(&mut self) {
    let picked = self
      .selector
      .highlighted()
      .and_then(|i| self.suggestions().into_iter().nth(i));
    match picked {
      Some(suggestion) => self.pick_suggestion(&suggestion.id),
      None => self.submit_selector_input(),
    }
  }

  pub fn suggestions(&self) -> Vec<Suggestion> {
    let snapshot = self.cache.snapshot(Some(models::CONTROLLERS_PATH));
    QueueSelector::suggestions(snapshot.data.as_ref(), chrono::Utc::now())
  }

  // Worker selection is scoped to its queue.
  fn sync_queue(&mut self) {
    let current = self.queue_id.get();
    if current == self.observed_queue {
      return;
    }
    info!("queue changed from {:?} to {:?}", self.observed_queue, current);
    self.observed_queue = current;
    if !self.worker_id.get().is_empty() {
      self.worker_id.set("");
    }
    for table in [&mut self.tasks, &mut self.workers, &mut self.worker_config] {
      table.reset_position();
    }
  }

  /// Clicking a worker row selects it. Clicking the selected row clears it.
  pub fn click_worker(&mut self, clicked: &str) {
    let next = toggle_selection(&self.worker_id.get(), clicked);
    self.worker_id.set(&next);
  }

  pub fn table(&self, tab: Tab) -> &TableView {
    match tab {
      Tab::Tasks => &self.tasks,
      Tab::Workers => &self.workers,
      Tab::WorkerConfig => &self.worker_config,
    }
  }

  pub fn table_mut(&mut self, tab: Tab) -> &mut TableView {
    match tab {
      Tab::Tasks => &mut self.tasks,
      Tab::Workers => &mut self.workers,
      Tab::WorkerConfig => &mut self.worker_config,
    }
  }

  /// `None` until a queue is chosen.
  pub fn endpoint(&self, tab: Tab) -> Option<String> {
    let queue = self.queue_id.get();
    if queue.is_empty() {
      return None;
    }
    Some(match tab {
      Tab::Tasks => models::tasks_path(&queue),
      Tab::Workers => models::workers_path(&queue),
      Tab::WorkerConfig => models::worker_config_path(&queue),
    })
  }

  /// The event log only exists on the workers tab with a worker selected.
  pub fn events_endpoint(&self) -> Option<String> {
    let queue = self.queue_id.get();
    let worker = self.worker_id.get();
    (self.active_tab() == Tab::Workers && !queue.is_empty() && !worker.is_empty())
      .then(|| models::worker_events_path(&queue, &worker))
  }

  fn active_keys(&self) -> Vec<String> {
    let mut keys = vec![models::CONTROLLERS_PATH.to_string()];
    keys.extend(self.endpoint(self.active_tab()));
    keys.extend(self.events_endpoint());
    keys
  }

  /// Fetches still needed for what is on screen. Results for other queues
  /// are dropped, so late responses for them are discarded.
  pub fn pending_requests(&mut self) -> Vec<FetchRequest> {
    self.sync_queue();
    let queue = self.queue_id.get();
    let scope = models::controller_scope(&queue);
    self
      .cache
      .retain(|key| key == models::CONTROLLERS_PATH || (!queue.is_empty() && key.starts_with(&scope)));
    self
      .active_keys()
      .iter()
      .filter_map(|key| self.cache.request(key))
      .collect()
  }

  /// Periodic refresh of what is on screen. Failed keys are left alone.
  pub fn revalidate(&mut self) -> Vec<FetchRequest> {
    let mut requests = self.pending_requests();
    for key in self.active_keys() {
      requests.extend(self.cache.revalidate(&key));
    }
    requests
  }

  /// Operator-triggered refresh, the only retry path after an error.
  pub fn refresh(&mut self) -> Vec<FetchRequest> {
    let mut requests = self.pending_requests();
    for key in self.active_keys() {
      if requests.iter().all(|r| r.key != key) {
        requests.extend(self.cache.refresh(&key));
      }
    }
    requests
  }

  pub fn apply(&mut self, request: &FetchRequest, outcome: Result<Value, FetchError>) -> bool {
    self.cache.resolve(request, outcome)
  }

  /// Row id under the cursor on the given tab.
  pub fn cursor_row_id(&self, tab: Tab) -> Option<String> {
    let endpoint = self.endpoint(tab);
    let snapshot = self.cache.snapshot(endpoint.as_deref());
    self.table(tab).cursor_row_id(endpoint.as_deref(), &snapshot)
  }

  pub fn cursor_cell(&self, tab: Tab, ctx: &FormatContext) -> Option<String> {
    let endpoint = self.endpoint(tab);
    let snapshot = self.cache.snapshot(endpoint.as_deref());
    self.table(tab).cursor_cell(endpoint.as_deref(), &snapshot, ctx)
  }

  pub fn format_context(&self) -> FormatContext {
    FormatContext::now(self.locale)
  }

  pub fn view(&self, ctx: &FormatContext) -> DashboardView {
    let tab = self.active_tab();
    let endpoint = self.endpoint(tab);
    let snapshot = self.cache.snapshot(endpoint.as_deref());
    let worker_id = self.worker_id.get();
    let selected = (tab == Tab::Workers).then_some(worker_id.as_str());
    let table = self.table(tab).render(endpoint.as_deref(), &snapshot, selected, ctx);

    let events = self.events_endpoint().map(|key| {
      let snapshot = self.cache.snapshot(Some(&key));
      let lines = snapshot
        .data
        .as_ref()
        .map(|data| {
          WorkerEventList::from_data(data)
            .events
            .into_iter()
            .map(|e| format!("{} {}", e.time, e.message))
            .collect()
        })
        .unwrap_or_default();
      EventsView {
        worker_id: worker_id.clone(),
        lines,
        is_loading: snapshot.data.is_none() && snapshot.error.is_none(),
        error: snapshot.error.as_ref().map(|e| e.message()),
      }
    });

    let controllers = self.cache.snapshot(Some(models::CONTROLLERS_PATH));
    DashboardView {
      tab,
      queue_id: self.queue_id.get(),
      selector: SelectorView {
        input: self.selector.input().to_string(),
        open: self.selector.is_open(),
        highlighted: self.selector.highlighted(),
        suggestions: QueueSelector::suggestions(controllers.data.as_ref(), ctx.now),
      },
      table,
      events,
    }
  }
}
