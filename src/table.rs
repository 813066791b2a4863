use std::cmp::Ordering;

use serde_json::Value;

use crate::cache::Snapshot;
use crate::columns::{Column, FilterParseError, FilterValue, FormatContext, RenderedCell, SortStrategy};

pub const PAGE_SIZES: [usize; 3] = [50, 100, 500];
pub const NO_RECORDS: &str = "No records to display";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortRule {
  pub column: &'static str,
  pub desc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ActiveFilter {
  column: &'static str,
  value: FilterValue,
  input: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderCell {
  pub title: &'static str,
  pub sort: Option<bool>,
  pub filter: Option<String>,
  pub focused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
  pub id: Option<String>,
  pub cells: Vec<RenderedCell>,
  pub selected: bool,
}

/// Everything needed to draw one table, derived from the table state and
/// the latest snapshot for its endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableModel {
  pub headers: Vec<HeaderCell>,
  pub rows: Vec<RenderedRow>,
  pub matching_rows: usize,
  pub page: usize,
  pub page_count: usize,
  pub page_size: usize,
  pub is_loading: bool,
  /// A refresh is in flight while earlier rows are shown.
  pub is_refreshing: bool,
  /// Last fetch error for the endpoint, also set while older rows are kept.
  pub error: Option<String>,
  /// Set when there are no rows to show. Holds the fetch error text when
  /// there is one.
  pub empty_message: Option<String>,
  pub empty_is_error: bool,
  pub cursor: Option<usize>,
}

/// Caller-owned selection toggle: clicking the selected row clears it.
pub fn toggle_selection(current: &str, clicked: &str) -> String {
  if current == clicked { String::new() } else { clicked.to_string() }
}

#[derive(Debug, Clone)]
pub struct TableView {
  accessor_key: &'static str,
  columns: &'static [Column],
  row_id_key: Option<&'static str>,
  sort: Option<SortRule>,
  filters: Vec<ActiveFilter>,
  page: usize,
  page_size: usize,
  cursor: usize,
  focused_column: usize,
}

impl TableView {
  pub fn new(accessor_key: &'static str, columns: &'static [Column]) -> Self {
    Self {
      accessor_key,
      columns,
      row_id_key: None,
      sort: None,
      filters: Vec::new(),
      page: 0,
      page_size: PAGE_SIZES[0],
      cursor: 0,
      focused_column: 0,
    }
  }

  pub fn with_initial_sort(mut self, column: &'static str, desc: bool) -> Self {
    self.sort = Some(SortRule { column, desc });
    self
  }

  /// Rows get identities from `id_key`, which makes them selectable.
  pub fn with_row_selection(mut self, id_key: &'static str) -> Self {
    self.row_id_key = Some(id_key);
    self
  }

  fn column(&self, id: &str) -> Option<&'static Column> {
    self.columns.iter().find(|c| c.id == id)
  }

  pub fn focused_column(&self) -> &'static Column {
    &self.columns[self.focused_column.min(self.columns.len().saturating_sub(1))]
  }

  pub fn focus_next_column(&mut self) {
    self.focused_column = (self.focused_column + 1) % self.columns.len().max(1);
  }

  pub fn focus_previous_column(&mut self) {
    let len = self.columns.len().max(1);
    self.focused_column = (self.focused_column + len - 1) % len;
  }

  pub fn filter_input(&self, column: &str) -> Option<&str> {
    self.filters.iter().find(|f| f.column == column).map(|f| f.input.as_str())
  }

  pub fn set_filter(&mut self, column: &str, value: Option<FilterValue>, input: &str) {
    let Some(col) = self.column(column) else {
      return;
    };
    self.filters.retain(|f| f.column != col.id);
    if let Some(value) = value {
      self.filters.push(ActiveFilter {
        column: col.id,
        value,
        input: input.trim().to_string(),
      });
    }
    self.page = 0;
    self.cursor = 0;
  }

  /// Parses operator input for `column` and installs it. Empty input clears.
  pub fn apply_filter_input(&mut self, column: &str, input: &str) -> Result<(), FilterParseError> {
    let Some(col) = self.column(column) else {
      return Ok(());
    };
    let value = col.parse_filter(input)?;
    self.set_filter(col.id, value, input);
    Ok(())
  }

  pub fn clear_filters(&mut self) {
    self.filters.clear();
    self.page = 0;
    self.cursor = 0;
  }

  /// Steps through the column's sort states and back to unsorted.
  ///
  /// Dates start descending, text starts ascending.
  pub fn cycle_sort(&mut self, column: &str) {
    let Some(col) = self.column(column) else {
      return;
    };
    if !col.is_sortable() {
      return;
    }
    let desc_first = col.sort == SortStrategy::Datetime;
    self.sort = match self.sort {
      Some(rule) if rule.column == col.id && rule.desc == desc_first => Some(SortRule {
        column: col.id,
        desc: !desc_first,
      }),
      Some(rule) if rule.column == col.id => None,
      _ => Some(SortRule {
        column: col.id,
        desc: desc_first,
      }),
    };
  }

  pub fn set_page_size(&mut self, size: usize) {
    if PAGE_SIZES.contains(&size) {
      self.page_size = size;
      self.page = 0;
      self.cursor = 0;
    }
  }

  pub fn cycle_page_size(&mut self) {
    let idx = PAGE_SIZES.iter().position(|s| *s == self.page_size).unwrap_or(0);
    self.set_page_size(PAGE_SIZES[(idx + 1) % PAGE_SIZES.len()]);
  }

  pub fn next_page(&mut self) {
    self.page += 1;
    self.cursor = 0;
  }

  pub fn previous_page(&mut self) {
    self.page = self.page.saturating_sub(1);
    self.cursor = 0;
  }

  pub fn move_cursor(&mut self, delta: isize) {
    self.cursor = self.cursor.saturating_add_signed(delta);
  }

  /// Pulls page and cursor back inside what was last rendered.
  pub fn clamp_to(&mut self, model: &TableModel) {
    self.page = model.page;
    self.cursor = model.cursor.unwrap_or(0);
  }

  pub fn reset_position(&mut self) {
    self.page = 0;
    self.cursor = 0;
  }

  /// Rows for the endpoint, filtered then sorted.
  ///
  /// A missing accessor key gives no rows, as does a missing endpoint.
  pub fn visible_rows(&self, endpoint: Option<&str>, snapshot: &Snapshot) -> Vec<Value> {
    if endpoint.is_none() {
      return Vec::new();
    }
    let mut rows: Vec<Value> = snapshot
      .data
      .as_ref()
      .and_then(|data| data.get(self.accessor_key))
      .and_then(Value::as_array)
      .map(|rows| {
        rows
          .iter()
          .filter(|row| {
            self.filters.iter().all(|f| {
              self
                .column(f.column)
                .is_none_or(|col| col.matches(row, &f.value))
            })
          })
          .cloned()
          .collect()
      })
      .unwrap_or_default();

    if let Some(rule) = self.sort {
      if let Some(col) = self.column(rule.column).filter(|c| c.is_sortable()) {
        // empty cells stay at the bottom in both directions
        rows.sort_by(|a, b| match (col.value(a).is_null(), col.value(b).is_null()) {
          (true, true) => Ordering::Equal,
          (true, false) => Ordering::Greater,
          (false, true) => Ordering::Less,
          (false, false) if rule.desc => col.compare(a, b).reverse(),
          (false, false) => col.compare(a, b),
        });
      }
    }
    rows
  }

  fn row_id(&self, row: &Value) -> Option<String> {
    let key = self.row_id_key?;
    match row.get(key)? {
      Value::String(s) => Some(s.clone()),
      Value::Null => None,
      other => Some(other.to_string()),
    }
  }

  /// Id of the row under the cursor on the current page.
  pub fn cursor_row_id(&self, endpoint: Option<&str>, snapshot: &Snapshot) -> Option<String> {
    let rows = self.visible_rows(endpoint, snapshot);
    let (start, end) = self.page_bounds(rows.len());
    let index = (start + self.cursor).min(end.checked_sub(1)?);
    rows.get(index).and_then(|row| self.row_id(row))
  }

  /// Rendered text of the focused cell under the cursor.
  pub fn cursor_cell(&self, endpoint: Option<&str>, snapshot: &Snapshot, ctx: &FormatContext) -> Option<String> {
    let rows = self.visible_rows(endpoint, snapshot);
    let (start, end) = self.page_bounds(rows.len());
    let index = (start + self.cursor).min(end.checked_sub(1)?);
    let cell = self.focused_column().render(rows.get(index)?, ctx);
    (!cell.text.is_empty()).then_some(cell.text)
  }

  fn page_count(&self, total: usize) -> usize {
    total.div_ceil(self.page_size).max(1)
  }

  fn page_bounds(&self, total: usize) -> (usize, usize) {
    let page = self.page.min(self.page_count(total) - 1);
    let start = page * self.page_size;
    (start.min(total), (start + self.page_size).min(total))
  }

  pub fn render(
    &self,
    endpoint: Option<&str>,
    snapshot: &Snapshot,
    selected: Option<&str>,
    ctx: &FormatContext,
  ) -> TableModel {
    let rows = self.visible_rows(endpoint, snapshot);
    let matching_rows = rows.len();
    let page_count = self.page_count(matching_rows);
    let page = self.page.min(page_count - 1);
    let (start, end) = self.page_bounds(matching_rows);
    let selected = selected.filter(|s| !s.is_empty());

    let rendered: Vec<RenderedRow> = rows[start..end]
      .iter()
      .map(|row| {
        let id = self.row_id(row);
        RenderedRow {
          selected: selected.is_some() && id.as_deref() == selected,
          cells: self.columns.iter().map(|c| c.render(row, ctx)).collect(),
          id,
        }
      })
      .collect();

    let error = endpoint.and(snapshot.error.as_ref()).map(|e| e.message());
    let (empty_message, empty_is_error) = match (rendered.is_empty(), &error) {
      (false, _) => (None, false),
      (true, Some(message)) => (Some(message.clone()), true),
      (true, None) => (Some(NO_RECORDS.to_string()), false),
    };
    let cursor = (!rendered.is_empty()).then(|| self.cursor.min(rendered.len() - 1));

    TableModel {
      headers: self
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| HeaderCell {
          title: c.header,
          sort: self.sort.filter(|r| r.column == c.id).map(|r| r.desc),
          filter: self.filter_input(c.id).map(str::to_string),
          focused: i == self.focused_column,
        })
        .collect(),
      rows: rendered,
      matching_rows,
      page,
      page_count,
      page_size: self.page_size,
      is_loading: endpoint.is_some() && snapshot.is_loading,
      is_refreshing: endpoint.is_some() && snapshot.is_validating && !snapshot.is_loading,
      error,
      empty_message,
      empty_is_error,
      cursor,
    }
  }
}
