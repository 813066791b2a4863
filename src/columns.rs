//! Column definitions for the task, worker and worker-config tables.
//!
//! A column is plain data: where its value comes from, how it is shown, and
//! which sort and filter strategy applies. Each strategy is a free function,
//! so it can be exercised without a table.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::config::DateLocale;
use crate::models::{TASK_STATUSES, WORKER_STATUSES};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
  Null,
  Text(String),
  Date(DateTime<Utc>),
}

impl CellValue {
  pub fn is_null(&self) -> bool {
    matches!(self, CellValue::Null)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
  Key(&'static str),
  /// Parses the field as a timestamp. Missing or unparseable is `Null`.
  Date(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFormat {
  Plain,
  /// Localized date, with a relative-time hint.
  Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
  /// Rows keep the order the API returned them in.
  Disabled,
  Datetime,
  Alphanumeric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStrategy {
  None,
  Contains,
  MultiSelect(&'static [&'static str]),
  DateRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
  Text(String),
  Choices(Vec<String>),
  Day(NaiveDate),
  Range {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
  },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
  #[error("column {0} cannot be filtered")]
  NotFilterable(&'static str),

  #[error("{value} is not a valid {column} value")]
  UnknownChoice { column: &'static str, value: String },

  #[error("{column}: expected YYYY-MM-DD or YYYY-MM-DD..YYYY-MM-DD, got {input:?}")]
  BadDate { column: &'static str, input: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
  pub id: &'static str,
  pub header: &'static str,
  pub accessor: Accessor,
  pub format: CellFormat,
  pub sort: SortStrategy,
  pub filter: FilterStrategy,
  pub click_to_copy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedCell {
  pub text: String,
  pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct FormatContext {
  pub locale: DateLocale,
  pub now: DateTime<Utc>,
}

impl FormatContext {
  pub fn now(locale: DateLocale) -> Self {
    Self { locale, now: Utc::now() }
  }
}

impl Column {
  pub fn value(&self, row: &Value) -> CellValue {
    match self.accessor {
      Accessor::Key(key) => match row.get(key) {
        None | Some(Value::Null) => CellValue::Null,
        Some(Value::String(s)) => CellValue::Text(s.clone()),
        Some(other) => CellValue::Text(other.to_string()),
      },
      Accessor::Date(key) => row
        .get(key)
        .and_then(parse_timestamp)
        .map_or(CellValue::Null, CellValue::Date),
    }
  }

  pub fn render(&self, row: &Value, ctx: &FormatContext) -> RenderedCell {
    self.render_in(row, ctx, &Local)
  }

  pub fn render_in<Tz: TimeZone>(&self, row: &Value, ctx: &FormatContext, tz: &Tz) -> RenderedCell
  where
    Tz::Offset: fmt::Display,
  {
    match (self.value(row), self.format) {
      (CellValue::Null, _) => RenderedCell::default(),
      (CellValue::Date(at), CellFormat::Date) => RenderedCell {
        text: format_date(&at, ctx.locale, tz),
        hint: Some(relative_time(at, ctx.now)),
      },
      (CellValue::Date(at), CellFormat::Plain) => RenderedCell {
        text: at.to_rfc3339(),
        hint: None,
      },
      (CellValue::Text(text), _) => RenderedCell { text, hint: None },
    }
  }

  pub fn is_sortable(&self) -> bool {
    self.sort != SortStrategy::Disabled
  }

  pub fn is_filterable(&self) -> bool {
    self.filter != FilterStrategy::None
  }

  pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
    compare_cells(self.sort, &self.value(a), &self.value(b))
  }

  /// Row predicate, with dates evaluated in the local timezone.
  pub fn matches(&self, row: &Value, filter: &FilterValue) -> bool {
    self.matches_in(row, filter, &Local)
  }

  pub fn matches_in<Tz: TimeZone>(&self, row: &Value, filter: &FilterValue, tz: &Tz) -> bool {
    let value = self.value(row);
    match (self.filter, filter) {
      (FilterStrategy::None, _) => true,
      (FilterStrategy::Contains, FilterValue::Text(needle)) => includes_string(&value, needle),
      (FilterStrategy::MultiSelect(_), FilterValue::Choices(choices)) => includes_some(&value, choices),
      (FilterStrategy::DateRange, FilterValue::Day(_) | FilterValue::Range { .. }) => match value {
        CellValue::Date(at) => date_matches(&at, filter, tz),
        _ => false,
      },
      // mismatched filter kinds never come out of parse_filter
      _ => true,
    }
  }

  /// Reads a filter typed by the operator. An empty input clears the filter.
  pub fn parse_filter(&self, input: &str) -> Result<Option<FilterValue>, FilterParseError> {
    let input = input.trim();
    if input.is_empty() {
      return Ok(None);
    }
    match self.filter {
      FilterStrategy::None => Err(FilterParseError::NotFilterable(self.id)),
      FilterStrategy::Contains => Ok(Some(FilterValue::Text(input.to_string()))),
      FilterStrategy::MultiSelect(vocabulary) => {
        let mut choices = Vec::new();
        for raw in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
          let upper = raw.to_ascii_uppercase();
          if !vocabulary.contains(&upper.as_str()) {
            return Err(FilterParseError::UnknownChoice {
              column: self.id,
              value: raw.to_string(),
            });
          }
          if !choices.contains(&upper) {
            choices.push(upper);
          }
        }
        Ok((!choices.is_empty()).then_some(FilterValue::Choices(choices)))
      }
      FilterStrategy::DateRange => parse_date_filter(self.id, input).map(Some),
    }
  }
}

const fn id_column(key: &'static str, header: &'static str) -> Column {
  Column {
    id: key,
    header,
    accessor: Accessor::Key(key),
    format: CellFormat::Plain,
    sort: SortStrategy::Disabled,
    filter: FilterStrategy::Contains,
    click_to_copy: true,
  }
}

const fn date_column(key: &'static str, header: &'static str) -> Column {
  Column {
    id: key,
    header,
    accessor: Accessor::Date(key),
    format: CellFormat::Date,
    sort: SortStrategy::Datetime,
    filter: FilterStrategy::DateRange,
    click_to_copy: false,
  }
}

const fn status_column(vocabulary: &'static [&'static str]) -> Column {
  Column {
    id: "status",
    header: "Status",
    accessor: Accessor::Key("status"),
    format: CellFormat::Plain,
    sort: SortStrategy::Disabled,
    filter: FilterStrategy::MultiSelect(vocabulary),
    click_to_copy: false,
  }
}

const fn setting_column(key: &'static str, header: &'static str) -> Column {
  Column {
    id: key,
    header,
    accessor: Accessor::Key(key),
    format: CellFormat::Plain,
    sort: SortStrategy::Disabled,
    filter: FilterStrategy::None,
    click_to_copy: false,
  }
}

pub static TASK_COLUMNS: &[Column] = &[
  id_column("id", "ID"),
  id_column("worker_id", "Worker"),
  status_column(TASK_STATUSES),
  date_column("submit_time", "Submitted"),
  date_column("start_time", "Started"),
  date_column("complete_time", "Completed"),
];

pub static WORKER_COLUMNS: &[Column] = &[
  id_column("id", "ID"),
  date_column("start_time", "Started"),
  status_column(WORKER_STATUSES),
  Column {
    id: "hostname",
    header: "Hostname",
    accessor: Accessor::Key("hostname"),
    format: CellFormat::Plain,
    sort: SortStrategy::Alphanumeric,
    filter: FilterStrategy::Contains,
    click_to_copy: true,
  },
];

pub static WORKER_CONFIG_COLUMNS: &[Column] = &[
  id_column("name", "Name"),
  setting_column("timeout_idle", "Idle timeout"),
  setting_column("heartbeat_period", "Heartbeat period"),
  setting_column("poll_queue", "Polling interval"),
  setting_column("offload_threshold_size", "Offload threshold"),
];

/// RFC 3339 keeps its offset. A bare date-time is local wall time. A bare
/// date is UTC midnight. A number is epoch milliseconds.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
  match raw {
    Value::String(s) => {
      let s = s.trim();
      if let Ok(at) = DateTime::parse_from_rfc3339(s) {
        return Some(at.with_timezone(&Utc));
      }
      for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, pattern) {
          return Local.from_local_datetime(&naive).earliest().map(|at| at.with_timezone(&Utc));
        }
      }
      NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
    }
    Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
    _ => None,
  }
}

pub fn format_date<Tz: TimeZone>(at: &DateTime<Utc>, locale: DateLocale, tz: &Tz) -> String
where
  Tz::Offset: fmt::Display,
{
  let local = at.with_timezone(tz);
  match locale {
    DateLocale::EnGb => local.format("%d/%m/%Y, %H:%M:%S").to_string(),
    DateLocale::EnUs => local.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string(),
  }
}

/// Humanized distance between `at` and `now`, e.g. "3 hours ago" or "in a day".
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
  let millis = (now - at).num_milliseconds();
  let secs = (millis.abs() as f64) / 1000.0;
  let phrase = if secs.round() <= 44.0 {
    "a few seconds".to_string()
  } else if secs.round() <= 89.0 {
    "a minute".to_string()
  } else {
    let minutes = (secs / 60.0).round();
    let hours = (secs / 3600.0).round();
    let days = (secs / 86400.0).round();
    let months = (days / 30.4375).round();
    if minutes <= 44.0 {
      format!("{} minutes", minutes)
    } else if minutes <= 89.0 {
      "an hour".to_string()
    } else if hours <= 21.0 {
      format!("{} hours", hours)
    } else if hours <= 35.0 {
      "a day".to_string()
    } else if days <= 25.0 {
      format!("{} days", days)
    } else if days <= 45.0 {
      "a month".to_string()
    } else if months <= 10.0 {
      format!("{} months", months.max(2.0))
    } else if months <= 17.0 {
      "a year".to_string()
    } else {
      format!("{} years", (months / 12.0).round().max(2.0))
    }
  };
  if millis >= 0 {
    format!("{} ago", phrase)
  } else {
    format!("in {}", phrase)
  }
}

pub fn compare_cells(strategy: SortStrategy, a: &CellValue, b: &CellValue) -> Ordering {
  match strategy {
    SortStrategy::Disabled => Ordering::Equal,
    SortStrategy::Datetime => date_key(a).cmp(&date_key(b)),
    SortStrategy::Alphanumeric => text_key(a).cmp(&text_key(b)),
  }
}

// null sorts below every date
fn date_key(value: &CellValue) -> Option<DateTime<Utc>> {
  match value {
    CellValue::Date(at) => Some(*at),
    _ => None,
  }
}

fn text_key(value: &CellValue) -> Option<String> {
  match value {
    CellValue::Text(s) => Some(s.to_lowercase()),
    CellValue::Date(at) => Some(at.to_rfc3339()),
    CellValue::Null => None,
  }
}

/// Case-insensitive substring match. Null never matches.
pub fn includes_string(value: &CellValue, needle: &str) -> bool {
  match value {
    CellValue::Text(s) => s.to_lowercase().contains(&needle.to_lowercase()),
    CellValue::Date(at) => at.to_rfc3339().contains(needle),
    CellValue::Null => false,
  }
}

/// Exact match against any selected choice. No choices means no constraint.
pub fn includes_some(value: &CellValue, choices: &[String]) -> bool {
  if choices.is_empty() {
    return true;
  }
  match value {
    CellValue::Text(s) => choices.iter().any(|c| c == s),
    _ => false,
  }
}

/// Day-granular date predicate evaluated in `tz`.
///
/// TODO: the timezone should be configurable; `Column::matches` always passes
/// the machine's local zone.
pub fn date_matches<Tz: TimeZone>(at: &DateTime<Utc>, filter: &FilterValue, tz: &Tz) -> bool {
  let day = at.with_timezone(tz).date_naive();
  match filter {
    FilterValue::Day(selected) => day == *selected,
    FilterValue::Range { start, end } => {
      start.is_none_or(|start| start <= day) && end.is_none_or(|end| end >= day)
    }
    _ => false,
  }
}

static DATE_FILTER: LazyLock<Option<Regex>> = LazyLock::new(|| {
  Regex::new(r"^(?P<start>\d{4}-\d{2}-\d{2})?\s*(?P<range>\.\.)?\s*(?P<end>\d{4}-\d{2}-\d{2})?$").ok()
});

fn parse_date_filter(column: &'static str, input: &str) -> Result<FilterValue, FilterParseError> {
  let bad = || FilterParseError::BadDate {
    column,
    input: input.to_string(),
  };
  let caps = DATE_FILTER
    .as_ref()
    .and_then(|re| re.captures(input))
    .ok_or_else(bad)?;
  let day = |name: &str| -> Result<Option<NaiveDate>, FilterParseError> {
    caps
      .name(name)
      .map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").map_err(|_| bad()))
      .transpose()
  };
  let start = day("start")?;
  let end = day("end")?;
  match (caps.name("range").is_some(), start, end) {
    (false, Some(d), None) => Ok(FilterValue::Day(d)),
    (true, start, end) if start.is_some() || end.is_some() => Ok(FilterValue::Range { start, end }),
    _ => Err(bad()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, FixedOffset};
  use serde_json::json;

  fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn utc(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
  }

  fn start_time() -> Column {
    WORKER_COLUMNS[1]
  }

  #[test]
  fn accessors_tolerate_missing_fields() {
    let row = json!({"id": "t1", "submit_time": null});
    assert_eq!(TASK_COLUMNS[0].value(&row), CellValue::Text("t1".into()));
    assert_eq!(TASK_COLUMNS[1].value(&row), CellValue::Null);
    assert_eq!(TASK_COLUMNS[3].value(&row), CellValue::Null);
    assert_eq!(TASK_COLUMNS[4].value(&row), CellValue::Null);
    assert_eq!(TASK_COLUMNS[4].value(&json!({"start_time": "not a date"})), CellValue::Null);
  }

  #[test]
  fn numeric_settings_render_as_text() {
    let row = json!({"name": "default", "timeout_idle": 300, "poll_queue": 0.5});
    let ctx = FormatContext { locale: DateLocale::EnGb, now: Utc::now() };
    assert_eq!(WORKER_CONFIG_COLUMNS[1].render(&row, &ctx).text, "300");
    assert_eq!(WORKER_CONFIG_COLUMNS[3].render(&row, &ctx).text, "0.5");
    assert_eq!(WORKER_CONFIG_COLUMNS[2].render(&row, &ctx).text, "");
  }

  #[test]
  fn timestamps_parse_in_several_shapes() {
    assert_eq!(
      parse_timestamp(&json!("2024-03-05T10:00:00+02:00")),
      Some(utc("2024-03-05T08:00:00Z"))
    );
    assert_eq!(parse_timestamp(&json!("2024-03-05")), Some(utc("2024-03-05T00:00:00Z")));
    assert_eq!(parse_timestamp(&json!(0)), Some(utc("1970-01-01T00:00:00Z")));
    assert_eq!(parse_timestamp(&json!(true)), None);
  }

  #[test]
  fn date_cell_renders_locale_text_and_relative_hint() {
    let row = json!({"start_time": "2024-03-05T08:09:10Z"});
    let ctx = FormatContext {
      locale: DateLocale::EnGb,
      now: utc("2024-03-05T11:09:10Z"),
    };
    let cell = start_time().render_in(&row, &ctx, &Utc);
    assert_eq!(cell.text, "05/03/2024, 08:09:10");
    assert_eq!(cell.hint.as_deref(), Some("3 hours ago"));

    let us = FormatContext { locale: DateLocale::EnUs, ..ctx };
    let cell = start_time().render_in(&row, &us, &FixedOffset::east_opt(3600 * 6).unwrap());
    assert_eq!(cell.text, "3/5/2024, 2:09:10 PM");
  }

  #[test]
  fn relative_time_thresholds() {
    let now = utc("2024-06-01T12:00:00Z");
    let ago = |d: Duration| relative_time(now - d, now);
    assert_eq!(ago(Duration::seconds(10)), "a few seconds ago");
    assert_eq!(ago(Duration::seconds(60)), "a minute ago");
    assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
    assert_eq!(ago(Duration::minutes(60)), "an hour ago");
    assert_eq!(ago(Duration::hours(30)), "a day ago");
    assert_eq!(ago(Duration::days(3)), "3 days ago");
    assert_eq!(ago(Duration::days(40)), "a month ago");
    assert_eq!(ago(Duration::days(120)), "4 months ago");
    assert_eq!(ago(Duration::days(400)), "a year ago");
    assert_eq!(ago(Duration::days(365 * 3)), "3 years ago");
    assert_eq!(relative_time(now + Duration::hours(2), now), "in 2 hours");
  }

  #[test]
  fn single_day_filter_uses_the_given_timezone() {
    let at = utc("2024-03-05T23:30:00Z");
    let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
    assert!(date_matches(&at, &FilterValue::Day(ymd(2024, 3, 5)), &Utc));
    assert!(!date_matches(&at, &FilterValue::Day(ymd(2024, 3, 5)), &plus_two));
    assert!(date_matches(&at, &FilterValue::Day(ymd(2024, 3, 6)), &plus_two));
  }

  #[test]
  fn range_filter_is_inclusive_with_open_bounds() {
    let col = start_time();
    let row = json!({"start_time": "2024-03-05T12:00:00Z"});
    let range = |start, end| FilterValue::Range { start, end };
    let cases = [
      (range(Some(ymd(2024, 3, 5)), Some(ymd(2024, 3, 5))), true),
      (range(Some(ymd(2024, 3, 1)), Some(ymd(2024, 3, 4))), false),
      (range(Some(ymd(2024, 3, 6)), None), false),
      (range(None, Some(ymd(2024, 3, 5))), true),
      (range(Some(ymd(2024, 3, 5)), None), true),
      (range(None, None), true),
    ];
    for (filter, expected) in cases {
      assert_eq!(col.matches_in(&row, &filter, &Utc), expected, "{:?}", filter);
    }
    assert!(!col.matches_in(&json!({}), &range(None, None), &Utc));
  }

  #[test]
  fn text_and_status_filters() {
    let id = TASK_COLUMNS[0];
    let status = TASK_COLUMNS[2];
    let row = json!({"id": "Task-ABC", "status": "RUNNING"});
    assert!(id.matches(&row, &FilterValue::Text("abc".into())));
    assert!(!id.matches(&row, &FilterValue::Text("xyz".into())));
    assert!(!TASK_COLUMNS[1].matches(&row, &FilterValue::Text("".into())));
    assert!(status.matches(&row, &FilterValue::Choices(vec!["PENDING".into(), "RUNNING".into()])));
    assert!(!status.matches(&row, &FilterValue::Choices(vec!["ERROR".into()])));
    assert!(status.matches(&row, &FilterValue::Choices(vec![])));
  }

  #[test]
  fn datetime_sort_puts_nulls_lowest() {
    let col = start_time();
    let early = json!({"start_time": "2024-01-01T00:00:00Z"});
    let late = json!({"start_time": "2024-02-01T00:00:00Z"});
    let none = json!({});
    assert_eq!(col.compare(&early, &late), Ordering::Less);
    assert_eq!(col.compare(&none, &early), Ordering::Less);
    assert_eq!(TASK_COLUMNS[0].compare(&early, &late), Ordering::Equal);
  }

  #[test]
  fn parse_filter_inputs() {
    let date = start_time();
    assert_eq!(date.parse_filter("  "), Ok(None));
    assert_eq!(date.parse_filter("2024-03-05"), Ok(Some(FilterValue::Day(ymd(2024, 3, 5)))));
    assert_eq!(
      date.parse_filter("2024-03-01..2024-03-05"),
      Ok(Some(FilterValue::Range { start: Some(ymd(2024, 3, 1)), end: Some(ymd(2024, 3, 5)) }))
    );
    assert_eq!(
      date.parse_filter("..2024-03-05"),
      Ok(Some(FilterValue::Range { start: None, end: Some(ymd(2024, 3, 5)) }))
    );
    assert!(matches!(date.parse_filter("2024-02-30"), Err(FilterParseError::BadDate { .. })));
    assert!(matches!(date.parse_filter(".."), Err(FilterParseError::BadDate { .. })));

    let status = WORKER_COLUMNS[2];
    assert_eq!(
      status.parse_filter("idle, busy,idle"),
      Ok(Some(FilterValue::Choices(vec!["IDLE".into(), "BUSY".into()])))
    );
    assert!(matches!(status.parse_filter("sleeping"), Err(FilterParseError::UnknownChoice { .. })));
    assert_eq!(
      WORKER_CONFIG_COLUMNS[1].parse_filter("5"),
      Err(FilterParseError::NotFilterable("timeout_idle"))
    );
  }
}
