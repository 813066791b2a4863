//! Terminal dashboard for a task queue controller.
//!
//! One queue is monitored at a time, across three tabs:
//!
//! Tasks (per-queue task table)
//! Workers (worker table, with the selected worker's event log)
//! Worker configuration
//!
//! Usage: `qdash [LOCATION]`, where LOCATION is a query string such as
//! `?tab=workers&queueId=default&workerId=w-1`. The final location is printed
//! on exit so the same view can be reopened.

use std::{
  env,
  fs::OpenOptions,
  io,
  sync::{
    Mutex,
    mpsc::{self, Receiver, Sender},
  },
  time::Duration,
};

use anyhow::Context;
use crossterm::{
  event::{self, DisableMouseCapture, EnableMouseCapture, Event as CEvent, KeyCode, KeyEvent, KeyEventKind},
  execute,
  terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use qdash::{
  cache::FetchRequest,
  config::Config,
  dashboard::{Dashboard, DashboardView, EventsView, Tab},
  error::FetchError,
  fetcher::Fetcher,
  location::Location,
  table::TableModel,
};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tracing::{error, info};
use tui::{
  Terminal,
  backend::{Backend, CrosstermBackend},
  layout::{Constraint, Direction, Layout, Rect},
  style::{Color, Modifier, Style},
  text::{Span, Spans},
  widgets::{Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState, Tabs, Wrap},
};

enum Msg {
  Fetched(FetchRequest, Result<Value, FetchError>),
  Tick,
}

enum Focus {
  Table,
  QueueInput,
  FilterInput { column: &'static str, buffer: String },
}

struct App {
  dashboard: Dashboard,
  focus: Focus,
  status: Option<(String, bool)>,
  should_quit: bool,
}

impl App {
  fn new(dashboard: Dashboard) -> Self {
    Self {
      dashboard,
      focus: Focus::Table,
      status: None,
      should_quit: false,
    }
  }

  fn info(&mut self, message: impl Into<String>) {
    self.status = Some((message.into(), false));
  }

  fn fail(&mut self, message: impl Into<String>) {
    self.status = Some((message.into(), true));
  }

  /// Returns fetches triggered by a manual refresh.
  fn on_key(&mut self, key: KeyEvent) -> Vec<FetchRequest> {
    match self.focus {
      Focus::Table => return self.on_table_key(key),
      Focus::QueueInput => self.on_queue_key(key),
      Focus::FilterInput { .. } => self.on_filter_key(key),
    }
    Vec::new()
  }

  fn on_filter_key(&mut self, key: KeyEvent) {
    let Focus::FilterInput { column, buffer } = &mut self.focus else {
      return;
    };
    match key.code {
      KeyCode::Char(c) => buffer.push(c),
      KeyCode::Backspace => {
        buffer.pop();
      }
      KeyCode::Enter => {
        let (column, buffer) = (*column, std::mem::take(buffer));
        let tab = self.dashboard.active_tab();
        self.focus = Focus::Table;
        match self.dashboard.table_mut(tab).apply_filter_input(column, &buffer) {
          Ok(()) => self.status = None,
          Err(e) => self.fail(e.to_string()),
        }
      }
      KeyCode::Esc => self.focus = Focus::Table,
      _ => {}
    }
  }

  fn on_queue_key(&mut self, key: KeyEvent) {
    let len = self.dashboard.suggestions().len();
    let selector = self.dashboard.selector_mut();
    match key.code {
      KeyCode::Char(c) => selector.push_char(c),
      KeyCode::Backspace => selector.backspace(),
      KeyCode::Down => selector.highlight_next(len),
      KeyCode::Up => selector.highlight_previous(len),
      KeyCode::Enter => {
        self.dashboard.confirm_selector();
        self.focus = Focus::Table;
      }
      // leaving the field submits it, same as Enter without a highlight
      KeyCode::Esc | KeyCode::Tab => {
        self.dashboard.submit_selector_input();
        self.focus = Focus::Table;
      }
      _ => {}
    }
  }

  fn on_table_key(&mut self, key: KeyEvent) -> Vec<FetchRequest> {
    let tab = self.dashboard.active_tab();
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Right => self.dashboard.set_tab(tab.next()),
      KeyCode::Left => self.dashboard.set_tab(tab.previous()),
      KeyCode::Tab => self.dashboard.table_mut(tab).focus_next_column(),
      KeyCode::BackTab => self.dashboard.table_mut(tab).focus_previous_column(),
      KeyCode::Down => self.dashboard.table_mut(tab).move_cursor(1),
      KeyCode::Up => self.dashboard.table_mut(tab).move_cursor(-1),
      KeyCode::PageDown | KeyCode::Char('n') => self.dashboard.table_mut(tab).next_page(),
      KeyCode::PageUp | KeyCode::Char('p') => self.dashboard.table_mut(tab).previous_page(),
      KeyCode::Char('z') => self.dashboard.table_mut(tab).cycle_page_size(),
      KeyCode::Char('x') => self.dashboard.table_mut(tab).clear_filters(),
      KeyCode::Char('/') => {
        self.dashboard.selector_mut().open();
        self.focus = Focus::QueueInput;
      }
      KeyCode::Char('s') => {
        let table = self.dashboard.table_mut(tab);
        let column = table.focused_column();
        if column.is_sortable() {
          table.cycle_sort(column.id);
        } else {
          self.info(format!("{} is not sortable", column.header));
        }
      }
      KeyCode::Char('f') => {
        let table = self.dashboard.table(tab);
        let column = table.focused_column();
        if column.is_filterable() {
          let buffer = table.filter_input(column.id).unwrap_or_default().to_string();
          self.focus = Focus::FilterInput { column: column.id, buffer };
        } else {
          self.info(format!("{} cannot be filtered", column.header));
        }
      }
      KeyCode::Char('c') => {
        let column = self.dashboard.table(tab).focused_column();
        let ctx = self.dashboard.format_context();
        match self.dashboard.cursor_cell(tab, &ctx) {
          Some(value) if column.click_to_copy => self.info(format!("{}: {}", column.header, value)),
          _ => self.info(format!("nothing to copy in {}", column.header)),
        }
      }
      KeyCode::Enter if tab == Tab::Workers => {
        if let Some(id) = self.dashboard.cursor_row_id(tab) {
          self.dashboard.click_worker(&id);
        }
      }
      KeyCode::Char('r') => return self.dashboard.refresh(),
      _ => {}
    }
    Vec::new()
  }
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(&config.log_file)
    .with_context(|| format!("opening log file {}", config.log_file))?;
  tracing_subscriber::fmt()
    .with_writer(Mutex::new(file))
    .with_ansi(false)
    .init();
  Ok(())
}

fn dispatch(rt: &Runtime, fetcher: &Fetcher, tx: &Sender<Msg>, requests: Vec<FetchRequest>) {
  for request in requests {
    let fetcher = fetcher.clone();
    let tx = tx.clone();
    rt.spawn(async move {
      let outcome = fetcher.fetch(&request.key).await;
      let _ = tx.send(Msg::Fetched(request, outcome));
    });
  }
}

fn spawn_ticker(rt: &Runtime, every: Duration, tx: Sender<Msg>) {
  rt.spawn(async move {
    let mut ticks = IntervalStream::new(tokio::time::interval(every));
    // the first tick fires immediately
    ticks.next().await;
    while ticks.next().await.is_some() {
      if tx.send(Msg::Tick).is_err() {
        break;
      }
    }
  });
}

fn main() -> anyhow::Result<()> {
  let config = Config::from_env();
  init_logging(&config)?;
  let location = Location::parse(&env::args().nth(1).unwrap_or_default());
  info!("starting dashboard against {} at ?{}", config.api_url, location.to_query_string());

  let rt = Runtime::new()?;
  let fetcher = Fetcher::new(config.api_url.clone());
  let (tx, rx) = mpsc::channel::<Msg>();
  if let Some(every) = config.refresh_interval {
    spawn_ticker(&rt, every, tx.clone());
  }

  enable_raw_mode()?;
  let mut stdout = io::stdout();
  execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
  let backend = CrosstermBackend::new(stdout);
  let mut terminal = Terminal::new(backend)?;

  let mut app = App::new(Dashboard::new(location.clone(), config.locale));
  let result = run(&mut terminal, &mut app, &rt, &fetcher, &tx, &rx);

  disable_raw_mode()?;
  execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
  terminal.show_cursor()?;

  if let Err(e) = &result {
    error!("dashboard stopped: {:#}", e);
  }
  info!("exiting at ?{} after {} location changes", location.to_query_string(), location.revision());
  println!("?{}", location.to_query_string());
  result
}

fn run<B: Backend>(
  terminal: &mut Terminal<B>,
  app: &mut App,
  rt: &Runtime,
  fetcher: &Fetcher,
  tx: &Sender<Msg>,
  rx: &Receiver<Msg>,
) -> anyhow::Result<()> {
  let tick_rate = Duration::from_millis(200);
  loop {
    while let Ok(msg) = rx.try_recv() {
      match msg {
        Msg::Fetched(request, outcome) => {
          app.dashboard.apply(&request, outcome);
        }
        Msg::Tick => dispatch(rt, fetcher, tx, app.dashboard.revalidate()),
      }
    }
    dispatch(rt, fetcher, tx, app.dashboard.pending_requests());

    let ctx = app.dashboard.format_context();
    let view = app.dashboard.view(&ctx);
    let tab = view.tab;
    app.dashboard.table_mut(tab).clamp_to(&view.table);
    terminal.draw(|f| ui(f, app, &view))?;

    if event::poll(tick_rate)? {
      if let CEvent::Key(key) = event::read()? {
        if key.kind == KeyEventKind::Press {
          let requests = app.on_key(key);
          dispatch(rt, fetcher, tx, requests);
        }
      }
    }
    if app.should_quit {
      return Ok(());
    }
  }
}

fn ui<B: Backend>(f: &mut tui::Frame<B>, app: &App, view: &DashboardView) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .margin(1)
    .constraints([
      Constraint::Length(3),
      Constraint::Length(3),
      Constraint::Min(0),
      Constraint::Length(3),
    ].as_ref())
    .split(f.size());

  render_queue_input(f, app, view, chunks[0]);

  let tabs = Tabs::new(
    Tab::ALL
      .iter()
      .map(|t| Spans::from(Span::styled(t.title(), Style::default().fg(Color::Yellow))))
      .collect(),
  )
    .block(Block::default().borders(Borders::ALL).title("Tabs"))
    .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .select(view.tab.index());
  f.render_widget(tabs, chunks[1]);

  match &view.events {
    Some(events) => {
      let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(chunks[2]);
      render_table(f, view.tab.title(), &view.table, panes[0]);
      render_events(f, events, panes[1]);
    }
    None => render_table(f, view.tab.title(), &view.table, chunks[2]),
  }

  render_footer(f, app, chunks[3]);

  if matches!(app.focus, Focus::QueueInput) && view.selector.open {
    render_suggestions(f, view, chunks[2]);
  }
}

fn render_queue_input<B: Backend>(f: &mut tui::Frame<B>, app: &App, view: &DashboardView, area: Rect) {
  let editing = matches!(app.focus, Focus::QueueInput);
  let style = if editing {
    Style::default().fg(Color::Yellow)
  } else {
    Style::default()
  };
  let input = Paragraph::new(Spans::from(vec![
    Span::styled("Queue ID: ", Style::default().add_modifier(Modifier::BOLD)),
    Span::styled(view.selector.input.as_str(), style),
  ]))
    .block(Block::default().borders(Borders::ALL));
  f.render_widget(input, area);
  if editing {
    let x = area.x + 1 + "Queue ID: ".len() as u16 + view.selector.input.chars().count() as u16;
    f.set_cursor(x.min(area.right().saturating_sub(2)), area.y + 1);
  }
}

fn render_suggestions<B: Backend>(f: &mut tui::Frame<B>, view: &DashboardView, area: Rect) {
  if view.selector.suggestions.is_empty() {
    return;
  }
  let height = (view.selector.suggestions.len() as u16 * 2 + 2).min(area.height);
  let popup = Rect {
    x: area.x,
    y: area.y,
    width: area.width.min(50),
    height,
  };
  let items: Vec<ListItem> = view
    .selector
    .suggestions
    .iter()
    .map(|s| {
      ListItem::new(vec![
        Spans::from(Span::raw(s.id.as_str())),
        Spans::from(Span::styled(s.label.as_str(), Style::default().fg(Color::DarkGray))),
      ])
    })
    .collect();
  let list = List::new(items)
    .block(Block::default().borders(Borders::ALL).title("Known queues"))
    .highlight_style(Style::default().bg(Color::Blue));
  let mut state = ListState::default();
  state.select(view.selector.highlighted);
  f.render_widget(Clear, popup);
  f.render_stateful_widget(list, popup, &mut state);
}

fn render_table<B: Backend>(f: &mut tui::Frame<B>, title: &str, model: &TableModel, area: Rect) {
  let mut title = format!(
    "{} | page {}/{} | {} rows | {} per page",
    title,
    model.page + 1,
    model.page_count,
    model.matching_rows,
    model.page_size
  );
  if model.is_loading {
    title.push_str(" | loading...");
  } else if model.is_refreshing {
    title.push_str(" | refreshing...");
  }
  let block = Block::default().borders(Borders::ALL);
  // the empty state already shows the error in place of rows
  let block = match (&model.error, &model.empty_message) {
    (Some(error), None) => block.title(Spans::from(vec![
      Span::raw(title),
      Span::styled(
        format!(" | refresh failed: {} (r to retry)", error),
        Style::default().fg(Color::Red),
      ),
    ])),
    _ => block.title(title),
  };

  let header = Row::new(model.headers.iter().map(|h| {
    let mut text = h.title.to_string();
    match h.sort {
      Some(true) => text.push_str(" ↓"),
      Some(false) => text.push_str(" ↑"),
      None => {}
    }
    if let Some(filter) = &h.filter {
      text.push_str(&format!(" [{}]", filter));
    }
    let mut style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    if h.focused {
      style = style.add_modifier(Modifier::UNDERLINED);
    }
    Cell::from(Span::styled(text, style))
  }));

  if let Some(message) = &model.empty_message {
    let chunks = Layout::default()
      .direction(Direction::Vertical)
      .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
      .split(area);
    let widths = column_widths(model.headers.len());
    f.render_widget(Table::new(Vec::<Row>::new()).header(header).block(block).widths(&widths), chunks[0]);
    let style = if model.empty_is_error {
      Style::default().fg(Color::Red).add_modifier(Modifier::ITALIC)
    } else {
      Style::default().add_modifier(Modifier::ITALIC)
    };
    let empty = Paragraph::new(Span::styled(message.as_str(), style))
      .alignment(tui::layout::Alignment::Center)
      .block(Block::default().borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM));
    f.render_widget(empty, chunks[1]);
    return;
  }

  let rows: Vec<Row> = model
    .rows
    .iter()
    .map(|r| {
      let cells = r.cells.iter().map(|c| Cell::from(c.text.as_str()));
      let row = Row::new(cells);
      if r.selected {
        row.style(Style::default().bg(Color::Blue))
      } else {
        row
      }
    })
    .collect();
  let widths = column_widths(model.headers.len());
  let table = Table::new(rows)
    .header(header)
    .block(block)
    .widths(&widths)
    .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
  let mut state = TableState::default();
  state.select(model.cursor);
  f.render_stateful_widget(table, area, &mut state);
}

fn column_widths(count: usize) -> Vec<Constraint> {
  let count = count.max(1) as u32;
  (0..count).map(|_| Constraint::Ratio(1, count)).collect()
}

fn render_events<B: Backend>(f: &mut tui::Frame<B>, events: &EventsView, area: Rect) {
  let block = Block::default()
    .borders(Borders::ALL)
    .title(format!("Events for {}", events.worker_id));
  let lines: Vec<Spans> = match (&events.error, events.is_loading) {
    (Some(message), _) if events.lines.is_empty() => {
      vec![Spans::from(Span::styled(message.as_str(), Style::default().fg(Color::Red)))]
    }
    (_, true) => vec![Spans::from("Loading...")],
    _ => events
      .lines
      .iter()
      .map(|l| Spans::from(Span::raw(l.as_str())))
      .collect(),
  };
  // keep the newest events in view
  let visible = area.height.saturating_sub(2) as usize;
  let scroll = lines.len().saturating_sub(visible) as u16;
  let log = Paragraph::new(lines)
    .block(block)
    .wrap(Wrap { trim: false })
    .scroll((scroll, 0));
  f.render_widget(log, area);
}

fn render_footer<B: Backend>(f: &mut tui::Frame<B>, app: &App, area: Rect) {
  let (text, style) = match (&app.focus, &app.status) {
    (Focus::FilterInput { column, buffer }, _) => (
      format!("Filter {}: {}  (Enter: apply | Esc: cancel)", column, buffer),
      Style::default().fg(Color::Yellow),
    ),
    (Focus::QueueInput, _) => (
      "Type a queue id | ↑/↓: suggestions | Enter: select | Esc: done".to_string(),
      Style::default().fg(Color::Yellow),
    ),
    (Focus::Table, Some((message, true))) => (message.clone(), Style::default().fg(Color::Red)),
    (Focus::Table, Some((message, false))) => (message.clone(), Style::default().fg(Color::Green)),
    (Focus::Table, None) => (
      "←/→: tabs | /: queue | ↑/↓: rows | Enter: select worker | Tab: column | s: sort | f: filter | x: clear | n/p: page | z: page size | c: copy | r: refresh | q: quit"
        .to_string(),
      Style::default().fg(Color::White),
    ),
  };
  let footer = Paragraph::new(Span::styled(text, style)).block(Block::default().borders(Borders::ALL));
  f.render_widget(footer, area);
}
