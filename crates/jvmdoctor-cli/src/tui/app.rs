//! TUI application state and event loop.
//!
//! One [`Dashboard`] drives everything: the push stream, fetch completions and
//! user actions all land on its queue, which the loop drains between redraws.
//! Charts are drawn from a [`ChartBoard`], the dashboard's render sink.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::prelude::*;
use tokio::sync::mpsc::UnboundedReceiver;

use jvmdoctor_core::render::ChartKind;
use jvmdoctor_core::{
    Dashboard, DashboardConfig, DashboardEvent, HttpHubApi, RenderAdapter, RenderSink, Theme,
};

/// Processes and alerts are re-listed this often even without pushes.
const FLEET_RELOAD: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// ChartBoard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Series {
    labels: Vec<String>,
    values: Vec<f64>,
}

/// Render sink holding the latest data of each chart for the next frame.
#[derive(Debug, Default)]
pub struct ChartBoard {
    theme: Theme,
    series: [Series; 4],
}

fn slot(kind: ChartKind) -> usize {
    match kind {
        ChartKind::Heap => 0,
        ChartKind::Cpu => 1,
        ChartKind::Threads => 2,
        ChartKind::Metaspace => 3,
    }
}

impl ChartBoard {
    pub fn new(theme: Theme) -> Self {
        Self {
            theme,
            ..Self::default()
        }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn values(&self, kind: ChartKind) -> &[f64] {
        &self.series[slot(kind)].values
    }

    pub fn labels(&self, kind: ChartKind) -> &[String] {
        &self.series[slot(kind)].labels
    }
}

impl RenderSink for ChartBoard {
    fn push(&mut self, kind: ChartKind, labels: &[String], values: &[f64]) {
        let series = &mut self.series[slot(kind)];
        series.labels.clear();
        series.labels.extend_from_slice(labels);
        series.values.clear();
        series.values.extend_from_slice(values);
    }

    fn release(&mut self) {
        self.series = Default::default();
    }
}

// ---------------------------------------------------------------------------
// Tabs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tab {
    #[default]
    Metrics,
    Threads,
    Alerts,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Metrics, Tab::Threads, Tab::Alerts];

    pub fn next(self) -> Self {
        match self {
            Tab::Metrics => Tab::Threads,
            Tab::Threads => Tab::Alerts,
            Tab::Alerts => Tab::Metrics,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Tab::Metrics => "Metrics",
            Tab::Threads => "Threads",
            Tab::Alerts => "Alerts",
        }
    }

    pub fn index(self) -> usize {
        match self {
            Tab::Metrics => 0,
            Tab::Threads => 1,
            Tab::Alerts => 2,
        }
    }
}

fn step(cursor: usize, len: usize, down: bool) -> usize {
    if len == 0 {
        0
    } else if down {
        (cursor + 1).min(len - 1)
    } else {
        cursor.saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

pub struct App {
    dashboard: Dashboard<HttpHubApi, ChartBoard>,
    events: UnboundedReceiver<DashboardEvent>,
    tab: Tab,
    fleet_cursor: usize,
    thread_cursor: usize,
    alert_cursor: usize,
    running: bool,
}

impl App {
    pub fn new(config: DashboardConfig, theme: Theme) -> jvmdoctor_core::Result<Self> {
        let api = Arc::new(HttpHubApi::new(&config.hub)?);
        let charts = RenderAdapter::new(theme, ChartBoard::new);
        let (dashboard, events) = Dashboard::new(config, api, charts);
        Ok(Self {
            dashboard,
            events,
            tab: Tab::default(),
            fleet_cursor: 0,
            thread_cursor: 0,
            alert_cursor: 0,
            running: true,
        })
    }

    pub async fn run(&mut self) -> io::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, crossterm::cursor::Show);
            original_hook(info);
        }));

        self.dashboard.start();
        let stream = self.dashboard.connect_stream();

        let result = self.run_loop(&mut terminal).await;

        stream.close().await;
        self.dashboard.shutdown();

        let _ = std::panic::take_hook();
        disable_raw_mode()?;
        execute!(
            terminal.backend_mut(),
            LeaveAlternateScreen,
            crossterm::cursor::Show
        )?;
        result
    }

    async fn run_loop(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    ) -> io::Result<()> {
        let mut keys = EventStream::new();
        let mut redraw = tokio::time::interval(self.dashboard.config().refresh);
        let mut reload = tokio::time::interval(FLEET_RELOAD);
        // the first tick is immediate and start() has just listed everything
        reload.tick().await;

        while self.running {
            terminal.draw(|f| super::ui::draw(f, self))?;

            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.dashboard.handle(event);
                    while let Ok(event) = self.events.try_recv() {
                        self.dashboard.handle(event);
                    }
                }
                key = keys.next() => match key {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        self.handle_key(key.code);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                    None => self.running = false,
                },
                _ = redraw.tick() => {}
                _ = reload.tick() => {
                    self.dashboard.reload_processes();
                    self.dashboard.reload_alerts();
                }
            }
            self.clamp_cursors();
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Tab => self.switch_tab(self.tab.next()),
            KeyCode::Char('1') => self.switch_tab(Tab::Metrics),
            KeyCode::Char('2') => self.switch_tab(Tab::Threads),
            KeyCode::Char('3') => self.switch_tab(Tab::Alerts),
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(false),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(true),
            KeyCode::Enter | KeyCode::Char(' ') => self.activate(),
            KeyCode::Char('t') => self.dashboard.toggle_theme(),
            KeyCode::Char('x') => self.dashboard.select_process(None),
            KeyCode::Char('r') => {
                self.dashboard.reload_processes();
                self.dashboard.reload_alerts();
                if self.tab == Tab::Threads {
                    self.dashboard.refresh_threads();
                }
            }
            KeyCode::Char('o') => {
                if let Some(p) = self.process_under_cursor() {
                    self.dashboard.offline(p.id.clone());
                }
            }
            KeyCode::Char('h') => {
                if let Some(p) = self.process_under_cursor() {
                    self.dashboard.heartbeat(p.id.clone());
                }
            }
            _ => {}
        }
    }

    fn switch_tab(&mut self, tab: Tab) {
        self.tab = tab;
        if tab == Tab::Threads && self.dashboard.thread_view().is_none() {
            self.dashboard.refresh_threads();
        }
    }

    fn move_cursor(&mut self, down: bool) {
        match self.tab {
            Tab::Metrics => {
                self.fleet_cursor = step(self.fleet_cursor, self.dashboard.processes().len(), down);
            }
            Tab::Threads => {
                let len = self.dashboard.thread_view().map_or(0, |v| v.top.len());
                self.thread_cursor = step(self.thread_cursor, len, down);
            }
            Tab::Alerts => {
                self.alert_cursor = step(self.alert_cursor, self.dashboard.alerts().len(), down);
            }
        }
    }

    fn activate(&mut self) {
        match self.tab {
            Tab::Metrics => {
                let Some(id) = self.process_under_cursor().map(|p| p.id.clone()) else {
                    return;
                };
                if self.dashboard.selected_process() == Some(&id) {
                    self.dashboard.select_process(None);
                } else {
                    self.thread_cursor = 0;
                    self.dashboard.select_process(Some(id));
                }
            }
            Tab::Threads => {
                let thread_id = self
                    .dashboard
                    .thread_view()
                    .and_then(|v| v.top.get(self.thread_cursor))
                    .map(|t| t.thread_id);
                if let Some(thread_id) = thread_id {
                    self.dashboard.select_thread(thread_id);
                }
            }
            Tab::Alerts => {
                let alert = self
                    .dashboard
                    .alerts()
                    .get(self.alert_cursor)
                    .filter(|a| !a.acknowledged)
                    .map(|a| a.id);
                if let Some(id) = alert {
                    self.dashboard.acknowledge_alert(id);
                }
            }
        }
    }

    fn clamp_cursors(&mut self) {
        let fleet = self.dashboard.processes().len();
        let threads = self.dashboard.thread_view().map_or(0, |v| v.top.len());
        let alerts = self.dashboard.alerts().len();
        self.fleet_cursor = self.fleet_cursor.min(fleet.saturating_sub(1));
        self.thread_cursor = self.thread_cursor.min(threads.saturating_sub(1));
        self.alert_cursor = self.alert_cursor.min(alerts.saturating_sub(1));
    }

    fn process_under_cursor(&self) -> Option<&jvmdoctor_core::ProcessInfo> {
        self.dashboard.processes().get(self.fleet_cursor)
    }

    // -----------------------------------------------------------------------
    // Accessors for the UI
    // -----------------------------------------------------------------------

    pub fn dashboard(&self) -> &Dashboard<HttpHubApi, ChartBoard> {
        &self.dashboard
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn fleet_cursor(&self) -> usize {
        self.fleet_cursor
    }

    pub fn thread_cursor(&self) -> usize {
        self.thread_cursor
    }

    pub fn alert_cursor(&self) -> usize {
        self.alert_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_board_replaces_series() {
        let mut board = ChartBoard::new(Theme::Light);
        board.push(ChartKind::Cpu, &["10:00:00".into()], &[12.5]);
        board.push(ChartKind::Cpu, &["10:00:01".into(), "10:00:02".into()], &[1.0, 2.0]);
        assert_eq!(board.values(ChartKind::Cpu), &[1.0, 2.0]);
        assert_eq!(board.labels(ChartKind::Cpu).len(), 2);
        assert!(board.values(ChartKind::Heap).is_empty());
        assert_eq!(board.theme(), Theme::Light);

        board.release();
        assert!(board.values(ChartKind::Cpu).is_empty());
    }

    #[test]
    fn tabs_cycle() {
        let mut tab = Tab::default();
        for expected in [Tab::Threads, Tab::Alerts, Tab::Metrics] {
            tab = tab.next();
            assert_eq!(tab, expected);
        }
        assert_eq!(Tab::ALL.map(Tab::index), [0, 1, 2]);
    }

    #[test]
    fn cursor_steps_stay_in_bounds() {
        assert_eq!(step(0, 0, true), 0);
        assert_eq!(step(0, 3, false), 0);
        assert_eq!(step(1, 3, true), 2);
        assert_eq!(step(2, 3, true), 2);
    }
}
