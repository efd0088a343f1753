//! TUI rendering.
//!
//! ┌ jvmdoctor  hub  stream: open  3 processes  1 alert ─────────┐
//! │ Metrics │ Threads │ Alerts                                    │
//! ├──────────────────┬──────────────────────────────────────────┤
//! │ Fleet            │ heap ▓▓▓▓░░  cpu ▓░░░░  metaspace ▓▓░░░  │
//! │ ▸ orders   62%   │ ┌ Heap % ──────┐ ┌ CPU % ───────┐        │
//! │   billing  41%   │ │  ⣀⡠⠔⠊        │ │ ⠒⠒⠤⣀         │        │
//! │                  │ ┌ Threads ─────┐ ┌ Metaspace % ─┐        │
//! │                  ├──────────────────────────────────────────┤
//! │                  │ Suggestions                               │
//! ├──────────────────┴──────────────────────────────────────────┤
//! │ notices                                                       │
//! │ ↑↓ move  enter select  tab switch  t theme  q quit            │
//! └──────────────────────────────────────────────────────────────┘

use ratatui::{prelude::*, widgets::*};

use jvmdoctor_core::format::{clock_label, format_bytes, format_cpu_time, format_duration, percent};
use jvmdoctor_core::render::ChartKind;
use jvmdoctor_core::stream::StreamState;
use jvmdoctor_core::threads::ThreadState;
use jvmdoctor_core::{Level, Theme};

use super::app::{App, ChartBoard, Tab};

struct Palette {
    accent: Color,
    text: Color,
    dim: Color,
    cursor_bg: Color,
    series: [Color; 4],
}

fn palette(theme: Theme) -> Palette {
    match theme {
        Theme::Dark => Palette {
            accent: Color::Cyan,
            text: Color::White,
            dim: Color::DarkGray,
            cursor_bg: Color::DarkGray,
            series: [Color::Cyan, Color::Yellow, Color::Magenta, Color::Green],
        },
        Theme::Light => Palette {
            accent: Color::Blue,
            text: Color::Black,
            dim: Color::Gray,
            cursor_bg: Color::Gray,
            series: [Color::Blue, Color::Red, Color::Magenta, Color::Green],
        },
    }
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Critical => Color::Red,
        Level::Warning => Color::Yellow,
        Level::Info => Color::Green,
    }
}

fn usage_color(fraction: f64) -> Color {
    if fraction >= 0.9 {
        Color::Red
    } else if fraction >= 0.7 {
        Color::Yellow
    } else {
        Color::Green
    }
}

pub fn draw(f: &mut Frame, app: &App) {
    let p = palette(app.dashboard().theme());
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Length(1), // tabs
            Constraint::Min(12),   // main
            Constraint::Length(4), // notices
            Constraint::Length(1), // keys
        ])
        .split(f.area());

    draw_title(f, rows[0], app, &p);
    draw_tabs(f, rows[1], app, &p);
    match app.tab() {
        Tab::Metrics => draw_metrics(f, rows[2], app, &p),
        Tab::Threads => draw_threads(f, rows[2], app, &p),
        Tab::Alerts => draw_alerts(f, rows[2], app, &p),
    }
    draw_notices(f, rows[3], app, &p);
    draw_keys(f, rows[4], app, &p);
}

fn draw_title(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let d = app.dashboard();
    let (state, color) = match d.stream_state() {
        StreamState::Open => ("live", Color::Green),
        StreamState::Connecting => ("connecting", Color::Yellow),
        StreamState::Closed => ("disconnected", Color::Red),
    };
    let running = d.processes().iter().filter(|a| a.is_running()).count();
    let unack = d.unacknowledged();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(p.accent))
        .title(Line::from(vec![
            Span::styled(" jvmdoctor ", Style::default().bold().fg(p.accent)),
            Span::styled(format!(" {} ", d.config().hub), Style::default().fg(p.dim)),
            Span::raw(" stream: "),
            Span::styled(state, Style::default().bold().fg(color)),
            Span::raw(format!(
                "  {} processes ({running} running)  ",
                d.processes().len()
            )),
            Span::styled(
                format!("{unack} unacknowledged "),
                if unack > 0 {
                    Style::default().bold().fg(Color::Red)
                } else {
                    Style::default().fg(p.dim)
                },
            ),
        ]));

    let selected = match d.selected_info() {
        Some(info) => format!(
            " watching {} ({}) on {}",
            info.app_name,
            info.id,
            info.address()
        ),
        None => match d.selected_process() {
            Some(id) => format!(" watching process {id}"),
            None => " no process selected".to_string(),
        },
    };
    let body = Paragraph::new(selected)
        .style(Style::default().fg(p.text))
        .block(block);
    f.render_widget(body, area);
}

fn draw_tabs(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let titles: Vec<_> = Tab::ALL
        .iter()
        .map(|t| {
            let badge = match t {
                Tab::Alerts if app.dashboard().unacknowledged() > 0 => {
                    format!(" ({})", app.dashboard().unacknowledged())
                }
                _ => String::new(),
            };
            format!(" {} {}{badge} ", t.index() + 1, t.title())
        })
        .collect();
    let tabs = Tabs::new(titles)
        .select(app.tab().index())
        .style(Style::default().fg(p.dim))
        .highlight_style(Style::default().bold().fg(p.accent));
    f.render_widget(tabs, area);
}

// ---------------------------------------------------------------------------
// Metrics tab
// ---------------------------------------------------------------------------

fn draw_metrics(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(32), Constraint::Percentage(68)])
        .split(area);

    draw_fleet(f, cols[0], app, p);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),      // gauges
            Constraint::Min(8),         // charts
            Constraint::Percentage(25), // suggestions
        ])
        .split(cols[1]);

    draw_gauges(f, right[0], app, p);
    draw_charts(f, right[1], app, p);
    draw_suggestions(f, right[2], app, p);
}

fn draw_fleet(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let d = app.dashboard();
    let selected = d.selected_process();

    let rows: Vec<Row> = d
        .fleet_rows()
        .into_iter()
        .map(|row| {
            let marker = if selected == Some(&row.info.id) { "●" } else { " " };
            let heap = row.heap_usage.map(percent).unwrap_or_else(|| "-".into());
            let threads = row
                .thread_count
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".into());
            let style = if !row.info.is_running() {
                Style::default().fg(p.dim)
            } else {
                match row.heap_usage {
                    Some(h) => Style::default().fg(usage_color(h)),
                    None => Style::default().fg(p.text),
                }
            };
            Row::new(vec![
                marker.to_string(),
                row.info.app_name.clone(),
                row.info.status.clone(),
                heap,
                threads,
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(2),  // selected
            Constraint::Min(10),    // name
            Constraint::Length(8),  // status
            Constraint::Length(7),  // heap
            Constraint::Length(5),  // threads
        ],
    )
    .header(Row::new(vec!["", "Process", "Status", "Heap", "Thr"]).style(Style::default().bold()))
    .row_highlight_style(Style::default().bg(p.cursor_bg).fg(p.text))
    .highlight_symbol("▸")
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Fleet (enter to watch) "),
    );

    let mut state = TableState::default().with_selected(
        (!d.processes().is_empty()).then_some(app.fleet_cursor()),
    );
    f.render_stateful_widget(table, area, &mut state);
}

fn draw_gauges(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ])
        .split(area);

    let Some(live) = app.dashboard().live() else {
        let msg = if app.dashboard().selected_process().is_some() {
            "waiting for the next sample..."
        } else {
            "select a process in the fleet list"
        };
        let para = Paragraph::new(msg)
            .style(Style::default().fg(p.dim))
            .block(Block::default().borders(Borders::ALL).title(" Live "));
        f.render_widget(para, area);
        return;
    };

    let gauge = |title: &str, fraction: f64, label: String| {
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(format!(" {title} ")))
            .gauge_style(Style::default().fg(usage_color(fraction)))
            .ratio(fraction.clamp(0.0, 1.0))
            .label(label)
    };

    let heap_label = format!(
        "{} / {}",
        format_bytes(live.heap_used),
        format_bytes(live.heap_max)
    );
    f.render_widget(gauge("Heap", live.heap_usage, heap_label), cols[0]);
    f.render_widget(gauge("CPU", live.cpu_usage, percent(live.cpu_usage)), cols[1]);
    f.render_widget(
        gauge("Metaspace", live.metaspace_usage, format_bytes(live.metaspace_used)),
        cols[2],
    );

    let info = Paragraph::new(vec![Line::from(vec![
        Span::styled(format!("{} thr", live.thread_count), Style::default().bold()),
        Span::styled(
            format!("  gc {}/{}ms  up {}", live.gc_count, live.gc_time, format_duration(live.uptime)),
            Style::default().fg(p.dim),
        ),
    ])])
    .block(Block::default().borders(Borders::ALL).title(" Runtime "));
    f.render_widget(info, cols[3]);
}

fn draw_charts(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[0]);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);
    let cells = [top[0], top[1], bottom[0], bottom[1]];

    let board = app.dashboard().charts().sink();
    let colors = board.map_or(p.series, |b| palette(b.theme()).series);
    for (i, kind) in ChartKind::ALL.into_iter().enumerate() {
        draw_chart(f, cells[i], board, kind, colors[i], p);
    }
}

fn draw_chart(
    f: &mut Frame,
    area: Rect,
    board: Option<&ChartBoard>,
    kind: ChartKind,
    color: Color,
    p: &Palette,
) {
    let values = board.map(|b| b.values(kind)).unwrap_or(&[]);
    let labels = board.map(|b| b.labels(kind)).unwrap_or(&[]);

    if values.is_empty() {
        let para = Paragraph::new("no data")
            .style(Style::default().fg(p.dim))
            .block(Block::default().borders(Borders::ALL).title(format!(" {kind} ")));
        f.render_widget(para, area);
        return;
    }

    let data: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as f64, v))
        .collect();
    let latest = values.last().copied().unwrap_or(0.0);
    let max_val = values.iter().copied().fold(0.0, f64::max);
    let y_max = if kind.is_percent() {
        100.0
    } else {
        (max_val * 1.2).max(10.0).ceil()
    };
    let x_max = (values.len() as f64 - 1.0).max(1.0);

    let datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(color))
            .data(&data),
    ];

    let first = labels.first().cloned().unwrap_or_default();
    let last = labels.last().cloned().unwrap_or_default();
    let current = if kind.is_percent() {
        format!("{latest:.1}%")
    } else {
        format!("{latest:.0}")
    };

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {kind}  {current} ")),
        )
        .x_axis(
            Axis::default()
                .bounds([0.0, x_max])
                .style(Style::default().fg(p.dim))
                .labels(vec![Line::from(first), Line::from(last)]),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, y_max])
                .style(Style::default().fg(p.dim))
                .labels(vec![Line::from("0"), Line::from(format!("{y_max:.0}"))]),
        );
    f.render_widget(chart, area);
}

fn draw_suggestions(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let suggestions = app.dashboard().suggestions();
    let lines: Vec<Line> = if suggestions.is_empty() {
        vec![Line::from(Span::styled(
            "No findings for the current sample.",
            Style::default().fg(p.dim),
        ))]
    } else {
        suggestions
            .iter()
            .map(|s| {
                Line::from(vec![
                    Span::styled(
                        format!("[{}] ", s.level.label()),
                        Style::default().bold().fg(level_color(s.level)),
                    ),
                    Span::styled(s.title.clone(), Style::default().bold()),
                    Span::raw(format!("  {}", s.description)),
                ])
            })
            .collect()
    };
    let para = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title(" Suggestions "));
    f.render_widget(para, area);
}

// ---------------------------------------------------------------------------
// Threads tab
// ---------------------------------------------------------------------------

fn state_color(state: ThreadState) -> Color {
    match state {
        ThreadState::Runnable => Color::Green,
        ThreadState::Blocked => Color::Red,
        ThreadState::Waiting | ThreadState::TimedWaiting => Color::Yellow,
        _ => Color::Gray,
    }
}

fn draw_threads(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let d = app.dashboard();
    let Some(view) = d.thread_view() else {
        let msg = if d.selected_process().is_some() {
            "loading threads... (r to refresh)"
        } else {
            "select a process on the Metrics tab first"
        };
        let para = Paragraph::new(msg)
            .style(Style::default().fg(p.dim))
            .block(Block::default().borders(Borders::ALL).title(" Threads "));
        f.render_widget(para, area);
        return;
    };

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(6)])
        .split(cols[0]);

    let selected = d.selected_thread().map(|t| t.thread_id);
    let rows: Vec<Row> = view
        .top
        .iter()
        .map(|t| {
            let marker = if selected == Some(t.thread_id) { "●" } else { " " };
            Row::new(vec![
                Cell::from(marker),
                Cell::from(t.thread_id.to_string()),
                Cell::from(t.name.clone()),
                Cell::from(t.state.label()).style(Style::default().fg(state_color(t.state))),
                Cell::from(format_cpu_time(t.cpu_time_millis)),
                Cell::from(format!("{:.0}%", view.cpu_share(t))),
            ])
        })
        .collect();

    let c = view.counts;
    let title = format!(
        " Top threads  {} run  {} blocked  {} wait  {} timed  (at {}) ",
        c.runnable,
        c.blocked,
        c.waiting,
        c.timed_waiting,
        clock_label(view.fetched_at)
    );
    let table = Table::new(
        rows,
        [
            Constraint::Length(2),
            Constraint::Length(7),
            Constraint::Min(12),
            Constraint::Length(13),
            Constraint::Length(8),
            Constraint::Length(5),
        ],
    )
    .header(Row::new(vec!["", "ID", "Name", "State", "CPU", "Share"]).style(Style::default().bold()))
    .row_highlight_style(Style::default().bg(p.cursor_bg).fg(p.text))
    .highlight_symbol("▸")
    .block(Block::default().borders(Borders::ALL).title(title));
    let mut state =
        TableState::default().with_selected((!view.top.is_empty()).then_some(app.thread_cursor()));
    f.render_stateful_widget(table, left[0], &mut state);

    let deadlock_lines: Vec<Line> = if view.deadlock_count == 0 {
        vec![Line::from(Span::styled("No deadlocks", Style::default().fg(Color::Green)))]
    } else {
        view.deadlocks
            .iter()
            .map(|t| {
                Line::from(Span::styled(
                    format!(
                        "#{} {} waits on {} held by {}",
                        t.thread_id,
                        t.name,
                        t.lock_name.as_deref().unwrap_or("?"),
                        t.lock_owner_name.as_deref().unwrap_or("?")
                    ),
                    Style::default().fg(Color::Red),
                ))
            })
            .collect()
    };
    let deadlocks = Paragraph::new(deadlock_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" Deadlocks ({}) ", view.deadlock_count)),
    );
    f.render_widget(deadlocks, left[1]);

    draw_stack(f, cols[1], app, p);
}

fn draw_stack(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let (title, lines) = match app.dashboard().selected_thread() {
        None => (
            " Stack ".to_string(),
            vec![Line::from(Span::styled(
                "enter on a thread to load its stack",
                Style::default().fg(p.dim),
            ))],
        ),
        Some(t) => {
            let title = format!(" \"{}\" #{} ", t.name, t.thread_id);
            let mut lines = vec![Line::from(vec![
                Span::styled(t.state.label(), Style::default().bold().fg(state_color(t.state))),
                Span::raw(if t.daemon { "  daemon" } else { "" }),
            ])];
            if let Some(lock) = &t.lock_name {
                lines.push(Line::from(format!("waiting on {lock}")));
            }
            match t.stack_trace.as_deref() {
                None => lines.push(Line::from(Span::styled(
                    "loading...",
                    Style::default().fg(p.dim),
                ))),
                Some([]) => lines.push(Line::from(Span::styled(
                    "(no frames)",
                    Style::default().fg(p.dim),
                ))),
                Some(frames) => lines.extend(frames.iter().map(|fr| Line::from(format!("  {fr}")))),
            }
            (title, lines)
        }
    };
    let para = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(para, area);
}

// ---------------------------------------------------------------------------
// Alerts tab
// ---------------------------------------------------------------------------

fn draw_alerts(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let alerts = app.dashboard().alerts();
    let rows: Vec<Row> = alerts
        .iter()
        .map(|a| {
            let style = if a.acknowledged {
                Style::default().fg(p.dim)
            } else if a.alert_level.eq_ignore_ascii_case("critical") {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::Yellow)
            };
            Row::new(vec![
                a.id.to_string(),
                clock_label(a.created_at),
                a.app_id.as_ref().map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                a.alert_type.clone(),
                a.alert_msg.clone(),
                if a.acknowledged {
                    a.acknowledged_by.clone().unwrap_or_else(|| "yes".into())
                } else {
                    String::new()
                },
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(9),
            Constraint::Length(8),
            Constraint::Length(18),
            Constraint::Min(20),
            Constraint::Length(12),
        ],
    )
    .header(
        Row::new(vec!["ID", "Raised", "Process", "Type", "Message", "Acked by"])
            .style(Style::default().bold()),
    )
    .row_highlight_style(Style::default().bg(p.cursor_bg).fg(p.text))
    .highlight_symbol("▸")
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Alerts (enter to acknowledge) "),
    );
    let mut state =
        TableState::default().with_selected((!alerts.is_empty()).then_some(app.alert_cursor()));
    f.render_stateful_widget(table, area, &mut state);
}

// ---------------------------------------------------------------------------
// Footer
// ---------------------------------------------------------------------------

fn draw_notices(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let lines: Vec<Line> = app
        .dashboard()
        .notices()
        .rev()
        .take(2)
        .map(|n| {
            Line::from(vec![
                Span::styled(format!("{} ", clock_label(n.at)), Style::default().fg(p.dim)),
                Span::styled(n.text.clone(), Style::default().fg(level_color(n.level))),
            ])
        })
        .collect();
    let para = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Notices "));
    f.render_widget(para, area);
}

fn draw_keys(f: &mut Frame, area: Rect, app: &App, p: &Palette) {
    let keys = match app.tab() {
        Tab::Metrics => " ↑↓ move  enter watch  x unwatch  o offline  h heartbeat  tab switch  t theme  r reload  q quit",
        Tab::Threads => " ↑↓ move  enter stack  r refresh  tab switch  t theme  q quit",
        Tab::Alerts => " ↑↓ move  enter acknowledge  r reload  tab switch  t theme  q quit",
    };
    let bar = Paragraph::new(format!("{keys}   [{}]", app.dashboard().theme().label()))
        .style(Style::default().bg(p.cursor_bg).fg(p.text));
    f.render_widget(bar, area);
}
