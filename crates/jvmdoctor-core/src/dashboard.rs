//! Dashboard session: the single owner of all client-side state.
//!
//! Every input reaches the dashboard as a [`DashboardEvent`] on one mpsc
//! queue: stream events, fetch completions, action completions. Fetches run
//! as spawned tasks that post their result back to the queue, so the state
//! itself is only ever touched from [`Dashboard::handle`] and the user-facing
//! methods, never concurrently. A completion whose target is no longer
//! current is detected and dropped when it is handled; nothing in flight is
//! cancelled.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::api::{AlertRecord, HubApi, ProcessInfo, RegisterRequest, unacknowledged_count};
use crate::config::DashboardConfig;
use crate::diagnostics::{Level, Suggestion, diagnose};
use crate::error::Result;
use crate::render::{RenderAdapter, RenderSink, Theme};
use crate::sample::{LiveSnapshot, ProcessId, TelemetrySample, now_ms};
use crate::store::{StoreChange, TelemetryStore};
use crate::stream::{StreamClient, StreamEvent, StreamMessage, StreamState, StreamTransport, WebSocketTransport};
use crate::threads::{StackRequest, ThreadInspector, ThreadPatch, ThreadSample, ThreadView, fetch_thread_view};

/// Most recent notices kept for display.
const MAX_NOTICES: usize = 20;

/// A user action against the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FleetAction {
    Acknowledge(i64),
    Offline(ProcessId),
    Heartbeat(ProcessId),
    Register(String),
}

impl FleetAction {
    pub fn describe(&self) -> String {
        match self {
            FleetAction::Acknowledge(id) => format!("acknowledge alert #{id}"),
            FleetAction::Offline(p) => format!("take process {p} offline"),
            FleetAction::Heartbeat(p) => format!("send heartbeat for process {p}"),
            FleetAction::Register(name) => format!("register {name}"),
        }
    }
}

#[derive(Debug)]
pub enum DashboardEvent {
    Stream(StreamEvent),
    Processes(Result<Vec<ProcessInfo>>),
    Alerts(Result<Vec<AlertRecord>>),
    History {
        process: ProcessId,
        result: Result<Vec<TelemetrySample>>,
    },
    Threads {
        process: ProcessId,
        generation: u64,
        result: Result<ThreadView>,
    },
    Stack {
        process: ProcessId,
        generation: u64,
        thread_id: i64,
        result: Result<ThreadPatch>,
    },
    Action {
        action: FleetAction,
        result: Result<()>,
    },
}

/// A line of user-visible feedback about an explicit action.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: Level,
    pub text: String,
    pub at: i64,
}

/// One row of the fleet table.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetRow<'a> {
    pub info: &'a ProcessInfo,
    pub heap_usage: Option<f64>,
    pub thread_count: Option<i64>,
}

pub struct Dashboard<A: HubApi, S: RenderSink> {
    config: DashboardConfig,
    api: Arc<A>,
    tx: UnboundedSender<DashboardEvent>,
    store: TelemetryStore,
    charts: RenderAdapter<S>,
    threads: ThreadInspector,
    processes: Vec<ProcessInfo>,
    alerts: Vec<AlertRecord>,
    suggestions: Vec<Suggestion>,
    stream_state: StreamState,
    notices: VecDeque<Notice>,
    clock: fn() -> i64,
}

impl<A: HubApi, S: RenderSink> Dashboard<A, S> {
    /// Build a dashboard and the receiving end of its event queue. The
    /// caller drains the receiver into [`Dashboard::handle`].
    pub fn new(
        config: DashboardConfig,
        api: Arc<A>,
        charts: RenderAdapter<S>,
    ) -> (Self, UnboundedReceiver<DashboardEvent>) {
        let (tx, rx) = unbounded_channel();
        let store = TelemetryStore::new(config.window);
        let dashboard = Self {
            config,
            api,
            tx,
            store,
            charts,
            threads: ThreadInspector::default(),
            processes: Vec::new(),
            alerts: Vec::new(),
            suggestions: Vec::new(),
            stream_state: StreamState::Closed,
            notices: VecDeque::new(),
            clock: now_ms,
        };
        (dashboard, rx)
    }

    /// Replace the wall clock, for deterministic tests.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Open the chart sink and load the fleet and alert lists.
    pub fn start(&mut self) {
        self.charts.open();
        self.reload_processes();
        self.reload_alerts();
    }

    /// Connect the push stream to the configured hub. Events land on this
    /// dashboard's queue; close the returned client on shutdown.
    pub fn connect_stream(&self) -> StreamClient {
        let url = self.config.stream_url();
        info!("connecting stream to {url}");
        self.connect_stream_with(WebSocketTransport::new(url))
    }

    pub fn connect_stream_with<T: StreamTransport>(&self, transport: T) -> StreamClient {
        let tx = self.tx.clone();
        StreamClient::open(transport, self.config.reconnect_delay, move |ev| {
            // a closed queue means the dashboard is gone; the client is about to be stopped
            let _ = tx.send(DashboardEvent::Stream(ev));
        })
    }

    /// Release the chart sink. Also happens on drop.
    pub fn shutdown(&mut self) {
        self.charts.close();
    }

    // -----------------------------------------------------------------------
    // Event handling
    // -----------------------------------------------------------------------

    pub fn handle(&mut self, event: DashboardEvent) {
        match event {
            DashboardEvent::Stream(StreamEvent::State(state)) => {
                debug!("stream state: {}", state.label());
                self.stream_state = state;
            }
            DashboardEvent::Stream(StreamEvent::Message(StreamMessage::Metrics { process, sample })) => {
                let now = (self.clock)();
                if self.store.ingest(process, sample, now) == StoreChange::Live {
                    self.refresh_suggestions();
                    self.render();
                }
            }
            DashboardEvent::Stream(StreamEvent::Message(StreamMessage::Alert(notice))) => {
                debug!("alert pushed: {:?}", notice.alert_type);
                self.reload_alerts();
            }
            DashboardEvent::Processes(Ok(list)) => {
                let had_selection = self.store.selected().is_some();
                self.store.retain_known(list.iter().map(|p| &p.id));
                if had_selection && self.store.selected().is_none() {
                    info!("selected process left the fleet");
                    self.reset_selection_view();
                }
                self.processes = list;
            }
            DashboardEvent::Processes(Err(e)) => warn!("failed to load processes: {e}"),
            DashboardEvent::Alerts(Ok(list)) => self.alerts = list,
            DashboardEvent::Alerts(Err(e)) => warn!("failed to load alerts: {e}"),
            DashboardEvent::History { process, result } => match result {
                Ok(samples) => {
                    if self.store.backfill(&process, samples).needs_render() {
                        self.render();
                    }
                }
                Err(e) => warn!("failed to load history for process {process}: {e}"),
            },
            DashboardEvent::Threads {
                process,
                generation,
                result,
            } => match result {
                Ok(view) => {
                    self.threads.apply_refresh(generation, view);
                }
                Err(e) => warn!("failed to load threads for process {process}: {e}"),
            },
            DashboardEvent::Stack {
                process,
                generation,
                thread_id,
                result,
            } => match result {
                Ok(patch) => {
                    self.threads.apply_stack(&process, generation, thread_id, patch);
                }
                Err(e) => warn!("failed to load stack of thread {thread_id}: {e}"),
            },
            DashboardEvent::Action { action, result } => self.finish_action(action, result),
        }
    }

    fn finish_action(&mut self, action: FleetAction, result: Result<()>) {
        match result {
            Ok(()) => {
                info!("{} succeeded", action.describe());
                self.notify(Level::Info, format!("{} succeeded", action.describe()));
                match action {
                    FleetAction::Acknowledge(_) => self.reload_alerts(),
                    _ => self.reload_processes(),
                }
            }
            Err(e) => {
                warn!("{} failed: {e}", action.describe());
                self.notify(Level::Critical, format!("failed to {}: {e}", action.describe()));
            }
        }
    }

    fn notify(&mut self, level: Level, text: String) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            level,
            text,
            at: (self.clock)(),
        });
    }

    /// Drop everything derived from the previous selection.
    fn reset_selection_view(&mut self) {
        self.suggestions.clear();
        self.threads.clear();
        self.charts.recreate(self.charts.theme());
    }

    fn refresh_suggestions(&mut self) {
        self.suggestions = self.store.live().map(diagnose).unwrap_or_default();
    }

    fn render(&mut self) {
        if let Some(buffer) = self.store.selected_buffer() {
            self.charts.render(buffer.iter());
        }
    }

    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = DashboardEvent> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(fut.await);
        });
    }

    // -----------------------------------------------------------------------
    // User operations
    // -----------------------------------------------------------------------

    pub fn reload_processes(&self) {
        let api = Arc::clone(&self.api);
        self.spawn(async move { DashboardEvent::Processes(api.list_processes().await) });
    }

    pub fn reload_alerts(&self) {
        let api = Arc::clone(&self.api);
        self.spawn(async move { DashboardEvent::Alerts(api.list_alerts().await) });
    }

    /// Switch the live process. Clears the snapshot, the suggestions and the
    /// thread view, rebuilds the charts, and backfills the window from the
    /// hub's history.
    pub fn select_process(&mut self, process: Option<ProcessId>) {
        if self.store.selected() == process.as_ref() {
            return;
        }
        self.store.select(process.clone());
        self.reset_selection_view();

        let Some(process) = process else {
            return;
        };
        info!("selected process {process}");
        let window_ms = i64::try_from(self.config.window.as_millis()).unwrap_or(i64::MAX);
        let since = (self.clock)().saturating_sub(window_ms);
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.history(&process, since).await;
            DashboardEvent::History { process, result }
        });
    }

    /// Fetch top threads and deadlocks for the selected process.
    pub fn refresh_threads(&mut self) {
        let Some(process) = self.store.selected().cloned() else {
            return;
        };
        let generation = self.threads.begin_refresh(process.clone());
        let now = (self.clock)();
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = fetch_thread_view(api.as_ref(), &process, now).await;
            DashboardEvent::Threads {
                process,
                generation,
                result,
            }
        });
    }

    /// Select a thread in the current view, fetching its stack if needed.
    pub fn select_thread(&mut self, thread_id: i64) {
        let Some(StackRequest::Fetch {
            process,
            thread_id,
            generation,
        }) = self.threads.select(thread_id)
        else {
            return;
        };
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.thread_stack(&process, thread_id).await;
            DashboardEvent::Stack {
                process,
                generation,
                thread_id,
                result,
            }
        });
    }

    pub fn acknowledge_alert(&self, alert_id: i64) {
        let api = Arc::clone(&self.api);
        let by = self.config.acknowledged_by.clone();
        self.spawn(async move {
            let result = api.acknowledge_alert(alert_id, &by).await;
            DashboardEvent::Action {
                action: FleetAction::Acknowledge(alert_id),
                result,
            }
        });
    }

    pub fn offline(&self, process: ProcessId) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.offline(&process).await;
            DashboardEvent::Action {
                action: FleetAction::Offline(process),
                result,
            }
        });
    }

    pub fn heartbeat(&self, process: ProcessId) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.heartbeat(&process).await;
            DashboardEvent::Action {
                action: FleetAction::Heartbeat(process),
                result,
            }
        });
    }

    pub fn register(&self, request: RegisterRequest) {
        let api = Arc::clone(&self.api);
        self.spawn(async move {
            let result = api.register(&request).await.map(|_| ());
            DashboardEvent::Action {
                action: FleetAction::Register(request.app_name),
                result,
            }
        });
    }

    /// Rebuild the chart sink with `theme` and redraw the selection.
    pub fn set_theme(&mut self, theme: Theme) {
        self.charts.recreate(theme);
        self.render();
    }

    pub fn toggle_theme(&mut self) {
        self.set_theme(self.charts.theme().toggled());
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn store(&self) -> &TelemetryStore {
        &self.store
    }

    pub fn charts(&self) -> &RenderAdapter<S> {
        &self.charts
    }

    pub fn live(&self) -> Option<&LiveSnapshot> {
        self.store.live()
    }

    pub fn selected_process(&self) -> Option<&ProcessId> {
        self.store.selected()
    }

    pub fn selected_info(&self) -> Option<&ProcessInfo> {
        let id = self.store.selected()?;
        self.processes.iter().find(|p| &p.id == id)
    }

    pub fn processes(&self) -> &[ProcessInfo] {
        &self.processes
    }

    pub fn fleet_rows(&self) -> Vec<FleetRow<'_>> {
        self.processes
            .iter()
            .map(|info| {
                let latest = self.store.latest(&info.id);
                FleetRow {
                    info,
                    heap_usage: latest.map(|s| s.heap_usage),
                    thread_count: latest.map(|s| s.thread_count),
                }
            })
            .collect()
    }

    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    pub fn unacknowledged(&self) -> usize {
        unacknowledged_count(&self.alerts)
    }

    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    pub fn thread_view(&self) -> Option<&ThreadView> {
        self.threads.view()
    }

    pub fn selected_thread(&self) -> Option<&ThreadSample> {
        self.threads.selected_thread()
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream_state
    }

    pub fn notices(&self) -> impl DoubleEndedIterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn theme(&self) -> Theme {
        self.charts.theme()
    }
}
