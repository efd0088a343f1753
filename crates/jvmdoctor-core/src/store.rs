//! Telemetry store: one time-window buffer per process plus the live snapshot
//! of the selected process.
//!
//! Mutators return a [`StoreChange`] describing what moved so the caller can
//! drive the render adapter and the rule engine from it. Only one process is
//! live at a time; every other process keeps accumulating in the background.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::debug;

use crate::sample::{LiveSnapshot, ProcessId, TelemetrySample};
use crate::window::{DEFAULT_WINDOW, TimeWindowBuffer};

/// What a store mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    /// A background process's buffer grew. Nothing visible changed.
    Buffered,
    /// The selected process's buffer and live snapshot changed.
    Live,
    /// The selected process's buffer was replaced by history.
    Backfilled,
    /// A backfill arrived for a process that is no longer selected.
    Stale,
}

impl StoreChange {
    /// Whether the charts for the selected process need a redraw.
    pub fn needs_render(self) -> bool {
        matches!(self, StoreChange::Live | StoreChange::Backfilled)
    }
}

#[derive(Debug)]
pub struct TelemetryStore {
    window: Duration,
    buffers: HashMap<ProcessId, TimeWindowBuffer>,
    selected: Option<ProcessId>,
    live: Option<LiveSnapshot>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TelemetryStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            buffers: HashMap::new(),
            selected: None,
            live: None,
        }
    }

    /// Append a streamed sample, creating the process's buffer on first use.
    pub fn ingest(&mut self, process: ProcessId, sample: TelemetrySample, now_ms: i64) -> StoreChange {
        let window = self.window;
        self.buffers
            .entry(process.clone())
            .or_insert_with(|| TimeWindowBuffer::new(window))
            .append(sample, now_ms);

        if self.selected.as_ref() == Some(&process) {
            self.live = Some(LiveSnapshot::project(&process, &sample));
            StoreChange::Live
        } else {
            StoreChange::Buffered
        }
    }

    /// Change the selected process. The live snapshot is cleared; it comes
    /// back with the next streamed sample for the new selection.
    pub fn select(&mut self, process: Option<ProcessId>) {
        self.selected = process;
        self.live = None;
    }

    /// Replace `process`'s buffer with history fetched at selection time.
    ///
    /// Discarded without touching any buffer when `process` is no longer the
    /// selected one. History may arrive newest-first, so it is sorted before
    /// it replaces the buffer.
    pub fn backfill(&mut self, process: &ProcessId, mut samples: Vec<TelemetrySample>) -> StoreChange {
        if self.selected.as_ref() != Some(process) {
            debug!("discarding stale history for process {process}");
            return StoreChange::Stale;
        }
        samples.sort_by_key(|s| s.timestamp);
        let window = self.window;
        self.buffers
            .entry(process.clone())
            .or_insert_with(|| TimeWindowBuffer::new(window))
            .replace(samples);
        StoreChange::Backfilled
    }

    /// Drop buffers of processes that left the known set. Losing the
    /// selected process also clears the selection.
    pub fn retain_known<'a, I>(&mut self, known: I)
    where
        I: IntoIterator<Item = &'a ProcessId>,
    {
        let known: HashSet<&ProcessId> = known.into_iter().collect();
        self.buffers.retain(|id, _| known.contains(id));
        if self.selected.as_ref().is_some_and(|id| !known.contains(id)) {
            self.select(None);
        }
    }

    pub fn selected(&self) -> Option<&ProcessId> {
        self.selected.as_ref()
    }

    pub fn live(&self) -> Option<&LiveSnapshot> {
        self.live.as_ref()
    }

    pub fn buffer(&self, process: &ProcessId) -> Option<&TimeWindowBuffer> {
        self.buffers.get(process)
    }

    pub fn selected_buffer(&self) -> Option<&TimeWindowBuffer> {
        self.selected.as_ref().and_then(|id| self.buffers.get(id))
    }

    pub fn latest(&self, process: &ProcessId) -> Option<&TelemetrySample> {
        self.buffers.get(process).and_then(TimeWindowBuffer::latest)
    }

    pub fn process_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: i64, heap: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: ts,
            heap_usage: heap,
            ..Default::default()
        }
    }

    fn pid(s: &str) -> ProcessId {
        ProcessId::from(s)
    }

    fn stamps(store: &TelemetryStore, p: &str) -> Vec<i64> {
        store
            .buffer(&pid(p))
            .map(|b| b.iter().map(|s| s.timestamp).collect())
            .unwrap_or_default()
    }

    #[test]
    fn buffers_are_created_lazily() {
        let mut store = TelemetryStore::default();
        assert!(store.buffer(&pid("a")).is_none());
        assert_eq!(store.ingest(pid("a"), sample(1, 0.1), 1), StoreChange::Buffered);
        assert_eq!(store.buffer(&pid("a")).map(|b| b.len()), Some(1));
        assert_eq!(store.process_count(), 1);
    }

    #[test]
    fn background_sample_leaves_live_snapshot_alone() {
        let mut store = TelemetryStore::default();
        store.select(Some(pid("q")));
        assert_eq!(store.ingest(pid("q"), sample(10, 0.3), 10), StoreChange::Live);
        let before = store.live().cloned();

        assert_eq!(store.ingest(pid("p"), sample(11, 0.9), 11), StoreChange::Buffered);
        assert_eq!(stamps(&store, "p"), vec![11]);
        assert_eq!(store.live().cloned(), before);
        assert_eq!(store.live().map(|l| l.heap_usage), Some(0.3));
    }

    #[test]
    fn selected_sample_overwrites_live_snapshot() {
        let mut store = TelemetryStore::default();
        store.select(Some(pid("q")));
        store.ingest(pid("q"), sample(10, 0.3), 10);
        store.ingest(pid("q"), sample(20, 0.6), 20);
        let live = store.live().unwrap();
        assert_eq!(live.observed_at, 20);
        assert_eq!(live.heap_usage, 0.6);
        assert_eq!(live.process, pid("q"));
    }

    #[test]
    fn selection_change_clears_live_snapshot() {
        let mut store = TelemetryStore::default();
        store.select(Some(pid("q")));
        store.ingest(pid("q"), sample(10, 0.3), 10);
        store.select(Some(pid("p")));
        assert!(store.live().is_none());
        assert_eq!(stamps(&store, "q"), vec![10]);
    }

    #[test]
    fn stale_backfill_is_discarded() {
        let mut store = TelemetryStore::default();
        store.ingest(pid("p"), sample(5, 0.1), 5);
        store.ingest(pid("q"), sample(6, 0.1), 6);
        store.select(Some(pid("p")));
        store.select(Some(pid("q")));

        let change = store.backfill(&pid("p"), vec![sample(1, 0.5), sample(2, 0.5)]);
        assert_eq!(change, StoreChange::Stale);
        assert_eq!(stamps(&store, "p"), vec![5]);
        assert_eq!(stamps(&store, "q"), vec![6]);
    }

    #[test]
    fn backfill_replaces_and_sorts() {
        let mut store = TelemetryStore::default();
        store.select(Some(pid("p")));
        store.ingest(pid("p"), sample(100, 0.1), 100);
        let change = store.backfill(&pid("p"), vec![sample(3, 0.0), sample(1, 0.0), sample(2, 0.0)]);
        assert_eq!(change, StoreChange::Backfilled);
        assert!(change.needs_render());
        assert_eq!(stamps(&store, "p"), vec![1, 2, 3]);
        // backfill does not produce a live snapshot
        assert!(store.live().is_none());
    }

    #[test]
    fn backfill_creates_missing_buffer() {
        let mut store = TelemetryStore::default();
        store.select(Some(pid("new")));
        store.backfill(&pid("new"), vec![sample(7, 0.2)]);
        assert_eq!(store.latest(&pid("new")).map(|s| s.timestamp), Some(7));
    }

    #[test]
    fn retain_known_drops_departed_processes() {
        let mut store = TelemetryStore::default();
        store.ingest(pid("a"), sample(1, 0.0), 1);
        store.ingest(pid("b"), sample(1, 0.0), 1);
        store.select(Some(pid("b")));
        store.ingest(pid("b"), sample(2, 0.0), 2);

        store.retain_known(&[pid("a")]);
        assert!(store.buffer(&pid("b")).is_none());
        assert!(store.buffer(&pid("a")).is_some());
        assert!(store.selected().is_none());
        assert!(store.live().is_none());
    }

    #[test]
    fn eviction_runs_on_ingest() {
        let mut store = TelemetryStore::new(Duration::from_secs(1));
        store.ingest(pid("a"), sample(0, 0.0), 0);
        store.ingest(pid("a"), sample(500, 0.0), 500);
        store.ingest(pid("a"), sample(1_200, 0.0), 1_200);
        assert_eq!(stamps(&store, "a"), vec![500, 1_200]);
    }
}
