//! Render sink adapter: turns a process's buffered samples into four chart
//! series with a shared label axis and pushes them into a sink.
//!
//! Pushes are plain data replacement with no transition state, so calling
//! [`RenderAdapter::render`] once per incoming sample is fine. Recreating the
//! sink (theme change, selection change) always releases the old sink before
//! the factory builds its replacement.

use std::fmt;

use crate::format::clock_label;
use crate::sample::TelemetrySample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChartKind {
    Heap,
    Cpu,
    Threads,
    Metaspace,
}

impl ChartKind {
    pub const ALL: [ChartKind; 4] = [
        ChartKind::Heap,
        ChartKind::Cpu,
        ChartKind::Threads,
        ChartKind::Metaspace,
    ];

    pub fn title(self) -> &'static str {
        match self {
            ChartKind::Heap => "Heap %",
            ChartKind::Cpu => "CPU %",
            ChartKind::Threads => "Threads",
            ChartKind::Metaspace => "Metaspace %",
        }
    }

    /// Whether values are percentages with a fixed `0..=100` range.
    pub fn is_percent(self) -> bool {
        !matches!(self, ChartKind::Threads)
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// Four parallel series plus one label per sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSeries {
    pub labels: Vec<String>,
    pub heap: Vec<f64>,
    pub cpu: Vec<f64>,
    pub threads: Vec<f64>,
    pub metaspace: Vec<f64>,
}

impl ChartSeries {
    pub fn project<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a TelemetrySample>,
    {
        let mut out = ChartSeries::default();
        for s in samples {
            out.labels.push(clock_label(s.timestamp));
            out.heap.push(s.heap_usage * 100.0);
            out.cpu.push(s.cpu_usage * 100.0);
            out.threads.push(s.thread_count as f64);
            out.metaspace.push(s.metaspace_usage * 100.0);
        }
        out
    }

    pub fn values(&self, kind: ChartKind) -> &[f64] {
        match kind {
            ChartKind::Heap => &self.heap,
            ChartKind::Cpu => &self.cpu,
            ChartKind::Threads => &self.threads,
            ChartKind::Metaspace => &self.metaspace,
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }
}

/// A chart surface that accepts labeled series.
pub trait RenderSink {
    /// Replace the data of one chart.
    fn push(&mut self, kind: ChartKind, labels: &[String], values: &[f64]);

    /// Free whatever the sink holds. Called exactly once, before drop.
    fn release(&mut self);
}

type SinkFactory<S> = Box<dyn FnMut(Theme) -> S + Send>;

/// Owns at most one sink and the factory that builds it.
pub struct RenderAdapter<S: RenderSink> {
    factory: SinkFactory<S>,
    sink: Option<S>,
    theme: Theme,
}

impl<S: RenderSink> RenderAdapter<S> {
    /// Build an adapter with no sink yet; call [`RenderAdapter::open`].
    pub fn new<F>(theme: Theme, factory: F) -> Self
    where
        F: FnMut(Theme) -> S + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            sink: None,
            theme,
        }
    }

    /// Create the sink if there is none.
    pub fn open(&mut self) {
        if self.sink.is_none() {
            self.sink = Some((self.factory)(self.theme));
        }
    }

    /// Release and drop the sink, if any.
    pub fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.release();
        }
    }

    /// Tear the sink down and build a fresh one with `theme`.
    pub fn recreate(&mut self, theme: Theme) {
        self.close();
        self.theme = theme;
        self.open();
    }

    /// Push the series projected from `samples`. Returns whether anything
    /// was pushed: nothing is when there is no sink or no data.
    pub fn render<'a, I>(&mut self, samples: I) -> bool
    where
        I: IntoIterator<Item = &'a TelemetrySample>,
    {
        let Some(sink) = self.sink.as_mut() else {
            return false;
        };
        let series = ChartSeries::project(samples);
        if series.is_empty() {
            return false;
        }
        for kind in ChartKind::ALL {
            sink.push(kind, &series.labels, series.values(kind));
        }
        true
    }

    pub fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    pub fn sink(&self) -> Option<&S> {
        self.sink.as_ref()
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }
}

impl<S: RenderSink> Drop for RenderAdapter<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records lifecycle calls into a shared log so ordering is visible
    /// across sink instances.
    struct RecordingSink {
        id: usize,
        theme: Theme,
        log: Arc<Mutex<Vec<String>>>,
        pushes: Vec<(ChartKind, usize)>,
    }

    impl RenderSink for RecordingSink {
        fn push(&mut self, kind: ChartKind, labels: &[String], values: &[f64]) {
            assert_eq!(labels.len(), values.len());
            self.pushes.push((kind, values.len()));
        }

        fn release(&mut self) {
            self.log.lock().unwrap().push(format!("release {}", self.id));
        }
    }

    fn adapter() -> (RenderAdapter<RecordingSink>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let mut next = 0;
        let adapter = RenderAdapter::new(Theme::Dark, move |theme| {
            next += 1;
            shared.lock().unwrap().push(format!("create {next} {}", theme.label()));
            RecordingSink {
                id: next,
                theme,
                log: Arc::clone(&shared),
                pushes: Vec::new(),
            }
        });
        (adapter, log)
    }

    fn samples() -> Vec<TelemetrySample> {
        (0..3)
            .map(|i| TelemetrySample {
                timestamp: 1_700_000_000_000 + i * 1000,
                heap_usage: 0.5,
                cpu_usage: 0.25,
                thread_count: 40 + i,
                metaspace_usage: 0.1,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn projection_scales_fractions() {
        let series = ChartSeries::project(&samples());
        assert_eq!(series.len(), 3);
        assert_eq!(series.values(ChartKind::Heap), &[50.0, 50.0, 50.0]);
        assert_eq!(series.values(ChartKind::Cpu), &[25.0, 25.0, 25.0]);
        assert_eq!(series.values(ChartKind::Threads), &[40.0, 41.0, 42.0]);
        assert_eq!(series.values(ChartKind::Metaspace), &[10.0, 10.0, 10.0]);
    }

    #[test]
    fn render_pushes_all_four_charts() {
        let (mut adapter, _) = adapter();
        adapter.open();
        assert!(adapter.render(&samples()));
        let sink = adapter.sink().unwrap();
        assert_eq!(sink.pushes.len(), 4);
        assert!(sink.pushes.iter().all(|(_, n)| *n == 3));
    }

    #[test]
    fn render_without_sink_or_data_is_a_noop() {
        let (mut adapter, _) = adapter();
        assert!(!adapter.render(&samples()));
        adapter.open();
        assert!(!adapter.render(&Vec::<TelemetrySample>::new()));
        assert!(adapter.sink().unwrap().pushes.is_empty());
    }

    #[test]
    fn tolerates_render_per_sample() {
        let (mut adapter, _) = adapter();
        adapter.open();
        let all = samples();
        for n in 1..=all.len() {
            assert!(adapter.render(&all[..n]));
        }
        assert_eq!(adapter.sink().unwrap().pushes.len(), 12);
    }

    #[test]
    fn recreate_releases_before_creating() {
        let (mut adapter, log) = adapter();
        adapter.open();
        adapter.recreate(Theme::Light);
        assert_eq!(adapter.theme(), Theme::Light);
        assert_eq!(adapter.sink().map(|s| s.theme), Some(Theme::Light));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["create 1 dark", "release 1", "create 2 light"]
        );
    }

    #[test]
    fn drop_releases_the_sink() {
        let (mut adapter, log) = adapter();
        adapter.open();
        adapter.open();
        drop(adapter);
        assert_eq!(*log.lock().unwrap(), vec!["create 1 dark", "release 1"]);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut adapter, log) = adapter();
        adapter.open();
        adapter.close();
        adapter.close();
        assert!(!adapter.is_open());
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}
