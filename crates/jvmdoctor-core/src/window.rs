//! Time-window buffer: one process's samples, ascending by timestamp, bounded
//! by age rather than count.
//!
//! Eviction runs on every [`TimeWindowBuffer::append`] and nowhere else. A
//! process that stops reporting keeps its last window of samples until the
//! next one arrives; there is no background timer and no capacity cap.

use std::collections::VecDeque;
use std::time::Duration;

use crate::sample::TelemetrySample;

/// Default retention: one hour.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct TimeWindowBuffer {
    window_ms: i64,
    samples: VecDeque<TelemetrySample>,
}

impl Default for TimeWindowBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TimeWindowBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: i64::try_from(window.as_millis()).unwrap_or(i64::MAX),
            samples: VecDeque::new(),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Insert `sample` and drop everything with `timestamp <= now_ms - window`.
    ///
    /// Samples normally arrive in order and are pushed at the back. A late
    /// sample is placed at its sorted position so the ascending invariant
    /// holds regardless of arrival order.
    pub fn append(&mut self, sample: TelemetrySample, now_ms: i64) {
        match self.samples.back() {
            Some(last) if sample.timestamp < last.timestamp => {
                let at = self
                    .samples
                    .partition_point(|s| s.timestamp <= sample.timestamp);
                self.samples.insert(at, sample);
            }
            _ => self.samples.push_back(sample),
        }
        self.evict(now_ms);
    }

    fn evict(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.samples.front().is_some_and(|s| s.timestamp <= cutoff) {
            self.samples.pop_front();
        }
    }

    /// Replace the contents wholesale. The caller supplies ascending samples;
    /// nothing is merged and nothing is evicted.
    pub fn replace<I>(&mut self, samples: I)
    where
        I: IntoIterator<Item = TelemetrySample>,
    {
        self.samples = samples.into_iter().collect();
    }

    /// The live ordered sequence.
    pub fn all(&self) -> &VecDeque<TelemetrySample> {
        &self.samples
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
