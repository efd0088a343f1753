//! Diagnostic rule engine.
//!
//! [`diagnose`] is a pure function of the live snapshot. Rules run in a fixed
//! order and each contributes at most one suggestion; the output order is the
//! rule order, never sorted by severity. There is no deduplication or
//! suppression between calls.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::format::{format_duration, percent};
use crate::sample::LiveSnapshot;

/// GC frequency rules only apply once the JVM has been up this long.
pub const GC_RULE_MIN_UPTIME_MS: i64 = 3_600_000;

/// Uptime beyond which a busy collector earns a restart hint (7 days).
pub const RESTART_HINT_UPTIME_MS: i64 = 604_800_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Critical,
}

impl Level {
    pub fn label(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Critical => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub level: Level,
    pub title: String,
    pub description: String,
}

impl Suggestion {
    fn new(level: Level, title: &str, description: String) -> Self {
        Self {
            level,
            title: title.to_string(),
            description,
        }
    }
}

/// Evaluate every rule against `m`, in order.
pub fn diagnose(m: &LiveSnapshot) -> Vec<Suggestion> {
    let mut out = Vec::new();

    // Heap
    if m.heap_usage >= 0.9 {
        out.push(Suggestion::new(
            Level::Critical,
            "Heap usage is too high",
            format!(
                "Currently at {}. Increase the heap or reduce memory pressure.",
                percent(m.heap_usage)
            ),
        ));
    } else if m.heap_usage >= 0.8 {
        out.push(Suggestion::new(
            Level::Warning,
            "Heap usage is elevated",
            format!(
                "Currently at {}. Keep an eye on the growth trend.",
                percent(m.heap_usage)
            ),
        ));
    } else if m.heap_usage < 0.5 && m.heap_max > 0 {
        out.push(Suggestion::new(
            Level::Info,
            "Heap usage is low",
            format!(
                "Currently at {}. The heap could be sized down.",
                percent(m.heap_usage)
            ),
        ));
    }

    // Metaspace
    if m.metaspace_usage >= 0.85 {
        out.push(Suggestion::new(
            Level::Warning,
            "Metaspace usage is elevated",
            format!(
                "Currently at {}. Too many classes may be getting loaded.",
                percent(m.metaspace_usage)
            ),
        ));
    }

    // GC frequency
    if m.uptime > GC_RULE_MIN_UPTIME_MS {
        if m.gc_count > 100 {
            out.push(Suggestion::new(
                Level::Warning,
                "GC runs frequently",
                format!(
                    "{} collections so far. Reduce allocation churn or tune the collector.",
                    m.gc_count
                ),
            ));
        } else if m.gc_count > 50 {
            out.push(Suggestion::new(
                Level::Info,
                "GC frequency is moderate",
                format!("{} collections so far. Worth watching.", m.gc_count),
            ));
        }
    }

    // Threads
    if m.thread_count > 500 {
        out.push(Suggestion::new(
            Level::Warning,
            "Too many threads",
            format!(
                "{} live threads. Check for a thread leak.",
                m.thread_count
            ),
        ));
    } else if m.thread_count > 200 {
        out.push(Suggestion::new(
            Level::Info,
            "Thread count is high",
            format!(
                "{} live threads. Review thread pool sizing.",
                m.thread_count
            ),
        ));
    }

    // CPU
    if m.cpu_usage >= 0.9 {
        out.push(Suggestion::new(
            Level::Critical,
            "CPU usage is too high",
            format!(
                "Currently at {}. Profile for hot methods.",
                percent(m.cpu_usage)
            ),
        ));
    } else if m.cpu_usage >= 0.8 {
        out.push(Suggestion::new(
            Level::Warning,
            "CPU usage is elevated",
            format!("Currently at {}. Keep an eye on it.", percent(m.cpu_usage)),
        ));
    }

    // Long uptime with a busy collector
    if m.uptime > RESTART_HINT_UPTIME_MS && m.gc_count > 200 {
        out.push(Suggestion::new(
            Level::Info,
            "Consider a restart",
            format!(
                "Up for {} with frequent GC. A restart would reclaim fragmented memory.",
                format_duration(m.uptime)
            ),
        ));
    }

    out
}
