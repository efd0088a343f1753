//! Thread snapshots: top-CPU threads, deadlocked threads, and lazily
//! hydrated stack traces for the thread the user is looking at.
//!
//! Thread data is a full-replace snapshot. Every refresh throws away the
//! previous view together with every stack fetched for it.

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::api::HubApi;
use crate::error::Result;
use crate::sample::{ProcessId, lenient_bool, lenient_i64, null_as_default};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadState {
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ThreadState {
    pub fn label(self) -> &'static str {
        match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
            ThreadState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One stack frame. The agent writes every frame value as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StackFrame {
    pub class_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub line_number: Option<i64>,
    #[serde(deserialize_with = "lenient_bool")]
    pub native_method: bool,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {}.{}(", self.class_name, self.method_name)?;
        match (&self.file_name, self.line_number) {
            _ if self.native_method => f.write_str("Native Method")?,
            (Some(file), Some(line)) if line >= 0 => write!(f, "{file}:{line}")?,
            (Some(file), _) => f.write_str(file)?,
            (None, _) => f.write_str("Unknown Source")?,
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadSample {
    #[serde(deserialize_with = "null_as_default")]
    pub thread_id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub state: ThreadState,
    #[serde(deserialize_with = "lenient_i64")]
    pub priority: Option<i64>,
    #[serde(deserialize_with = "null_as_default")]
    pub cpu_time_millis: i64,
    #[serde(deserialize_with = "lenient_bool")]
    pub daemon: bool,
    pub lock_name: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub lock_owner_id: Option<i64>,
    pub lock_owner_name: Option<String>,
    /// `None` until fetched. `Some(vec![])` is a fetched, empty stack.
    pub stack_trace: Option<Vec<StackFrame>>,
}

/// Per-thread stack response. Present fields overwrite the thread's own.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadPatch {
    pub name: Option<String>,
    pub state: Option<ThreadState>,
    #[serde(deserialize_with = "lenient_i64")]
    pub priority: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub cpu_time_millis: Option<i64>,
    pub daemon: Option<bool>,
    pub lock_name: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub lock_owner_id: Option<i64>,
    pub lock_owner_name: Option<String>,
    pub stack_trace: Option<Vec<StackFrame>>,
    /// Set by the agent when the thread is gone.
    pub error: Option<String>,
}

impl ThreadPatch {
    pub fn merge_into(self, thread: &mut ThreadSample) {
        if let Some(v) = self.name {
            thread.name = v;
        }
        if let Some(v) = self.state {
            thread.state = v;
        }
        if self.priority.is_some() {
            thread.priority = self.priority;
        }
        if let Some(v) = self.cpu_time_millis {
            thread.cpu_time_millis = v;
        }
        if let Some(v) = self.daemon {
            thread.daemon = v;
        }
        if self.lock_name.is_some() {
            thread.lock_name = self.lock_name;
        }
        if self.lock_owner_id.is_some() {
            thread.lock_owner_id = self.lock_owner_id;
        }
        if self.lock_owner_name.is_some() {
            thread.lock_owner_name = self.lock_owner_name;
        }
        // A successful stack response with no frames is still a fetched stack.
        thread.stack_trace = Some(self.stack_trace.unwrap_or_default());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopThreads {
    #[serde(deserialize_with = "null_as_default")]
    pub threads: Vec<ThreadSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeadlockReport {
    #[serde(deserialize_with = "null_as_default")]
    pub deadlocks: Vec<ThreadSample>,
    #[serde(deserialize_with = "null_as_default")]
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub runnable: usize,
    pub blocked: usize,
    pub waiting: usize,
    pub timed_waiting: usize,
}

impl StateCounts {
    pub fn tally<'a, I>(threads: I) -> Self
    where
        I: IntoIterator<Item = &'a ThreadSample>,
    {
        let mut counts = Self::default();
        for t in threads {
            match t.state {
                ThreadState::Runnable => counts.runnable += 1,
                ThreadState::Blocked => counts.blocked += 1,
                ThreadState::Waiting => counts.waiting += 1,
                ThreadState::TimedWaiting => counts.timed_waiting += 1,
                _ => {}
            }
        }
        counts
    }
}

/// One refresh worth of thread data for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    pub process: ProcessId,
    pub top: Vec<ThreadSample>,
    pub deadlocks: Vec<ThreadSample>,
    pub deadlock_count: usize,
    pub counts: StateCounts,
    pub fetched_at: i64,
}

impl ThreadView {
    pub fn assemble(process: ProcessId, top: TopThreads, deadlocks: DeadlockReport, now_ms: i64) -> Self {
        let counts = StateCounts::tally(&top.threads);
        let deadlock_count = deadlocks.count.max(deadlocks.deadlocks.len());
        Self {
            process,
            top: top.threads,
            deadlocks: deadlocks.deadlocks,
            deadlock_count,
            counts,
            fetched_at: now_ms,
        }
    }

    /// CPU time of `thread` as a percentage of the busiest listed thread.
    pub fn cpu_share(&self, thread: &ThreadSample) -> f64 {
        let Some(first) = self.top.first() else {
            return 0.0;
        };
        let max = if first.cpu_time_millis > 0 {
            first.cpu_time_millis
        } else {
            1
        };
        thread.cpu_time_millis.max(0) as f64 / max as f64 * 100.0
    }

    pub fn thread(&self, thread_id: i64) -> Option<&ThreadSample> {
        self.top
            .iter()
            .chain(self.deadlocks.iter())
            .find(|t| t.thread_id == thread_id)
    }

    fn threads_mut(&mut self, thread_id: i64) -> impl Iterator<Item = &mut ThreadSample> {
        self.top
            .iter_mut()
            .chain(self.deadlocks.iter_mut())
            .filter(move |t| t.thread_id == thread_id)
    }
}

/// Fetch top threads and deadlocks concurrently and assemble a view.
pub async fn fetch_thread_view<A: HubApi>(api: &A, process: &ProcessId, now_ms: i64) -> Result<ThreadView> {
    let (top, deadlocks) = tokio::join!(api.top_threads(process), api.deadlocks(process));
    Ok(ThreadView::assemble(process.clone(), top?, deadlocks?, now_ms))
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

/// What selecting a thread requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackRequest {
    /// The stack is already in the view.
    Cached,
    /// Fetch it and hand the result to [`ThreadInspector::apply_stack`].
    Fetch {
        process: ProcessId,
        thread_id: i64,
        generation: u64,
    },
}

/// Holds the current thread view and the selected thread, and decides which
/// completions are still relevant.
///
/// Each refresh bumps a generation counter. Completions tagged with an older
/// generation, or with a process other than the current target, are stale.
#[derive(Debug, Default)]
pub struct ThreadInspector {
    target: Option<ProcessId>,
    generation: u64,
    view: Option<ThreadView>,
    selected: Option<i64>,
}

impl ThreadInspector {
    /// Start a refresh for `process`. Returns the generation the completion
    /// must carry.
    pub fn begin_refresh(&mut self, process: ProcessId) -> u64 {
        if self.target.as_ref() != Some(&process) {
            self.view = None;
            self.selected = None;
        }
        self.target = Some(process);
        self.generation += 1;
        self.generation
    }

    /// Install a completed refresh. Returns `false` if it was stale.
    pub fn apply_refresh(&mut self, generation: u64, view: ThreadView) -> bool {
        if generation != self.generation || self.target.as_ref() != Some(&view.process) {
            debug!("discarding stale thread view for process {}", view.process);
            return false;
        }
        self.view = Some(view);
        self.selected = None;
        true
    }

    /// Select a thread. `None` when the thread is not in the current view.
    pub fn select(&mut self, thread_id: i64) -> Option<StackRequest> {
        let view = self.view.as_ref()?;
        let thread = view.thread(thread_id)?;
        self.selected = Some(thread_id);
        if thread.stack_trace.is_some() {
            Some(StackRequest::Cached)
        } else {
            Some(StackRequest::Fetch {
                process: view.process.clone(),
                thread_id,
                generation: self.generation,
            })
        }
    }

    /// Merge a fetched stack into the view. Returns `false` when the result
    /// belongs to an older refresh or reports an error.
    pub fn apply_stack(&mut self, process: &ProcessId, generation: u64, thread_id: i64, patch: ThreadPatch) -> bool {
        if generation != self.generation || self.target.as_ref() != Some(process) {
            debug!("discarding stale stack for thread {thread_id} of process {process}");
            return false;
        }
        if let Some(err) = &patch.error {
            warn!("stack fetch for thread {thread_id} failed: {err}");
            return false;
        }
        let Some(view) = self.view.as_mut() else {
            return false;
        };
        let mut merged = false;
        for thread in view.threads_mut(thread_id) {
            patch.clone().merge_into(thread);
            merged = true;
        }
        merged
    }

    /// Forget everything, e.g. when the selected process changes.
    pub fn clear(&mut self) {
        self.target = None;
        self.view = None;
        self.selected = None;
        self.generation += 1;
    }

    pub fn view(&self) -> Option<&ThreadView> {
        self.view.as_ref()
    }

    pub fn selected_thread(&self) -> Option<&ThreadSample> {
        let id = self.selected?;
        self.view.as_ref()?.thread(id)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread(id: i64, state: ThreadState, cpu: i64) -> ThreadSample {
        ThreadSample {
            thread_id: id,
            name: format!("worker-{id}"),
            state,
            cpu_time_millis: cpu,
            ..Default::default()
        }
    }

    fn view(process: &str) -> ThreadView {
        let top = TopThreads {
            threads: vec![
                thread(1, ThreadState::Runnable, 400),
                thread(2, ThreadState::Waiting, 200),
                thread(3, ThreadState::TimedWaiting, 100),
                thread(4, ThreadState::Runnable, 0),
            ],
        };
        ThreadView::assemble(ProcessId::from(process), top, DeadlockReport::default(), 1)
    }

    #[test]
    fn decodes_agent_payloads() {
        let top: TopThreads = serde_json::from_str(
            r#"{"threads":[{"threadId":7,"name":"main","state":"RUNNABLE","cpuTime":5000000,
                "cpuTimeMillis":5,"daemon":false,"priority":5}],"count":1}"#,
        )
        .unwrap();
        assert_eq!(top.threads.len(), 1);
        assert_eq!(top.threads[0].state, ThreadState::Runnable);
        assert_eq!(top.threads[0].stack_trace, None);

        let frame: StackFrame = serde_json::from_str(
            r#"{"className":"a.B","methodName":"run","fileName":"B.java","lineNumber":"42","nativeMethod":"false"}"#,
        )
        .unwrap();
        assert_eq!(frame.line_number, Some(42));
        assert!(!frame.native_method);
        assert_eq!(frame.to_string(), "at a.B.run(B.java:42)");
    }

    #[test]
    fn unknown_state_decodes() {
        let t: ThreadSample = serde_json::from_str(r#"{"threadId":1,"state":"PARKED"}"#).unwrap();
        assert_eq!(t.state, ThreadState::Unknown);
    }

    #[test]
    fn deadlock_report_decodes() {
        let report: DeadlockReport = serde_json::from_str(
            r#"{"deadlocks":[{"threadId":1,"name":"a","state":"BLOCKED","lockName":"L1","lockOwnerName":"b",
                "stackTrace":[]}],"count":1,"hasDeadlock":true}"#,
        )
        .unwrap();
        assert_eq!(report.count, 1);
        assert_eq!(report.deadlocks[0].lock_owner_name.as_deref(), Some("b"));
        assert_eq!(report.deadlocks[0].stack_trace, Some(vec![]));
    }

    #[test]
    fn counts_in_one_scan() {
        let v = view("p");
        assert_eq!(
            v.counts,
            StateCounts {
                runnable: 2,
                blocked: 0,
                waiting: 1,
                timed_waiting: 1,
            }
        );
    }

    #[test]
    fn cpu_share_is_relative_to_top_thread() {
        let v = view("p");
        assert_eq!(v.cpu_share(&v.top[0]), 100.0);
        assert_eq!(v.cpu_share(&v.top[1]), 50.0);
        assert_eq!(v.cpu_share(&v.top[3]), 0.0);
    }

    #[test]
    fn select_fetches_only_absent_stacks() {
        let mut insp = ThreadInspector::default();
        let generation = insp.begin_refresh(ProcessId::from("p"));
        assert!(insp.apply_refresh(generation, view("p")));

        let req = insp.select(2).unwrap();
        let StackRequest::Fetch { process, thread_id, generation } = req else {
            panic!("expected a fetch");
        };
        assert_eq!((process.as_str(), thread_id), ("p", 2));

        let patch = ThreadPatch {
            stack_trace: Some(vec![StackFrame {
                class_name: "x.Y".into(),
                method_name: "z".into(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(insp.apply_stack(&ProcessId::from("p"), generation, 2, patch));
        assert_eq!(insp.select(2), Some(StackRequest::Cached));
        assert_eq!(
            insp.selected_thread().and_then(|t| t.stack_trace.as_ref()).map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn empty_fetched_stack_is_cached() {
        let mut insp = ThreadInspector::default();
        let generation = insp.begin_refresh(ProcessId::from("p"));
        insp.apply_refresh(generation, view("p"));
        insp.select(1);
        assert!(insp.apply_stack(&ProcessId::from("p"), generation, 1, ThreadPatch::default()));
        assert_eq!(insp.select(1), Some(StackRequest::Cached));
    }

    #[test]
    fn refresh_invalidates_stacks() {
        let mut insp = ThreadInspector::default();
        let g1 = insp.begin_refresh(ProcessId::from("p"));
        insp.apply_refresh(g1, view("p"));
        insp.apply_stack(&ProcessId::from("p"), g1, 1, ThreadPatch::default());

        let g2 = insp.begin_refresh(ProcessId::from("p"));
        assert!(insp.apply_refresh(g2, view("p")));
        assert!(matches!(insp.select(1), Some(StackRequest::Fetch { .. })));

        // a stack from the previous refresh no longer applies
        assert!(!insp.apply_stack(&ProcessId::from("p"), g1, 1, ThreadPatch::default()));
    }

    #[test]
    fn stale_refresh_is_discarded() {
        let mut insp = ThreadInspector::default();
        let gp = insp.begin_refresh(ProcessId::from("p"));
        let gq = insp.begin_refresh(ProcessId::from("q"));
        assert!(!insp.apply_refresh(gp, view("p")));
        assert!(insp.view().is_none());
        assert!(insp.apply_refresh(gq, view("q")));
        assert_eq!(insp.view().map(|v| v.process.as_str()), Some("q"));
    }

    #[test]
    fn error_patch_is_rejected() {
        let mut insp = ThreadInspector::default();
        let g = insp.begin_refresh(ProcessId::from("p"));
        insp.apply_refresh(g, view("p"));
        let patch = ThreadPatch {
            error: Some("Thread not found".into()),
            ..Default::default()
        };
        assert!(!insp.apply_stack(&ProcessId::from("p"), g, 1, patch));
        assert!(matches!(insp.select(1), Some(StackRequest::Fetch { .. })));
    }

    #[test]
    fn unknown_thread_selects_nothing() {
        let mut insp = ThreadInspector::default();
        assert_eq!(insp.select(1), None);
        let g = insp.begin_refresh(ProcessId::from("p"));
        insp.apply_refresh(g, view("p"));
        assert_eq!(insp.select(99), None);
    }
}
