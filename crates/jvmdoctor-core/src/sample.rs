//! Telemetry data model: process identity, per-report samples, and the flat
//! live snapshot of the selected process.
//!
//! Decoding is deliberately forgiving. Agents report whatever subset of
//! fields their JVM exposes and the hub serialises missing entity columns as
//! `null`, so every numeric field falls back to zero instead of failing the
//! whole message.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// ProcessId
// ---------------------------------------------------------------------------

/// Opaque identifier of one monitored JVM.
///
/// The hub hands out integer ids, but the dashboard never does arithmetic on
/// them, so they are normalised to their string form: `7` and `"7"` name the
/// same process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ProcessId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for ProcessId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ProcessId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProcessId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for ProcessId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Self::from(n),
            Raw::Text(s) => Self(s),
        })
    }
}

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// Treat `null` the same as an absent field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept an integer written either as a number or as a numeric string.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Int(n)) => Some(n),
        Some(Raw::Float(f)) => Some(f as i64),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Accept a boolean written either as `true`/`false` or as a string.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Bool(b)) => b,
        Some(Raw::Text(s)) => s.eq_ignore_ascii_case("true"),
        None => false,
    })
}

// ---------------------------------------------------------------------------
// TelemetrySample
// ---------------------------------------------------------------------------

/// One telemetry report for one process.
///
/// Byte and counter fields are signed: the JVM reports `-1` for an
/// undefined maximum, and rejecting such a report would lose the rest of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySample {
    /// Epoch milliseconds, stamped by the hub on receipt.
    #[serde(default, deserialize_with = "null_as_default")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub heap_used: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub heap_max: i64,
    /// Fraction in `0..=1`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub heap_usage: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub nonheap_used: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metaspace_used: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metaspace_max: i64,
    /// Fraction in `0..=1`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub metaspace_usage: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thread_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub daemon_thread_count: i64,
    /// Fraction in `0..=1`.
    #[serde(default, deserialize_with = "null_as_default")]
    pub cpu_usage: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub system_load: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gc_count: i64,
    /// Cumulative GC time in milliseconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub gc_time: i64,
    /// JVM uptime in milliseconds.
    #[serde(default, deserialize_with = "null_as_default")]
    pub uptime: i64,
}

// ---------------------------------------------------------------------------
// LiveSnapshot
// ---------------------------------------------------------------------------

/// Latest observed values for the selected process, flattened for display
/// and for the diagnostic rules. Overwritten in place on every sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSnapshot {
    pub process: ProcessId,
    pub observed_at: i64,
    pub heap_used: i64,
    pub heap_max: i64,
    pub heap_usage: f64,
    pub nonheap_used: i64,
    pub metaspace_used: i64,
    pub metaspace_max: i64,
    pub metaspace_usage: f64,
    pub thread_count: i64,
    pub daemon_thread_count: i64,
    pub cpu_usage: f64,
    pub system_load: f64,
    pub gc_count: i64,
    pub gc_time: i64,
    pub uptime: i64,
}

impl LiveSnapshot {
    pub fn project(process: &ProcessId, sample: &TelemetrySample) -> Self {
        Self {
            process: process.clone(),
            observed_at: sample.timestamp,
            heap_used: sample.heap_used,
            heap_max: sample.heap_max,
            heap_usage: sample.heap_usage,
            nonheap_used: sample.nonheap_used,
            metaspace_used: sample.metaspace_used,
            metaspace_max: sample.metaspace_max,
            metaspace_usage: sample.metaspace_usage,
            thread_count: sample.thread_count,
            daemon_thread_count: sample.daemon_thread_count,
            cpu_usage: sample.cpu_usage,
            system_load: sample.system_load,
            gc_count: sample.gc_count,
            gc_time: sample.gc_time,
            uptime: sample.uptime,
        }
    }
}

/// Wall-clock epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_id_number_and_string_are_equal() {
        let a: ProcessId = serde_json::from_str("7").unwrap();
        let b: ProcessId = serde_json::from_str("\"7\"").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, ProcessId::from(7u64));
        assert_eq!(a.to_string(), "7");
    }

    #[test]
    fn process_id_rejects_objects() {
        assert!(serde_json::from_str::<ProcessId>("{\"id\":1}").is_err());
    }

    #[test]
    fn sample_missing_fields_default_to_zero() {
        let s: TelemetrySample =
            serde_json::from_str(r#"{"timestamp": 1000, "heapUsage": 0.5}"#).unwrap();
        assert_eq!(s.timestamp, 1000);
        assert_eq!(s.heap_usage, 0.5);
        assert_eq!(s.heap_max, 0);
        assert_eq!(s.cpu_usage, 0.0);
        assert_eq!(s.uptime, 0);
    }

    #[test]
    fn sample_null_fields_default_to_zero() {
        let s: TelemetrySample = serde_json::from_str(
            r#"{"timestamp": 5, "heapUsed": null, "cpuUsage": null, "gcCount": 12}"#,
        )
        .unwrap();
        assert_eq!(s.heap_used, 0);
        assert_eq!(s.cpu_usage, 0.0);
        assert_eq!(s.gc_count, 12);
    }

    #[test]
    fn sample_accepts_undefined_heap_max() {
        let s: TelemetrySample = serde_json::from_str(r#"{"heapMax": -1}"#).unwrap();
        assert_eq!(s.heap_max, -1);
    }

    #[test]
    fn sample_ignores_unknown_fields() {
        let s: TelemetrySample =
            serde_json::from_str(r#"{"type":"metrics","appId":3,"threadCount":42}"#).unwrap();
        assert_eq!(s.thread_count, 42);
    }

    #[test]
    fn lenient_i64_accepts_strings() {
        #[derive(Deserialize)]
        struct Probe {
            #[serde(default, deserialize_with = "lenient_i64")]
            n: Option<i64>,
        }
        let p: Probe = serde_json::from_str(r#"{"n": "42"}"#).unwrap();
        assert_eq!(p.n, Some(42));
        let p: Probe = serde_json::from_str(r#"{"n": 7}"#).unwrap();
        assert_eq!(p.n, Some(7));
        let p: Probe = serde_json::from_str(r#"{"n": "abc"}"#).unwrap();
        assert_eq!(p.n, None);
        let p: Probe = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(p.n, None);
    }

    #[test]
    fn snapshot_projects_every_field() {
        let sample = TelemetrySample {
            timestamp: 99,
            heap_used: 10,
            heap_max: 20,
            heap_usage: 0.5,
            thread_count: 33,
            gc_count: 4,
            uptime: 1234,
            ..Default::default()
        };
        let snap = LiveSnapshot::project(&ProcessId::from("p"), &sample);
        assert_eq!(snap.process.as_str(), "p");
        assert_eq!(snap.observed_at, 99);
        assert_eq!(snap.heap_usage, 0.5);
        assert_eq!(snap.thread_count, 33);
        assert_eq!(snap.uptime, 1234);
    }
}
