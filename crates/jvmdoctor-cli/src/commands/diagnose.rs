use jvmdoctor_core::format::{clock_label, format_bytes, format_duration, percent};
use jvmdoctor_core::{HubApi, LiveSnapshot, TelemetrySample, diagnose, now_ms};

use super::{make_api, make_config, make_runtime, or_exit, process_id};

pub fn run(hub: &str, process: &str) {
    let config = make_config(hub);
    let api = make_api(&config);
    let rt = make_runtime();
    let pid = process_id(process);

    let window_ms = i64::try_from(config.window.as_millis()).unwrap_or(i64::MAX);
    let since = now_ms().saturating_sub(window_ms);
    let history = or_exit(rt.block_on(api.history(&pid, since)), "fetch history");

    let Some(newest) = newest(&history) else {
        println!("No samples for process {pid} in the last {}.", format_duration(window_ms));
        return;
    };
    let snapshot = LiveSnapshot::project(&pid, newest);

    println!(
        "Process {pid}: {} samples in window, newest at {}",
        history.len(),
        clock_label(newest.timestamp)
    );
    println!(
        "  heap {} / {} ({})   metaspace {}   cpu {}   threads {}   uptime {}",
        format_bytes(snapshot.heap_used),
        format_bytes(snapshot.heap_max),
        percent(snapshot.heap_usage),
        percent(snapshot.metaspace_usage),
        percent(snapshot.cpu_usage),
        snapshot.thread_count,
        format_duration(snapshot.uptime)
    );
    println!();

    let suggestions = diagnose(&snapshot);
    if suggestions.is_empty() {
        println!("No findings.");
        return;
    }
    for s in &suggestions {
        println!("[{:<8}] {}", s.level.label(), s.title);
        println!("           {}", s.description);
    }
}

fn newest(history: &[TelemetrySample]) -> Option<&TelemetrySample> {
    history.iter().max_by_key(|s| s.timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_ignores_order() {
        let at = |timestamp| TelemetrySample {
            timestamp,
            ..Default::default()
        };
        let history = vec![at(30), at(10), at(20)];
        assert_eq!(newest(&history).map(|s| s.timestamp), Some(30));
        assert!(newest(&[]).is_none());
    }
}
