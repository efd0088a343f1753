//! Line-per-message view of the push stream.

use jvmdoctor_core::format::{clock_label, format_bytes, percent};
use jvmdoctor_core::{
    ProcessId, StreamClient, StreamEvent, StreamMessage, WebSocketTransport,
};
use tokio::sync::mpsc;

use super::{make_config, make_runtime, process_id};

pub fn run(hub: &str, process: Option<&str>, json: bool) {
    let config = make_config(hub);
    let filter = process.map(process_id);
    let url = config.stream_url();
    println!("Watching {url} (Ctrl-C to stop)");

    let rt = make_runtime();
    rt.block_on(async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = StreamClient::open(
            WebSocketTransport::new(url),
            config.reconnect_delay,
            move |event| {
                let _ = tx.send(event);
            },
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Some(line) = describe(&event, filter.as_ref(), json) {
                            println!("{line}");
                        }
                    }
                    None => break,
                },
            }
        }

        let counters = client.counters();
        let (received, dropped, reconnects) =
            (counters.received(), counters.dropped(), counters.reconnects());
        client.close().await;
        println!();
        println!("{received} messages received, {dropped} dropped, {reconnects} reconnects");
    });
}

fn describe(event: &StreamEvent, filter: Option<&ProcessId>, json: bool) -> Option<String> {
    match event {
        StreamEvent::State(state) => Some(format!("-- stream {}", state.label())),
        StreamEvent::Message(StreamMessage::Metrics { process, sample }) => {
            if filter.is_some_and(|f| f != process) {
                return None;
            }
            if json {
                return serde_json::to_string(sample)
                    .ok()
                    .map(|body| format!("{process} {body}"));
            }
            Some(format!(
                "{} [{process}] heap {} / {} ({})  cpu {}  threads {}  gc {} in {}ms",
                clock_label(sample.timestamp),
                format_bytes(sample.heap_used),
                format_bytes(sample.heap_max),
                percent(sample.heap_usage),
                percent(sample.cpu_usage),
                sample.thread_count,
                sample.gc_count,
                sample.gc_time,
            ))
        }
        StreamEvent::Message(StreamMessage::Alert(alert)) => {
            if filter.is_some_and(|f| alert.app_id.as_ref() != Some(f)) {
                return None;
            }
            let process = alert.app_id.as_ref().map(|p| p.as_str()).unwrap_or("-");
            Some(format!(
                "!! [{process}] {} {}: {}",
                alert.alert_level.as_deref().unwrap_or("alert"),
                alert.alert_type.as_deref().unwrap_or("-"),
                alert.alert_msg.as_deref().unwrap_or(""),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jvmdoctor_core::TelemetrySample;
    use jvmdoctor_core::stream::{AlertNotice, StreamState};

    fn metrics(process: &str) -> StreamEvent {
        StreamEvent::Message(StreamMessage::Metrics {
            process: ProcessId::from(process),
            sample: TelemetrySample {
                heap_used: 512 * 1024 * 1024,
                heap_max: 1024 * 1024 * 1024,
                heap_usage: 0.5,
                thread_count: 12,
                ..Default::default()
            },
        })
    }

    #[test]
    fn filter_drops_other_processes() {
        let only = ProcessId::from("2");
        assert!(describe(&metrics("1"), Some(&only), false).is_none());
        let line = describe(&metrics("2"), Some(&only), false).unwrap();
        assert!(line.contains("[2]"));
        assert!(line.contains("threads 12"));
    }

    #[test]
    fn state_and_alert_lines() {
        let line = describe(&StreamEvent::State(StreamState::Open), None, false).unwrap();
        assert!(line.contains("open"));

        let alert = StreamEvent::Message(StreamMessage::Alert(AlertNotice {
            app_id: Some(ProcessId::from("3")),
            alert_type: Some("high_cpu_usage".into()),
            alert_msg: Some("CPU usage: 91.0%".into()),
            ..Default::default()
        }));
        let line = describe(&alert, None, false).unwrap();
        assert!(line.contains("high_cpu_usage"));
        assert!(line.contains("CPU usage: 91.0%"));
    }
}
