//! One-shot fleet and alert commands.

use jvmdoctor_core::api::running;
use jvmdoctor_core::format::{clock_label, format_duration};
use jvmdoctor_core::{HubApi, RegisterRequest, now_ms};

use super::{make_api, make_config, make_runtime, or_exit, process_id};

pub fn list_apps(hub: &str, running_only: bool) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    let mut apps = or_exit(rt.block_on(api.list_processes()), "list processes");
    if running_only {
        apps = running(&apps).cloned().collect();
    }

    if apps.is_empty() {
        println!("No processes registered.");
        return;
    }

    let now = now_ms();
    println!(
        "{:<6} {:<24} {:<22} {:<9} {:<10} {}",
        "ID", "Name", "Address", "Status", "Heartbeat", "JVM"
    );
    println!("{}", "-".repeat(90));
    for app in &apps {
        let heartbeat = app
            .last_heartbeat
            .map(|t| format!("{} ago", format_duration(now - t)))
            .unwrap_or_else(|| "-".into());
        let jvm = match (&app.jvm_name, &app.jvm_version) {
            (Some(n), Some(v)) => format!("{n} {v}"),
            (Some(n), None) => n.clone(),
            (None, Some(v)) => v.clone(),
            (None, None) => "-".into(),
        };
        println!(
            "{:<6} {:<24} {:<22} {:<9} {:<10} {}",
            app.id.as_str(),
            truncate(&app.app_name, 24),
            app.address(),
            app.status,
            heartbeat,
            jvm
        );
    }
    println!();
    println!("{} processes, {} running", apps.len(), running(&apps).count());
}

pub fn list_alerts(hub: &str, all: bool) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    let alerts = or_exit(rt.block_on(api.list_alerts()), "list alerts");
    let shown: Vec<_> = alerts.iter().filter(|a| all || !a.acknowledged).collect();

    if shown.is_empty() {
        println!("No alerts.");
        return;
    }

    println!(
        "{:<6} {:<8} {:<9} {:<18} {:<9} {}",
        "ID", "Process", "Level", "Type", "Raised", "Message"
    );
    println!("{}", "-".repeat(90));
    for a in &shown {
        let process = a.app_id.as_ref().map(|p| p.as_str()).unwrap_or("-");
        let ack = if a.acknowledged { " (ack)" } else { "" };
        println!(
            "{:<6} {:<8} {:<9} {:<18} {:<9} {}{ack}",
            a.id,
            process,
            a.alert_level,
            truncate(&a.alert_type, 18),
            clock_label(a.created_at),
            a.alert_msg
        );
    }
}

pub fn acknowledge(hub: &str, alert_id: i64, by: &str) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    or_exit(rt.block_on(api.acknowledge_alert(alert_id, by)), "acknowledge alert");
    println!("Alert #{alert_id} acknowledged by {by}.");
}

pub fn offline(hub: &str, process: &str) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    let pid = process_id(process);
    or_exit(rt.block_on(api.offline(&pid)), "mark process offline");
    println!("Process {pid} marked offline.");
}

pub fn heartbeat(hub: &str, process: &str) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    let pid = process_id(process);
    or_exit(rt.block_on(api.heartbeat(&pid)), "send heartbeat");
    println!("Heartbeat sent for process {pid}.");
}

pub fn register(hub: &str, request: RegisterRequest) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    let registered = or_exit(rt.block_on(api.register(&request)), "register process");
    println!(
        "Registered {} as process {} ({})",
        request.app_name, registered.app_id, registered.status
    );
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let head: String = s.chars().take(width.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
