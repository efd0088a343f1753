use jvmdoctor_core::format::format_cpu_time;
use jvmdoctor_core::threads::{ThreadSample, ThreadView, fetch_thread_view};
use jvmdoctor_core::{HubApi, now_ms};

use super::{make_api, make_config, make_runtime, or_exit, process_id};

pub fn run(hub: &str, process: &str, stack: Option<i64>) {
    let api = make_api(&make_config(hub));
    let rt = make_runtime();
    let pid = process_id(process);

    let view = or_exit(
        rt.block_on(fetch_thread_view(&api, &pid, now_ms())),
        "fetch threads",
    );
    print_view(&view);

    let Some(thread_id) = stack else {
        return;
    };
    let patch = or_exit(rt.block_on(api.thread_stack(&pid, thread_id)), "fetch stack");
    if let Some(err) = &patch.error {
        eprintln!("Thread {thread_id}: {err}");
        std::process::exit(1);
    }
    let mut thread = view.thread(thread_id).cloned().unwrap_or_else(|| ThreadSample {
        thread_id,
        ..Default::default()
    });
    patch.merge_into(&mut thread);
    print_stack(&thread);
}

fn print_view(view: &ThreadView) {
    let c = view.counts;
    println!(
        "Process {}: {} runnable, {} blocked, {} waiting, {} timed-waiting",
        view.process, c.runnable, c.blocked, c.waiting, c.timed_waiting
    );
    println!();
    println!(
        "{:<8} {:<32} {:<14} {:>10} {:>6}  Lock",
        "ID", "Name", "State", "CPU", "Share"
    );
    println!("{}", "-".repeat(84));
    for t in &view.top {
        println!(
            "{:<8} {:<32} {:<14} {:>10} {:>5.1}%  {}",
            t.thread_id,
            t.name,
            t.state.label(),
            format_cpu_time(t.cpu_time_millis),
            view.cpu_share(t),
            t.lock_name.as_deref().unwrap_or("")
        );
    }

    println!();
    if view.deadlock_count == 0 {
        println!("No deadlocks.");
        return;
    }
    println!("{} deadlocked threads:", view.deadlock_count);
    for t in &view.deadlocks {
        let owner = match (&t.lock_owner_name, t.lock_owner_id) {
            (Some(name), Some(id)) => format!("{name} (#{id})"),
            (Some(name), None) => name.clone(),
            (None, Some(id)) => format!("#{id}"),
            (None, None) => "?".into(),
        };
        println!(
            "  #{} {} waits on {} held by {owner}",
            t.thread_id,
            t.name,
            t.lock_name.as_deref().unwrap_or("?")
        );
    }
}

fn print_stack(thread: &ThreadSample) {
    println!();
    println!(
        "\"{}\" #{} {}{}",
        thread.name,
        thread.thread_id,
        thread.state.label(),
        if thread.daemon { " daemon" } else { "" }
    );
    match thread.stack_trace.as_deref() {
        Some([]) | None => println!("    (no frames)"),
        Some(frames) => {
            for frame in frames {
                println!("    {frame}");
            }
        }
    }
}
