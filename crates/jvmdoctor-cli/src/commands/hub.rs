pub fn run(host: &str, port: u16) {
    let base = format!("http://{host}:{port}");

    println!("jvmdoctor hub v{}", jvmdoctor_core::VERSION);
    println!("   {base}");
    println!();
    println!("   Agents:");
    println!("     POST /api/apps/register         Register a process");
    println!("     POST /api/apps/{{id}}/heartbeat   Keep a process running");
    println!("     POST /api/metrics               Report a metrics map");
    println!();
    println!("   Dashboards:");
    println!("     GET  /api/apps                  Registered processes");
    println!("     GET  /api/alerts                Alerts, newest first");
    println!("     GET  /api/metrics/{{id}}/history  History (?since=<ms>)");
    println!("     GET  /ws/metrics                Push stream");
    println!("     GET  /health                    Health check");
    println!();
    println!("   Try: jvmdoctor --hub {base} monitor");
    println!();

    let rt = super::make_runtime();
    if let Err(e) = rt.block_on(jvmdoctor_server::run_server(host, port)) {
        eprintln!("Hub failed: {e}");
        std::process::exit(1);
    }
}
