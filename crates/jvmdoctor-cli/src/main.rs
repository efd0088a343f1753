//! CLI for jvmdoctor: watch a fleet of JVMs live from the terminal.

mod commands;
mod tui;

use clap::{Parser, Subcommand};

use jvmdoctor_core::config::DEFAULT_HUB;

#[derive(Parser)]
#[command(name = "jvmdoctor")]
#[command(about = "jvmdoctor: live telemetry, diagnostics and thread inspection for a fleet of JVMs")]
#[command(version = jvmdoctor_core::VERSION)]
struct Cli {
    /// Base URL of the hub's HTTP API
    #[arg(long, global = true, default_value = DEFAULT_HUB)]
    hub: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Live terminal dashboard: fleet, charts, diagnostics, threads and alerts
    Monitor {
        /// History kept per process, in minutes
        #[arg(long, default_value = "60")]
        window_min: u64,

        /// Redraw interval in seconds
        #[arg(long, default_value = "1.0")]
        refresh: f64,

        /// Seconds between stream reconnect attempts
        #[arg(long, default_value = "3.0")]
        reconnect: f64,

        /// Start with the light theme
        #[arg(long)]
        light: bool,

        /// Write log output to this file (logging is off otherwise)
        #[arg(long)]
        log_file: Option<String>,
    },

    /// Print pushed stream messages until Ctrl-C
    Watch {
        /// Only print messages for this process id
        #[arg(long)]
        process: Option<String>,

        /// Print raw sample JSON instead of a summary line
        #[arg(long)]
        json: bool,
    },

    /// List registered processes
    Apps {
        /// Only running processes
        #[arg(long)]
        running: bool,
    },

    /// List alerts, newest first
    Alerts {
        /// Include acknowledged alerts
        #[arg(long)]
        all: bool,
    },

    /// Acknowledge an alert
    Ack {
        /// Alert id
        alert_id: i64,

        /// Name recorded as the acknowledger
        #[arg(long, default_value = "cli")]
        by: String,
    },

    /// Mark a process offline
    Offline {
        /// Process id
        process: String,
    },

    /// Send a heartbeat on behalf of a process
    Heartbeat {
        /// Process id
        process: String,
    },

    /// Register a process with the hub
    Register {
        /// Application name
        #[arg(long)]
        name: String,

        /// Host the JVM runs on
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Application port
        #[arg(long)]
        port: u16,

        /// JVM name, e.g. "OpenJDK 64-Bit Server VM"
        #[arg(long)]
        jvm_name: Option<String>,

        /// JVM version
        #[arg(long)]
        jvm_version: Option<String>,

        /// Port of the agent's thread server
        #[arg(long)]
        thread_port: Option<u16>,
    },

    /// Print top threads and deadlocks for a process
    Threads {
        /// Process id
        process: String,

        /// Also print the stack of this thread id
        #[arg(long)]
        stack: Option<i64>,
    },

    /// Diagnose a process from its newest sample
    Diagnose {
        /// Process id
        process: String,
    },

    /// Run the in-memory hub
    Hub {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Commands::Monitor { log_file, .. } = &cli.command {
        commands::monitor::init_logging(log_file.as_deref());
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let hub = cli.hub.as_str();
    match cli.command {
        Commands::Monitor {
            window_min,
            refresh,
            reconnect,
            light,
            log_file: _,
        } => commands::monitor::run(hub, window_min, refresh, reconnect, light),
        Commands::Watch { process, json } => commands::watch::run(hub, process.as_deref(), json),
        Commands::Apps { running } => commands::fleet::list_apps(hub, running),
        Commands::Alerts { all } => commands::fleet::list_alerts(hub, all),
        Commands::Ack { alert_id, by } => commands::fleet::acknowledge(hub, alert_id, &by),
        Commands::Offline { process } => commands::fleet::offline(hub, &process),
        Commands::Heartbeat { process } => commands::fleet::heartbeat(hub, &process),
        Commands::Register {
            name,
            host,
            port,
            jvm_name,
            jvm_version,
            thread_port,
        } => commands::fleet::register(
            hub,
            jvmdoctor_core::RegisterRequest {
                app_name: name,
                host,
                port,
                jvm_name,
                jvm_version,
                start_time: None,
                thread_server_port: thread_port,
            },
        ),
        Commands::Threads { process, stack } => commands::threads::run(hub, &process, stack),
        Commands::Diagnose { process } => commands::diagnose::run(hub, &process),
        Commands::Hub { port, host } => commands::hub::run(&host, port),
    }
}
