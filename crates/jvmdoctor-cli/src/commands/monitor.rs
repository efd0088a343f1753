use std::fs::OpenOptions;
use std::time::Duration;

use jvmdoctor_core::Theme;

use super::{make_config, make_runtime};

/// The dashboard owns the terminal, so logs go to a file or nowhere.
pub fn init_logging(log_file: Option<&str>) {
    let Some(path) = log_file else {
        return;
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
                .target(env_logger::Target::Pipe(Box::new(file)))
                .init();
        }
        Err(e) => eprintln!("Cannot open log file {path}: {e}; logging disabled"),
    }
}

pub fn run(hub: &str, window_min: u64, refresh: f64, reconnect: f64, light: bool) {
    let mut config = make_config(hub);
    config.window = Duration::from_secs(window_min.max(1) * 60);
    config.refresh = Duration::from_secs_f64(refresh.clamp(0.1, 60.0));
    config.reconnect_delay = Duration::from_secs_f64(reconnect.clamp(0.1, 300.0));
    let theme = if light { Theme::Light } else { Theme::Dark };

    let rt = make_runtime();
    let result = rt.block_on(async {
        let mut app = match crate::tui::app::App::new(config, theme) {
            Ok(app) => app,
            Err(e) => {
                eprintln!("Failed to build HTTP client: {e}");
                std::process::exit(1);
            }
        };
        app.run().await
    });
    if let Err(e) = result {
        eprintln!("TUI error: {e}");
        std::process::exit(1);
    }
}
