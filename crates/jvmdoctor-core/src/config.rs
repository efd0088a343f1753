//! Dashboard configuration.

use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::stream::DEFAULT_RECONNECT_DELAY;
use crate::window::DEFAULT_WINDOW;

pub const DEFAULT_HUB: &str = "http://127.0.0.1:8080";
pub const DEFAULT_STREAM_PATH: &str = "/ws/metrics";

/// Everything a dashboard session needs to know up front.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Base URL of the hub's HTTP API.
    pub hub: Url,
    /// How much history each process buffer keeps.
    pub window: Duration,
    /// Pause between a stream close and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Path of the push stream, relative to the hub root.
    pub stream_path: String,
    /// Redraw tick of the terminal dashboard.
    pub refresh: Duration,
    /// Name recorded on alerts acknowledged from this dashboard.
    pub acknowledged_by: String,
}

impl DashboardConfig {
    /// Defaults for everything but the hub.
    pub fn new(hub: Url) -> Self {
        Self {
            hub,
            window: DEFAULT_WINDOW,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            refresh: Duration::from_secs(1),
            acknowledged_by: "dashboard".to_string(),
        }
    }

    pub fn with_hub(hub: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(hub)?))
    }

    /// The push-stream URL: the hub URL with `ws`/`wss` scheme and
    /// `stream_path` appended to its path.
    pub fn stream_url(&self) -> Url {
        let mut url = self.hub.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) -> ws(s) stays within the "special" schemes, which set_scheme allows
        let _ = url.set_scheme(scheme);
        let base = url.path().trim_end_matches('/').to_string();
        let tail = self.stream_path.trim_start_matches('/');
        url.set_path(&format!("{base}/{tail}"));
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}
