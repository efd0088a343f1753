//! # jvmdoctor-core
//!
//! **Live telemetry for a fleet of JVMs.**
//!
//! `jvmdoctor-core` is the client side of a jvm-doctor deployment: it consumes
//! the hub's push stream of per-process telemetry, keeps an hour of history per
//! process, derives diagnostic suggestions for the process you are looking at,
//! and feeds chart-ready series to whatever renders them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use jvmdoctor_core::{Dashboard, DashboardConfig, HttpHubApi, RenderAdapter, RenderSink, Theme};
//! use jvmdoctor_core::render::ChartKind;
//!
//! struct Stdout;
//! impl RenderSink for Stdout {
//!     fn push(&mut self, kind: ChartKind, _labels: &[String], values: &[f64]) {
//!         println!("{kind}: {:?}", values.last());
//!     }
//!     fn release(&mut self) {}
//! }
//!
//! # async fn demo() -> jvmdoctor_core::Result<()> {
//! let config = DashboardConfig::with_hub("http://127.0.0.1:8080")?;
//! let api = Arc::new(HttpHubApi::new(&config.hub)?);
//! let charts = RenderAdapter::new(Theme::Dark, |_| Stdout);
//! let (mut dashboard, mut events) = Dashboard::new(config, api, charts);
//!
//! dashboard.start();
//! let stream = dashboard.connect_stream();
//! while let Some(event) = events.recv().await {
//!     dashboard.handle(event);
//! }
//! stream.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Stream client → Telemetry store (window buffers) → Render adapter + Rule engine
//!
//! - [`StreamClient`] holds one push connection and reconnects after a fixed
//!   delay, forever, until closed.
//! - [`TelemetryStore`] keeps a [`TimeWindowBuffer`] per process and the
//!   [`LiveSnapshot`] of the selected one.
//! - [`diagnose`] turns the live snapshot into ordered [`Suggestion`]s.
//! - [`RenderAdapter`] projects a buffer into four series for a [`RenderSink`].
//! - [`ThreadInspector`] caches on-demand thread snapshots and stacks.
//! - [`Dashboard`] owns all of the above and applies events from one queue.

pub mod api;
pub mod config;
pub mod dashboard;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod render;
pub mod sample;
pub mod store;
pub mod stream;
pub mod threads;
pub mod window;

pub use api::{AlertRecord, HttpHubApi, HubApi, ProcessInfo, RegisterRequest, Registered};
pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardEvent, FleetAction, FleetRow, Notice};
pub use diagnostics::{Level, Suggestion, diagnose};
pub use error::{Error, Result};
pub use render::{ChartSeries, RenderAdapter, RenderSink, Theme};
pub use sample::{LiveSnapshot, ProcessId, TelemetrySample, now_ms};
pub use store::{StoreChange, TelemetryStore};
pub use stream::{
    StreamClient, StreamEvent, StreamMessage, StreamState, WebSocketTransport, parse_message,
};
pub use threads::{ThreadInspector, ThreadSample, ThreadState, ThreadView};
pub use window::TimeWindowBuffer;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
