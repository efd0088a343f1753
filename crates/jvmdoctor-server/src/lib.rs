//! In-memory jvm-doctor hub.
//!
//! Agents register, report metrics and heartbeats over HTTP; dashboards list
//! processes and alerts, pull history, proxy thread queries to the agents'
//! thread servers, and subscribe to `/ws/metrics` for pushed `metrics` and
//! `alert` messages. Everything lives in memory and is gone on restart.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};

use jvmdoctor_core::{AlertRecord, ProcessId, ProcessInfo, RegisterRequest, Registered, TelemetrySample, now_ms};

/// Agents that stay silent this long are marked offline.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(120);
/// How often the heartbeat sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Per-process metrics history kept by the hub.
pub const HISTORY_RETENTION_MS: i64 = 24 * 3_600_000;

const ALERT_DEDUPE_MS: i64 = 300_000;
const HEAP_ALERT_THRESHOLD: f64 = 0.9;
const CPU_ALERT_THRESHOLD: f64 = 0.8;
const GC_TIME_ALERT_RATIO: f64 = 0.1;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One stored report, as returned by the metrics endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMetrics {
    pub app_id: i64,
    #[serde(flatten)]
    pub sample: TelemetrySample,
}

/// Hub state: registered processes, their recent metrics, and alerts.
#[derive(Debug, Default)]
pub struct Registry {
    next_app_id: i64,
    next_alert_id: i64,
    apps: BTreeMap<i64, ProcessInfo>,
    metrics: HashMap<i64, VecDeque<TelemetrySample>>,
    alerts: Vec<AlertRecord>,
}

fn numeric_id(process: &ProcessId) -> Option<i64> {
    process.as_str().parse().ok()
}

impl Registry {
    /// Register a process, reusing the id of an existing registration with
    /// the same name, host and port.
    pub fn register(&mut self, req: &RegisterRequest, now: i64) -> i64 {
        let existing = self.apps.iter_mut().find(|(_, app)| {
            app.app_name == req.app_name
                && app.host.as_deref() == Some(req.host.as_str())
                && app.port == Some(i64::from(req.port))
        });
        if let Some((&id, app)) = existing {
            app.status = "running".to_string();
            app.last_heartbeat = Some(now);
            if let Some(port) = req.thread_server_port {
                app.thread_server_port = Some(i64::from(port));
            }
            info!("process {id} ({}) re-registered", req.app_name);
            return id;
        }

        self.next_app_id += 1;
        let id = self.next_app_id;
        self.apps.insert(
            id,
            ProcessInfo {
                id: ProcessId::from(id),
                app_name: req.app_name.clone(),
                host: Some(req.host.clone()),
                port: Some(i64::from(req.port)),
                jvm_name: req.jvm_name.clone(),
                jvm_version: req.jvm_version.clone(),
                start_time: req.start_time,
                status: "running".to_string(),
                registered_at: Some(now),
                last_heartbeat: Some(now),
                thread_server_port: req.thread_server_port.map(i64::from),
            },
        );
        info!("process {id} ({}) registered", req.app_name);
        id
    }

    pub fn heartbeat(&mut self, id: i64, now: i64) -> bool {
        match self.apps.get_mut(&id) {
            Some(app) => {
                app.last_heartbeat = Some(now);
                app.status = "running".to_string();
                true
            }
            None => false,
        }
    }

    pub fn offline(&mut self, id: i64) -> bool {
        match self.apps.get_mut(&id) {
            Some(app) => {
                app.status = "offline".to_string();
                info!("process {id} marked offline");
                true
            }
            None => false,
        }
    }

    /// Mark running processes without a heartbeat within `timeout_ms` offline.
    /// Returns how many were marked.
    pub fn sweep(&mut self, now: i64, timeout_ms: i64) -> usize {
        let mut marked = 0;
        for (id, app) in self.apps.iter_mut() {
            let stale = app
                .last_heartbeat
                .is_some_and(|last| now.saturating_sub(last) > timeout_ms);
            if app.is_running() && stale {
                app.status = "offline".to_string();
                warn!("process {id} missed its heartbeat, marked offline");
                marked += 1;
            }
        }
        marked
    }

    pub fn apps(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.apps.values()
    }

    pub fn app(&self, id: i64) -> Option<&ProcessInfo> {
        self.apps.get(&id)
    }

    /// Store a stamped sample and return the alerts it raised.
    pub fn record(&mut self, app_id: i64, sample: TelemetrySample) -> Vec<AlertRecord> {
        let now = sample.timestamp;
        let history = self.metrics.entry(app_id).or_default();
        history.push_back(sample);
        while history
            .front()
            .is_some_and(|s| s.timestamp <= now - HISTORY_RETENTION_MS)
        {
            history.pop_front();
        }

        let mut raised = Vec::new();
        if sample.heap_usage > HEAP_ALERT_THRESHOLD {
            let msg = format!("Heap usage: {:.1}%", sample.heap_usage * 100.0);
            raised.extend(self.raise(app_id, "high_heap_usage", msg, now));
        }
        if sample.cpu_usage > CPU_ALERT_THRESHOLD {
            let msg = format!("CPU usage: {:.1}%", sample.cpu_usage * 100.0);
            raised.extend(self.raise(app_id, "high_cpu_usage", msg, now));
        }
        if sample.uptime > 0 && sample.gc_time as f64 > sample.uptime as f64 * GC_TIME_ALERT_RATIO {
            let ratio = sample.gc_time as f64 / sample.uptime as f64 * 100.0;
            let msg = format!("GC time ratio: {ratio:.1}%");
            raised.extend(self.raise(app_id, "high_gc_time", msg, now));
        }
        raised
    }

    /// Create an alert unless an unacknowledged one of the same type was
    /// raised for the process within the dedupe window.
    fn raise(&mut self, app_id: i64, kind: &str, msg: String, now: i64) -> Option<AlertRecord> {
        let process = ProcessId::from(app_id);
        let recent = self.alerts.iter().any(|a| {
            !a.acknowledged
                && a.app_id.as_ref() == Some(&process)
                && a.alert_type == kind
                && now - a.created_at < ALERT_DEDUPE_MS
        });
        if recent {
            debug!("suppressing duplicate {kind} alert for process {app_id}");
            return None;
        }
        self.next_alert_id += 1;
        let alert = AlertRecord {
            id: self.next_alert_id,
            app_id: Some(process),
            alert_type: kind.to_string(),
            alert_msg: msg,
            alert_level: "warning".to_string(),
            created_at: now,
            acknowledged: false,
            acknowledged_at: None,
            acknowledged_by: None,
        };
        warn!("alert for process {app_id}: {kind} - {}", alert.alert_msg);
        self.alerts.push(alert.clone());
        Some(alert)
    }

    pub fn acknowledge(&mut self, alert_id: i64, by: &str, now: i64) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                alert.acknowledged_at = Some(now);
                alert.acknowledged_by = Some(by.to_string());
                true
            }
            None => false,
        }
    }

    /// Alerts newest first.
    pub fn alerts(&self) -> impl Iterator<Item = &AlertRecord> {
        self.alerts.iter().rev()
    }

    pub fn latest(&self, app_id: i64) -> Option<StoredMetrics> {
        let sample = *self.metrics.get(&app_id)?.back()?;
        Some(StoredMetrics { app_id, sample })
    }

    /// Samples newer than `since`, ascending. With `since <= 0`, every
    /// retained sample, newest first.
    pub fn history(&self, app_id: i64, since: i64) -> Vec<StoredMetrics> {
        let Some(samples) = self.metrics.get(&app_id) else {
            return Vec::new();
        };
        let wrap = |s: &TelemetrySample| StoredMetrics { app_id, sample: *s };
        if since > 0 {
            samples.iter().filter(|s| s.timestamp > since).map(wrap).collect()
        } else {
            samples.iter().rev().map(wrap).collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Agent report decoding
// ---------------------------------------------------------------------------

/// `POST /api/metrics` body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub app_id: i64,
    #[serde(default)]
    pub metrics: HashMap<String, Value>,
}

fn number(map: &HashMap<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn fraction(used: i64, max: i64) -> f64 {
    if max > 0 { used as f64 / max as f64 } else { 0.0 }
}

/// Build a sample from an agent's dotted-key metrics map, stamped `now`.
pub fn sample_from_report(map: &HashMap<String, Value>, now: i64) -> TelemetrySample {
    let int = |key: &str| number(map, key).map(|v| v as i64).unwrap_or(0);
    let float = |key: &str| number(map, key).unwrap_or(0.0);

    let heap_used = int("heap.used");
    let heap_max = int("heap.max");
    let metaspace_used = int("metaspace.used");
    let metaspace_max = int("metaspace.max");
    TelemetrySample {
        timestamp: now,
        heap_used,
        heap_max,
        heap_usage: fraction(heap_used, heap_max),
        nonheap_used: int("nonheap.used"),
        metaspace_used,
        metaspace_max,
        metaspace_usage: fraction(metaspace_used, metaspace_max),
        thread_count: int("thread.count"),
        daemon_thread_count: int("thread.daemon"),
        cpu_usage: number(map, "cpu.load")
            .or_else(|| number(map, "cpu.usage"))
            .unwrap_or(0.0),
        system_load: float("system.load"),
        gc_count: int("gc.count"),
        gc_time: int("gc.time"),
        uptime: int("uptime"),
    }
}

fn metrics_message(app_id: i64, sample: &TelemetrySample) -> String {
    let mut msg = serde_json::to_value(sample).unwrap_or_else(|_| json!({}));
    if let Value::Object(map) = &mut msg {
        map.insert("type".into(), json!("metrics"));
        map.insert("appId".into(), json!(app_id));
    }
    msg.to_string()
}

fn alert_message(alert: &AlertRecord) -> String {
    json!({
        "type": "alert",
        "data": {
            "type": "alert",
            "alertId": alert.id,
            "appId": alert.app_id,
            "alertType": alert.alert_type,
            "alertMsg": alert.alert_msg,
            "alertLevel": alert.alert_level,
            "createdAt": alert.created_at,
        }
    })
    .to_string()
}

// ---------------------------------------------------------------------------
// HTTP layer
// ---------------------------------------------------------------------------

/// Shared server state.
pub struct HubState {
    registry: Mutex<Registry>,
    events: broadcast::Sender<String>,
    http: reqwest::Client,
}

impl HubState {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            events,
            http: reqwest::Client::new(),
        })
    }

    fn publish(&self, msg: String) {
        // no subscribers is fine
        let _ = self.events.send(msg);
    }

    async fn ingest(&self, report: MetricsReport) {
        let sample = sample_from_report(&report.metrics, now_ms());
        let raised = {
            let mut registry = self.registry.lock().await;
            let raised = registry.record(report.app_id, sample);
            registry.heartbeat(report.app_id, sample.timestamp);
            raised
        };
        self.publish(metrics_message(report.app_id, &sample));
        for alert in &raised {
            self.publish(alert_message(alert));
        }
    }
}

fn error_body(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

fn ok_body(msg: &str) -> Json<Value> {
    Json(json!({ "status": "ok", "message": msg }))
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "UP", "timestamp": now_ms() }))
}

async fn handle_register(
    State(state): State<Arc<HubState>>,
    Json(req): Json<RegisterRequest>,
) -> Json<Registered> {
    let now = now_ms();
    let id = state.registry.lock().await.register(&req, now);
    Json(Registered {
        app_id: ProcessId::from(id),
        status: "registered".to_string(),
        message: "Application registered successfully".to_string(),
        server_time: Some(now),
    })
}

async fn handle_heartbeat(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    if state.registry.lock().await.heartbeat(id, now_ms()) {
        ok_body("Heartbeat received").into_response()
    } else {
        error_body(StatusCode::NOT_FOUND, "Unknown application")
    }
}

async fn handle_offline(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    if state.registry.lock().await.offline(id) {
        ok_body("App marked as offline").into_response()
    } else {
        error_body(StatusCode::NOT_FOUND, "Unknown application")
    }
}

async fn handle_apps(State(state): State<Arc<HubState>>) -> Json<Vec<ProcessInfo>> {
    Json(state.registry.lock().await.apps().cloned().collect())
}

async fn handle_running_apps(State(state): State<Arc<HubState>>) -> Json<Vec<ProcessInfo>> {
    let registry = state.registry.lock().await;
    Json(registry.apps().filter(|a| a.is_running()).cloned().collect())
}

async fn handle_app(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    match state.registry.lock().await.app(id) {
        Some(app) => Json(app.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_metrics(
    State(state): State<Arc<HubState>>,
    Json(report): Json<MetricsReport>,
) -> Json<Value> {
    state.ingest(report).await;
    ok_body("Metrics received")
}

async fn handle_metrics_batch(
    State(state): State<Arc<HubState>>,
    Json(reports): Json<Vec<MetricsReport>>,
) -> Json<Value> {
    let processed = reports.len();
    for report in reports {
        state.ingest(report).await;
    }
    Json(json!({ "status": "ok", "processed": processed }))
}

async fn handle_latest(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    match state.registry.lock().await.latest(id) {
        Some(m) => Json(m).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_all_latest(State(state): State<Arc<HubState>>) -> Json<Vec<StoredMetrics>> {
    let registry = state.registry.lock().await;
    let latest = registry
        .apps()
        .filter(|a| a.is_running())
        .filter_map(|a| numeric_id(&a.id))
        .filter_map(|id| registry.latest(id))
        .collect();
    Json(latest)
}

#[derive(Deserialize)]
struct HistoryParams {
    since: Option<i64>,
}

async fn handle_history(
    State(state): State<Arc<HubState>>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<StoredMetrics>> {
    Json(state.registry.lock().await.history(id, params.since.unwrap_or(0)))
}

async fn handle_alerts(State(state): State<Arc<HubState>>) -> Json<Vec<AlertRecord>> {
    Json(state.registry.lock().await.alerts().cloned().collect())
}

async fn handle_unacknowledged(State(state): State<Arc<HubState>>) -> Json<Vec<AlertRecord>> {
    let registry = state.registry.lock().await;
    Json(registry.alerts().filter(|a| !a.acknowledged).cloned().collect())
}

async fn handle_app_alerts(
    State(state): State<Arc<HubState>>,
    Path(id): Path<i64>,
) -> Json<Vec<AlertRecord>> {
    let process = ProcessId::from(id);
    let registry = state.registry.lock().await;
    Json(
        registry
            .alerts()
            .filter(|a| a.app_id.as_ref() == Some(&process))
            .cloned()
            .collect(),
    )
}

async fn handle_alert_stats(State(state): State<Arc<HubState>>) -> Json<Value> {
    let registry = state.registry.lock().await;
    let unacknowledged = registry.alerts().filter(|a| !a.acknowledged).count();
    Json(json!({ "unacknowledgedCount": unacknowledged }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeBody {
    acknowledged_by: Option<String>,
}

async fn handle_acknowledge(
    State(state): State<Arc<HubState>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Response {
    let body: AcknowledgeBody = serde_json::from_slice(&body).unwrap_or_default();
    let by = body.acknowledged_by.unwrap_or_else(|| "unknown".to_string());
    if state.registry.lock().await.acknowledge(id, &by, now_ms()) {
        ok_body("Alert acknowledged").into_response()
    } else {
        error_body(StatusCode::NOT_FOUND, "Unknown alert")
    }
}

// ---------------------------------------------------------------------------
// Thread proxy
// ---------------------------------------------------------------------------

async fn proxy_threads(state: &HubState, id: i64, agent_path: &str) -> Response {
    let target = {
        let registry = state.registry.lock().await;
        let Some(app) = registry.app(id) else {
            return error_body(StatusCode::NOT_FOUND, "Unknown application");
        };
        match (app.host.clone(), app.thread_server_port) {
            (Some(host), Some(port)) if port > 0 => (host, port, app.app_name.clone()),
            _ => return error_body(StatusCode::SERVICE_UNAVAILABLE, "Thread server not available"),
        }
    };
    let (host, port, app_name) = target;
    let url = format!("http://{host}:{port}{agent_path}");
    debug!("proxying thread query to {url}");

    let resp = match state.http.get(&url).timeout(Duration::from_secs(5)).send().await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("thread server {url} unreachable: {e}");
            return error_body(StatusCode::BAD_GATEWAY, &format!("Thread server unreachable: {e}"));
        }
    };
    let status = resp.status();
    let mut body: Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => return error_body(StatusCode::BAD_GATEWAY, &format!("Bad thread server reply: {e}")),
    };
    if let Value::Object(map) = &mut body {
        map.insert("appId".into(), json!(id));
        map.insert("appName".into(), json!(app_name));
    }
    let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(body)).into_response()
}

async fn handle_threads(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    proxy_threads(&state, id, "/api/threads").await
}

async fn handle_top_threads(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    proxy_threads(&state, id, "/api/threads/top").await
}

async fn handle_deadlock(State(state): State<Arc<HubState>>, Path(id): Path<i64>) -> Response {
    proxy_threads(&state, id, "/api/deadlock").await
}

async fn handle_thread_stack(
    State(state): State<Arc<HubState>>,
    Path((id, thread_id)): Path<(i64, i64)>,
) -> Response {
    proxy_threads(&state, id, &format!("/api/threads/{thread_id}")).await
}

// ---------------------------------------------------------------------------
// Push stream
// ---------------------------------------------------------------------------

async fn handle_stream(State(state): State<Arc<HubState>>, ws: WebSocketUpgrade) -> Response {
    let rx = state.events.subscribe();
    ws.on_upgrade(move |socket| stream_socket(socket, rx))
}

async fn stream_socket(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    info!("dashboard stream connected");
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("stream subscriber lagged, {n} messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
                    if socket.send(Message::Text("pong".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    info!("dashboard stream disconnected");
}

/// Build the axum router over `state`.
pub fn build_router(state: Arc<HubState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/health", get(handle_health))
        .route("/api/apps", get(handle_apps))
        .route("/api/apps/running", get(handle_running_apps))
        .route("/api/apps/register", post(handle_register))
        .route("/api/apps/{id}", get(handle_app))
        .route("/api/apps/{id}/heartbeat", post(handle_heartbeat))
        .route("/api/apps/{id}/offline", post(handle_offline))
        .route("/api/apps/{id}/threads", get(handle_threads))
        .route("/api/apps/{id}/threads/top", get(handle_top_threads))
        .route("/api/apps/{id}/threads/{tid}/stack", get(handle_thread_stack))
        .route("/api/apps/{id}/deadlock", get(handle_deadlock))
        .route("/api/metrics", post(handle_metrics))
        .route("/api/metrics/batch", post(handle_metrics_batch))
        .route("/api/metrics/all/latest", get(handle_all_latest))
        .route("/api/metrics/{id}/latest", get(handle_latest))
        .route("/api/metrics/{id}/history", get(handle_history))
        .route("/api/alerts", get(handle_alerts))
        .route("/api/alerts/unacknowledged", get(handle_unacknowledged))
        .route("/api/alerts/stats", get(handle_alert_stats))
        .route("/api/alerts/app/{id}", get(handle_app_alerts))
        .route("/api/alerts/{id}/acknowledge", post(handle_acknowledge))
        .route("/ws/metrics", get(handle_stream))
        .with_state(state)
}

/// Serve the hub on an already-bound listener, sweeping heartbeats in the
/// background.
pub async fn serve(listener: tokio::net::TcpListener) -> std::io::Result<()> {
    let state = HubState::new();

    let sweeper = Arc::clone(&state);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        let timeout_ms = HEARTBEAT_TIMEOUT.as_millis() as i64;
        loop {
            tick.tick().await;
            sweeper.registry.lock().await.sweep(now_ms(), timeout_ms);
        }
    });

    axum::serve(listener, build_router(state)).await
}

/// Bind `host:port` and run the hub until the process exits.
pub async fn run_server(host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("hub listening on {addr}");
    serve(listener).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn register(reg: &mut Registry, name: &str, port: u16) -> i64 {
        reg.register(
            &RegisterRequest {
                app_name: name.into(),
                host: "localhost".into(),
                port,
                ..Default::default()
            },
            1_000,
        )
    }

    #[test]
    fn converts_agent_report() {
        let map = report(&[
            ("heap.used", json!(512)),
            ("heap.max", json!(1024)),
            ("thread.count", json!(33)),
            ("cpu.load", json!(0.25)),
            ("uptime", json!("60000")),
            ("gc.count", json!(7)),
        ]);
        let s = sample_from_report(&map, 42);
        assert_eq!(s.timestamp, 42);
        assert_eq!(s.heap_usage, 0.5);
        assert_eq!(s.thread_count, 33);
        assert_eq!(s.cpu_usage, 0.25);
        assert_eq!(s.uptime, 60_000);
        assert_eq!(s.gc_count, 7);
        assert_eq!(s.metaspace_usage, 0.0);
    }

    #[test]
    fn undefined_heap_max_gives_zero_usage() {
        let s = sample_from_report(&report(&[("heap.used", json!(10)), ("heap.max", json!(-1))]), 1);
        assert_eq!(s.heap_max, -1);
        assert_eq!(s.heap_usage, 0.0);
    }

    #[test]
    fn register_dedupes_by_name_host_port() {
        let mut reg = Registry::default();
        let a = register(&mut reg, "orders", 8080);
        let b = register(&mut reg, "orders", 8080);
        let c = register(&mut reg, "orders", 8081);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.apps().count(), 2);
    }

    #[test]
    fn offline_heartbeat_and_sweep() {
        let mut reg = Registry::default();
        let id = register(&mut reg, "orders", 8080);
        assert!(reg.offline(id));
        assert!(!reg.app(id).unwrap().is_running());
        assert!(reg.heartbeat(id, 2_000));
        assert!(reg.app(id).unwrap().is_running());

        assert_eq!(reg.sweep(2_000 + 120_000, 120_000), 0);
        assert_eq!(reg.sweep(2_000 + 120_001, 120_000), 1);
        assert_eq!(reg.app(id).unwrap().status, "offline");
        assert!(!reg.heartbeat(99, 0));
    }

    #[test]
    fn alerts_raise_and_dedupe() {
        let mut reg = Registry::default();
        let hot = TelemetrySample {
            timestamp: 1_000_000,
            heap_usage: 0.95,
            cpu_usage: 0.85,
            gc_time: 200,
            uptime: 1_000,
            ..Default::default()
        };
        let raised = reg.record(1, hot);
        let kinds: Vec<_> = raised.iter().map(|a| a.alert_type.as_str()).collect();
        assert_eq!(kinds, vec!["high_heap_usage", "high_cpu_usage", "high_gc_time"]);

        // within five minutes: suppressed
        let again = TelemetrySample {
            timestamp: 1_000_000 + 60_000,
            ..hot
        };
        assert!(reg.record(1, again).is_empty());

        // acknowledging lifts the suppression
        let heap_id = raised[0].id;
        assert!(reg.acknowledge(heap_id, "dashboard", 1_100_000));
        let third = TelemetrySample {
            timestamp: 1_000_000 + 120_000,
            ..hot
        };
        let kinds: Vec<_> = reg.record(1, third).into_iter().map(|a| a.alert_type).collect();
        assert_eq!(kinds, vec!["high_heap_usage"]);

        // and after the window everything fires again
        let late = TelemetrySample {
            timestamp: 1_000_000 + 400_000,
            ..hot
        };
        assert_eq!(reg.record(1, late).len(), 2);
    }

    #[test]
    fn history_order_depends_on_since() {
        let mut reg = Registry::default();
        for ts in [10, 20, 30] {
            reg.record(
                5,
                TelemetrySample {
                    timestamp: ts,
                    ..Default::default()
                },
            );
        }
        let asc: Vec<_> = reg.history(5, 15).iter().map(|m| m.sample.timestamp).collect();
        assert_eq!(asc, vec![20, 30]);
        let all: Vec<_> = reg.history(5, 0).iter().map(|m| m.sample.timestamp).collect();
        assert_eq!(all, vec![30, 20, 10]);
        assert!(reg.history(6, 0).is_empty());
        assert_eq!(reg.latest(5).map(|m| m.sample.timestamp), Some(30));
    }

    #[test]
    fn history_is_bounded() {
        let mut reg = Registry::default();
        reg.record(1, TelemetrySample { timestamp: 0, ..Default::default() });
        reg.record(
            1,
            TelemetrySample {
                timestamp: HISTORY_RETENTION_MS + 1,
                ..Default::default()
            },
        );
        assert_eq!(reg.history(1, 0).len(), 1);
    }

    #[test]
    fn stream_messages_decode_on_the_client() {
        let sample = TelemetrySample {
            timestamp: 5,
            heap_used: 100,
            ..Default::default()
        };
        let msg = jvmdoctor_core::parse_message(&metrics_message(3, &sample))
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            jvmdoctor_core::StreamMessage::Metrics {
                process: ProcessId::from(3i64),
                sample,
            }
        );

        let alert = AlertRecord {
            id: 9,
            app_id: Some(ProcessId::from(3i64)),
            alert_type: "high_cpu_usage".into(),
            ..Default::default()
        };
        let msg = jvmdoctor_core::parse_message(&alert_message(&alert)).unwrap();
        assert!(matches!(msg, Some(jvmdoctor_core::StreamMessage::Alert(n)) if n.alert_id == Some(9)));
    }
}
