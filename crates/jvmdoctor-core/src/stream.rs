//! Push-stream client for the hub's `/ws/metrics` channel.
//!
//! The client cycles `Connecting -> Open -> Closed -> Connecting` for as long
//! as it lives. Every close (handshake failure, transport error, orderly
//! close frame) schedules exactly one reconnect after a fixed delay; there is
//! no backoff growth and no retry cap. Malformed frames are counted and
//! dropped without touching the connection.
//!
//! The state machine ([`StreamMachine`]) is kept free of I/O so its counting
//! rules can be tested synchronously. [`StreamClient`] drives it over any
//! [`StreamTransport`]; [`WebSocketTransport`] is the production one.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Result;
use crate::sample::{ProcessId, TelemetrySample, lenient_i64};

/// Fixed delay between a close and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Connecting,
    Open,
    Closed,
}

impl StreamState {
    pub fn label(self) -> &'static str {
        match self {
            StreamState::Connecting => "connecting",
            StreamState::Open => "open",
            StreamState::Closed => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Alert details carried by an `alert` message. Every field is optional; the
/// dashboard only needs to know that the alert list changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertNotice {
    #[serde(deserialize_with = "lenient_i64")]
    pub alert_id: Option<i64>,
    pub app_id: Option<ProcessId>,
    pub alert_type: Option<String>,
    pub alert_msg: Option<String>,
    pub alert_level: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Metrics {
        process: ProcessId,
        sample: TelemetrySample,
    },
    Alert(AlertNotice),
}

/// Decode one text frame.
///
/// `Ok(None)` means a well-formed message of a kind this client does not
/// handle. A missing `type`, or a `metrics` message without `appId` or
/// `timestamp`, is an error.
pub fn parse_message(text: &str) -> std::result::Result<Option<StreamMessage>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| serde_json::Error::missing_field("type"))?;

    match kind {
        "metrics" => {
            let id = value
                .get("appId")
                .ok_or_else(|| serde_json::Error::missing_field("appId"))?;
            let process = ProcessId::deserialize(id)?;
            if value.get("timestamp").is_none_or(Value::is_null) {
                return Err(serde_json::Error::missing_field("timestamp"));
            }
            let sample = TelemetrySample::deserialize(&value)?;
            Ok(Some(StreamMessage::Metrics { process, sample }))
        }
        "alert" => {
            // The hub nests the alert under `data`; accept it flat as well.
            let body = value.get("data").filter(|d| d.is_object()).unwrap_or(&value);
            let notice = AlertNotice::deserialize(body)?;
            Ok(Some(StreamMessage::Alert(notice)))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    State(StreamState),
    Message(StreamMessage),
}

// ---------------------------------------------------------------------------
// Counters and state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StreamCounters {
    received: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
}

impl StreamCounters {
    /// Text frames received, including dropped ones.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Frames that failed to decode.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Reconnects scheduled so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Connection lifecycle bookkeeping with no I/O.
#[derive(Debug)]
pub struct StreamMachine {
    state: StreamState,
    delay: Duration,
    counters: Arc<StreamCounters>,
}

impl StreamMachine {
    pub fn new(delay: Duration) -> Self {
        Self {
            state: StreamState::Connecting,
            delay,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn counters(&self) -> &Arc<StreamCounters> {
        &self.counters
    }

    pub fn on_connecting(&mut self) {
        self.state = StreamState::Connecting;
    }

    pub fn on_open(&mut self) {
        self.state = StreamState::Open;
    }

    /// Record a close and return how long to wait before reconnecting.
    pub fn on_close(&mut self) -> Duration {
        self.state = StreamState::Closed;
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        self.delay
    }

    /// Terminal close on shutdown; nothing gets scheduled.
    pub fn on_shutdown(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Decode a frame. Failures are logged and counted, never propagated.
    pub fn on_text(&mut self, text: &str) -> Option<StreamMessage> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        match parse_message(text) {
            Ok(Some(msg)) => Some(msg),
            Ok(None) => {
                debug!("ignoring stream message of unknown kind");
                None
            }
            Err(e) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("dropping malformed stream message: {e}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One established push connection.
pub trait StreamConnection: Send {
    /// Next text frame, `Some(Err)` on a transport error, `None` once the
    /// peer has closed.
    fn next_text(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;

    /// Best-effort orderly close.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

/// Something that can open [`StreamConnection`]s to one fixed endpoint.
pub trait StreamTransport: Send + 'static {
    type Connection: StreamConnection;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Connection>> + Send;
}

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

pub struct WebSocketConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StreamTransport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn connect(&mut self) -> Result<WebSocketConnection> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        Ok(WebSocketConnection { socket })
    }
}

impl StreamConnection for WebSocketConnection {
    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // ping/pong is answered by tungstenite; binary frames are not part of the protocol
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            debug!("stream close handshake failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle to the background reconnect loop.
///
/// Dropping the handle stops the loop; [`StreamClient::close`] additionally
/// waits for it to finish.
pub struct StreamClient {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    counters: Arc<StreamCounters>,
}

impl StreamClient {
    /// Spawn the connection loop on the current tokio runtime.
    ///
    /// `dispatch` receives state changes and decoded messages in arrival
    /// order. It must not block.
    pub fn open<T, F>(transport: T, reconnect_delay: Duration, dispatch: F) -> Self
    where
        T: StreamTransport,
        F: FnMut(StreamEvent) + Send + 'static,
    {
        let machine = StreamMachine::new(reconnect_delay);
        let counters = Arc::clone(machine.counters());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(transport, machine, dispatch, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
            counters,
        }
    }

    pub fn counters(&self) -> &StreamCounters {
        &self.counters
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop reconnecting, close the live connection, and wait for the loop.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("stream task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<T, F>(
    mut transport: T,
    mut machine: StreamMachine,
    mut dispatch: F,
    cancel: CancellationToken,
) where
    T: StreamTransport,
    F: FnMut(StreamEvent) + Send,
{
    'session: loop {
        machine.on_connecting();
        dispatch(StreamEvent::State(StreamState::Connecting));

        let connected = tokio::select! {
            _ = cancel.cancelled() => break 'session,
            res = transport.connect() => res,
        };

        match connected {
            Ok(mut conn) => {
                info!("stream connected");
                machine.on_open();
                dispatch(StreamEvent::State(StreamState::Open));
                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => {
                            conn.shutdown().await;
                            break 'session;
                        }
                        frame = conn.next_text() => frame,
                    };
                    match frame {
                        Some(Ok(text)) => {
                            if let Some(msg) = machine.on_text(&text) {
                                dispatch(StreamEvent::Message(msg));
                            }
                        }
                        Some(Err(e)) => {
                            warn!("stream disconnected: {e}");
                            break;
                        }
                        None => {
                            info!("stream closed by hub");
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("stream connect failed: {e}"),
        }

        let delay = machine.on_close();
        dispatch(StreamEvent::State(StreamState::Closed));
        info!("stream reconnecting in {}ms", delay.as_millis());

        tokio::select! {
            _ = cancel.cancelled() => break 'session,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    if machine.state() != StreamState::Closed {
        dispatch(StreamEvent::State(StreamState::Closed));
    }
    machine.on_shutdown();
    info!("stream client stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parses_metrics_message() {
        let msg = parse_message(
            r#"{"type":"metrics","appId":3,"timestamp":1000,"heapUsed":10,"heapUsage":0.5,"cpuUsage":null}"#,
        )
        .unwrap()
        .unwrap();
        match msg {
            StreamMessage::Metrics { process, sample } => {
                assert_eq!(process, ProcessId::from(3u64));
                assert_eq!(sample.timestamp, 1000);
                assert_eq!(sample.heap_used, 10);
                assert_eq!(sample.cpu_usage, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_nested_alert_message() {
        let msg = parse_message(
            r#"{"type":"alert","data":{"type":"alert","alertId":9,"appId":3,"alertType":"HEAP_HIGH","alertLevel":"critical"}}"#,
        )
        .unwrap()
        .unwrap();
        let StreamMessage::Alert(notice) = msg else {
            panic!("expected alert");
        };
        assert_eq!(notice.alert_id, Some(9));
        assert_eq!(notice.app_id, Some(ProcessId::from("3")));
        assert_eq!(notice.alert_type.as_deref(), Some("HEAP_HIGH"));
    }

    #[test]
    fn bare_alert_is_accepted() {
        let msg = parse_message(r#"{"type":"alert"}"#).unwrap();
        assert_eq!(msg, Some(StreamMessage::Alert(AlertNotice::default())));
    }

    #[test]
    fn unknown_kind_is_ignored() {
        assert_eq!(parse_message(r#"{"type":"hello","x":1}"#).unwrap(), None);
    }

    #[test]
    fn metrics_without_timestamp_are_rejected() {
        assert!(parse_message(r#"{"type":"metrics","appId":1,"heapUsage":0.4}"#).is_err());
        assert!(parse_message(r#"{"type":"metrics","appId":1,"timestamp":null}"#).is_err());
        assert!(parse_message(r#"{"type":"metrics","appId":1,"timestamp":0}"#).is_ok());
    }

    #[test]
    fn malformed_inputs_are_errors() {
        assert!(parse_message("not json").is_err());
        assert!(parse_message(r#"{"appId":1}"#).is_err());
        assert!(parse_message(r#"{"type":"metrics","timestamp":1}"#).is_err());
        assert!(parse_message(r#"{"type":"metrics","appId":1,"timestamp":5,"heapUsed":"lots"}"#).is_err());
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    #[test]
    fn n_closes_schedule_n_reconnects() {
        let mut m = StreamMachine::new(DEFAULT_RECONNECT_DELAY);
        for n in 1..=25u64 {
            m.on_connecting();
            assert_eq!(m.state(), StreamState::Connecting);
            if n % 2 == 0 {
                m.on_open();
                assert_eq!(m.state(), StreamState::Open);
            }
            assert_eq!(m.on_close(), Duration::from_millis(3000));
            assert_eq!(m.state(), StreamState::Closed);
            assert_eq!(m.counters().reconnects(), n);
        }
    }

    #[test]
    fn malformed_frame_counts_and_keeps_open() {
        let mut m = StreamMachine::new(DEFAULT_RECONNECT_DELAY);
        m.on_open();
        assert!(m.on_text("{broken").is_none());
        assert!(m.on_text(r#"{"type":"metrics","appId":1,"timestamp":9}"#).is_some());
        assert!(m.on_text(r#"{"type":"other"}"#).is_none());
        assert!(m.on_text(r#"{"type":"metrics","appId":1}"#).is_none());
        assert_eq!(m.state(), StreamState::Open);
        assert_eq!(m.counters().received(), 4);
        assert_eq!(m.counters().dropped(), 2);
    }

    // -----------------------------------------------------------------------
    // Client over a scripted transport
    // -----------------------------------------------------------------------

    /// What one connection attempt does.
    enum Script {
        Refuse,
        /// Accept, deliver the frames, then close.
        Serve(Vec<&'static str>),
        /// Accept, deliver the frames, then stay open forever.
        Hold(Vec<&'static str>),
    }

    struct ScriptedTransport {
        script: VecDeque<Script>,
        attempts: Arc<Mutex<Vec<Instant>>>,
    }

    struct ScriptedConnection {
        frames: VecDeque<&'static str>,
        hold: bool,
    }

    impl StreamTransport for ScriptedTransport {
        type Connection = ScriptedConnection;

        async fn connect(&mut self) -> Result<ScriptedConnection> {
            self.attempts.lock().unwrap().push(Instant::now());
            match self.script.pop_front() {
                Some(Script::Serve(frames)) => Ok(ScriptedConnection {
                    frames: frames.into(),
                    hold: false,
                }),
                Some(Script::Hold(frames)) => Ok(ScriptedConnection {
                    frames: frames.into(),
                    hold: true,
                }),
                Some(Script::Refuse) | None => Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "refused",
                )
                .into()),
            }
        }
    }

    impl StreamConnection for ScriptedConnection {
        async fn next_text(&mut self) -> Option<Result<String>> {
            match self.frames.pop_front() {
                Some(f) => Some(Ok(f.to_string())),
                None if self.hold => std::future::pending().await,
                None => None,
            }
        }

        async fn shutdown(&mut self) {}
    }

    fn recorder() -> (Arc<Mutex<Vec<StreamEvent>>>, impl FnMut(StreamEvent) + Send + 'static) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        (events, move |ev| sink.lock().unwrap().push(ev))
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            script: VecDeque::from(vec![
                Script::Refuse,
                Script::Serve(vec![]),
                Script::Refuse,
                Script::Hold(vec![]),
            ]),
            attempts: Arc::clone(&attempts),
        };
        let (events, dispatch) = recorder();
        let client = StreamClient::open(transport, DEFAULT_RECONNECT_DELAY, dispatch);

        tokio::time::sleep(Duration::from_secs(60)).await;

        let attempts = attempts.lock().unwrap().clone();
        assert_eq!(attempts.len(), 4, "one attempt per close plus the first");
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(3000), "gap {gap:?}");
            assert!(gap < Duration::from_millis(3100), "gap {gap:?}");
        }
        assert_eq!(client.counters().reconnects(), 3);

        let last = events.lock().unwrap().last().cloned();
        assert_eq!(last, Some(StreamEvent::State(StreamState::Open)));

        client.close().await;
        let last = events.lock().unwrap().last().cloned();
        assert_eq!(last, Some(StreamEvent::State(StreamState::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_do_not_close_the_connection() {
        let transport = ScriptedTransport {
            script: VecDeque::from(vec![Script::Hold(vec![
                r#"{"type":"metrics","appId":1,"timestamp":5}"#,
                "garbage",
                r#"{"type":"metrics","appId":1,"timestamp":6}"#,
            ])]),
            attempts: Arc::new(Mutex::new(Vec::new())),
        };
        let (events, dispatch) = recorder();
        let client = StreamClient::open(transport, DEFAULT_RECONNECT_DELAY, dispatch);

        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(client.counters().dropped(), 1);
        assert_eq!(client.counters().reconnects(), 0);
        let events = events.lock().unwrap().clone();
        let messages = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Message(_)))
            .count();
        assert_eq!(messages, 2);
        assert!(matches!(
            events.as_slice(),
            [
                StreamEvent::State(StreamState::Connecting),
                StreamEvent::State(StreamState::Open),
                StreamEvent::Message(_),
                StreamEvent::Message(_),
            ]
        ));
        assert!(client.is_running());
        client.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_the_reconnect_loop() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            script: VecDeque::new(),
            attempts: Arc::clone(&attempts),
        };
        let (_events, dispatch) = recorder();
        let client = StreamClient::open(transport, DEFAULT_RECONNECT_DELAY, dispatch);
        tokio::time::sleep(Duration::from_millis(100)).await;
        client.close().await;

        let seen = attempts.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(attempts.lock().unwrap().len(), seen);
    }
}
