//! Error type shared by the hub API, the stream client and the dashboard.

use thiserror::Error;

/// Everything that can go wrong talking to the hub.
///
/// None of these are fatal to a dashboard session: the stream reconnects,
/// fetches are logged and dropped, user actions surface a notice.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level HTTP failure (connect, timeout, body read).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The hub answered, but not with a 2xx.
    #[error("{path} returned HTTP {status}")]
    Status { status: u16, path: String },

    /// Websocket handshake or frame error on the metrics stream.
    #[error("stream transport error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A payload could not be decoded.
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid hub url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
