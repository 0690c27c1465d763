//! Error taxonomy for the session client.
//!
//! Parameter validation and authentication rejections surface
//! synchronously to the calling operation and are never retried.
//! Transport faults during a live session are recovered by the
//! reconnection supervisor and only show up as `disconnected` events.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PocketOptionError {
    /// The multi-frame handshake did not complete within its deadline.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Server rejected the session credentials. Not retried with the
    /// same descriptor.
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Network-level WebSocket failure.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Bad asset/timeframe/amount/duration, detected before any I/O.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No terminal order result arrived within the caller's wait window.
    /// Background tracking of the order continues.
    #[error("order result timeout for request {0}")]
    OrderTimeout(String),

    /// No candle response arrived within the caller's wait window.
    #[error("history timeout for {asset} period {period}s")]
    HistoryTimeout { asset: String, period: u32 },

    /// The configured reconnection attempt cap was reached.
    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    /// Operation requires a live session.
    #[error("not connected")]
    NotConnected,

    /// Malformed JSON in a frame we were required to parse.
    #[error("payload decode error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PocketOptionError>;
