//! Session configuration.
//!
//! Defaults are tuned for the live service: the server silently drops
//! idle links after roughly 30s, so the application-level ping interval
//! stays well under that.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// TCP + TLS + WebSocket upgrade deadline.
    pub connect_timeout: Duration,
    /// Full open/upgrade/auth sequence deadline.
    pub handshake_timeout: Duration,
    /// Application-level `42["ps"]` interval.
    pub ping_interval: Duration,
    /// Reconnection monitor check interval.
    pub reconnect_check_interval: Duration,
    /// Delay between failed reconnect attempts (jittered).
    pub reconnect_delay: Duration,
    /// Optional cap on consecutive failed reconnect attempts.
    pub max_reconnect_attempts: Option<u32>,
    /// Default wait window for an order result.
    pub order_result_timeout: Duration,
    /// Default wait window for a candle response.
    pub history_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            reconnect_check_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            max_reconnect_attempts: None,
            order_result_timeout: Duration::from_secs(10),
            history_timeout: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Load from environment with defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_ms("PO_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = ms;
        }
        if let Some(ms) = env_ms("PO_HANDSHAKE_TIMEOUT_MS") {
            config.handshake_timeout = ms;
        }
        if let Some(ms) = env_ms("PO_PING_INTERVAL_MS") {
            config.ping_interval = ms;
        }
        if let Some(ms) = env_ms("PO_RECONNECT_CHECK_MS") {
            config.reconnect_check_interval = ms;
        }
        if let Some(ms) = env_ms("PO_RECONNECT_DELAY_MS") {
            config.reconnect_delay = ms;
        }
        if let Ok(v) = std::env::var("PO_MAX_RECONNECT_ATTEMPTS") {
            config.max_reconnect_attempts = v.parse().ok();
        }
        if let Some(ms) = env_ms("PO_ORDER_RESULT_TIMEOUT_MS") {
            config.order_result_timeout = ms;
        }

        config
    }
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
