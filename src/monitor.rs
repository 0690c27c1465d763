//! Connection statistics with an explicit lifecycle.
//!
//! Constructed by the client at startup and passed to every component
//! that records traffic; no process-wide singletons. Counters are
//! monotone for the life of the supervisor and reset only on an explicit
//! caller disconnect.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Point-in-time snapshot of the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub total_reconnects: u64,
    pub last_ping_at: Option<DateTime<Utc>>,
}

/// Shared counter sink.
#[derive(Debug, Default)]
pub struct SessionMonitor {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    total_reconnects: AtomicU64,
    /// Millis since epoch; 0 means never pinged.
    last_ping_ms: AtomicI64,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.total_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ping(&self) {
        self.last_ping_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStats {
        let ping_ms = self.last_ping_ms.load(Ordering::Relaxed);
        ConnectionStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            total_reconnects: self.total_reconnects.load(Ordering::Relaxed),
            last_ping_at: (ping_ms > 0)
                .then(|| Utc.timestamp_millis_opt(ping_ms).single())
                .flatten(),
        }
    }

    /// Reset all counters. Only the caller-initiated disconnect path
    /// uses this.
    pub fn reset(&self) {
        self.messages_sent.store(0, Ordering::Relaxed);
        self.messages_received.store(0, Ordering::Relaxed);
        self.total_reconnects.store(0, Ordering::Relaxed);
        self.last_ping_ms.store(0, Ordering::Relaxed);
    }

    /// Summary string for logging.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "sent={} received={} reconnects={} last_ping={:?}",
            stats.messages_sent, stats.messages_received, stats.total_reconnects, stats.last_ping_at
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let monitor = SessionMonitor::new();
        monitor.record_sent();
        monitor.record_sent();
        monitor.record_received();
        monitor.record_reconnect();

        let stats = monitor.snapshot();
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.total_reconnects, 1);

        monitor.reset();
        let stats = monitor.snapshot();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.total_reconnects, 0);
        assert!(stats.last_ping_at.is_none());
    }

    #[test]
    fn ping_timestamp_is_recorded() {
        let monitor = SessionMonitor::new();
        assert!(monitor.snapshot().last_ping_at.is_none());
        monitor.record_ping();
        assert!(monitor.snapshot().last_ping_at.is_some());
    }
}
