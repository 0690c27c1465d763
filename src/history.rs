//! Historical-data request bookkeeping.
//!
//! The protocol has no correlation id on `loadHistoryPeriod`, so pending
//! requests are keyed by `(asset, period)` and matched to the response
//! carrying the same pair. A response arriving after the caller's wait
//! window still fills the slot for a later read; responses with no
//! pending slot are dropped with a warning.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{PocketOptionError, Result};

const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// OHLC candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
    pub asset: String,
    /// Timeframe in seconds.
    pub timeframe: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RequestKey {
    asset: String,
    period: u32,
}

#[derive(Default)]
struct HistoryState {
    /// Outstanding requests awaiting a response.
    pending: HashMap<RequestKey, ()>,
    /// Responses ready to be claimed.
    ready: HashMap<RequestKey, Vec<Candle>>,
}

/// Pending candle-request table; owned by the client, survives reconnects.
#[derive(Default)]
pub struct HistoryTracker {
    state: RwLock<HistoryState>,
}

impl HistoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and produce its outbound frame payload.
    pub fn register(&self, asset: &str, period: u32, count: u32, end_time: DateTime<Utc>) -> Value {
        let key = RequestKey {
            asset: asset.to_string(),
            period,
        };
        let mut state = self.state.write();
        state.ready.remove(&key);
        state.pending.insert(key, ());

        let end_timestamp = end_time.timestamp();
        json!({
            "asset": asset,
            "index": end_timestamp,
            "time": end_timestamp,
            "offset": count,
            "period": period,
        })
    }

    /// Handle a `loadHistoryPeriod` response event.
    pub fn on_history_response(&self, payload: &Value) -> Option<Vec<Candle>> {
        let asset = payload.get("asset")?.as_str()?.to_string();
        let period = payload.get("period")?.as_u64()? as u32;
        let key = RequestKey {
            asset: asset.clone(),
            period,
        };

        let candles = parse_candles(payload, &asset, period);

        let mut state = self.state.write();
        if state.pending.remove(&key).is_none() {
            warn!(%asset, period, "history_response_without_request");
            return None;
        }
        debug!(%asset, period, count = candles.len(), "history_response");
        state.ready.insert(key, candles.clone());
        Some(candles)
    }

    /// Claim a ready response, consuming it.
    pub fn take_ready(&self, asset: &str, period: u32) -> Option<Vec<Candle>> {
        let key = RequestKey {
            asset: asset.to_string(),
            period,
        };
        self.state.write().ready.remove(&key)
    }

    /// Poll until the matching response arrives or the window elapses.
    pub async fn wait(&self, asset: &str, period: u32, window: Duration) -> Result<Vec<Candle>> {
        timeout(window, async {
            loop {
                if let Some(candles) = self.take_ready(asset, period) {
                    return candles;
                }
                sleep(RESPONSE_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| PocketOptionError::HistoryTimeout {
            asset: asset.to_string(),
            period,
        })
    }
}

fn parse_candles(payload: &Value, asset: &str, period: u32) -> Vec<Candle> {
    let Some(items) = payload.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let ts = item.get("time").and_then(Value::as_i64)?;
            let timestamp = Utc.timestamp_opt(ts, 0).single()?;
            Some(Candle {
                timestamp,
                open: item.get("open").and_then(Value::as_f64)?,
                high: item.get("high").and_then(Value::as_f64)?,
                low: item.get("low").and_then(Value::as_f64)?,
                close: item.get("close").and_then(Value::as_f64)?,
                volume: item.get("volume").and_then(Value::as_f64),
                asset: asset.to_string(),
                timeframe: period,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(asset: &str, period: u32) -> Value {
        json!({
            "asset": asset,
            "index": 1_700_000_000,
            "period": period,
            "data": [
                {"time": 1_700_000_000, "open": 1.1, "high": 1.2, "low": 1.05, "close": 1.15},
                {"time": 1_700_000_060, "open": 1.15, "high": 1.25, "low": 1.1, "close": 1.2, "volume": 42.0},
            ],
        })
    }

    #[test]
    fn request_frame_carries_end_timestamp_and_count() {
        let tracker = HistoryTracker::new();
        let end = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let payload = tracker.register("EURUSD_otc", 60, 100, end);

        assert_eq!(payload["asset"], "EURUSD_otc");
        assert_eq!(payload["index"], 1_700_000_000i64);
        assert_eq!(payload["offset"], 100);
        assert_eq!(payload["period"], 60);
    }

    #[test]
    fn response_matches_pending_request_by_asset_and_period() {
        let tracker = HistoryTracker::new();
        tracker.register("EURUSD_otc", 60, 2, Utc::now());

        let candles = tracker.on_history_response(&response("EURUSD_otc", 60)).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].asset, "EURUSD_otc");
        assert_eq!(candles[0].timeframe, 60);
        assert!(candles[0].high >= candles[0].low);
        assert_eq!(candles[1].volume, Some(42.0));

        // Claimed exactly once.
        assert!(tracker.take_ready("EURUSD_otc", 60).is_some());
        assert!(tracker.take_ready("EURUSD_otc", 60).is_none());
    }

    #[test]
    fn unmatched_response_is_dropped() {
        let tracker = HistoryTracker::new();
        assert!(tracker.on_history_response(&response("GBPUSD_otc", 60)).is_none());
        assert!(tracker.take_ready("GBPUSD_otc", 60).is_none());
    }

    #[tokio::test]
    async fn wait_times_out_without_response() {
        let tracker = HistoryTracker::new();
        tracker.register("EURUSD_otc", 60, 10, Utc::now());

        let result = tracker.wait("EURUSD_otc", 60, Duration::from_millis(150)).await;
        assert!(matches!(result, Err(PocketOptionError::HistoryTimeout { .. })));

        // A late response still fills the slot.
        tracker.on_history_response(&response("EURUSD_otc", 60)).unwrap();
        assert_eq!(tracker.take_ready("EURUSD_otc", 60).unwrap().len(), 2);
    }
}
