//! Order lifecycle reconciliation.
//!
//! Outbound submissions are registered against their caller-generated
//! correlation key before the frame goes out, then promoted to active by
//! `order_opened` and finalized by `order_closed`. The tracker is owned
//! by the client and deliberately survives session replacement: a
//! reconnect never clears in-flight order state.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{PocketOptionError, Result};

pub const MIN_ORDER_AMOUNT: f64 = 1.0;
pub const MAX_ORDER_AMOUNT: f64 = 50_000.0;
pub const MIN_DURATION_SECS: u32 = 5;
pub const MAX_DURATION_SECS: u32 = 43_200;

const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Call,
    Put,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Active,
    Closed,
    Cancelled,
    Win,
    Lose,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Win | Self::Lose | Self::Cancelled)
    }
}

/// Immutable order request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub asset: String,
    pub amount: f64,
    pub direction: OrderDirection,
    pub duration: u32,
    pub request_id: String,
}

impl Order {
    /// Build an order with a fresh correlation key. Amount and duration
    /// invariants are checked here, before any network call.
    pub fn new(
        asset: impl Into<String>,
        amount: f64,
        direction: OrderDirection,
        duration: u32,
    ) -> Result<Self> {
        if !(amount > 0.0) {
            return Err(PocketOptionError::InvalidParameter(
                "amount must be positive".to_string(),
            ));
        }
        if duration < MIN_DURATION_SECS {
            return Err(PocketOptionError::InvalidParameter(format!(
                "duration must be at least {MIN_DURATION_SECS} seconds"
            )));
        }
        Ok(Self {
            asset: asset.into(),
            amount,
            direction,
            duration,
            request_id: Uuid::new_v4().to_string(),
        })
    }
}

/// Order state as acknowledged by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub asset: String,
    pub amount: f64,
    pub direction: OrderDirection,
    pub duration: u32,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub profit: Option<f64>,
    pub payout: Option<f64>,
}

#[derive(Default)]
struct TrackerState {
    /// request_id → order, awaiting server acknowledgement.
    pending: HashMap<String, Order>,
    /// order_id → active result.
    active: HashMap<String, OrderResult>,
    /// order_id → terminal result, retained until read or session end.
    completed: HashMap<String, OrderResult>,
    /// request_id → order_id, for correlation-keyed lookups.
    request_index: HashMap<String, String>,
}

/// Maps outbound submissions to lifecycle state. Owned by the client,
/// outlives any single connection session.
#[derive(Default)]
pub struct OrderTracker {
    state: RwLock<TrackerState>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submission before its frame is sent.
    pub fn register(&self, order: &Order) {
        let mut state = self.state.write();
        state.pending.insert(order.request_id.clone(), order.clone());
    }

    /// `order_opened` acknowledgement: promote pending → active.
    /// Frames without a known correlation key create no state.
    pub fn on_order_opened(&self, payload: &Value) -> Option<OrderResult> {
        let request_id = string_field(payload, "requestId")?;
        let order_id = string_field(payload, "id")?;

        let mut state = self.state.write();
        let order = match state.pending.remove(&request_id) {
            Some(order) => order,
            None => {
                debug!(%request_id, "order_opened_without_pending");
                return None;
            }
        };

        let placed_at = Utc::now();
        let result = OrderResult {
            order_id: order_id.clone(),
            asset: order.asset,
            amount: order.amount,
            direction: order.direction,
            duration: order.duration,
            status: OrderStatus::Active,
            placed_at,
            expires_at: placed_at + chrono::Duration::seconds(i64::from(order.duration)),
            profit: None,
            payout: None,
        };

        state.request_index.insert(request_id, order_id.clone());
        state.active.insert(order_id, result.clone());
        info!(order_id = %result.order_id, asset = %result.asset, "order_active");
        Some(result)
    }

    /// `order_closed`: exactly one transition out of active. Profit sign
    /// decides win/lose; the record moves atomically to the completed map.
    pub fn on_order_closed(&self, payload: &Value) -> Option<OrderResult> {
        let order_id = string_field(payload, "id")?;

        let mut state = self.state.write();
        let active = match state.active.remove(&order_id) {
            Some(active) => active,
            None => {
                warn!(%order_id, "order_closed_without_active");
                return None;
            }
        };

        let profit = payload.get("profit").and_then(Value::as_f64).unwrap_or(0.0);
        let result = OrderResult {
            status: if profit > 0.0 {
                OrderStatus::Win
            } else {
                OrderStatus::Lose
            },
            profit: Some(profit),
            payout: payload.get("payout").and_then(Value::as_f64),
            ..active
        };

        state.completed.insert(order_id.clone(), result.clone());
        info!(%order_id, status = ?result.status, profit, "order_closed");
        Some(result)
    }

    /// Completed map first, then active; absent if never seen.
    pub fn check_result(&self, order_id: &str) -> Option<OrderResult> {
        let state = self.state.read();
        state
            .completed
            .get(order_id)
            .or_else(|| state.active.get(order_id))
            .cloned()
    }

    /// Lookup by the caller's correlation key.
    pub fn result_for_request(&self, request_id: &str) -> Option<OrderResult> {
        let state = self.state.read();
        let order_id = state.request_index.get(request_id)?;
        state
            .completed
            .get(order_id)
            .or_else(|| state.active.get(order_id))
            .cloned()
    }

    pub fn active_orders(&self) -> Vec<OrderResult> {
        self.state.read().active.values().cloned().collect()
    }

    /// Poll until a matching order appears in either map or the window
    /// elapses. A timeout does not cancel background tracking; a late
    /// result still lands in the completed map.
    pub async fn wait_for_result(&self, request_id: &str, window: Duration) -> Result<OrderResult> {
        timeout(window, async {
            loop {
                if let Some(result) = self.result_for_request(request_id) {
                    return result;
                }
                sleep(RESULT_POLL_INTERVAL).await;
            }
        })
        .await
        .map_err(|_| PocketOptionError::OrderTimeout(request_id.to_string()))
    }
}

/// Ids arrive as either JSON strings or numbers.
fn string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
