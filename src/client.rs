//! Top-level client facade.
//!
//! Owns the long-lived collaborators (event bus, stats monitor, order
//! and history trackers, reconnection supervisor) and wires raw server
//! payloads into typed caches before re-publishing the public domain
//! events. The trackers outlive any single connection session, so order
//! and history state survive reconnects unchanged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::catalog::{AssetCatalog, Timeframes};
use crate::codec;
use crate::config::SessionConfig;
use crate::connection::ConnectionInfo;
use crate::endpoints::EndpointResolver;
use crate::error::{PocketOptionError, Result};
use crate::events::{event, raw, EventBus, EventHandler, SubscriptionId};
use crate::history::{Candle, HistoryTracker};
use crate::monitor::{ConnectionStats, SessionMonitor};
use crate::orders::{
    Order, OrderDirection, OrderResult, OrderTracker, MAX_DURATION_SECS, MAX_ORDER_AMOUNT,
    MIN_DURATION_SECS, MIN_ORDER_AMOUNT,
};
use crate::session::SessionDescriptor;
use crate::supervisor::ReconnectSupervisor;

/// Cached account balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: f64,
    pub currency: String,
    pub is_demo: bool,
    pub last_updated: DateTime<Utc>,
}

/// Server clock synchronization snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerTime {
    pub server_timestamp: f64,
    pub local_timestamp: f64,
    pub offset: f64,
    pub last_sync: DateTime<Utc>,
}

/// Builder for [`PocketOptionClient`].
pub struct ClientBuilder {
    descriptor: SessionDescriptor,
    config: SessionConfig,
    resolver: EndpointResolver,
    catalog: AssetCatalog,
    timeframes: Timeframes,
}

impl ClientBuilder {
    pub fn new(descriptor: SessionDescriptor) -> Self {
        Self {
            descriptor,
            config: SessionConfig::default(),
            resolver: EndpointResolver::default(),
            catalog: AssetCatalog::default(),
            timeframes: Timeframes::default(),
        }
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn catalog(mut self, catalog: AssetCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn timeframes(mut self, timeframes: Timeframes) -> Self {
        self.timeframes = timeframes;
        self
    }

    pub fn build(self) -> PocketOptionClient {
        PocketOptionClient::assemble(
            self.descriptor,
            self.config,
            self.resolver,
            self.catalog,
            self.timeframes,
        )
    }
}

pub struct PocketOptionClient {
    descriptor: SessionDescriptor,
    config: SessionConfig,
    catalog: AssetCatalog,
    timeframes: Timeframes,
    bus: Arc<EventBus>,
    monitor: Arc<SessionMonitor>,
    supervisor: Arc<ReconnectSupervisor>,
    orders: Arc<OrderTracker>,
    history: Arc<HistoryTracker>,
    balance: Arc<RwLock<Option<Balance>>>,
    server_time: Arc<RwLock<Option<ServerTime>>>,
}

impl PocketOptionClient {
    /// Client over the default endpoints, config and instrument tables.
    pub fn new(descriptor: SessionDescriptor) -> Self {
        ClientBuilder::new(descriptor).build()
    }

    pub fn builder(descriptor: SessionDescriptor) -> ClientBuilder {
        ClientBuilder::new(descriptor)
    }

    fn assemble(
        descriptor: SessionDescriptor,
        config: SessionConfig,
        resolver: EndpointResolver,
        catalog: AssetCatalog,
        timeframes: Timeframes,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let monitor = Arc::new(SessionMonitor::new());
        let supervisor = Arc::new(ReconnectSupervisor::new(
            descriptor.clone(),
            resolver,
            config.clone(),
            bus.clone(),
            monitor.clone(),
        ));

        let client = Self {
            descriptor,
            config,
            catalog,
            timeframes,
            bus,
            monitor,
            supervisor,
            orders: Arc::new(OrderTracker::new()),
            history: Arc::new(HistoryTracker::new()),
            balance: Arc::new(RwLock::new(None)),
            server_time: Arc::new(RwLock::new(None)),
        };
        client.wire_internal_handlers();
        client
    }

    /// Subscribe the reconciliation handlers that turn raw server
    /// payloads into typed caches and public domain events.
    fn wire_internal_handlers(&self) {
        let bus = self.bus.clone();
        let balance_slot = self.balance.clone();
        let is_demo = self.descriptor.is_demo();
        self.bus.subscribe_async(raw::BALANCE, move |payload| {
            let bus = bus.clone();
            let balance_slot = balance_slot.clone();
            async move {
                if let Some(amount) = payload.get("balance").and_then(Value::as_f64) {
                    let balance = Balance {
                        balance: amount,
                        currency: payload
                            .get("currency")
                            .and_then(Value::as_str)
                            .unwrap_or("USD")
                            .to_string(),
                        is_demo,
                        last_updated: Utc::now(),
                    };
                    *balance_slot.write() = Some(balance.clone());
                    debug!(balance = amount, "balance_updated");
                    if let Ok(value) = serde_json::to_value(&balance) {
                        bus.publish(event::BALANCE_UPDATED, value).await;
                    }
                }
            }
        });

        let bus = self.bus.clone();
        let orders = self.orders.clone();
        self.bus.subscribe_async(raw::ORDER_OPENED, move |payload| {
            let bus = bus.clone();
            let orders = orders.clone();
            async move {
                if let Some(result) = orders.on_order_opened(&payload) {
                    if let Ok(value) = serde_json::to_value(&result) {
                        bus.publish(event::ORDER_OPENED, value).await;
                    }
                } else {
                    // Unknown correlation key: forward raw for observers.
                    bus.publish(event::ORDER_OPENED, payload).await;
                }
            }
        });

        let bus = self.bus.clone();
        let orders = self.orders.clone();
        self.bus.subscribe_async(raw::ORDER_CLOSED, move |payload| {
            let bus = bus.clone();
            let orders = orders.clone();
            async move {
                if let Some(result) = orders.on_order_closed(&payload) {
                    if let Ok(value) = serde_json::to_value(&result) {
                        bus.publish(event::ORDER_CLOSED, value).await;
                    }
                } else {
                    bus.publish(event::ORDER_CLOSED, payload).await;
                }
            }
        });

        let bus = self.bus.clone();
        let time_slot = self.server_time.clone();
        self.bus.subscribe_async(raw::STREAM, move |payload| {
            let bus = bus.clone();
            let time_slot = time_slot.clone();
            async move {
                if let Some(server_ts) = stream_timestamp(&payload) {
                    let local_ts = Utc::now().timestamp_millis() as f64 / 1000.0;
                    *time_slot.write() = Some(ServerTime {
                        server_timestamp: server_ts,
                        local_timestamp: local_ts,
                        offset: server_ts - local_ts,
                        last_sync: Utc::now(),
                    });
                }
                bus.publish(event::STREAM_UPDATE, payload).await;
            }
        });

        let bus = self.bus.clone();
        let history = self.history.clone();
        self.bus.subscribe_async(raw::HISTORY, move |payload| {
            let bus = bus.clone();
            let history = history.clone();
            async move {
                history.on_history_response(&payload);
                bus.publish(event::CANDLES_RECEIVED, payload).await;
            }
        });
    }

    /// Connect using the descriptor's mode (demo vs live). `persistent`
    /// starts the reconnection monitor after the first success.
    pub async fn connect(&self, preferred_region: Option<&str>, persistent: bool) -> Result<bool> {
        let connected = self.supervisor.connect(preferred_region).await?;
        if connected && persistent {
            self.supervisor.start_monitor();
        }
        Ok(connected)
    }

    /// Teardown in the safe order; resets stats.
    pub async fn disconnect(&self) {
        self.supervisor.disconnect().await;
        info!("client_disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.is_connected()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.supervisor.connection_info()
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        self.monitor.snapshot()
    }

    /// Validate, submit, and wait for the server acknowledgement.
    /// Validation failures happen before any frame is sent.
    pub async fn place_order(
        &self,
        asset: &str,
        amount: f64,
        direction: OrderDirection,
        duration: u32,
    ) -> Result<OrderResult> {
        self.validate_order(asset, amount, duration)?;

        if !self.is_connected() {
            return Err(PocketOptionError::NotConnected);
        }

        let order = Order::new(asset, amount, direction, duration)?;
        self.orders.register(&order);

        let payload = json!({
            "asset": order.asset,
            "amount": order.amount,
            "action": order.direction.as_str(),
            "isDemo": if self.descriptor.is_demo() { 1 } else { 0 },
            "requestId": order.request_id,
            "optionType": 100,
            "time": order.duration,
        });
        self.supervisor
            .send(&codec::encode_event("openOrder", &payload))
            .await?;

        self.orders
            .wait_for_result(&order.request_id, self.config.order_result_timeout)
            .await
    }

    pub fn check_order_result(&self, order_id: &str) -> Option<OrderResult> {
        self.orders.check_result(order_id)
    }

    pub fn get_active_orders(&self) -> Vec<OrderResult> {
        self.orders.active_orders()
    }

    /// Wait out a previously submitted order by its correlation key.
    pub async fn wait_for_order_result(
        &self,
        request_id: &str,
        window: Duration,
    ) -> Result<OrderResult> {
        self.orders.wait_for_result(request_id, window).await
    }

    /// Request historical candles by timeframe label (`"1m"`, `"1h"`…).
    pub async fn get_candles(
        &self,
        asset: &str,
        timeframe: &str,
        count: u32,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let period = self
            .timeframes
            .to_seconds(timeframe)
            .ok_or_else(|| {
                PocketOptionError::InvalidParameter(format!("invalid timeframe: {timeframe}"))
            })?;
        self.get_candles_period(asset, period, count, end_time).await
    }

    /// Request historical candles by period in seconds.
    pub async fn get_candles_period(
        &self,
        asset: &str,
        period: u32,
        count: u32,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        if !self.catalog.is_valid(asset) {
            return Err(PocketOptionError::InvalidParameter(format!(
                "invalid asset: {asset}"
            )));
        }
        if !self.is_connected() {
            return Err(PocketOptionError::NotConnected);
        }

        let end_time = end_time.unwrap_or_else(Utc::now);
        let payload = self.history.register(asset, period, count, end_time);
        self.supervisor
            .send(&codec::encode_event("loadHistoryPeriod", &payload))
            .await?;

        self.history
            .wait(asset, period, self.config.history_timeout)
            .await
    }

    pub fn balance(&self) -> Option<Balance> {
        self.balance.read().clone()
    }

    pub fn server_time(&self) -> Option<ServerTime> {
        self.server_time.read().clone()
    }

    /// Subscribe a synchronous callback to a domain event.
    pub fn on_event<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.bus.subscribe_fn(name, handler)
    }

    /// Subscribe an async callback to a domain event.
    pub fn on_event_async<F, Fut>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.bus.subscribe_async(name, handler)
    }

    /// Subscribe a handler object (sync or async behind the trait).
    pub fn on_event_handler(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.bus.subscribe(name, handler)
    }

    pub fn off_event(&self, name: &str, id: SubscriptionId) {
        self.bus.unsubscribe(name, id);
    }

    /// Escape hatch: send a raw protocol frame.
    pub async fn send_raw_message(&self, frame: &str) -> Result<()> {
        self.supervisor.send(frame).await
    }

    fn validate_order(&self, asset: &str, amount: f64, duration: u32) -> Result<()> {
        if !self.catalog.is_valid(asset) {
            return Err(PocketOptionError::InvalidParameter(format!(
                "invalid asset: {asset}"
            )));
        }
        if !(MIN_ORDER_AMOUNT..=MAX_ORDER_AMOUNT).contains(&amount) {
            return Err(PocketOptionError::InvalidParameter(format!(
                "amount must be between {MIN_ORDER_AMOUNT} and {MAX_ORDER_AMOUNT}"
            )));
        }
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration) {
            return Err(PocketOptionError::InvalidParameter(format!(
                "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds"
            )));
        }
        Ok(())
    }
}

/// The stream payload is a list; its head is either a `{timestamp: …}`
/// object or a bare epoch number.
fn stream_timestamp(payload: &Value) -> Option<f64> {
    let head = payload.as_array()?.first()?;
    match head {
        Value::Object(map) => map.get("timestamp").and_then(Value::as_f64),
        other => other.as_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_client() -> PocketOptionClient {
        let descriptor = SessionDescriptor::from_fields("tok", true, 1, 1, true);
        PocketOptionClient::new(descriptor)
    }

    #[tokio::test]
    async fn order_validation_rejects_before_any_io() {
        let client = demo_client();

        // Below minimum amount.
        let result = client
            .place_order("EURUSD_otc", 0.5, OrderDirection::Call, 60)
            .await;
        assert!(matches!(result, Err(PocketOptionError::InvalidParameter(_))));

        // Unknown asset.
        let result = client
            .place_order("NOPE", 1.0, OrderDirection::Call, 60)
            .await;
        assert!(matches!(result, Err(PocketOptionError::InvalidParameter(_))));

        // Duration above maximum.
        let result = client
            .place_order("EURUSD_otc", 1.0, OrderDirection::Put, 50_000)
            .await;
        assert!(matches!(result, Err(PocketOptionError::InvalidParameter(_))));

        // Nothing went out.
        assert_eq!(client.connection_stats().messages_sent, 0);
    }

    #[tokio::test]
    async fn valid_order_without_session_is_not_connected() {
        let client = demo_client();
        let result = client
            .place_order("EURUSD_otc", 1.0, OrderDirection::Call, 60)
            .await;
        assert!(matches!(result, Err(PocketOptionError::NotConnected)));
        assert_eq!(client.connection_stats().messages_sent, 0);
    }

    #[tokio::test]
    async fn balance_cache_updates_from_raw_event() {
        let client = demo_client();
        assert!(client.balance().is_none());

        client
            .bus
            .publish(raw::BALANCE, json!({"balance": 512.5, "currency": "USD"}))
            .await;

        let balance = client.balance().unwrap();
        assert_eq!(balance.balance, 512.5);
        assert!(balance.is_demo);
    }

    #[tokio::test]
    async fn order_events_flow_through_tracker_to_domain_event() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let client = demo_client();
        let closes = Arc::new(AtomicUsize::new(0));

        let closes_clone = closes.clone();
        client.on_event(event::ORDER_CLOSED, move |payload| {
            // The finalized result carries a status, not a raw frame.
            assert_eq!(payload["status"], "win");
            closes_clone.fetch_add(1, Ordering::SeqCst);
        });

        let order = Order::new("EURUSD_otc", 1.0, OrderDirection::Call, 60).unwrap();
        client.orders.register(&order);

        client
            .bus
            .publish(raw::ORDER_OPENED, json!({"id": "X", "requestId": order.request_id}))
            .await;
        assert_eq!(client.get_active_orders().len(), 1);
        assert_eq!(
            client.check_order_result("X").unwrap().status,
            crate::orders::OrderStatus::Active
        );

        client
            .bus
            .publish(raw::ORDER_CLOSED, json!({"id": "X", "profit": 5.0}))
            .await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(client.get_active_orders().is_empty());
        assert_eq!(
            client.check_order_result("X").unwrap().status,
            crate::orders::OrderStatus::Win
        );
        assert_eq!(client.check_order_result("X").unwrap().profit, Some(5.0));
    }

    #[tokio::test]
    async fn server_time_offset_tracks_stream_updates() {
        let client = demo_client();
        let now = Utc::now().timestamp() as f64;
        client
            .bus
            .publish(raw::STREAM, json!([{"timestamp": now + 2.0}]))
            .await;

        let server_time = client.server_time().unwrap();
        assert!(server_time.offset > 0.0);
        assert!(server_time.offset < 5.0);
    }

    #[tokio::test]
    async fn invalid_timeframe_label_fails_fast() {
        let client = demo_client();
        let result = client.get_candles("EURUSD_otc", "9q", 100, None).await;
        assert!(matches!(result, Err(PocketOptionError::InvalidParameter(_))));
        assert_eq!(client.connection_stats().messages_sent, 0);
    }
}
