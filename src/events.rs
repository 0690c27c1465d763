//! In-process publish/subscribe for decoded domain events.
//!
//! Handlers for one event fire in subscription order; a failing handler
//! is logged and never blocks delivery to the rest. No ordering is
//! guaranteed across different event names published concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error};

/// Domain event names published by the client.
pub mod event {
    pub const CONNECTED: &str = "connected";
    pub const AUTHENTICATED: &str = "authenticated";
    pub const DISCONNECTED: &str = "disconnected";
    pub const RECONNECTED: &str = "reconnected";
    pub const RECONNECT_EXHAUSTED: &str = "reconnect_exhausted";
    pub const BALANCE_UPDATED: &str = "balance_updated";
    pub const ORDER_OPENED: &str = "order_opened";
    pub const ORDER_CLOSED: &str = "order_closed";
    pub const STREAM_UPDATE: &str = "stream_update";
    pub const CANDLES_RECEIVED: &str = "candles_received";
    pub const HISTORY_UPDATE: &str = "history_update";
    pub const UNKNOWN_EVENT: &str = "unknown_event";
}

/// Internal relay names for raw server payloads. The client consumes
/// these, updates its caches/trackers, then publishes the public domain
/// event with the finalized payload.
pub(crate) mod raw {
    pub const BALANCE: &str = "raw_balance";
    pub const ORDER_OPENED: &str = "raw_order_opened";
    pub const ORDER_CLOSED: &str = "raw_order_closed";
    pub const STREAM: &str = "raw_stream";
    pub const HISTORY: &str = "raw_history";
}

/// Uniform handler interface; sync closures wrap into it via
/// [`EventBus::subscribe_fn`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &Value) -> Result<(), String>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Value) + Send + Sync,
{
    async fn handle(&self, payload: &Value) -> Result<(), String> {
        (self.0)(payload);
        Ok(())
    }
}

struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for AsyncFnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, payload: &Value) -> Result<(), String> {
        (self.0)(payload.clone()).await;
        Ok(())
    }
}

/// Token returned by subscribe; used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, Arc<dyn EventHandler>)>>,
}

/// Subscription table keyed by event name.
#[derive(Default)]
pub struct EventBus {
    registry: RwLock<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let mut registry = self.registry.write();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .handlers
            .entry(name.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Subscribe a synchronous closure.
    pub fn subscribe_fn<F>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(name, Arc::new(FnHandler(handler)))
    }

    /// Subscribe an async closure.
    pub fn subscribe_async<F, Fut>(&self, name: &str, handler: F) -> SubscriptionId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(name, Arc::new(AsyncFnHandler(handler)))
    }

    /// Remove a handler. Unknown ids are a no-op.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) {
        let mut registry = self.registry.write();
        if let Some(list) = registry.handlers.get_mut(name) {
            list.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Deliver a payload to every subscriber of `name`, in subscription
    /// order. Handler failures are logged, never propagated.
    pub async fn publish(&self, name: &str, payload: Value) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let registry = self.registry.read();
            match registry.handlers.get(name) {
                Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
                None => {
                    debug!(event = name, "no subscribers");
                    return;
                }
            }
        };

        for handler in handlers {
            if let Err(reason) = handler.handle(&payload).await {
                error!(event = name, %reason, "event handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use parking_lot::Mutex;
    use serde_json::json;

    #[tokio::test]
    async fn handlers_fire_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe_fn("tick", move |_| order.lock().push(tag));
        }

        bus.publish("tick", json!({})).await;
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_later_subscribers() {
        struct Failing;
        #[async_trait]
        impl EventHandler for Failing {
            async fn handle(&self, _payload: &Value) -> Result<(), String> {
                Err("boom".to_string())
            }
        }

        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("tick", Arc::new(Failing));
        let hits_clone = hits.clone();
        bus.subscribe_fn("tick", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish("tick", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_handler() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_a = hits.clone();
        let id_a = bus.subscribe_fn("tick", move |_| {
            hits_a.fetch_add(1, Ordering::SeqCst);
        });
        let hits_b = hits.clone();
        bus.subscribe_fn("tick", move |_| {
            hits_b.fetch_add(10, Ordering::SeqCst);
        });

        bus.unsubscribe("tick", id_a);
        bus.publish("tick", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn async_handlers_are_awaited() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = hits.clone();
        bus.subscribe_async("tick", move |_payload| {
            let hits = hits_clone.clone();
            async move {
                tokio::task::yield_now().await;
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish("tick", json!({})).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.publish("nobody_home", json!({"x": 1})).await;
    }
}
