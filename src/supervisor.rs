//! Reconnection supervisor: zero-or-one live session, region failover,
//! and a single monitor task instead of recursive reconnect call chains.
//!
//! The monitor is the only place a reconnect attempt starts, so at most
//! one attempt is ever in flight. Caller-initiated disconnect disables
//! auto-reconnect first, then cancels the monitor, then closes the
//! session — in that order, so the monitor can never resurrect a session
//! the caller just tore down.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::connection::{ConnectionInfo, ConnectionSession};
use crate::endpoints::EndpointResolver;
use crate::error::{PocketOptionError, Result};
use crate::events::{event, EventBus};
use crate::monitor::SessionMonitor;
use crate::session::SessionDescriptor;

pub struct ReconnectSupervisor {
    descriptor: SessionDescriptor,
    resolver: EndpointResolver,
    config: SessionConfig,
    bus: Arc<EventBus>,
    monitor: Arc<SessionMonitor>,
    current: RwLock<Option<Arc<ConnectionSession>>>,
    preferred_region: RwLock<Option<String>>,
    auto_reconnect: AtomicBool,
    exhausted: AtomicBool,
    consecutive_failures: AtomicU32,
    connect_lock: tokio::sync::Mutex<()>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl ReconnectSupervisor {
    pub fn new(
        descriptor: SessionDescriptor,
        resolver: EndpointResolver,
        config: SessionConfig,
        bus: Arc<EventBus>,
        monitor: Arc<SessionMonitor>,
    ) -> Self {
        Self {
            descriptor,
            resolver,
            config,
            bus,
            monitor,
            current: RwLock::new(None),
            preferred_region: RwLock::new(None),
            auto_reconnect: AtomicBool::new(false),
            exhausted: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            connect_lock: tokio::sync::Mutex::new(()),
            monitor_task: Mutex::new(None),
        }
    }

    /// Walk the candidate endpoints once; first successful handshake+auth
    /// wins. Returns `Ok(false)` when every candidate failed for
    /// transport reasons; auth rejection propagates and is never retried.
    pub async fn connect(&self, preferred_region: Option<&str>) -> Result<bool> {
        *self.preferred_region.write() = preferred_region.map(str::to_string);
        self.exhausted.store(false, Ordering::Release);
        self.connect_once().await
    }

    async fn connect_once(&self) -> Result<bool> {
        let _guard = self.connect_lock.lock().await;

        if self.is_connected() {
            return Ok(true);
        }

        let preferred = self.preferred_region.read().clone();
        let candidates = self
            .resolver
            .candidates(self.descriptor.is_demo(), preferred.as_deref());
        let auth_message = self.descriptor.auth_message();
        let attempts = self.consecutive_failures.load(Ordering::Relaxed);

        for endpoint in &candidates {
            match ConnectionSession::establish(
                endpoint,
                &auth_message,
                &self.config,
                self.bus.clone(),
                self.monitor.clone(),
                attempts,
            )
            .await
            {
                Ok(session) => {
                    // Adopt before the first await so a cancelled caller
                    // leaves the session reachable for teardown.
                    let session = Arc::new(session);
                    *self.current.write() = Some(session);
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    self.exhausted.store(false, Ordering::Release);
                    info!(region = %endpoint.region, "supervisor_connected");
                    self.bus.publish(event::AUTHENTICATED, json!({})).await;
                    self.bus
                        .publish(
                            event::CONNECTED,
                            json!({ "region": endpoint.region, "url": endpoint.url }),
                        )
                        .await;
                    return Ok(true);
                }
                Err(PocketOptionError::AuthenticationRejected(reason)) => {
                    error!(region = %endpoint.region, %reason, "auth_rejected");
                    return Err(PocketOptionError::AuthenticationRejected(reason));
                }
                Err(error) => {
                    warn!(region = %endpoint.region, %error, "endpoint_failed");
                }
            }
        }

        Ok(false)
    }

    /// Start the reconnection monitor. Idempotent; a second call while
    /// the monitor runs is a no-op.
    pub fn start_monitor(self: &Arc<Self>) {
        let mut slot = self.monitor_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        self.auto_reconnect.store(true, Ordering::Release);
        let supervisor = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            supervisor.monitor_loop().await;
        }));
    }

    async fn monitor_loop(self: Arc<Self>) {
        loop {
            sleep(self.config.reconnect_check_interval).await;

            if !self.auto_reconnect.load(Ordering::Acquire) {
                return;
            }
            if self.is_connected() {
                continue;
            }

            let attempt = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(cap) = self.config.max_reconnect_attempts {
                if attempt > cap {
                    warn!(cap, "reconnect_exhausted");
                    self.auto_reconnect.store(false, Ordering::Release);
                    self.exhausted.store(true, Ordering::Release);
                    self.bus
                        .publish(event::RECONNECT_EXHAUSTED, json!({ "attempts": cap }))
                        .await;
                    return;
                }
            }

            if let Some(session) = self.current.read().as_ref() {
                session.mark_reconnecting();
            }

            debug!(attempt, "reconnect_attempt");
            match self.connect_once().await {
                Ok(true) => {
                    self.monitor.record_reconnect();
                    info!(attempt, "reconnected");
                    self.bus
                        .publish(event::RECONNECTED, json!({ "attempt": attempt }))
                        .await;
                }
                Ok(false) => {
                    let delay = jittered(self.config.reconnect_delay);
                    debug!(attempt, ?delay, "reconnect_failed_waiting");
                    sleep(delay).await;
                }
                Err(error) => {
                    // Auth rejection is not retried with the same
                    // credentials; anything else waits for the next tick.
                    error!(%error, "reconnect_error");
                    if matches!(error, PocketOptionError::AuthenticationRejected(_)) {
                        self.auto_reconnect.store(false, Ordering::Release);
                        return;
                    }
                }
            }
        }
    }

    /// Caller-initiated teardown: auto-reconnect off, monitor cancelled,
    /// session closed, stats reset — in that order.
    pub async fn disconnect(&self) {
        self.auto_reconnect.store(false, Ordering::Release);

        let task = self.monitor_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }

        // An aborted monitor holds the lock until its connect attempt is
        // actually dropped; waiting here means a session adopted by that
        // attempt cannot slip past the teardown below.
        let _guard = self.connect_lock.lock().await;

        let session = self.current.write().take();
        if let Some(session) = session {
            session.close().await;
        }

        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.exhausted.store(false, Ordering::Release);
        self.monitor.reset();
        info!("supervisor_disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .as_ref()
            .is_some_and(|session| session.is_connected())
    }

    pub fn auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect.load(Ordering::Acquire)
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        self.current.read().as_ref().map(|session| session.info())
    }

    /// Send a frame over the current session. Once the monitor has given
    /// up, the error says so instead of a bare not-connected.
    pub async fn send(&self, frame: &str) -> Result<()> {
        if self.exhausted.load(Ordering::Acquire) {
            return Err(PocketOptionError::ReconnectExhausted(
                self.config.max_reconnect_attempts.unwrap_or(0),
            ));
        }
        let session = self.current.read().as_ref().cloned();
        match session {
            Some(session) => session.send(frame).await,
            None => Err(PocketOptionError::NotConnected),
        }
    }
}

fn jittered(base: std::time::Duration) -> std::time::Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::Endpoint;

    fn supervisor() -> Arc<ReconnectSupervisor> {
        let descriptor = SessionDescriptor::from_fields("tok", true, 1, 1, true);
        let resolver = EndpointResolver::from_endpoints(vec![Endpoint::new(
            "TEST",
            "ws://127.0.0.1:1", // nothing listens here
        )]);
        Arc::new(ReconnectSupervisor::new(
            descriptor,
            resolver,
            SessionConfig::default(),
            Arc::new(EventBus::new()),
            Arc::new(SessionMonitor::new()),
        ))
    }

    #[tokio::test]
    async fn connect_returns_false_when_all_candidates_fail() {
        let supervisor = supervisor();
        let connected = supervisor.connect(None).await.unwrap();
        assert!(!connected);
        assert!(!supervisor.is_connected());
        assert!(supervisor.connection_info().is_none());
    }

    #[tokio::test]
    async fn send_without_session_is_not_connected() {
        let supervisor = supervisor();
        let result = supervisor.send("42[\"ps\"]").await;
        assert!(matches!(result, Err(PocketOptionError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnect_disables_auto_reconnect() {
        let supervisor = supervisor();
        supervisor.start_monitor();
        assert!(supervisor.auto_reconnect_enabled());

        supervisor.disconnect().await;
        assert!(!supervisor.auto_reconnect_enabled());
        // Monitor task slot is drained.
        assert!(supervisor.monitor_task.lock().is_none());
    }

    #[tokio::test]
    async fn send_after_exhaustion_reports_the_attempt_cap() {
        let descriptor = SessionDescriptor::from_fields("tok", true, 1, 1, true);
        let resolver = EndpointResolver::from_endpoints(vec![Endpoint::new(
            "TEST",
            "ws://127.0.0.1:1",
        )]);
        let config = SessionConfig {
            reconnect_check_interval: std::time::Duration::from_millis(20),
            reconnect_delay: std::time::Duration::from_millis(10),
            max_reconnect_attempts: Some(1),
            ..SessionConfig::default()
        };
        let supervisor = Arc::new(ReconnectSupervisor::new(
            descriptor,
            resolver,
            config,
            Arc::new(EventBus::new()),
            Arc::new(SessionMonitor::new()),
        ));

        supervisor.start_monitor();
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;

        assert!(!supervisor.auto_reconnect_enabled());
        let result = supervisor.send("42[\"ps\"]").await;
        assert!(matches!(
            result,
            Err(PocketOptionError::ReconnectExhausted(1))
        ));

        // A fresh caller-initiated connect clears the exhaustion state.
        let _ = supervisor.connect(None).await;
        let result = supervisor.send("42[\"ps\"]").await;
        assert!(matches!(result, Err(PocketOptionError::NotConnected)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = std::time::Duration::from_millis(1000);
        for _ in 0..100 {
            let d = jittered(base);
            assert!(d >= std::time::Duration::from_millis(800));
            assert!(d <= std::time::Duration::from_millis(1200));
        }
    }
}
