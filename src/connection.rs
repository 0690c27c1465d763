//! One live transport: handshake state machine, receive loop, ping loop.
//!
//! A session moves Idle → Handshaking → Authenticating → Live and from
//! there only to Closed (exactly one `disconnected` event, whoever gets
//! there first). Handshake and auth failures are returned synchronously
//! from [`ConnectionSession::establish`]; once Live, faults surface only
//! through the event bus because nobody is blocked waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::codec::{self, Frame};
use crate::config::SessionConfig;
use crate::endpoints::Endpoint;
use crate::error::{PocketOptionError, Result};
use crate::events::{event, raw, EventBus};
use crate::monitor::SessionMonitor;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const OUTBOUND_QUEUE: usize = 256;

/// Connection lifecycle status as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

/// Consistent snapshot of the connection; replaced wholesale on every
/// transition, never partially mutated.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub url: String,
    pub region: String,
    pub status: ConnectionStatus,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

struct SessionShared {
    out_tx: mpsc::Sender<Message>,
    info: RwLock<ConnectionInfo>,
    closed: AtomicBool,
    bus: Arc<EventBus>,
    monitor: Arc<SessionMonitor>,
}

impl SessionShared {
    fn replace_info<F>(&self, transition: F)
    where
        F: FnOnce(&ConnectionInfo) -> ConnectionInfo,
    {
        let mut slot = self.info.write();
        let next = transition(&slot);
        *slot = next;
    }

    async fn send_raw(&self, frame: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PocketOptionError::NotConnected);
        }
        self.out_tx
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|_| PocketOptionError::NotConnected)?;
        self.monitor.record_sent();
        Ok(())
    }

    /// Exactly-once transition to Closed; publishes `disconnected`.
    async fn mark_closed(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.replace_info(|info| ConnectionInfo {
            status: ConnectionStatus::Disconnected,
            ..info.clone()
        });
        info!(reason, "session_closed");
        self.bus
            .publish(event::DISCONNECTED, json!({ "reason": reason }))
            .await;
    }
}

/// Exclusively owns one live transport.
pub struct ConnectionSession {
    shared: Arc<SessionShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Open a transport to one candidate endpoint and run the full
    /// handshake + auth sequence. The whole exchange is bounded by
    /// `config.handshake_timeout`; auth rejection is terminal for these
    /// credentials.
    pub async fn establish(
        endpoint: &Endpoint,
        auth_message: &str,
        config: &SessionConfig,
        bus: Arc<EventBus>,
        monitor: Arc<SessionMonitor>,
        reconnect_attempts: u32,
    ) -> Result<Self> {
        debug!(url = %endpoint.url, region = %endpoint.region, "session_connecting");

        let (mut ws, _response) = timeout(config.connect_timeout, connect_async(&endpoint.url))
            .await
            .map_err(|_| PocketOptionError::HandshakeTimeout(config.connect_timeout))??;

        Self::run_handshake(&mut ws, auth_message, config).await?;

        let info = ConnectionInfo {
            url: endpoint.url.clone(),
            region: endpoint.region.clone(),
            status: ConnectionStatus::Connected,
            connected_at: Some(Utc::now()),
            last_ping: None,
            reconnect_attempts,
        };

        let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);
        let shared = Arc::new(SessionShared {
            out_tx,
            info: RwLock::new(info),
            closed: AtomicBool::new(false),
            bus,
            monitor,
        });

        // No await between spawning the loops and returning: a caller
        // cancelled from here on drops the handle, and Drop tears the
        // loops down.
        let (sink, source) = ws.split();
        let tasks = vec![
            tokio::spawn(writer_loop(shared.clone(), out_rx, sink)),
            tokio::spawn(receive_loop(shared.clone(), source)),
            tokio::spawn(ping_loop(shared.clone(), config.ping_interval)),
        ];

        info!(region = %endpoint.region, "session_live");

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    /// Handshaking → Authenticating → Live, on the unsplit stream.
    async fn run_handshake(ws: &mut WsStream, auth_message: &str, config: &SessionConfig) -> Result<()> {
        let deadline = Instant::now() + config.handshake_timeout;
        let mut authenticating = false;

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(PocketOptionError::HandshakeTimeout(config.handshake_timeout))?;

            let message = timeout(remaining, ws.next())
                .await
                .map_err(|_| PocketOptionError::HandshakeTimeout(config.handshake_timeout))?
                .ok_or_else(|| {
                    PocketOptionError::Transport(
                        tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                    )
                })??;

            let text = match message {
                Message::Text(text) => text,
                Message::Ping(data) => {
                    ws.send(Message::Pong(data)).await?;
                    continue;
                }
                Message::Close(_) => {
                    return Err(PocketOptionError::Transport(
                        tokio_tungstenite::tungstenite::Error::ConnectionClosed,
                    ))
                }
                _ => continue,
            };

            match codec::decode(&text) {
                Frame::OpenHandshake { sid } => {
                    debug!(%sid, "handshake_open");
                    ws.send(Message::Text(codec::HANDSHAKE_ACK.to_string())).await?;
                }
                Frame::HeartbeatProbe => {
                    ws.send(Message::Text(codec::HEARTBEAT_REPLY.to_string())).await?;
                }
                Frame::UpgradeAck { sid } => {
                    debug!(%sid, "handshake_upgraded");
                    ws.send(Message::Text(auth_message.to_string())).await?;
                    authenticating = true;
                }
                Frame::Event { name, .. } if name == "successauth" => {
                    debug!("authenticated");
                    return Ok(());
                }
                Frame::AuthRejected { reason } => {
                    return Err(PocketOptionError::AuthenticationRejected(reason));
                }
                other => {
                    // Pre-auth noise (time sync frames etc.) is ignored.
                    debug!(stage_auth = authenticating, frame = ?other, "handshake_skip");
                }
            }
        }
    }

    /// Queue an outbound text frame.
    pub async fn send(&self, frame: &str) -> Result<()> {
        self.shared.send_raw(frame).await
    }

    pub fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
    }

    pub fn info(&self) -> ConnectionInfo {
        self.shared.info.read().clone()
    }

    /// Flag the stale snapshot while the supervisor retries.
    pub(crate) fn mark_reconnecting(&self) {
        self.shared.replace_info(|info| ConnectionInfo {
            status: ConnectionStatus::Reconnecting,
            ..info.clone()
        });
    }

    /// Idempotent close: cancels both loops and releases the transport.
    pub async fn close(&self) {
        self.shared.mark_closed("client_disconnect").await;
        let tasks = {
            let mut slot = self.tasks.lock();
            std::mem::take(&mut *slot)
        };
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // `close()` may never have run; the loops must not outlive the
        // handle that owns them.
        self.shared.closed.store(true, Ordering::Release);
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn writer_loop(shared: Arc<SessionShared>, mut out_rx: mpsc::Receiver<Message>, mut sink: WsSink) {
    while let Some(message) = out_rx.recv().await {
        if let Err(error) = sink.send(message).await {
            warn!(%error, "session_write_failed");
            shared.mark_closed("network_error").await;
            return;
        }
    }
    // Channel closed: session shut down, close the transport politely.
    let _ = sink.close().await;
}

async fn receive_loop(shared: Arc<SessionShared>, mut source: WsSource) {
    while let Some(result) = source.next().await {
        let message = match result {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "session_read_failed");
                shared.mark_closed("network_error").await;
                return;
            }
        };

        match message {
            Message::Text(text) => {
                shared.monitor.record_received();
                dispatch_frame(&shared, &text).await;
                if shared.closed.load(Ordering::Acquire) {
                    return;
                }
            }
            Message::Ping(data) => {
                let _ = shared.out_tx.send(Message::Pong(data)).await;
            }
            Message::Close(frame) => {
                debug!(?frame, "server_close_frame");
                shared.mark_closed("server_close").await;
                return;
            }
            _ => {}
        }
    }
    shared.mark_closed("stream_end").await;
}

/// Decode one inbound frame and fan it out. The heartbeat reply is
/// queued before any event from the same batch is published, preserving
/// the probe-first ordering invariant.
async fn dispatch_frame(shared: &Arc<SessionShared>, text: &str) {
    match codec::decode(text) {
        Frame::HeartbeatProbe => {
            if shared.send_raw(codec::HEARTBEAT_REPLY).await.is_err() {
                shared.mark_closed("network_error").await;
            }
        }
        Frame::Event { name, payload } => {
            let mapped = map_server_event(&name);
            if mapped == event::UNKNOWN_EVENT {
                shared
                    .bus
                    .publish(mapped, json!({ "type": name, "data": payload }))
                    .await;
            } else {
                shared.bus.publish(mapped, payload).await;
            }
        }
        Frame::AuthRejected { reason } => {
            warn!(%reason, "auth_rejected_mid_session");
            shared.mark_closed("auth_rejected").await;
        }
        Frame::OpenHandshake { .. } | Frame::UpgradeAck { .. } => {
            debug!("handshake_frame_after_live");
        }
        Frame::Unknown { raw } => {
            shared
                .bus
                .publish(event::UNKNOWN_EVENT, json!({ "raw": raw }))
                .await;
        }
    }
}

/// Server event name → bus event name. Payloads needing reconciliation
/// (orders, balance, stream time, candles) relay through internal names
/// so the client can publish the finalized domain event afterwards.
fn map_server_event(name: &str) -> &'static str {
    match name {
        "successauth" => event::AUTHENTICATED,
        "successupdateBalance" => raw::BALANCE,
        "successopenOrder" => raw::ORDER_OPENED,
        "successcloseOrder" => raw::ORDER_CLOSED,
        "updateStream" => raw::STREAM,
        "loadHistoryPeriod" => raw::HISTORY,
        "updateHistoryNew" => event::HISTORY_UPDATE,
        _ => event::UNKNOWN_EVENT,
    }
}

async fn ping_loop(shared: Arc<SessionShared>, interval: std::time::Duration) {
    loop {
        sleep(interval).await;
        if shared.closed.load(Ordering::Acquire) {
            return;
        }
        if shared.send_raw(codec::PING_FRAME).await.is_err() {
            shared.mark_closed("ping_failed").await;
            return;
        }
        shared.monitor.record_ping();
        shared.replace_info(|info| ConnectionInfo {
            last_ping: Some(Utc::now()),
            ..info.clone()
        });
        debug!("ping_sent");
    }
}
