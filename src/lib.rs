//! Async client for the PocketOption trading WebSocket.
//!
//! Speaks the Engine.IO/Socket.IO text protocol: handshake, auth replay,
//! heartbeats, event frames. A supervisor owns at most one live session
//! and handles region failover and reconnection; order and history
//! trackers reconcile server acknowledgements into typed results that
//! survive reconnects.
//!
//! ```no_run
//! use pocketoption_client::{OrderDirection, PocketOptionClient, SessionDescriptor};
//!
//! # async fn run() -> pocketoption_client::Result<()> {
//! let descriptor = SessionDescriptor::from_ssid("ssid-or-auth-string", true, 0, 1);
//! let client = PocketOptionClient::new(descriptor);
//!
//! client.connect(None, true).await?;
//! let result = client
//!     .place_order("EURUSD_otc", 10.0, OrderDirection::Call, 60)
//!     .await?;
//! println!("order {} is {:?}", result.order_id, result.status);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod history;
pub mod monitor;
pub mod orders;
pub mod session;
pub mod supervisor;

pub use catalog::{AssetCatalog, Timeframes};
pub use client::{Balance, ClientBuilder, PocketOptionClient, ServerTime};
pub use codec::Frame;
pub use config::SessionConfig;
pub use connection::{ConnectionInfo, ConnectionStatus};
pub use endpoints::{Endpoint, EndpointResolver};
pub use error::{PocketOptionError, Result};
pub use events::{event, EventBus, EventHandler, SubscriptionId};
pub use history::Candle;
pub use monitor::{ConnectionStats, SessionMonitor};
pub use orders::{Order, OrderDirection, OrderResult, OrderStatus, OrderTracker};
pub use session::SessionDescriptor;
pub use supervisor::ReconnectSupervisor;
