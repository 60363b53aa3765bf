//! Live transaction-update feed.
//!
//! A [`FeedManager`] owns one duplex connection to the update endpoint and fans
//! every valid inbound event out to all registered subscribers. It reconnects
//! after a fixed delay, a bounded number of consecutive times, and resets the
//! count whenever a connection opens. Subscribing while disconnected always
//! starts a fresh attempt, including after automatic retries are exhausted.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use txwatch::config::FeedConfig;
//! use txwatch::feed::{FeedManager, UpdateEvent};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let feed = FeedManager::new(FeedConfig::new("ws://localhost:3000/ws"));
//!
//! let interest = feed.subscribe("transaction-T-1001-052", |event: Arc<UpdateEvent>| async move {
//!     if event.concerns_transaction("T-1001-052") {
//!         println!("refresh {:?}", event.transaction_update());
//!     }
//!     Ok::<_, anyhow::Error>(())
//! });
//!
//! feed.announce_resolved("T-1001-052");
//! feed.unsubscribe(interest.key());
//! # Ok(())
//! # }
//! ```

pub mod event;
mod registry;
mod state;
mod stats;
pub mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::error::FaultKind;
use registry::SubscriberRegistry;
use state::InternalState;
use stats::FeedStats;

pub use event::{EventKind, TransactionUpdate, UpdateEvent};
pub use registry::{Interest, UpdateHandler};
pub use state::ConnectionState;
pub use stats::StatsSnapshot;
pub use transport::{Connection, Connector, WsConnector};

static GLOBAL: Lazy<FeedManager> = Lazy::new(|| {
    let config = FeedConfig::from_env().unwrap_or_else(|e| {
        warn!(error = %e, "Feed configuration incomplete; connection attempts will fail");
        FeedConfig::default()
    });
    FeedManager::new(config)
});

struct Shared {
    config: FeedConfig,
    connector: Arc<dyn Connector>,
    state: RwLock<InternalState>,
    registry: SubscriberRegistry,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    stats: Arc<FeedStats>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Handle to a shared feed connection. Clones share the same connection.
#[derive(Clone)]
pub struct FeedManager {
    shared: Arc<Shared>,
}

impl FeedManager {
    /// Manager connecting over WebSocket
    pub fn new(config: FeedConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(config: FeedConfig, connector: Arc<dyn Connector>) -> Self {
        let stats = Arc::new(FeedStats::default());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state: RwLock::new(InternalState::new()),
                registry: SubscriberRegistry::new(Arc::clone(&stats)),
                outbound: Mutex::new(None),
                stats,
                state_tx,
            }),
        }
    }

    /// Process-wide manager, built from the environment on first use
    pub fn global() -> &'static FeedManager {
        &GLOBAL
    }

    /// Start a connection attempt unless one is open or already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        {
            let mut state = self.shared.state.write();
            if !state.state.is_disconnected() {
                return;
            }
            state.mark_connecting();
            self.shared.state_tx.send_replace(ConnectionState::Connecting);
        }

        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_connection().await;
        });
    }

    /// Register `handler` under `key` for every future valid event.
    ///
    /// A handler already registered under `key` is replaced. Connects if needed.
    pub fn subscribe<H: UpdateHandler>(&self, key: impl Into<String>, handler: H) -> Interest {
        let interest = self.shared.registry.register(key.into(), handler);
        debug!(key = %interest.key(), "Feed subscriber registered");

        if !self.is_connected() {
            self.connect();
        }

        interest
    }

    pub fn unsubscribe(&self, key: &str) {
        if self.shared.registry.unregister(key) {
            debug!(key, "Feed subscriber removed");
        }
    }

    /// Serialize `payload` and write it to the open connection.
    ///
    /// Best effort: dropped without error when no connection is open.
    pub fn send_message<T: Serialize + ?Sized>(&self, payload: &T) {
        let sender = self.shared.outbound.lock().clone();
        let Some(sender) = sender else {
            self.shared.stats.record_dropped();
            debug!("Feed not connected, dropping outbound message");
            return;
        };

        match serde_json::to_string(payload) {
            Ok(text) => {
                if sender.send(text).is_err() {
                    self.shared.stats.record_dropped();
                    debug!("Feed connection closing, dropping outbound message");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize outbound message"),
        }
    }

    /// Tell other dashboards that a flagged transaction was cleared.
    pub fn announce_resolved(&self, transaction_id: &str) {
        let event: UpdateEvent = TransactionUpdate::resolved(transaction_id).into();
        self.send_message(&event);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.read().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Consecutive automatic attempts since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.read().reconnect_attempts
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn config(&self) -> &FeedConfig {
        &self.shared.config
    }

    /// Wait until the connection reaches `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> bool {
        let mut rx = self.shared.state_tx.subscribe();
        // Bound to a local: the `Ref` inside the result borrows `rx`.
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    async fn run_connection(self) {
        let shared = &self.shared;
        let url = shared.config.url.as_str();

        let attempt =
            tokio::time::timeout(shared.config.connect_timeout(), shared.connector.connect(url))
                .await;

        let connection = match attempt {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                warn!(url, fault = %FaultKind::Transport, error = %e, "Feed connection failed");
                self.on_closed(FaultKind::Transport);
                return;
            }
            Err(_) => {
                warn!(
                    url,
                    fault = %FaultKind::Transport,
                    timeout_ms = shared.config.connect_timeout_ms,
                    "Feed connection timed out"
                );
                self.on_closed(FaultKind::Transport);
                return;
            }
        };

        let connection_id = Uuid::new_v4();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        *shared.outbound.lock() = Some(outbound_tx);
        {
            let mut state = shared.state.write();
            state.mark_connected(connection_id);
            shared.state_tx.send_replace(ConnectionState::Connected);
        }
        shared.stats.record_connection();
        info!(%connection_id, url, "Feed connected");

        let Connection { mut sink, mut stream } = connection;
        loop {
            tokio::select! {
                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        shared.stats.record_dropped();
                        warn!(%connection_id, fault = %FaultKind::Transport, error = %e, "Feed write failed");
                        break;
                    }
                    shared.stats.record_sent();
                }
                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => {
                        warn!(%connection_id, fault = %FaultKind::Transport, error = %e, "Feed connection lost");
                        break;
                    }
                    None => {
                        info!(%connection_id, "Feed connection closed by remote");
                        break;
                    }
                },
            }
        }

        // Refuse new frames, then count whatever was still queued as dropped.
        shared.outbound.lock().take();
        outbound_rx.close();
        while outbound_rx.try_recv().is_ok() {
            shared.stats.record_dropped();
        }

        self.on_closed(FaultKind::Transport);
    }

    fn dispatch(&self, raw: &str) {
        let shared = &self.shared;
        shared.stats.record_frame();
        shared.state.write().record_message();

        let event = match UpdateEvent::decode(raw) {
            Ok(event) => event,
            Err(e) => {
                shared.stats.record_malformed();
                warn!(fault = %FaultKind::MalformedPayload, error = %e, "Discarding unparseable feed frame");
                return;
            }
        };

        if let Err(rejection) = event.validate() {
            shared.stats.record_invalid();
            warn!(
                fault = %rejection.fault(),
                kind = %event.kind,
                reason = %rejection,
                "Discarding invalid feed event"
            );
            return;
        }

        shared.stats.record_dispatch();
        let event = Arc::new(event);
        let reached = shared.registry.fan_out(&event);
        debug!(kind = %event.kind, subscribers = reached, "Feed event dispatched");
    }

    /// Runs after every failed attempt or closed connection.
    fn on_closed(&self, fault: FaultKind) {
        let shared = &self.shared;
        shared.outbound.lock().take();

        let policy = shared.config.retry_policy();
        let scheduled = {
            let mut state = shared.state.write();
            state.mark_disconnected();
            shared.state_tx.send_replace(ConnectionState::Disconnected);

            if fault.is_retryable() && policy.should_retry(state.reconnect_attempts) {
                state.reconnect_attempts += 1;
                Some(state.reconnect_attempts)
            } else {
                None
            }
        };

        match scheduled {
            Some(attempt) => {
                info!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    "Scheduling feed reconnect"
                );
                let manager = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(policy.delay).await;
                    manager.connect();
                });
            }
            None => warn!(
                max_attempts = policy.max_attempts,
                "Feed reconnect attempts exhausted, waiting for an explicit connect"
            ),
        }
    }
}

impl fmt::Debug for FeedManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("FeedManager")
            .field("url", &self.shared.config.url)
            .field("state", &state.state)
            .field("reconnect_attempts", &state.reconnect_attempts)
            .field("connection_id", &state.connection_id)
            .field("connected_for", &state.last_connected.map(|at| at.elapsed()))
            .field("last_message_age", &state.last_message.map(|at| at.elapsed()))
            .field("subscribers", &self.shared.registry.keys())
            .finish()
    }
}
