//! # txwatch - Live Transaction-Update Feed
//!
//! Real-time notification fan-out for fraud review dashboards. One shared
//! connection per process receives server-pushed update events and hands each
//! valid event to every registered subscriber.
//!
//! ## Features
//!
//! - **Single shared connection**: every subscriber rides the same socket
//! - **Keyed subscriptions**: one handler per key, last registration wins
//! - **Validated delivery**: incomplete `TRANSACTION_UPDATE`s never reach handlers
//! - **Isolated handlers**: an erroring or panicking handler only affects itself
//! - **Bounded reconnect**: fixed delay, capped consecutive attempts, reset on success
//! - **Best-effort send**: outbound messages are dropped while disconnected
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use txwatch::{FeedConfig, FeedManager, UpdateEvent};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let feed = FeedManager::new(FeedConfig::from_env()?);
//!
//!     feed.subscribe("main-content-notifications", |event: Arc<UpdateEvent>| async move {
//!         if let Some(update) = event.transaction_update() {
//!             println!("{} is now {}", update.transaction_id, update.status);
//!         }
//!         Ok::<_, anyhow::Error>(())
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod server;

// Re-export main types for library consumers
pub use config::FeedConfig;
pub use error::{EventRejection, FaultKind, RetryPolicy};
pub use feed::{
    ConnectionState, EventKind, FeedManager, Interest, StatsSnapshot, TransactionUpdate,
    UpdateEvent, UpdateHandler,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
