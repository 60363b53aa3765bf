//! Development relay.
//!
//! A WebSocket endpoint that rebroadcasts every text frame to all connected
//! clients, the sender included. Useful as a local stand-in for the update
//! endpoint: dashboards announce resolutions through it and receive each
//! other's announcements.

pub mod relay;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

pub use relay::{router, serve, RelayState};

pub async fn start(port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind relay on {}", addr))?;
    serve(listener).await
}
