use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    routing::get,
};
use colored::*;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

const HUB_CAPACITY: usize = 1024;

/// Shared relay state: the broadcast hub every client publishes into.
#[derive(Clone)]
pub struct RelayState {
    hub: broadcast::Sender<String>,
    clients: Arc<AtomicUsize>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    pub fn new() -> Self {
        let (hub, _) = broadcast::channel(HUB_CAPACITY);
        Self {
            hub,
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::SeqCst)
    }
}

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(|| async { "txwatch relay" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Serve the relay on an already bound listener until the server stops.
pub async fn serve(listener: TcpListener) -> Result<()> {
    let addr = listener.local_addr()?;
    println!(
        "{} Relay running at {}",
        "✓".green(),
        format!("ws://{}/ws", addr).bright_blue()
    );
    info!(%addr, "Relay listening");

    axum::serve(listener, router(RelayState::new()))
        .await
        .context("Relay server failed")?;

    Ok(())
}

async fn ws_handler(
    State(state): State<RelayState>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, socket))
}

async fn handle_ws(state: RelayState, socket: WebSocket) {
    // Subscribe before counting so a counted client never misses a frame
    let mut rx = state.hub.subscribe();
    let client_id = Uuid::new_v4();
    let clients = state.clients.fetch_add(1, Ordering::SeqCst) + 1;
    info!(%client_id, clients, "Relay client connected");

    let (mut sender, mut receiver) = socket.split();

    // Forward hub frames to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%client_id, skipped, "Relay client lagging, frames skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Publish this client's frames to the hub
    let hub = state.hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let text = text.to_string();
                    debug!(%client_id, bytes = text.len(), "Relaying frame");
                    let _ = hub.send(text);
                }
                Ok(Message::Binary(_)) => debug!(%client_id, "Ignoring binary frame"),
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    debug!(%client_id, error = %e, "Relay client read failed");
                    break;
                }
            }
        }
    });

    // Either side finishing ends the session
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let clients = state.clients.fetch_sub(1, Ordering::SeqCst) - 1;
    info!(%client_id, clients, "Relay client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

    async fn next_text<S>(client: &mut S) -> String
    where
        S: futures::Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = client.next().await {
            if let Ok(WsMessage::Text(text)) = msg {
                return text.to_string();
            }
        }
        panic!("relay closed the connection");
    }

    async fn wait_for_clients(state: &RelayState, count: usize) {
        timeout(Duration::from_secs(2), async {
            while state.client_count() != count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("relay client count never settled");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_relay_broadcasts_to_every_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = RelayState::new();
        let app = router(state.clone());
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let url = format!("ws://{}/ws", addr);
        let (mut a, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        wait_for_clients(&state, 2).await;

        let frame = r#"{"type":"ALERT","data":{"PK":"CUSTOMER#1001"}}"#;
        a.send(WsMessage::Text(frame.to_string().into())).await.unwrap();

        for client in [&mut a, &mut b] {
            let relayed = timeout(Duration::from_secs(2), next_text(client))
                .await
                .expect("timed out waiting for relayed frame");
            assert_eq!(relayed, frame);
        }

        drop(a);
        wait_for_clients(&state, 1).await;

        server.abort();
    }
}
