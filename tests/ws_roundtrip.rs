use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use txwatch::{ConnectionState, FeedConfig, FeedManager, UpdateEvent};

fn reserve_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn recorder() -> (
    impl Fn(Arc<UpdateEvent>) -> futures::future::Ready<anyhow::Result<()>> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Arc<UpdateEvent>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: Arc<UpdateEvent>| {
        let _ = tx.send(event);
        futures::future::ready(Ok(()))
    };
    (handler, rx)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ws_roundtrip() {
    let port = reserve_port().expect("reserve port");

    // Start relay
    let server = tokio::spawn(async move {
        let _ = txwatch::server::start(port).await;
    });

    sleep(Duration::from_millis(200)).await;

    let url = format!("ws://127.0.0.1:{}/ws", port);
    let feed = FeedManager::new(FeedConfig::new(url.as_str()));

    let (screen, mut rx_screen) = recorder();
    let (detail, mut rx_detail) = recorder();
    feed.subscribe("main-content-notifications", screen);
    feed.subscribe("transaction-T-1001-052", detail);

    assert!(
        feed.wait_for_state(ConnectionState::Connected, Duration::from_secs(3))
            .await,
        "feed never connected"
    );
    // Let the relay register the session before publishing
    sleep(Duration::from_millis(100)).await;

    // Publish from a raw client: junk, an incomplete update, then a valid one
    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .expect("ws connect");
    for frame in [
        "not json".to_string(),
        r#"{"type":"TRANSACTION_UPDATE","data":{"transactionId":"T-1001-052"}}"#.to_string(),
        r#"{"type":"TRANSACTION_UPDATE","data":{"transactionId":"T-1001-052","status":"flagged","riskLevel":"high"}}"#.to_string(),
    ] {
        ws.send(Message::Text(frame.into())).await.expect("publish");
    }

    for rx in [&mut rx_screen, &mut rx_detail] {
        let event = timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timed out waiting for update")
            .expect("handler dropped");
        let update = event.transaction_update().expect("typed payload");
        assert_eq!(update.transaction_id, "T-1001-052");
        assert_eq!(update.status, "flagged");
        assert_eq!(update.risk_level, "high");
        assert!(event.concerns_customer("1001"));
    }

    // Nothing else was delivered
    sleep(Duration::from_millis(100)).await;
    assert!(rx_screen.try_recv().is_err());
    assert!(rx_detail.try_recv().is_err());

    let stats = feed.stats();
    assert_eq!(stats.malformed_frames, 1);
    assert_eq!(stats.invalid_events, 1);
    assert_eq!(stats.events_dispatched, 1);
    assert!(feed.is_connected());

    server.abort();
}
