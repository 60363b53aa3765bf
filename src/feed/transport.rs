//! Duplex transport underneath the feed.
//!
//! The manager only needs a sink of outbound text frames and a stream of
//! inbound text frames. [`WsConnector`] provides them over WebSocket; tests
//! plug in their own [`Connector`].

use std::pin::Pin;

use anyhow::{anyhow, Result};
use futures::future::{self, BoxFuture};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open duplex connection.
///
/// The stream ends when the remote closes; an `Err` item is an abnormal close.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Connection {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = anyhow::Error> + Send + 'static,
        R: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens connections to the feed endpoint
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Connection>>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Connection>> {
        Box::pin(async move {
            let url = Url::parse(url).map_err(|e| anyhow!("invalid ws url: {e}"))?;
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;

            let (ws_tx, ws_rx) = ws_stream.split();

            let sink = ws_tx
                .with(|text: String| {
                    future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into())))
                })
                .sink_map_err(anyhow::Error::from);

            let stream = ws_rx.filter_map(|msg| future::ready(inbound_text(msg)));

            Ok(Connection::new(sink, stream))
        })
    }
}

/// Map a tungstenite frame to an inbound text frame.
///
/// Control frames are handled by tungstenite and skipped here. Binary frames
/// are read as (lossy) UTF-8 so that garbage surfaces as a malformed payload
/// rather than a transport failure.
fn inbound_text(msg: std::result::Result<Message, tungstenite::Error>) -> Option<Result<String>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(text.to_string())),
        Ok(Message::Binary(bin)) => Some(Ok(String::from_utf8_lossy(&bin).into_owned())),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        // The stream ends right after the close frame.
        Ok(Message::Close(_)) => None,
        Err(e) => Some(Err(e.into())),
    }
}
