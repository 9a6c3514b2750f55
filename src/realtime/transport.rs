//! Socket primitive used by the realtime connection.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::debug;

use crate::error::{GuardError, Result};

/// Outbound half of a socket: accepts UTF-8 text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = GuardError> + Send>>;

/// Inbound half of a socket: yields UTF-8 text frames until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open bidirectional text socket.
pub struct Socket {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Socket {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens sockets to a URL.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Complete a handshake with `url` and hand back the open socket.
    async fn connect(&self, url: &str) -> Result<Socket>;
}

/// WebSocket connector built on tokio-tungstenite.
///
/// `wss://` URLs are served through rustls with the webpki root store.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Socket> {
        let (ws, response) = tokio_tungstenite::connect_async(url).await?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(GuardError::from)
            .with(|text: String| future::ready(Ok::<_, GuardError>(WsMessage::Text(text))));

        let stream = stream.filter_map(|frame| {
            future::ready(match frame {
                Ok(WsMessage::Text(text)) => Some(Ok(text)),
                // Binary frames go through the same JSON parser as text frames
                Ok(WsMessage::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(_) => None,
                Err(err) => Some(Err(GuardError::from(err))),
            })
        });

        Ok(Socket::new(Box::pin(sink), Box::pin(stream)))
    }
}
