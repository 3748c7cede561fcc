//! Text-frame transport collaborator.

use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt, future};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Outbound half of an open transport.
pub type TextSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an open transport. The stream ends when the peer closes.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens a bidirectional text transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(TextSink, TextStream), TransportError>;
}

/// WebSocket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(TextSink, TextStream), TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url).await?;
        debug!(url, "websocket open");
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
