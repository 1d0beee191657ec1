use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, protocol::Message};

use crate::common::errors::GatewayError;

/// Write half of a gateway socket.
pub type MessageSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Read half of a gateway socket.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Opens the websocket a gateway connection runs over.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(MessageSink, MessageStream), GatewayError>;
}

/// Connects over TLS with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(MessageSink, MessageStream), GatewayError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok((Box::pin(write), Box::pin(read)))
    }
}
