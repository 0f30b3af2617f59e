//! Channel transport seam
//!
//! The connection manager talks to the companion through these traits so
//! tests can substitute scripted channels for the real WebSocket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::discovery::Endpoint;
use crate::Result;

/// One live duplex channel to the companion process
#[async_trait]
pub trait BridgeChannel: Send {
    /// Send one serialized text message
    async fn send(&mut self, message: &str) -> Result<()>;

    /// Receive the next inbound text message.
    /// `None` means the channel closed; `Some(Err(_))` is a transport error
    /// on a channel that may still deliver further messages.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Best-effort graceful close
    async fn close(&mut self);
}

/// Channel factory owned by the connection manager
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn BridgeChannel>>;
}

/// WebSocket transport used in production
pub struct WebSocketTransport;

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn BridgeChannel>> {
        let url = Url::parse(&endpoint.ws_url())?;
        let (stream, _) = connect_async(url.as_str()).await?;
        Ok(Box::new(WebSocketChannel { stream }))
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl BridgeChannel for WebSocketChannel {
    async fn send(&mut self, message: &str) -> Result<()> {
        self.stream
            .send(Message::Text(message.to_string()))
            .await
            .map_err(Into::into)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // control and binary frames are not part of the protocol
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
