//! WebSocket transport backed by tokio-tungstenite.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::connection::{Connection, ConnectionEvent, Transport};
use crate::demux::Frame;
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, StreamError> {
        let (ws, response) = connect_async(url.as_str())
            .await
            .map_err(|e| StreamError::ConnectionOpenFailure(e.to_string()))?;
        debug!(status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WebSocketConnection { ws }))
    }
}

struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Option<Result<ConnectionEvent, StreamError>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(StreamError::AbnormalDisconnect(e.to_string()))),
            };
            let event = match msg {
                Message::Binary(data) => ConnectionEvent::Frame(Frame::Binary(data)),
                Message::Text(text) => ConnectionEvent::Frame(Frame::Text(text.as_str().to_owned())),
                Message::Close(frame) => match frame {
                    Some(frame) => ConnectionEvent::Closed {
                        code: Some(u16::from(frame.code)),
                        reason: frame.reason.as_str().to_owned(),
                    },
                    None => ConnectionEvent::Closed {
                        code: None,
                        reason: String::new(),
                    },
                },
                // tungstenite answers pings itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(event));
        }
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| StreamError::AbnormalDisconnect(e.to_string()))
    }
}
