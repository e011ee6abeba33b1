//! WebSocket transport built on tokio-tungstenite

use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace};

use crate::config::StreamUrl;
use crate::transport::{Inbound, Link, Transport};
use crate::{Result, StreamError};

/// Transport that dials `ws://` and `wss://` endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &StreamUrl) -> Result<Box<dyn Link>> {
        debug!(%url, "Opening websocket");
        let (socket, response) = connect_async(url.expose()).await.map_err(|e| {
            StreamError::connection_failed_with_source(
                format!("websocket handshake with {} failed", url.address()),
                Box::new(e),
            )
        })?;
        info!(%url, status = response.status().as_u16(), "Websocket handshake complete");
        Ok(Box::new(WebSocketLink { socket }))
    }
}

/// Open websocket link
pub struct WebSocketLink {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Link for WebSocketLink {
    async fn recv(&mut self) -> Option<Result<Inbound>> {
        loop {
            let message = match self.socket.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(Inbound::Text(text))),
                Message::Binary(bytes) => return Some(decode_binary(bytes)),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(Ok(Inbound::Closed { code, reason }));
                }
                // Pongs are queued by tungstenite and flushed on the next read or write
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Skipping control frame");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame { code: CloseCode::from(code), reason: Cow::Owned(reason.to_string()) };
        self.socket.send(Message::Close(Some(frame))).await?;
        Ok(())
    }
}

/// Binary frames carry the same JSON as text frames
fn decode_binary(bytes: Vec<u8>) -> Result<Inbound> {
    String::from_utf8(bytes).map(Inbound::Text).map_err(|e| {
        StreamError::malformed(format!(
            "binary payload of {} bytes is not valid UTF-8: {}",
            e.as_bytes().len(),
            e.utf8_error()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_utf8_is_delivered_as_text() {
        let inbound = decode_binary(br#"{"type":"frame"}"#.to_vec()).unwrap();
        assert_eq!(inbound, Inbound::Text(r#"{"type":"frame"}"#.to_string()));
    }

    #[test]
    fn invalid_utf8_is_a_malformed_message() {
        let err = decode_binary(vec![b'{', 0xff, 0xfe, b'}']).unwrap_err();
        match err {
            StreamError::MalformedMessage { details } => {
                assert!(details.contains("4 bytes"), "{details}");
                assert!(details.contains("UTF-8"), "{details}");
            }
            other => panic!("Expected MalformedMessage, got {other:?}"),
        }
    }
}
