//! WebSocket transport over `tokio-tungstenite`.
//!
//! `wss://` endpoints use rustls with the webpki root store and the `ring`
//! crypto provider.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use super::{ABNORMAL_CLOSURE, Connector, NO_STATUS, TransportConnection, TransportEvent};
use crate::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects with `tokio_tungstenite::connect_async`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn TransportConnection>, TransportError> {
        install_crypto_provider();
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url, status = response.status().as_u16(), "websocket handshake complete");
        Ok(Box::new(WsConnection {
            stream,
            closed: false,
        }))
    }
}

/// Install `ring` as the process-wide rustls provider unless one is set.
fn install_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Err means another thread installed one first.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

/// An open WebSocket.
pub struct WsConnection {
    stream: WsStream,
    closed: bool,
}

#[async_trait]
impl TransportConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream
            .send(WsMessage::text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return TransportEvent::Text(text.as_str().to_owned());
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    self.closed = true;
                    let (code, reason) = frame.map_or((NO_STATUS, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    });
                    return TransportEvent::Closed { code, reason };
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    debug!(len = bytes.len(), "ignoring binary frame");
                }
                Some(Ok(other)) => trace!(?other, "control frame"),
                Some(Err(e)) => {
                    self.closed = true;
                    return TransportEvent::Error(TransportError::Protocol(e.to_string()));
                }
                None => {
                    self.closed = true;
                    return TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: String::new(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!(error = %e, "close handshake failed");
        }
    }
}
