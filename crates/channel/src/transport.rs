//! Transport abstraction for the notification channel.
//!
//! The channel driver talks to a [`Connector`] that opens [`Socket`]s. The
//! production connector is [`TungsteniteConnector`]; tests use the
//! in-process [`LoopbackConnector`](crate::loopback::LoopbackConnector).

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Close code for an intentional, normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// A frame received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text payload (one envelope).
    Text(String),
    /// The server closed the connection. `code` is `None` when the close
    /// carried no status or the connection failed.
    Close { code: Option<u16>, reason: String },
}

/// One open connection.
#[async_trait::async_trait]
pub trait Socket: Send {
    /// Next frame, or `None` once the stream has ended without a close
    /// frame.
    async fn recv(&mut self) -> Option<Frame>;

    /// Send a text payload.
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;

    /// Close with the given code.
    async fn close(&mut self, code: u16, reason: &str) -> anyhow::Result<()>;
}

/// Opens sockets.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> anyhow::Result<Box<dyn Socket>>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait::async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<Box<dyn Socket>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))?;
        Ok(Box::new(TungsteniteSocket { inner: stream }))
    }
}

struct TungsteniteSocket {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl Socket for TungsteniteSocket {
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Frame::Text(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Frame::Text(text)),
                    Err(_) => tracing::debug!("ignoring non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Some(Frame::Close { code, reason });
                }
                // Pings are answered by tungstenite on the next read.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket read error");
                    return Some(Frame::Close {
                        code: None,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .context("failed to send WebSocket message")
    }

    async fn close(&mut self, code: u16, reason: &str) -> anyhow::Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.inner
            .close(Some(frame))
            .await
            .context("failed to close WebSocket")
    }
}
