//! WebSocket duplex channel to the controller.

use std::fmt;

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use shell_bridge_core::DeviceContext;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{self, Message as WsMessage, client::IntoClientRequest},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Stage of the connect sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// Building the handshake request.
    Request,
    /// Resolving and connecting to host:port.
    Connect,
    /// TLS setup or sending the upgrade request.
    Handshake,
    /// The server refused to upgrade.
    Upgrade,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "request",
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Upgrade => "upgrade",
        };
        f.write_str(name)
    }
}

/// Connect error. The stage is informational; every stage is retried the same way.
#[derive(Debug, thiserror::Error)]
#[error("Connect failed at {stage}: {message}")]
pub struct ConnectError {
    pub stage: ConnectStage,
    pub message: String,
}

impl ConnectError {
    #[must_use]
    pub fn new(stage: ConnectStage, message: impl fmt::Display) -> Self {
        Self {
            stage,
            message: message.to_string(),
        }
    }
}

/// Error on an established channel. Any of these means the channel is dead.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    #[error("Channel closed")]
    Closed,
}

/// Sending half of a channel. One whole text frame per call.
#[async_trait]
pub trait FrameSink: Send {
    /// Send one text frame.
    ///
    /// # Errors
    /// Returns error if the frame could not be written.
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Close the connection. Errors are ignored.
    async fn close(&mut self);
}

/// Receiving half of a channel.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next whole text frame.
    ///
    /// # Errors
    /// Returns `Closed` when the peer closes, `ReceiveFailed` on transport errors.
    async fn next_text(&mut self) -> Result<String, ChannelError>;
}

/// An established connection, split into halves.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

impl Connection {
    #[must_use]
    pub fn new(sink: impl FrameSink + 'static, source: impl FrameSource + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            source: Box::new(source),
        }
    }
}

/// Something that can establish a fresh connection to the controller.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Run the full connect sequence once.
    ///
    /// # Errors
    /// Returns `ConnectError` naming the failing stage.
    async fn connect(&self) -> Result<Connection, ConnectError>;
}

/// WebSocket connection to the controller.
pub struct DuplexChannel {
    stream: WsStream,
}

impl DuplexChannel {
    /// Connect and complete the WebSocket upgrade.
    ///
    /// Partially acquired resources are dropped on every failing stage.
    ///
    /// # Errors
    /// Returns `ConnectError` naming the first stage that failed.
    pub async fn connect(
        scheme: &str,
        host: &str,
        port: u16,
        device: &DeviceContext,
    ) -> Result<Self, ConnectError> {
        let url = handshake_url(scheme, host, port, device);
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::new(ConnectStage::Request, e))?;

        tracing::debug!(%host, port, "Opening connection");
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| ConnectError::new(ConnectStage::Connect, e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {e}");
        }

        let (stream, response) = tokio_tungstenite::client_async_tls(request, tcp)
            .await
            .map_err(|e| {
                let stage = match e {
                    tungstenite::Error::Http(_) => ConnectStage::Upgrade,
                    _ => ConnectStage::Handshake,
                };
                ConnectError::new(stage, e)
            })?;
        tracing::debug!(status = %response.status(), "WebSocket upgrade complete");

        Ok(Self { stream })
    }

    /// Split into independently owned sending and receiving halves.
    #[must_use]
    pub fn split(self) -> Connection {
        let (sink, source) = self.stream.split();
        Connection::new(WsSink { sink }, WsSource { source })
    }
}

/// Handshake URL carrying the device identity.
#[must_use]
pub fn handshake_url(scheme: &str, host: &str, port: u16, device: &DeviceContext) -> String {
    format!("{scheme}://{host}:{port}/?{}", device.query_string())
}

struct WsSink {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.sink
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.close().await {
            tracing::debug!("WebSocket close: {e}");
        }
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_text(&mut self) -> Result<String, ChannelError> {
        loop {
            let msg = match self.source.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ))
                | None => return Err(ChannelError::Closed),
                Some(Err(e)) => return Err(ChannelError::ReceiveFailed(e.to_string())),
            };
            match msg {
                WsMessage::Text(text) if text.is_empty() => return Err(ChannelError::Closed),
                WsMessage::Text(text) => return Ok(text.as_str().to_owned()),
                WsMessage::Binary(data) if data.is_empty() => return Err(ChannelError::Closed),
                WsMessage::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(text),
                    Err(_) => {
                        tracing::debug!(bytes = data.len(), "Ignoring non-UTF-8 binary frame");
                    }
                },
                WsMessage::Close(frame) => {
                    tracing::debug!(?frame, "Peer closed the channel");
                    return Err(ChannelError::Closed);
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }
}

/// Dials the controller with a fixed endpoint and device identity.
#[derive(Debug, Clone)]
pub struct WsConnector {
    scheme: &'static str,
    host: String,
    port: u16,
    device: DeviceContext,
}

impl WsConnector {
    #[must_use]
    pub fn new(
        scheme: &'static str,
        host: impl Into<String>,
        port: u16,
        device: DeviceContext,
    ) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            device,
        }
    }

    /// The URL every attempt dials.
    #[must_use]
    pub fn url(&self) -> String {
        handshake_url(self.scheme, &self.host, self.port, &self.device)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, ConnectError> {
        DuplexChannel::connect(self.scheme, &self.host, self.port, &self.device)
            .await
            .map(DuplexChannel::split)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_url() {
        let device = DeviceContext::new("hw-1", "My PC", "Windows 11", "1.0.0").with_user_id("u1");
        assert_eq!(
            handshake_url("ws", "localhost", 9991, &device),
            "ws://localhost:9991/?type=device&id=hw-1&name=My%20PC&os=Windows%2011&version=1.0.0&userId=u1"
        );
    }

    #[test]
    fn test_connector_url_uses_scheme() {
        let device = DeviceContext::new("id", "name", "os", "v");
        let connector = WsConnector::new("wss", "example.com", 443, device);
        assert!(connector.url().starts_with("wss://example.com:443/?type=device&"));
    }

    #[test]
    fn test_connect_error_display() {
        let err = ConnectError::new(ConnectStage::Upgrade, "HTTP 400");
        assert_eq!(err.to_string(), "Connect failed at upgrade: HTTP 400");
    }
}
