use crate::core::errors::ExchangeError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application heartbeat interval in milliseconds, 0 disables it
    pub heartbeat_interval_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,    // 10 seconds
            heartbeat_interval_ms: 20_000, // 20 seconds
        }
    }
}

impl WsConfig {
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        if self.heartbeat_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.heartbeat_interval_ms))
        }
    }
}

/// WebSocket session trait - pure transport layer
///
/// Protocol-level pings are answered inside the session; everything else is
/// handed to the caller in arrival order.
#[async_trait]
pub trait WsSession: Send + 'static {
    /// Connect to the WebSocket
    async fn connect(&mut self) -> Result<(), ExchangeError>;

    /// Send a raw message
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError>;

    /// Receive the next data message; `None` once the connection is closed
    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), ExchangeError>;

    /// Check if the connection is alive
    fn is_connected(&self) -> bool;
}

/// Tungstenite-based WebSocket implementation
pub struct TungsteniteWs {
    url: String,
    write: Option<SplitSink<Socket, Message>>,
    read: Option<SplitStream<Socket>>,
    connected: bool,
    exchange_name: String,
    config: WsConfig,
}

impl TungsteniteWs {
    /// Create a new WebSocket session
    ///
    /// # Arguments
    /// * `url` - The WebSocket URL to connect to
    /// * `exchange_name` - Name of the exchange for logging/tracing
    pub fn new(url: String, exchange_name: String) -> Self {
        Self {
            url,
            write: None,
            read: None,
            connected: false,
            exchange_name,
            config: WsConfig::default(),
        }
    }

    /// Set custom WebSocket configuration
    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    fn drop_connection(&mut self) {
        self.connected = false;
        self.write = None;
        self.read = None;
    }
}

#[async_trait]
impl WsSession for TungsteniteWs {
    #[instrument(skip(self), fields(exchange = %self.exchange_name, url = %self.url))]
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let connection_future =
            tokio::time::timeout(self.config.connect_timeout(), connect_async(&self.url));

        let (ws_stream, _) = connection_future
            .await
            .map_err(|_| ExchangeError::Timeout("WebSocket connection timeout".to_string()))?
            .map_err(|e| {
                ExchangeError::NetworkError(format!("WebSocket connection failed: {}", e))
            })?;

        let (write, read) = ws_stream.split();
        self.write = Some(write);
        self.read = Some(read);
        self.connected = true;

        debug!("WebSocket connected");
        Ok(())
    }

    #[instrument(skip(self, msg), fields(exchange = %self.exchange_name))]
    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::NetworkError(
                "WebSocket not connected".to_string(),
            ));
        }

        let write = self.write.as_mut().ok_or_else(|| {
            ExchangeError::NetworkError("WebSocket write stream not available".to_string())
        })?;

        if let Err(e) = write.send(msg).await {
            self.drop_connection();
            return Err(ExchangeError::NetworkError(format!(
                "Failed to send WebSocket message: {}",
                e
            )));
        }

        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        loop {
            if !self.connected {
                return None;
            }
            let read = self.read.as_mut()?;

            match read.next().await {
                Some(Ok(message)) => {
                    match message {
                        Message::Close(frame) => {
                            debug!(exchange = %self.exchange_name, ?frame, "WebSocket closed by server");
                            self.drop_connection();
                            return None;
                        }
                        Message::Ping(data) => {
                            // Auto-respond to pings at transport level
                            if let Err(e) = self.send_raw(Message::Pong(data)).await {
                                warn!(exchange = %self.exchange_name, "Failed to send pong response: {}", e);
                            }
                        }
                        Message::Pong(_) | Message::Frame(_) => {}
                        data => return Some(Ok(data)),
                    }
                }
                Some(Err(e)) => {
                    self.drop_connection();
                    return Some(Err(ExchangeError::NetworkError(format!(
                        "WebSocket error: {}",
                        e
                    ))));
                }
                None => {
                    self.drop_connection();
                    return None;
                }
            }
        }
    }

    #[instrument(skip(self), fields(exchange = %self.exchange_name))]
    async fn close(&mut self) -> Result<(), ExchangeError> {
        if let Some(write) = self.write.as_mut() {
            let _ = write.send(Message::Close(None)).await;
        }
        self.drop_connection();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_disabled_by_zero() {
        let config = WsConfig {
            connect_timeout_ms: 1_000,
            heartbeat_interval_ms: 0,
        };
        assert!(config.heartbeat_interval().is_none());
        assert_eq!(
            WsConfig::default().heartbeat_interval(),
            Some(Duration::from_secs(20))
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let mut ws = TungsteniteWs::new("wss://localhost:1".to_string(), "test".to_string());
        assert!(!ws.is_connected());
        let err = ws
            .send_raw(Message::Text("{}".to_string()))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(ws.next_raw().await.is_none());
    }
}
