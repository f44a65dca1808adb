#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tradewire::core::config::Credentials;
use tradewire::core::errors::ExchangeError;
use tradewire::core::kernel::{
    HttpResponse, HttpTransport, MonotonicNonce, NonceProvider, SignedRequest, StreamingClient,
    WsConfig, WsSession,
};
use tradewire::exchanges::bybit::BybitCodec;

pub fn credentials() -> Credentials {
    Credentials::new("test_api_key", "test_secret_key")
}

#[derive(Default)]
struct MockState {
    routes: Vec<(String, HttpResponse)>,
    requests: Vec<SignedRequest>,
    delay: Option<Duration>,
}

/// Canned responses keyed by a URL fragment; every request is recorded
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, url_fragment: &str, status: u16, body: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .routes
            .push((url_fragment.to_string(), HttpResponse::new(status, body)));
        self
    }

    /// Hold every response back for `delay`
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<SignedRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn execute(&self, request: SignedRequest) -> Result<HttpResponse, ExchangeError> {
        let (response, delay) = {
            let mut state = self.state.lock().unwrap();
            let response = state
                .routes
                .iter()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, response)| response.clone());
            state.requests.push(request.clone());
            (response, state.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        response.ok_or_else(|| ExchangeError::NetworkError(format!("no route for {}", request.url)))
    }
}

/// Client side of an in-memory WebSocket
pub struct MockSession {
    connected: bool,
    sent: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Message>,
}

/// Server side: sees what the client sent and pushes frames to it
pub struct MockServer {
    sent: mpsc::UnboundedReceiver<Message>,
    push: mpsc::UnboundedSender<Message>,
}

pub fn mock_session() -> (MockSession, MockServer) {
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    (
        MockSession {
            connected: false,
            sent: sent_tx,
            inbound: push_rx,
        },
        MockServer {
            sent: sent_rx,
            push: push_tx,
        },
    )
}

#[async_trait]
impl WsSession for MockSession {
    async fn connect(&mut self) -> Result<(), ExchangeError> {
        self.connected = true;
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ExchangeError> {
        if !self.connected {
            return Err(ExchangeError::NetworkError("not connected".to_string()));
        }
        self.sent
            .send(msg)
            .map_err(|_| ExchangeError::NetworkError("server gone".to_string()))
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ExchangeError>> {
        match self.inbound.recv().await {
            Some(Message::Close(_)) | None => {
                self.connected = false;
                None
            }
            Some(message) => Some(Ok(message)),
        }
    }

    async fn close(&mut self) -> Result<(), ExchangeError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl MockServer {
    pub fn push(&self, frame: &str) {
        self.push.send(Message::Text(frame.to_string())).unwrap();
    }

    /// Drop the connection from the server side
    pub fn hang_up(&self) {
        self.push.send(Message::Close(None)).unwrap();
    }

    /// Next frame the client sent, as JSON
    pub async fn next_sent(&mut self) -> Value {
        let message = tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .expect("client sent nothing")
            .expect("client gone");
        serde_json::from_str(message.to_text().unwrap()).unwrap()
    }

    /// Frames sent so far, without waiting
    pub fn drain_sent(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(message) = self.sent.try_recv() {
            frames.push(serde_json::from_str(message.to_text().unwrap()).unwrap());
        }
        frames
    }
}

pub fn test_ws_config() -> WsConfig {
    WsConfig {
        connect_timeout_ms: 1_000,
        heartbeat_interval_ms: 0,
    }
}

pub fn bybit_stream(credentials: Option<Credentials>) -> (StreamingClient<BybitCodec>, MockServer) {
    bybit_stream_with_nonces(credentials, Arc::new(MonotonicNonce::milliseconds()))
}

pub fn bybit_stream_with_nonces(
    credentials: Option<Credentials>,
    nonces: Arc<dyn NonceProvider>,
) -> (StreamingClient<BybitCodec>, MockServer) {
    let (session, server) = mock_session();
    let client = StreamingClient::spawn(
        Arc::new(BybitCodec::new()),
        session,
        credentials,
        nonces,
        &test_ws_config(),
    );
    (client, server)
}

/// Wait until the driver has handled every command sent so far
pub async fn settle<C: tradewire::core::kernel::WsCodec>(client: &StreamingClient<C>) {
    client.order_book("__sync__").await.unwrap();
}
