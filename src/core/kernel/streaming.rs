use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{Channel, ChannelKind, Subscription, WsCodec};
use crate::core::kernel::nonce::NonceProvider;
use crate::core::kernel::stream::{ConnectionState, ErrorListener, Handler, Listener, StreamState};
use crate::core::kernel::ws::{WsConfig, WsSession};
use crate::core::types::{NormalizedEvent, OrderBook};
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};

type Reply<T> = oneshot::Sender<Result<T, ExchangeError>>;

enum Command<C: WsCodec> {
    Connect(Reply<()>),
    Authenticate(Reply<()>),
    Watch {
        subscription: Subscription,
        listener: Listener,
        reply: Reply<()>,
    },
    Unwatch {
        subscription: Subscription,
        reply: Reply<()>,
    },
    Resubscribe(Reply<()>),
    Close(Reply<()>),
    Errors(ErrorListener),
    Market {
        market_id: String,
        symbol: String,
    },
    Handler {
        kind: ChannelKind,
        handler: Handler<C>,
    },
    OrderBook {
        symbol: String,
        reply: oneshot::Sender<Option<OrderBook>>,
    },
}

/// Events for one watch call, in the order the connection received them.
///
/// Ends when the subscription is removed or the client shuts down.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<Result<NormalizedEvent, ExchangeError>>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Result<NormalizedEvent, ExchangeError>> {
        self.receiver.recv().await
    }
}

impl Stream for EventStream {
    type Item = Result<NormalizedEvent, ExchangeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Handle to one persistent streaming connection.
///
/// The connection, the subscription table and all parsing live in a single
/// driver task; this handle only sends it commands, so it can be shared
/// across tasks freely. Dropping the last handle closes the connection.
/// Nothing reconnects on its own: after a drop, call [`Self::connect`] and
/// then [`Self::resubscribe`].
pub struct StreamingClient<C: WsCodec> {
    commands: mpsc::UnboundedSender<Command<C>>,
    status: watch::Receiver<ConnectionState>,
    exchange: String,
}

impl<C: WsCodec> Clone for StreamingClient<C> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
            exchange: self.exchange.clone(),
        }
    }
}

impl<C: WsCodec> std::fmt::Debug for StreamingClient<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("exchange", &self.exchange)
            .field("state", &*self.status.borrow())
            .finish()
    }
}

impl<C: WsCodec> StreamingClient<C> {
    /// Start the driver task. Must be called inside a tokio runtime.
    pub fn spawn<S: WsSession>(
        codec: Arc<C>,
        session: S,
        credentials: Option<Credentials>,
        nonces: Arc<dyn NonceProvider>,
        config: &WsConfig,
    ) -> Self {
        let exchange = codec.name().to_string();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionState::Disconnected);

        let driver = Driver {
            state: StreamState::new(codec, credentials, nonces),
            session,
            commands: receiver,
            status: status_tx,
            heartbeat_period: config.heartbeat_interval(),
            heartbeat: None,
        };
        tokio::spawn(driver.run());

        Self {
            commands,
            status,
            exchange,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    /// Wait until the connection reaches `target`
    pub async fn wait_for(&self, target: ConnectionState) -> Result<(), ExchangeError> {
        let mut status = self.status.clone();
        status
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| self.shut_down())
    }

    fn shut_down(&self) -> ExchangeError {
        ExchangeError::NetworkError(format!("{} streaming client has shut down", self.exchange))
    }

    fn send(&self, command: Command<C>) -> Result<(), ExchangeError> {
        self.commands.send(command).map_err(|_| self.shut_down())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command<C>,
    ) -> Result<T, ExchangeError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| self.shut_down())?
    }

    #[instrument(skip(self), fields(exchange = %self.exchange))]
    pub async fn connect(&self) -> Result<(), ExchangeError> {
        self.request(Command::Connect).await
    }

    /// Start (or retry) the login handshake without subscribing anything
    pub async fn authenticate(&self) -> Result<(), ExchangeError> {
        self.request(Command::Authenticate).await
    }

    pub async fn close(&self) -> Result<(), ExchangeError> {
        self.request(Command::Close).await
    }

    /// Replay every subscription left stale by a dropped connection
    pub async fn resubscribe(&self) -> Result<(), ExchangeError> {
        self.request(Command::Resubscribe).await
    }

    /// Register a listener for `subscription`.
    ///
    /// Private channels queue behind authentication; the returned stream
    /// yields an `AuthError` if the login is rejected.
    #[instrument(skip(self), fields(exchange = %self.exchange, channel = %subscription.channel))]
    pub async fn watch(&self, subscription: Subscription) -> Result<EventStream, ExchangeError> {
        let (listener, receiver) = mpsc::unbounded_channel();
        self.request(|reply| Command::Watch {
            subscription,
            listener,
            reply,
        })
        .await?;
        Ok(EventStream { receiver })
    }

    /// Drop a subscription and end every stream registered for it
    pub async fn unwatch(&self, subscription: Subscription) -> Result<(), ExchangeError> {
        self.request(|reply| Command::Unwatch {
            subscription,
            reply,
        })
        .await
    }

    pub async fn watch_ticker(&self, symbol: &str) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::Ticker, Some(symbol)))
            .await
    }

    /// Full book after every update, kept locally from snapshot + deltas
    pub async fn watch_order_book(&self, symbol: &str) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::OrderBook, Some(symbol)))
            .await
    }

    pub async fn watch_trades(&self, symbol: &str) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::Trades, Some(symbol)))
            .await
    }

    pub async fn watch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<EventStream, ExchangeError> {
        let channel = Channel::Ohlcv {
            timeframe: timeframe.to_string(),
        };
        self.watch(Subscription::new(channel, Some(symbol))).await
    }

    pub async fn watch_balance(&self) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::Balance, None)).await
    }

    /// Order updates, optionally only for `symbol`
    pub async fn watch_orders(&self, symbol: Option<&str>) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::Orders, symbol)).await
    }

    pub async fn watch_my_trades(
        &self,
        symbol: Option<&str>,
    ) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::MyTrades, symbol))
            .await
    }

    pub async fn watch_positions(
        &self,
        symbol: Option<&str>,
    ) -> Result<EventStream, ExchangeError> {
        self.watch(Subscription::new(Channel::Positions, symbol))
            .await
    }

    /// Connection-level failures: lost connection, rejected login, bad frames
    pub fn errors(&self) -> Result<mpsc::UnboundedReceiver<ExchangeError>, ExchangeError> {
        let (listener, receiver) = mpsc::unbounded_channel();
        self.send(Command::Errors(listener))?;
        Ok(receiver)
    }

    /// Teach the client a market id it may see in account payloads
    pub fn register_market(
        &self,
        market_id: impl Into<String>,
        symbol: impl Into<String>,
    ) -> Result<(), ExchangeError> {
        self.send(Command::Market {
            market_id: market_id.into(),
            symbol: symbol.into(),
        })
    }

    /// Replace the handler used for one channel kind
    pub fn register_handler(&self, kind: ChannelKind, handler: Handler<C>) -> Result<(), ExchangeError> {
        self.send(Command::Handler { kind, handler })
    }

    /// Current local copy of a watched order book
    pub async fn order_book(&self, symbol: &str) -> Result<Option<OrderBook>, ExchangeError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::OrderBook {
            symbol: symbol.to_string(),
            reply,
        })?;
        response.await.map_err(|_| self.shut_down())
    }
}

struct Driver<C: WsCodec, S: WsSession> {
    state: StreamState<C>,
    session: S,
    commands: mpsc::UnboundedReceiver<Command<C>>,
    status: watch::Sender<ConnectionState>,
    heartbeat_period: Option<Duration>,
    heartbeat: Option<Interval>,
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<C: WsCodec, S: WsSession> Driver<C, S> {
    async fn run(mut self) {
        loop {
            let connected = self.session.is_connected();
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command).await;
                }
                frame = self.session.next_raw(), if connected => {
                    match frame {
                        Some(Ok(message)) => {
                            let outbound = self.state.handle_message(&message);
                            let _ = self.send_all(outbound).await;
                        }
                        Some(Err(e)) => self.connection_lost(&e),
                        None => self.connection_lost(&ExchangeError::NetworkError(
                            "connection closed by server".to_string(),
                        )),
                    }
                }
                () = tick(&mut self.heartbeat), if connected => {
                    if let Some(ping) = self.state.codec().encode_ping() {
                        let _ = self.send_all(vec![ping]).await;
                    }
                }
            }
            self.publish();
        }

        debug!(exchange = %self.state.codec().name(), "all handles dropped, closing");
        if self.session.is_connected() {
            let _ = self.session.close().await;
        }
    }

    fn publish(&self) {
        let current = self.state.connection_state();
        self.status.send_if_modified(|state| {
            if *state == current {
                false
            } else {
                *state = current;
                true
            }
        });
    }

    fn connection_lost(&mut self, error: &ExchangeError) {
        self.heartbeat = None;
        self.state.on_connection_lost(error);
    }

    async fn send_all(&mut self, outbound: Vec<Message>) -> Result<(), ExchangeError> {
        for message in outbound {
            if let Err(e) = self.session.send_raw(message).await {
                self.connection_lost(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        if self.state.is_connected() && self.session.is_connected() {
            return Ok(());
        }

        self.state.on_connecting();
        self.publish();
        if let Err(e) = self.session.connect().await {
            warn!(exchange = %self.state.codec().name(), "connect failed: {}", e);
            self.state.on_disconnected();
            return Err(e);
        }
        self.state.on_connected();

        self.heartbeat = self.heartbeat_period.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Ok(())
    }

    async fn handle_command(&mut self, command: Command<C>) {
        match command {
            Command::Connect(reply) => {
                let _ = reply.send(self.connect().await);
            }
            Command::Authenticate(reply) => {
                let result = match self.state.authenticate() {
                    Ok(outbound) => self.send_all(outbound).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Watch {
                subscription,
                listener,
                reply,
            } => {
                let result = match self.state.subscribe(subscription, listener) {
                    Ok(outbound) => self.send_all(outbound).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Unwatch {
                subscription,
                reply,
            } => {
                let result = match self.state.unsubscribe(&subscription) {
                    Ok(outbound) => self.send_all(outbound).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Resubscribe(reply) => {
                let result = match self.state.resubscribe() {
                    Ok(outbound) => self.send_all(outbound).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Close(reply) => {
                self.heartbeat = None;
                let result = self.session.close().await;
                self.state.on_disconnected();
                let _ = reply.send(result);
            }
            Command::Errors(listener) => self.state.add_error_listener(listener),
            Command::Market { market_id, symbol } => self.state.register_market(market_id, symbol),
            Command::Handler { kind, handler } => self.state.register_handler(kind, handler),
            Command::OrderBook { symbol, reply } => {
                let _ = reply.send(self.state.order_book(&symbol));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Balances;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_event_stream_yields_in_order_then_ends() {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut stream = EventStream { receiver };

        for timestamp in [1, 2] {
            tx.send(Ok(NormalizedEvent::Balance(Balances {
                timestamp: Some(timestamp),
                ..Balances::default()
            })))
            .unwrap();
        }
        drop(tx);

        let first = stream.recv().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(first.timestamp(), Some(1));
        assert_eq!(second.timestamp(), Some(2));
        assert!(stream.next().await.is_none());
    }
}
