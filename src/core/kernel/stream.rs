use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{
    ChannelKind, MarketIndex, OrderBookUpdate, ParseContext, Subscription, WsCodec, WsInbound,
};
use crate::core::kernel::nonce::NonceProvider;
use crate::core::types::{NormalizedEvent, OrderBook, OrderBookEntry, Price, Quantity};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

/// Receives normalized events (or a terminal error) for one watch call
pub type Listener = mpsc::UnboundedSender<Result<NormalizedEvent, ExchangeError>>;

/// Receives connection-level failures that belong to no single watch call
pub type ErrorListener = mpsc::UnboundedSender<ExchangeError>;

/// Typed handler: turns one payload into normalized events
pub type Handler<C> = fn(
    &C,
    &mut BookCache,
    &ParseContext<'_>,
    &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    /// Login frame sent, no reply yet
    Pending,
    Authenticated,
    /// Rejected by the server; private watches fail until `authenticate()` is called again
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    /// Private subscription queued behind authentication
    Pending,
    /// Connection dropped; kept for `resubscribe()`
    Stale,
}

struct Entry {
    subscription: Subscription,
    status: SubscriptionStatus,
    listeners: Vec<(Option<String>, Listener)>,
}

impl Entry {
    /// Deliver to matching listeners, dropping every listener whose receiver is gone
    fn deliver(&mut self, event: &NormalizedEvent) {
        self.listeners.retain(|(filter, listener)| {
            if listener.is_closed() {
                return false;
            }
            let wanted = match (filter, event.symbol()) {
                (Some(filter), Some(symbol)) => filter == symbol,
                _ => true,
            };
            !wanted || listener.send(Ok(event.clone())).is_ok()
        });
    }

    /// Parse context symbol: the listeners' common filter, `None` once they differ
    fn refresh_symbol(&mut self) {
        let mut filters = self.listeners.iter().map(|(filter, _)| filter);
        let Some(first) = filters.next() else {
            return;
        };
        let shared = filters.all(|filter| filter == first);
        self.subscription.symbol = if shared { first.clone() } else { None };
    }

    fn fail(&mut self, error: &ExchangeError) {
        for (_, listener) in self.listeners.drain(..) {
            let _ = listener.send(Err(error.clone()));
        }
    }
}

#[derive(Debug, Default)]
struct LocalBook {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    nonce: Option<u64>,
    timestamp: i64,
}

impl LocalBook {
    fn upsert(side: &mut BTreeMap<Decimal, Decimal>, levels: &[OrderBookEntry]) {
        for level in levels {
            if level.quantity.is_zero() {
                side.remove(&level.price.value());
            } else {
                side.insert(level.price.value(), level.quantity.value());
            }
        }
    }

    fn to_order_book(&self, symbol: &str) -> OrderBook {
        let entry = |(price, quantity): (&Decimal, &Decimal)| OrderBookEntry {
            price: Price::new(*price),
            quantity: Quantity::new(*quantity),
        };
        OrderBook {
            symbol: symbol.to_string(),
            bids: self.bids.iter().rev().map(entry).collect(),
            asks: self.asks.iter().map(entry).collect(),
            nonce: self.nonce,
            timestamp: self.timestamp,
        }
    }
}

/// Local order books maintained from snapshot + delta streams.
///
/// Updates are applied strictly in the order they are passed in.
#[derive(Debug, Default)]
pub struct BookCache {
    books: HashMap<String, LocalBook>,
}

impl BookCache {
    /// Apply one update and return the resulting full book.
    ///
    /// Returns `None` when the update is dropped: a delta before any snapshot,
    /// or a delta whose nonce is not newer than the book's.
    pub fn apply(&mut self, update: OrderBookUpdate) -> Option<OrderBook> {
        match update {
            OrderBookUpdate::Snapshot(snapshot) => {
                let mut book = LocalBook {
                    nonce: snapshot.nonce,
                    timestamp: snapshot.timestamp,
                    ..LocalBook::default()
                };
                LocalBook::upsert(&mut book.bids, &snapshot.bids);
                LocalBook::upsert(&mut book.asks, &snapshot.asks);
                let full = book.to_order_book(&snapshot.symbol);
                self.books.insert(snapshot.symbol, book);
                Some(full)
            }
            OrderBookUpdate::Delta(delta) => {
                let Some(book) = self.books.get_mut(&delta.symbol) else {
                    debug!(symbol = %delta.symbol, "delta before snapshot dropped");
                    return None;
                };
                if let (Some(current), Some(incoming)) = (book.nonce, delta.nonce) {
                    if incoming <= current {
                        debug!(symbol = %delta.symbol, current, incoming, "stale delta ignored");
                        return None;
                    }
                }
                LocalBook::upsert(&mut book.bids, &delta.bids);
                LocalBook::upsert(&mut book.asks, &delta.asks);
                book.nonce = delta.nonce.or(book.nonce);
                book.timestamp = delta.timestamp;
                Some(book.to_order_book(&delta.symbol))
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<OrderBook> {
        self.books.get(symbol).map(|book| book.to_order_book(symbol))
    }

    pub fn remove(&mut self, symbol: &str) {
        self.books.remove(symbol);
    }

    pub fn clear(&mut self) {
        self.books.clear();
    }
}

fn handle_ticker<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(codec
        .parse_ticker(payload, ctx)?
        .into_iter()
        .map(NormalizedEvent::Ticker)
        .collect())
}

fn handle_order_book<C: WsCodec>(
    codec: &C,
    books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    let update = codec.parse_order_book(payload, ctx)?;
    Ok(books
        .apply(update)
        .map(NormalizedEvent::OrderBook)
        .into_iter()
        .collect())
}

fn handle_trades<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(codec
        .parse_trades(payload, ctx)?
        .into_iter()
        .map(NormalizedEvent::Trade)
        .collect())
}

fn handle_ohlcv<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(codec
        .parse_ohlcv(payload, ctx)?
        .into_iter()
        .map(NormalizedEvent::Ohlcv)
        .collect())
}

fn handle_balance<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(vec![NormalizedEvent::Balance(codec.parse_balance(payload, ctx)?)])
}

fn handle_orders<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(codec
        .parse_orders(payload, ctx)?
        .into_iter()
        .map(NormalizedEvent::Order)
        .collect())
}

fn handle_my_trades<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(codec
        .parse_my_trades(payload, ctx)?
        .into_iter()
        .map(NormalizedEvent::Trade)
        .collect())
}

fn handle_positions<C: WsCodec>(
    codec: &C,
    _books: &mut BookCache,
    ctx: &ParseContext<'_>,
    payload: &Value,
) -> Result<Vec<NormalizedEvent>, ExchangeError> {
    Ok(codec
        .parse_positions(payload, ctx)?
        .into_iter()
        .map(NormalizedEvent::Position)
        .collect())
}

/// Streaming protocol state, free of I/O.
///
/// Every operation returns the frames to send; the caller owns the socket.
/// All inbound frames must be fed through [`StreamState::handle_message`] one
/// at a time, in arrival order.
pub struct StreamState<C: WsCodec> {
    codec: Arc<C>,
    credentials: Option<Credentials>,
    nonces: Arc<dyn NonceProvider>,
    connection: ConnectionState,
    auth: AuthState,
    /// Keyed by server topic, the binding's canonical form of (channel, symbol)
    subscriptions: HashMap<String, Entry>,
    /// Topics waiting for authentication, in call order
    pending_private: VecDeque<String>,
    handlers: HashMap<ChannelKind, Handler<C>>,
    books: BookCache,
    markets: MarketIndex,
    error_listeners: Vec<ErrorListener>,
}

impl<C: WsCodec> StreamState<C> {
    pub fn new(
        codec: Arc<C>,
        credentials: Option<Credentials>,
        nonces: Arc<dyn NonceProvider>,
    ) -> Self {
        let mut handlers: HashMap<ChannelKind, Handler<C>> = HashMap::new();
        handlers.insert(ChannelKind::Ticker, handle_ticker::<C>);
        handlers.insert(ChannelKind::OrderBook, handle_order_book::<C>);
        handlers.insert(ChannelKind::Trades, handle_trades::<C>);
        handlers.insert(ChannelKind::Ohlcv, handle_ohlcv::<C>);
        handlers.insert(ChannelKind::Balance, handle_balance::<C>);
        handlers.insert(ChannelKind::Orders, handle_orders::<C>);
        handlers.insert(ChannelKind::MyTrades, handle_my_trades::<C>);
        handlers.insert(ChannelKind::Positions, handle_positions::<C>);

        Self {
            codec,
            credentials,
            nonces,
            connection: ConnectionState::Disconnected,
            auth: AuthState::Unauthenticated,
            subscriptions: HashMap::new(),
            pending_private: VecDeque::new(),
            handlers,
            books: BookCache::default(),
            markets: MarketIndex::default(),
            error_listeners: Vec::new(),
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub const fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub const fn auth_state(&self) -> &AuthState {
        &self.auth
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.connection,
            ConnectionState::Connected | ConnectionState::Authenticated
        )
    }

    /// Replace the handler for one channel kind
    pub fn register_handler(&mut self, kind: ChannelKind, handler: Handler<C>) {
        self.handlers.insert(kind, handler);
    }

    pub fn register_market(&mut self, market_id: impl Into<String>, symbol: impl Into<String>) {
        self.markets.insert(market_id, symbol);
    }

    pub fn add_error_listener(&mut self, listener: ErrorListener) {
        self.error_listeners.push(listener);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn status(&self, subscription: &Subscription) -> Option<SubscriptionStatus> {
        let topic = self.codec.topic(subscription).ok()?;
        self.subscriptions.get(&topic).map(|entry| entry.status)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (&Subscription, SubscriptionStatus)> {
        self.subscriptions
            .values()
            .map(|entry| (&entry.subscription, entry.status))
    }

    pub fn order_book(&self, symbol: &str) -> Option<OrderBook> {
        self.books.get(symbol)
    }

    pub fn on_connecting(&mut self) {
        debug!(exchange = %self.codec.name(), "connecting");
        self.connection = ConnectionState::Connecting;
    }

    pub fn on_connected(&mut self) {
        debug!(exchange = %self.codec.name(), "connected");
        self.connection = ConnectionState::Connected;
        self.auth = AuthState::Unauthenticated;
    }

    /// Connection lost or closed: everything becomes stale, nothing is forgotten
    pub fn on_disconnected(&mut self) {
        debug!(
            exchange = %self.codec.name(),
            subscriptions = self.subscriptions.len(),
            "disconnected, subscriptions marked stale"
        );
        self.connection = ConnectionState::Disconnected;
        self.auth = AuthState::Unauthenticated;
        self.pending_private.clear();
        self.books.clear();
        for entry in self.subscriptions.values_mut() {
            entry.status = SubscriptionStatus::Stale;
        }
    }

    /// Transport failure: go stale and tell the error listeners
    pub fn on_connection_lost(&mut self, error: &ExchangeError) {
        warn!(exchange = %self.codec.name(), "connection lost: {}", error);
        self.on_disconnected();
        self.notify_error(error);
    }

    fn require_connected(&self) -> Result<(), ExchangeError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ExchangeError::NetworkError(format!(
                "{} stream is not connected",
                self.codec.name()
            )))
        }
    }

    fn auth_frame(&mut self) -> Result<Message, ExchangeError> {
        let credentials = self
            .credentials
            .as_ref()
            .filter(|c| c.is_complete())
            .ok_or_else(|| ExchangeError::AuthError("apiKey and secret required".to_string()))?;
        let frame = self
            .codec
            .encode_auth(credentials, self.nonces.next_nonce())?;
        self.auth = AuthState::Pending;
        debug!(exchange = %self.codec.name(), "authentication requested");
        Ok(frame)
    }

    /// Send the login frame unless authentication is done or in flight.
    ///
    /// Clears a previous failure, so it is also the retry path.
    pub fn authenticate(&mut self) -> Result<Vec<Message>, ExchangeError> {
        self.require_connected()?;
        match self.auth {
            AuthState::Authenticated | AuthState::Pending => Ok(Vec::new()),
            AuthState::Unauthenticated | AuthState::Failed(_) => Ok(vec![self.auth_frame()?]),
        }
    }

    /// Register `listener` for `subscription`, returning frames to send.
    ///
    /// A topic that is already active or queued yields no frame. Private
    /// subscriptions made before authentication are queued and trigger the
    /// login frame once.
    pub fn subscribe(
        &mut self,
        subscription: Subscription,
        listener: Listener,
    ) -> Result<Vec<Message>, ExchangeError> {
        self.require_connected()?;

        let private = subscription.is_private();
        if private {
            if let AuthState::Failed(reason) = &self.auth {
                return Err(ExchangeError::AuthError(reason.clone()));
            }
        }

        let topic = self.codec.topic(&subscription)?;
        if let Some(symbol) = &subscription.symbol {
            let market_id = self.codec.market_id(symbol)?;
            self.markets.insert(market_id, symbol.clone());
        }

        let mut outbound = Vec::new();
        if private && self.auth == AuthState::Unauthenticated {
            outbound.push(self.auth_frame()?);
        }

        let filter = subscription.symbol.clone();
        let entry = self
            .subscriptions
            .entry(topic.clone())
            .or_insert_with(|| Entry {
                subscription,
                status: SubscriptionStatus::Stale,
                listeners: Vec::new(),
            });
        entry.listeners.push((filter, listener));
        entry.refresh_symbol();

        match entry.status {
            SubscriptionStatus::Active | SubscriptionStatus::Pending => {
                trace!(topic = %topic, "already subscribed, listener added");
            }
            SubscriptionStatus::Stale => {
                if private && self.auth != AuthState::Authenticated {
                    debug!(topic = %topic, "private subscription queued until authenticated");
                    entry.status = SubscriptionStatus::Pending;
                    self.pending_private.push_back(topic);
                } else {
                    debug!(topic = %topic, "subscribing");
                    entry.status = SubscriptionStatus::Active;
                    outbound.push(self.codec.encode_subscription(&[topic])?);
                }
            }
        }

        Ok(outbound)
    }

    /// Drop the listeners of one (channel, symbol) pair.
    ///
    /// Topics shared with other symbols stay subscribed until their last
    /// listener is gone.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> Result<Vec<Message>, ExchangeError> {
        let topic = self.codec.topic(subscription)?;
        let Some(entry) = self.subscriptions.get_mut(&topic) else {
            return Ok(Vec::new());
        };

        entry
            .listeners
            .retain(|(filter, listener)| *filter != subscription.symbol && !listener.is_closed());
        if !entry.listeners.is_empty() {
            entry.refresh_symbol();
            debug!(topic = %topic, remaining = entry.listeners.len(), "listeners removed, topic still in use");
            return Ok(Vec::new());
        }

        let Some(entry) = self.subscriptions.remove(&topic) else {
            return Ok(Vec::new());
        };
        if let Some(symbol) = &subscription.symbol {
            if entry.subscription.channel.kind() == ChannelKind::OrderBook {
                self.books.remove(symbol);
            }
        }

        match entry.status {
            SubscriptionStatus::Active if self.is_connected() => {
                debug!(topic = %topic, "unsubscribing");
                Ok(vec![self.codec.encode_unsubscription(&[topic])?])
            }
            SubscriptionStatus::Pending => {
                self.pending_private.retain(|queued| *queued != topic);
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Replay every stale subscription on the current connection
    pub fn resubscribe(&mut self) -> Result<Vec<Message>, ExchangeError> {
        self.require_connected()?;

        let mut stale: Vec<(String, bool)> = self
            .subscriptions
            .iter()
            .filter(|(_, entry)| entry.status == SubscriptionStatus::Stale)
            .map(|(topic, entry)| (topic.clone(), entry.subscription.is_private()))
            .collect();
        stale.sort();

        let mut outbound = Vec::new();
        let mut public = Vec::new();
        let mut needs_auth = false;

        for (topic, private) in stale {
            let Some(entry) = self.subscriptions.get_mut(&topic) else {
                continue;
            };
            if private && self.auth != AuthState::Authenticated {
                entry.status = SubscriptionStatus::Pending;
                self.pending_private.push_back(topic);
                needs_auth = true;
            } else {
                entry.status = SubscriptionStatus::Active;
                public.push(topic);
            }
        }

        if needs_auth && self.auth == AuthState::Unauthenticated {
            outbound.push(self.auth_frame()?);
        }
        if !public.is_empty() {
            debug!(count = public.len(), "resubscribing");
            outbound.push(self.codec.encode_subscription(&public)?);
        }
        Ok(outbound)
    }

    /// Process one inbound frame, returning frames to send in response
    pub fn handle_message(&mut self, message: &Message) -> Vec<Message> {
        let inbound = match self.codec.decode_message(message) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                trace!("ignored frame");
                return Vec::new();
            }
            Err(e) => {
                warn!(exchange = %self.codec.name(), "dropping malformed message: {}", e);
                self.notify_error(&e);
                return Vec::new();
            }
        };

        match inbound {
            WsInbound::Data { topic, payload } => self.dispatch(&topic, &payload),
            WsInbound::Authenticated => self.on_authenticated(),
            WsInbound::AuthFailed(reason) => {
                self.on_auth_failed(reason);
                Vec::new()
            }
            WsInbound::Ack => {
                trace!("subscription acknowledged");
                Vec::new()
            }
            WsInbound::Pong => {
                trace!("pong");
                Vec::new()
            }
            WsInbound::Rejected(reason) => {
                warn!(exchange = %self.codec.name(), "request rejected: {}", reason);
                self.notify_error(&ExchangeError::BadRequest(reason));
                Vec::new()
            }
        }
    }

    fn dispatch(&mut self, topic: &str, payload: &Value) -> Vec<Message> {
        let Some(entry) = self.subscriptions.get_mut(topic) else {
            trace!(topic = %topic, "no subscription for topic");
            return Vec::new();
        };
        if entry.status != SubscriptionStatus::Active {
            trace!(topic = %topic, "data for inactive subscription dropped");
            return Vec::new();
        }

        let kind = entry.subscription.channel.kind();
        let Some(&handler) = self.handlers.get(&kind) else {
            trace!(topic = %topic, ?kind, "no handler registered");
            return Vec::new();
        };

        let ctx = ParseContext {
            subscription: &entry.subscription,
            markets: &self.markets,
        };
        match handler(&*self.codec, &mut self.books, &ctx, payload) {
            Ok(events) => {
                for event in &events {
                    entry.deliver(event);
                }
            }
            Err(e) => {
                warn!(topic = %topic, "failed to handle message: {}", e);
                self.notify_error(&e);
                return Vec::new();
            }
        }

        if entry.listeners.is_empty() {
            debug!(topic = %topic, "no listeners left, unsubscribing");
            self.subscriptions.remove(topic);
            return self
                .codec
                .encode_unsubscription(&[topic.to_string()])
                .map(|frame| vec![frame])
                .unwrap_or_default();
        }
        Vec::new()
    }

    fn on_authenticated(&mut self) -> Vec<Message> {
        debug!(exchange = %self.codec.name(), queued = self.pending_private.len(), "authenticated");
        self.auth = AuthState::Authenticated;
        self.connection = ConnectionState::Authenticated;

        let mut outbound = Vec::new();
        while let Some(topic) = self.pending_private.pop_front() {
            let Some(entry) = self.subscriptions.get_mut(&topic) else {
                continue;
            };
            if entry.status != SubscriptionStatus::Pending {
                continue;
            }
            match self.codec.encode_subscription(&[topic.clone()]) {
                Ok(frame) => {
                    entry.status = SubscriptionStatus::Active;
                    outbound.push(frame);
                }
                Err(e) => {
                    warn!(topic = %topic, "queued subscription dropped: {}", e);
                    if let Some(mut entry) = self.subscriptions.remove(&topic) {
                        entry.fail(&e);
                    }
                }
            }
        }
        outbound
    }

    fn on_auth_failed(&mut self, reason: String) {
        warn!(exchange = %self.codec.name(), "authentication failed: {}", reason);
        let error = ExchangeError::AuthError(reason.clone());
        self.auth = AuthState::Failed(reason);

        while let Some(topic) = self.pending_private.pop_front() {
            if let Some(mut entry) = self.subscriptions.remove(&topic) {
                entry.fail(&error);
            }
        }
        self.notify_error(&error);
    }

    fn notify_error(&mut self, error: &ExchangeError) {
        self.error_listeners
            .retain(|listener| listener.send(error.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::codec::Channel;
    use crate::core::kernel::nonce::MonotonicNonce;
    use crate::core::types::conversion;
    use crate::core::types::{Order, Ticker};
    use serde_json::json;
    use std::str::FromStr;

    /// Minimal JSON protocol:
    /// `{"op":"auth","ok":bool}`, `{"topic":..,"data":..}`, `{"op":"ack"}`
    struct TestCodec;

    impl WsCodec for TestCodec {
        fn name(&self) -> &str {
            "test"
        }

        fn market_id(&self, symbol: &str) -> Result<String, ExchangeError> {
            Ok(symbol.replace('/', ""))
        }

        fn topic(&self, subscription: &Subscription) -> Result<String, ExchangeError> {
            let kind = format!("{:?}", subscription.channel.kind()).to_lowercase();
            Ok(match &subscription.symbol {
                Some(symbol) if !subscription.is_private() => {
                    format!("{}.{}", kind, self.market_id(symbol)?)
                }
                _ => kind,
            })
        }

        fn encode_subscription(&self, topics: &[String]) -> Result<Message, ExchangeError> {
            // positions exist on the channel list but the test protocol cannot subscribe to them
            if topics.iter().any(|topic| topic == "positions") {
                return Err(ExchangeError::NotSupported("positions".to_string()));
            }
            Ok(Message::Text(json!({"op": "subscribe", "args": topics}).to_string()))
        }

        fn encode_unsubscription(&self, topics: &[String]) -> Result<Message, ExchangeError> {
            Ok(Message::Text(json!({"op": "unsubscribe", "args": topics}).to_string()))
        }

        fn encode_auth(&self, credentials: &Credentials, nonce: u64) -> Result<Message, ExchangeError> {
            Ok(Message::Text(
                json!({"op": "auth", "key": credentials.api_key(), "nonce": nonce}).to_string(),
            ))
        }

        fn decode_message(&self, message: &Message) -> Result<Option<WsInbound>, ExchangeError> {
            let Message::Text(text) = message else {
                return Ok(None);
            };
            let value: Value = serde_json::from_str(text)
                .map_err(|e| ExchangeError::DeserializationError(e.to_string()))?;
            if value["op"] == "auth" {
                return Ok(Some(if value["ok"] == true {
                    WsInbound::Authenticated
                } else {
                    WsInbound::AuthFailed("bad key".to_string())
                }));
            }
            match value["topic"].as_str() {
                Some(topic) => Ok(Some(WsInbound::Data {
                    topic: topic.to_string(),
                    payload: value["data"].clone(),
                })),
                None => Ok(None),
            }
        }

        fn parse_ticker(&self, payload: &Value, ctx: &ParseContext<'_>) -> Result<Vec<Ticker>, ExchangeError> {
            Ok(vec![Ticker {
                symbol: ctx.symbol_or(None),
                timestamp: conversion::integer(payload, "ts").unwrap_or_default(),
                last: conversion::price(payload, "last"),
                bid: None,
                ask: None,
                high: None,
                low: None,
                open: None,
                change_percent: None,
                base_volume: None,
                quote_volume: None,
            }])
        }

        fn parse_order_book(
            &self,
            payload: &Value,
            ctx: &ParseContext<'_>,
        ) -> Result<OrderBookUpdate, ExchangeError> {
            let book = OrderBook {
                symbol: ctx.symbol_or(None),
                bids: conversion::price_levels(payload.get("b")),
                asks: conversion::price_levels(payload.get("a")),
                nonce: payload["u"].as_u64(),
                timestamp: 0,
            };
            Ok(if payload["snapshot"] == true {
                OrderBookUpdate::Snapshot(book)
            } else {
                OrderBookUpdate::Delta(book)
            })
        }

        fn parse_orders(&self, payload: &Value, ctx: &ParseContext<'_>) -> Result<Vec<Order>, ExchangeError> {
            let id = conversion::string(payload, "id").unwrap_or_default();
            let market_id = conversion::string(payload, "s").unwrap_or_default();
            Ok(vec![Order {
                id,
                client_order_id: None,
                symbol: ctx.markets.symbol(&market_id),
                side: None,
                order_type: None,
                status: None,
                price: None,
                average: None,
                amount: None,
                filled: None,
                remaining: None,
                timestamp: None,
            }])
        }
    }

    fn authenticated(state: &mut StreamState<TestCodec>) {
        state.handle_message(&Message::Text(r#"{"op":"auth","ok":true}"#.into()));
    }

    fn order_frame(market_id: &str) -> Message {
        Message::Text(
            json!({"topic": "orders", "data": {"id": "o-1", "s": market_id}}).to_string(),
        )
    }

    fn state(credentials: Option<Credentials>) -> StreamState<TestCodec> {
        let mut state = StreamState::new(
            Arc::new(TestCodec),
            credentials,
            Arc::new(MonotonicNonce::counter(0)),
        );
        state.on_connecting();
        state.on_connected();
        state
    }

    fn text(message: &Message) -> String {
        message.to_text().unwrap().to_string()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut state = state(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let ticker = Subscription::new(Channel::Ticker, Some("BTC/USD"));

        let first = state.subscribe(ticker.clone(), tx.clone()).unwrap();
        let second = state.subscribe(ticker.clone(), tx).unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(state.subscription_count(), 1);
        assert_eq!(state.status(&ticker), Some(SubscriptionStatus::Active));
    }

    #[test]
    fn test_subscribe_requires_connection() {
        let mut state = StreamState::new(
            Arc::new(TestCodec),
            None,
            Arc::new(MonotonicNonce::counter(0)),
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = state
            .subscribe(Subscription::new(Channel::Ticker, Some("BTC/USD")), tx)
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_private_subscribe_without_credentials() {
        let mut state = state(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = state
            .subscribe(Subscription::new(Channel::Balance, None), tx)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::AuthError(_)));
        assert_eq!(state.subscription_count(), 0);
    }

    #[test]
    fn test_private_subscriptions_wait_for_auth() {
        let mut state = state(Some(Credentials::new("key", "secret")));
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = state
            .subscribe(Subscription::new(Channel::Orders, None), tx.clone())
            .unwrap();
        let second = state
            .subscribe(Subscription::new(Channel::Balance, None), tx)
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(text(&first[0]).contains(r#""op":"auth""#));
        assert!(second.is_empty());
        assert_eq!(state.auth_state(), &AuthState::Pending);

        let flushed = state.handle_message(&Message::Text(r#"{"op":"auth","ok":true}"#.into()));
        let flushed: Vec<String> = flushed.iter().map(text).collect();
        assert_eq!(
            flushed,
            vec![
                r#"{"args":["orders"],"op":"subscribe"}"#.to_string(),
                r#"{"args":["balance"],"op":"subscribe"}"#.to_string(),
            ]
        );
        assert_eq!(state.connection_state(), ConnectionState::Authenticated);
    }

    #[test]
    fn test_auth_failure_fails_queued_and_later_private_watches() {
        let mut state = state(Some(Credentials::new("key", "secret")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        state.add_error_listener(err_tx);

        state
            .subscribe(Subscription::new(Channel::Orders, None), tx.clone())
            .unwrap();
        state.handle_message(&Message::Text(r#"{"op":"auth","ok":false}"#.into()));

        assert!(matches!(rx.try_recv(), Ok(Err(ExchangeError::AuthError(_)))));
        assert!(matches!(err_rx.try_recv(), Ok(ExchangeError::AuthError(_))));
        assert_eq!(state.subscription_count(), 0);

        let err = state
            .subscribe(Subscription::new(Channel::Balance, None), tx.clone())
            .unwrap_err();
        assert!(matches!(err, ExchangeError::AuthError(_)));

        // public channels keep working on the same connection
        let public = state
            .subscribe(Subscription::new(Channel::Ticker, Some("BTC/USD")), tx)
            .unwrap();
        assert_eq!(public.len(), 1);

        // explicit retry clears the failure
        let retry = state.authenticate().unwrap();
        assert_eq!(retry.len(), 1);
        assert_eq!(state.auth_state(), &AuthState::Pending);
    }

    #[test]
    fn test_order_book_updates_applied_in_arrival_order() {
        let mut state = state(None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state
            .subscribe(Subscription::new(Channel::OrderBook, Some("BTC/USD")), tx)
            .unwrap();

        let frames = [
            r#"{"topic":"orderbook.BTCUSD","data":{"snapshot":true,"u":1,"b":[["100","1"],["99","2"]],"a":[["101","1"]]}}"#,
            r#"{"topic":"orderbook.BTCUSD","data":{"u":2,"b":[["100","0"]],"a":[["102","3"]]}}"#,
            r#"{"topic":"orderbook.BTCUSD","data":{"u":3,"b":[["99.5","4"]],"a":[]}}"#,
        ];
        for frame in frames {
            state.handle_message(&Message::Text(frame.to_string()));
        }

        let mut nonces = Vec::new();
        let mut last = None;
        while let Ok(Ok(NormalizedEvent::OrderBook(book))) = rx.try_recv() {
            nonces.push(book.nonce.unwrap());
            last = Some(book);
        }
        assert_eq!(nonces, vec![1, 2, 3]);

        let book = last.unwrap();
        let bids: Vec<_> = book.bids.iter().map(|l| l.price.value()).collect();
        let asks: Vec<_> = book.asks.iter().map(|l| l.price.value()).collect();
        assert_eq!(bids, vec![dec("99.5"), dec("99")]);
        assert_eq!(asks, vec![dec("101"), dec("102")]);
    }

    #[test]
    fn test_book_cache_drops_early_and_stale_deltas() {
        let mut cache = BookCache::default();
        let book = |nonce| OrderBook {
            symbol: "BTC/USD".to_string(),
            bids: vec![OrderBookEntry {
                price: Price::new(dec("1")),
                quantity: Quantity::new(dec("1")),
            }],
            asks: Vec::new(),
            nonce: Some(nonce),
            timestamp: 0,
        };

        assert!(cache.apply(OrderBookUpdate::Delta(book(1))).is_none());
        assert!(cache.apply(OrderBookUpdate::Snapshot(book(5))).is_some());
        assert!(cache.apply(OrderBookUpdate::Delta(book(5))).is_none());
        assert!(cache.apply(OrderBookUpdate::Delta(book(6))).is_some());
    }

    #[test]
    fn test_disconnect_marks_stale_and_resubscribe_replays() {
        let mut state = state(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let ticker = Subscription::new(Channel::Ticker, Some("BTC/USD"));
        state.subscribe(ticker.clone(), tx).unwrap();

        state.on_disconnected();
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
        assert_eq!(state.status(&ticker), Some(SubscriptionStatus::Stale));
        assert!(state.resubscribe().is_err());

        state.on_connected();
        let replay = state.resubscribe().unwrap();
        assert_eq!(replay.len(), 1);
        assert!(text(&replay[0]).contains("ticker.BTCUSD"));
        assert_eq!(state.status(&ticker), Some(SubscriptionStatus::Active));
    }

    #[test]
    fn test_unknown_and_malformed_messages_are_dropped() {
        let mut state = state(None);
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        state.add_error_listener(err_tx);

        assert!(state
            .handle_message(&Message::Text(r#"{"hello":"world"}"#.into()))
            .is_empty());
        assert!(state
            .handle_message(&Message::Text(r#"{"topic":"ticker.ETHUSD","data":{}}"#.into()))
            .is_empty());
        assert!(err_rx.try_recv().is_err());

        assert!(state.handle_message(&Message::Text("{not json".into())).is_empty());
        assert!(matches!(
            err_rx.try_recv(),
            Ok(ExchangeError::DeserializationError(_))
        ));
        assert!(state.is_connected());
    }

    #[test]
    fn test_dropped_listeners_trigger_unsubscribe() {
        let mut state = state(None);
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .subscribe(Subscription::new(Channel::Ticker, Some("BTC/USD")), tx)
            .unwrap();
        drop(rx);

        let outbound = state.handle_message(&Message::Text(
            r#"{"topic":"ticker.BTCUSD","data":{"last":"1"}}"#.into(),
        ));
        assert_eq!(outbound.len(), 1);
        assert!(text(&outbound[0]).contains("unsubscribe"));
        assert_eq!(state.subscription_count(), 0);
    }

    #[test]
    fn test_unsubscribe_sends_frame_once() {
        let mut state = state(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let ticker = Subscription::new(Channel::Ticker, Some("BTC/USD"));
        state.subscribe(ticker.clone(), tx).unwrap();

        assert_eq!(state.unsubscribe(&ticker).unwrap().len(), 1);
        assert!(state.unsubscribe(&ticker).unwrap().is_empty());
    }

    #[test]
    fn test_unsubscribe_keeps_other_symbols_on_shared_topic() {
        let mut state = state(Some(Credentials::new("key", "secret")));
        let (btc_tx, mut btc_rx) = mpsc::unbounded_channel();
        let (eth_tx, mut eth_rx) = mpsc::unbounded_channel();
        let btc = Subscription::new(Channel::Orders, Some("BTC/USD"));
        let eth = Subscription::new(Channel::Orders, Some("ETH/USD"));

        state.subscribe(btc.clone(), btc_tx).unwrap();
        state.subscribe(eth.clone(), eth_tx).unwrap();
        authenticated(&mut state);

        assert!(state.unsubscribe(&eth).unwrap().is_empty());
        assert!(matches!(eth_rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
        assert_eq!(state.status(&btc), Some(SubscriptionStatus::Active));

        state.handle_message(&order_frame("BTCUSD"));
        match btc_rx.try_recv() {
            Ok(Ok(NormalizedEvent::Order(order))) => assert_eq!(order.symbol, "BTC/USD"),
            other => panic!("expected order, got {:?}", other),
        }

        // the last pair on the topic releases the server subscription
        let outbound = state.unsubscribe(&btc).unwrap();
        assert_eq!(text(&outbound[0]), r#"{"args":["orders"],"op":"unsubscribe"}"#);
        assert_eq!(state.subscription_count(), 0);
    }

    #[test]
    fn test_closed_listeners_pruned_even_when_filtered_out() {
        let mut state = state(Some(Credentials::new("key", "secret")));
        let (btc_tx, btc_rx) = mpsc::unbounded_channel();
        let (eth_tx, eth_rx) = mpsc::unbounded_channel();
        state
            .subscribe(Subscription::new(Channel::Orders, Some("BTC/USD")), btc_tx)
            .unwrap();
        state
            .subscribe(Subscription::new(Channel::Orders, Some("ETH/USD")), eth_tx)
            .unwrap();
        authenticated(&mut state);
        drop(btc_rx);
        drop(eth_rx);

        // an ETH order does not match the BTC listener, which is gone all the same
        let outbound = state.handle_message(&order_frame("ETHUSD"));
        assert_eq!(outbound.len(), 1);
        assert!(text(&outbound[0]).contains("unsubscribe"));
        assert_eq!(state.subscription_count(), 0);
    }

    #[test]
    fn test_handler_errors_reach_error_listeners() {
        let mut state = state(None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        state.add_error_listener(err_tx);
        state
            .subscribe(Subscription::new(Channel::Trades, Some("BTC/USD")), tx)
            .unwrap();

        // the test protocol has no trade parser
        state.handle_message(&Message::Text(
            r#"{"topic":"trades.BTCUSD","data":{}}"#.into(),
        ));
        assert!(matches!(err_rx.try_recv(), Ok(ExchangeError::NotSupported(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(state.subscription_count(), 1);
    }

    #[test]
    fn test_unencodable_queued_topic_is_removed() {
        let mut state = state(Some(Credentials::new("key", "secret")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let positions = Subscription::new(Channel::Positions, None);
        state.subscribe(positions.clone(), tx).unwrap();

        let outbound = state.handle_message(&Message::Text(r#"{"op":"auth","ok":true}"#.into()));
        assert!(outbound.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Err(ExchangeError::NotSupported(_)))));
        assert_eq!(state.status(&positions), None);
        assert_eq!(state.subscription_count(), 0);
    }
}
