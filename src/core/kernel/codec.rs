use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use crate::core::types::{Balances, Kline, Order, OrderBook, Position, Ticker, Trade};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio_tungstenite::tungstenite::Message;

/// Logical stream a caller can watch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Ticker,
    OrderBook,
    Trades,
    /// Unified timeframe such as `1m`
    Ohlcv { timeframe: String },
    Balance,
    Orders,
    MyTrades,
    Positions,
}

/// Handler-table key: a [`Channel`] without its arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Ticker,
    OrderBook,
    Trades,
    Ohlcv,
    Balance,
    Orders,
    MyTrades,
    Positions,
}

impl Channel {
    pub const fn kind(&self) -> ChannelKind {
        match self {
            Self::Ticker => ChannelKind::Ticker,
            Self::OrderBook => ChannelKind::OrderBook,
            Self::Trades => ChannelKind::Trades,
            Self::Ohlcv { .. } => ChannelKind::Ohlcv,
            Self::Balance => ChannelKind::Balance,
            Self::Orders => ChannelKind::Orders,
            Self::MyTrades => ChannelKind::MyTrades,
            Self::Positions => ChannelKind::Positions,
        }
    }

    /// Account channels need an authenticated connection
    pub const fn is_private(&self) -> bool {
        matches!(
            self,
            Self::Balance | Self::Orders | Self::MyTrades | Self::Positions
        )
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ohlcv { timeframe } => write!(f, "ohlcv:{}", timeframe),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

/// What a caller asked to watch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub channel: Channel,
    /// Unified symbol; `None` for account-wide channels
    pub symbol: Option<String>,
}

impl Subscription {
    pub fn new(channel: Channel, symbol: Option<&str>) -> Self {
        Self {
            channel,
            symbol: symbol.map(str::to_string),
        }
    }

    pub const fn is_private(&self) -> bool {
        self.channel.is_private()
    }
}

/// Exchange market id -> unified symbol, for payloads that only carry ids
#[derive(Debug, Clone, Default)]
pub struct MarketIndex {
    by_id: HashMap<String, String>,
}

impl MarketIndex {
    pub fn insert(&mut self, market_id: impl Into<String>, symbol: impl Into<String>) {
        self.by_id.insert(market_id.into(), symbol.into());
    }

    /// Unified symbol for `market_id`, or the id itself when unknown
    pub fn symbol(&self, market_id: &str) -> String {
        self.by_id
            .get(market_id)
            .cloned()
            .unwrap_or_else(|| market_id.to_string())
    }
}

/// Inputs a payload parser may need besides the payload itself
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub subscription: &'a Subscription,
    pub markets: &'a MarketIndex,
}

impl ParseContext<'_> {
    /// Subscription symbol, else the symbol of `market_id`
    pub fn symbol_or(&self, market_id: Option<&str>) -> String {
        match (&self.subscription.symbol, market_id) {
            (Some(symbol), _) => symbol.clone(),
            (None, Some(id)) => self.markets.symbol(id),
            (None, None) => String::new(),
        }
    }
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum WsInbound {
    /// Payload for the subscription registered under `topic`
    Data { topic: String, payload: Value },
    Authenticated,
    AuthFailed(String),
    /// Positive reply to a subscribe/unsubscribe request
    Ack,
    Pong,
    /// Server-side rejection that is not tied to authentication
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderBookUpdate {
    /// Full replacement of the local book
    Snapshot(OrderBook),
    /// Levels to upsert; zero quantity removes a level
    Delta(OrderBook),
}

fn unsupported<T>(codec: &str, what: &str) -> Result<T, ExchangeError> {
    Err(ExchangeError::NotSupported(format!(
        "{} stream does not support {}",
        codec, what
    )))
}

/// Codec trait for handling exchange-specific WebSocket message encoding/decoding
///
/// A codec is pure data translation: topics, control frames and payload
/// parsing. Connection state and subscription bookkeeping live in
/// [`crate::core::kernel::stream::StreamState`].
pub trait WsCodec: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Exchange market id for a unified symbol
    fn market_id(&self, symbol: &str) -> Result<String, ExchangeError>;

    /// Server-side topic for a subscription.
    ///
    /// Two subscriptions mapping to the same topic share one server
    /// subscription.
    fn topic(&self, subscription: &Subscription) -> Result<String, ExchangeError>;

    fn encode_subscription(&self, topics: &[String]) -> Result<Message, ExchangeError>;

    fn encode_unsubscription(&self, topics: &[String]) -> Result<Message, ExchangeError>;

    /// Signed login frame for private channels
    fn encode_auth(&self, _credentials: &Credentials, _nonce: u64) -> Result<Message, ExchangeError> {
        unsupported(self.name(), "authentication")
    }

    /// Application-level heartbeat, if the exchange wants one
    fn encode_ping(&self) -> Option<Message> {
        None
    }

    /// Classify a raw frame.
    ///
    /// # Returns
    /// - `Ok(Some(inbound))` - recognized frame
    /// - `Ok(None)` - frame deliberately ignored
    /// - `Err(error)` - frame could not be parsed
    fn decode_message(&self, message: &Message) -> Result<Option<WsInbound>, ExchangeError>;

    fn parse_ticker(&self, _payload: &Value, _ctx: &ParseContext<'_>) -> Result<Vec<Ticker>, ExchangeError> {
        unsupported(self.name(), "tickers")
    }

    fn parse_order_book(
        &self,
        _payload: &Value,
        _ctx: &ParseContext<'_>,
    ) -> Result<OrderBookUpdate, ExchangeError> {
        unsupported(self.name(), "order books")
    }

    fn parse_trades(&self, _payload: &Value, _ctx: &ParseContext<'_>) -> Result<Vec<Trade>, ExchangeError> {
        unsupported(self.name(), "trades")
    }

    fn parse_ohlcv(&self, _payload: &Value, _ctx: &ParseContext<'_>) -> Result<Vec<Kline>, ExchangeError> {
        unsupported(self.name(), "OHLCV")
    }

    fn parse_balance(&self, _payload: &Value, _ctx: &ParseContext<'_>) -> Result<Balances, ExchangeError> {
        unsupported(self.name(), "balances")
    }

    fn parse_orders(&self, _payload: &Value, _ctx: &ParseContext<'_>) -> Result<Vec<Order>, ExchangeError> {
        unsupported(self.name(), "orders")
    }

    fn parse_my_trades(
        &self,
        _payload: &Value,
        _ctx: &ParseContext<'_>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        unsupported(self.name(), "private trades")
    }

    fn parse_positions(
        &self,
        _payload: &Value,
        _ctx: &ParseContext<'_>,
    ) -> Result<Vec<Position>, ExchangeError> {
        unsupported(self.name(), "positions")
    }
}
