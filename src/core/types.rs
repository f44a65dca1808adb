use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Typed errors for the types subsystem
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(#[from] rust_decimal::Error),
}

/// Unified `BASE/QUOTE` symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    /// Create a new symbol with validation
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, TypesError> {
        let base = base.into();
        let quote = quote.into();

        if base.is_empty() || quote.is_empty() {
            return Err(TypesError::InvalidSymbol(
                "Base and quote assets cannot be empty".to_string(),
            ));
        }

        Ok(Self { base, quote })
    }

    /// Parse a unified symbol such as `BTC/USDT`.
    ///
    /// Derivative suffixes (`BTC/USDT:USDT`) are accepted and ignored.
    pub fn parse(symbol: &str) -> Result<Self, TypesError> {
        let spot = symbol.split(':').next().unwrap_or(symbol);
        let (base, quote) = spot
            .split_once('/')
            .ok_or_else(|| TypesError::InvalidSymbol(symbol.to_string()))?;
        Self::new(base, quote)
    }

    /// Concatenated form used by most exchanges as market id (`BTCUSDT`)
    pub fn concatenated(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Joined with a custom separator, lower-cased (`btc_mxn`)
    pub fn joined_lowercase(&self, separator: &str) -> String {
        format!("{}{}{}", self.base, separator, self.quote).to_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Type-safe price representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Price {
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        Ok(Self(s.parse()?))
    }

    pub const fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe quantity representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Quantity {
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        Ok(Self(s.parse()?))
    }

    pub const fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe volume representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Volume(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Volume {
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub const fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lenient field readers for exchange JSON payloads.
///
/// Exchanges mix strings and numbers for the same field, so every reader
/// accepts both.
pub mod conversion {
    use super::{Price, Quantity, Volume};
    use crate::core::errors::ExchangeError;
    use chrono::{DateTime, SecondsFormat, Utc};
    use rust_decimal::Decimal;
    use serde_json::Value;
    use std::str::FromStr;

    pub fn string(value: &Value, key: &str) -> Option<String> {
        match value.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn decimal(value: &Value, key: &str) -> Option<Decimal> {
        value.get(key).and_then(decimal_value)
    }

    /// Decimal out of a bare JSON value (string or number)
    pub fn decimal_value(value: &Value) -> Option<Decimal> {
        match value {
            Value::String(s) if !s.is_empty() => Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok(),
            Value::Number(n) => {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .ok()
            }
            _ => None,
        }
    }

    pub fn integer(value: &Value, key: &str) -> Option<i64> {
        match value.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn price(value: &Value, key: &str) -> Option<Price> {
        decimal(value, key).map(Price::new)
    }

    pub fn quantity(value: &Value, key: &str) -> Option<Quantity> {
        decimal(value, key).map(Quantity::new)
    }

    pub fn volume(value: &Value, key: &str) -> Option<Volume> {
        decimal(value, key).map(Volume::new)
    }

    pub fn required_string(value: &Value, key: &str) -> Result<String, ExchangeError> {
        string(value, key).ok_or_else(|| missing(key))
    }

    pub fn required_decimal(value: &Value, key: &str) -> Result<Decimal, ExchangeError> {
        decimal(value, key).ok_or_else(|| missing(key))
    }

    fn missing(key: &str) -> ExchangeError {
        ExchangeError::DeserializationError(format!("missing or invalid field '{}'", key))
    }

    /// Parse an ISO 8601 / RFC 3339 timestamp into milliseconds
    pub fn iso8601_to_millis(datetime: &str) -> Option<i64> {
        DateTime::parse_from_rfc3339(datetime)
            .map(|dt| dt.timestamp_millis())
            .ok()
    }

    pub fn millis_to_iso8601(timestamp: i64) -> Option<String> {
        DateTime::<Utc>::from_timestamp_millis(timestamp)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// `[price, amount]` pairs as sent in order book payloads
    pub fn price_levels(value: Option<&Value>) -> Vec<super::OrderBookEntry> {
        value
            .and_then(Value::as_array)
            .map(|levels| {
                levels
                    .iter()
                    .filter_map(|level| {
                        let pair = level.as_array()?;
                        Some(super::OrderBookEntry {
                            price: Price::new(decimal_value(pair.first()?)?),
                            quantity: Quantity::new(decimal_value(pair.get(1)?)?),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Ordered request parameters.
///
/// Insertion order is kept because several exchanges sign the exact query
/// string they receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; replaces an existing key in place
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    pub fn extend(&mut self, other: Self) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// JSON object with string values
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

// Serialized as a JSON object whose keys keep insertion order
impl Serialize for Params {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub active: bool,
    pub price_precision: Option<u32>,
    pub amount_precision: Option<u32>,
    pub min_amount: Option<Quantity>,
    pub max_amount: Option<Quantity>,
    pub min_price: Option<Price>,
    pub max_price: Option<Price>,
}

impl Market {
    /// Round an amount to the market's lot precision, half away from zero
    pub fn amount_to_precision(&self, amount: Quantity) -> Quantity {
        Quantity::new(to_precision(amount.value(), self.amount_precision))
    }

    /// Round a price to the market's tick precision, half away from zero
    pub fn price_to_precision(&self, price: Price) -> Price {
        Price::new(to_precision(price.value(), self.price_precision))
    }
}

fn to_precision(value: Decimal, places: Option<u32>) -> Decimal {
    match places {
        Some(places) => {
            value.round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
        }
        None => value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn parse(side: &str) -> Option<Self> {
        match side.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(Self::Buy),
            "sell" | "ask" => Some(Self::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn parse(order_type: &str) -> Option<Self> {
        match order_type.to_ascii_lowercase().as_str() {
            "market" => Some(Self::Market),
            "limit" => Some(Self::Limit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    GTC, // Good Till Canceled
    IOC, // Immediate or Cancel
    FOK, // Fill or Kill
    PostOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Rejected,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Quantity,
    pub price: Option<Price>,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Option<OrderSide>,
    pub order_type: Option<OrderType>,
    pub status: Option<OrderStatus>,
    pub price: Option<Price>,
    pub average: Option<Price>,
    pub amount: Option<Quantity>,
    pub filled: Option<Quantity>,
    pub remaining: Option<Quantity>,
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub timestamp: i64,
    pub last: Option<Price>,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub high: Option<Price>,
    pub low: Option<Price>,
    pub open: Option<Price>,
    pub change_percent: Option<Decimal>,
    pub base_volume: Option<Volume>,
    pub quote_volume: Option<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Price,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    /// Best bid first
    pub bids: Vec<OrderBookEntry>,
    /// Best ask first
    pub asks: Vec<OrderBookEntry>,
    pub nonce: Option<u64>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    pub order_id: Option<String>,
    pub side: Option<OrderSide>,
    pub price: Price,
    pub amount: Quantity,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: i64,
    pub open_price: Price,
    pub high_price: Price,
    pub low_price: Price,
    pub close_price: Price,
    pub volume: Volume,
    pub final_bar: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

impl Balance {
    /// Build a balance from whichever parts the exchange reported.
    ///
    /// `total = free + used` holds whenever `total` is not supplied; a missing
    /// `free` or `used` is derived from the other two.
    pub fn from_parts(
        currency: impl Into<String>,
        free: Option<Decimal>,
        used: Option<Decimal>,
        total: Option<Decimal>,
    ) -> Self {
        let (free, used, total) = match (free, used, total) {
            (free, used, None) => {
                let free = free.unwrap_or_default();
                let used = used.unwrap_or_default();
                (free, used, free + used)
            }
            (None, Some(used), Some(total)) => (total - used, used, total),
            (Some(free), None, Some(total)) => (free, total - free, total),
            (free, used, Some(total)) => (free.unwrap_or(total), used.unwrap_or_default(), total),
        };

        Self {
            currency: currency.into(),
            free,
            used,
            total,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub balances: BTreeMap<String, Balance>,
    pub timestamp: Option<i64>,
}

impl Balances {
    pub fn insert(&mut self, balance: Balance) {
        self.balances.insert(balance.currency.clone(), balance);
    }

    pub fn get(&self, currency: &str) -> Option<&Balance> {
        self.balances.get(currency)
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl FromIterator<Balance> for Balances {
    fn from_iter<I: IntoIterator<Item = Balance>>(iter: I) -> Self {
        let mut balances = Self::default();
        for balance in iter {
            balances.insert(balance);
        }
        balances
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Option<PositionSide>,
    pub contracts: Quantity,
    pub entry_price: Option<Price>,
    pub mark_price: Option<Price>,
    pub liquidation_price: Option<Price>,
    pub unrealized_pnl: Option<Decimal>,
    pub leverage: Option<Decimal>,
    pub timestamp: Option<i64>,
}

/// Exchange-agnostic streamed update handed to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizedEvent {
    Ticker(Ticker),
    OrderBook(OrderBook),
    Trade(Trade),
    Ohlcv(Kline),
    Balance(Balances),
    Order(Order),
    Position(Position),
}

impl NormalizedEvent {
    /// Source timestamp in milliseconds, when the exchange sent one
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Ticker(t) => Some(t.timestamp),
            Self::OrderBook(b) => Some(b.timestamp),
            Self::Trade(t) => Some(t.timestamp),
            Self::Ohlcv(k) => Some(k.open_time),
            Self::Balance(b) => b.timestamp,
            Self::Order(o) => o.timestamp,
            Self::Position(p) => p.timestamp,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Ticker(t) => Some(&t.symbol),
            Self::OrderBook(b) => Some(&b.symbol),
            Self::Trade(t) => Some(&t.symbol),
            Self::Ohlcv(k) => Some(&k.symbol),
            Self::Order(o) => Some(&o.symbol),
            Self::Position(p) => Some(&p.symbol),
            Self::Balance(_) => None,
        }
    }
}
