use crate::core::binding::{Endpoint, ErrorTable, ExchangeBinding, ExchangeProfile, ExchangeUrls};
use crate::core::errors::{ErrorKind, ExchangeError};
use crate::core::kernel::nonce::NonceClock;
use crate::core::kernel::signer::{
    Algorithm, BodyEncoding, DigestEncoding, HttpMethod, MessagePart, RestUrls,
    SignaturePlacement, SigningScheme,
};
use crate::core::types::{
    conversion, Balance, Balances, Kline, Market, Order, OrderBook, OrderBookEntry, OrderRequest,
    OrderSide, OrderStatus, OrderType, Params, Price, Quantity, Symbol, Ticker, TimeInForce,
    Trade, Volume,
};
use crate::exchanges::bitso::types::{
    BitsoBalances, BitsoBook, BitsoCandle, BitsoLevel, BitsoOrder, BitsoOrderBook, BitsoOrderId,
    BitsoResponse, BitsoTicker, BitsoTrade,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

fn decimal(value: &str) -> Option<Decimal> {
    if value.is_empty() {
        return None;
    }
    Decimal::from_str(value).ok()
}

fn price(value: &str) -> Option<Price> {
    decimal(value).map(Price::new)
}

fn quantity(value: &str) -> Option<Quantity> {
    decimal(value).map(Quantity::new)
}

fn required(value: &str, field: &str) -> Result<Decimal, ExchangeError> {
    decimal(value).ok_or_else(|| {
        ExchangeError::DeserializationError(format!("invalid {}: '{}'", field, value))
    })
}

fn payload<T: DeserializeOwned>(response: &Value) -> Result<T, ExchangeError> {
    BitsoResponse::<T>::deserialize(response)
        .map(|envelope| envelope.payload)
        .map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse Bitso response: {}", e))
        })
}

/// `btc_mxn` -> `BTC/MXN`
pub fn book_symbol(book: &str) -> String {
    match book.split_once('_') {
        Some((base, quote)) => format!("{}/{}", base, quote).to_uppercase(),
        None => book.to_uppercase(),
    }
}

fn levels(raw: &[BitsoLevel]) -> Vec<OrderBookEntry> {
    raw.iter()
        .filter_map(|level| {
            Some(OrderBookEntry {
                price: price(&level.price)?,
                quantity: quantity(&level.amount)?,
            })
        })
        .collect()
}

pub fn convert_market(book: &BitsoBook) -> Market {
    let symbol = book_symbol(&book.book);
    let (base, quote) = symbol
        .split_once('/')
        .map(|(base, quote)| (base.to_string(), quote.to_string()))
        .unwrap_or_else(|| (symbol.clone(), String::new()));
    Market {
        id: book.book.clone(),
        symbol,
        base,
        quote,
        active: true,
        price_precision: decimal(&book.tick_size).map(|step| step.normalize().scale()),
        amount_precision: decimal(&book.minimum_amount).map(|min| min.normalize().scale()),
        min_amount: quantity(&book.minimum_amount),
        max_amount: quantity(&book.maximum_amount),
        min_price: price(&book.minimum_price),
        max_price: price(&book.maximum_price),
    }
}

pub fn convert_ticker(ticker: &BitsoTicker, symbol: &str) -> Ticker {
    let last = decimal(&ticker.last);
    // change_24 is absolute, in quote currency
    let open = last
        .zip(decimal(&ticker.change_24))
        .map(|(last, change)| last - change);
    let change_percent = last
        .zip(open)
        .filter(|(_, open)| !open.is_zero())
        .map(|(last, open)| (last - open) / open * Decimal::ONE_HUNDRED);

    Ticker {
        symbol: symbol.to_string(),
        timestamp: conversion::iso8601_to_millis(&ticker.created_at).unwrap_or_default(),
        last: last.map(Price::new),
        bid: price(&ticker.bid),
        ask: price(&ticker.ask),
        high: price(&ticker.high),
        low: price(&ticker.low),
        open: open.map(Price::new),
        change_percent,
        base_volume: decimal(&ticker.volume).map(Volume::new),
        quote_volume: decimal(&ticker.volume)
            .zip(decimal(&ticker.vwap))
            .map(|(volume, vwap)| Volume::new(volume * vwap)),
    }
}

pub fn convert_order_book(book: &BitsoOrderBook, symbol: &str) -> OrderBook {
    OrderBook {
        symbol: symbol.to_string(),
        bids: levels(&book.bids),
        asks: levels(&book.asks),
        nonce: book.sequence.parse().ok(),
        timestamp: conversion::iso8601_to_millis(&book.updated_at).unwrap_or_default(),
    }
}

pub fn convert_trade(trade: &BitsoTrade, symbol: &str) -> Result<Trade, ExchangeError> {
    let side = if trade.side.is_empty() {
        // maker_side is the resting order, the trade side is the taker's
        OrderSide::parse(&trade.maker_side).map(|maker| match maker {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        })
    } else {
        OrderSide::parse(&trade.side)
    };
    Ok(Trade {
        id: trade.tid.to_string(),
        symbol: symbol.to_string(),
        order_id: trade.oid.clone(),
        side,
        price: Price::new(required(&trade.price, "price")?),
        // user trades report sells as negative major amounts
        amount: Quantity::new(required(&trade.amount, "amount")?.abs()),
        timestamp: conversion::iso8601_to_millis(&trade.created_at).unwrap_or_default(),
    })
}

pub fn convert_candle(
    candle: &BitsoCandle,
    symbol: &str,
    timeframe: &str,
) -> Result<Kline, ExchangeError> {
    Ok(Kline {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        open_time: candle.bucket_start_time,
        open_price: Price::new(required(&candle.open, "open")?),
        high_price: Price::new(required(&candle.high, "high")?),
        low_price: Price::new(required(&candle.low, "low")?),
        close_price: Price::new(required(&candle.close, "close")?),
        volume: Volume::new(required(&candle.volume, "volume")?),
        final_bar: true,
    })
}

pub fn convert_balances(balances: &BitsoBalances) -> Balances {
    balances
        .balances
        .iter()
        .map(|balance| {
            Balance::from_parts(
                balance.currency.to_uppercase(),
                decimal(&balance.available),
                decimal(&balance.locked),
                decimal(&balance.total),
            )
        })
        .collect()
}

pub fn convert_order_status(status: &str) -> Option<OrderStatus> {
    match status {
        "queued" | "open" | "active" | "partial-fill" | "partially filled" => {
            Some(OrderStatus::Open)
        }
        "completed" => Some(OrderStatus::Closed),
        "cancelled" | "canceled" => Some(OrderStatus::Canceled),
        _ => None,
    }
}

pub fn convert_order(order: &BitsoOrder, symbol: &str) -> Order {
    let amount = quantity(&order.original_amount);
    let remaining = quantity(&order.unfilled_amount);
    let filled = amount
        .zip(remaining)
        .map(|(amount, remaining)| Quantity::new(amount.value() - remaining.value()));
    Order {
        id: order.oid.clone(),
        client_order_id: order.client_id.clone(),
        symbol: symbol.to_string(),
        side: OrderSide::parse(&order.side),
        order_type: OrderType::parse(&order.order_type),
        status: convert_order_status(&order.status),
        price: price(&order.price),
        average: None,
        amount,
        filled,
        remaining,
        timestamp: conversion::iso8601_to_millis(&order.created_at),
    }
}

fn bare_order(id: String, symbol: &str, status: Option<OrderStatus>) -> Order {
    Order {
        id,
        client_order_id: None,
        symbol: symbol.to_string(),
        side: None,
        order_type: None,
        status,
        price: None,
        average: None,
        amount: None,
        filled: None,
        remaining: None,
        timestamp: None,
    }
}

fn error_table() -> ErrorTable {
    ErrorTable {
        code_pointer: Some("/error/code"),
        message_pointer: Some("/error/message"),
        success_codes: Vec::new(),
        exact: HashMap::from([
            ("0201", ErrorKind::Authentication),
            ("0202", ErrorKind::Authentication),
            ("0203", ErrorKind::Authentication),
            ("0204", ErrorKind::Authentication),
            ("0205", ErrorKind::Authentication),
            ("0206", ErrorKind::Authentication),
            ("0207", ErrorKind::PermissionDenied),
            ("0301", ErrorKind::BadRequest),
            ("0302", ErrorKind::BadRequest),
            ("0303", ErrorKind::BadRequest),
            ("0304", ErrorKind::BadRequest),
            ("0305", ErrorKind::BadRequest),
            ("0379", ErrorKind::InsufficientFunds),
            ("0403", ErrorKind::OrderNotFound),
            ("0404", ErrorKind::OrderNotFound),
            ("104", ErrorKind::BadRequest),
        ]),
        broad: vec![
            ("Insufficient", ErrorKind::InsufficientFunds),
            ("nonce", ErrorKind::BadRequest),
            ("Too many requests", ErrorKind::RateLimitExceeded),
            ("not found", ErrorKind::OrderNotFound),
        ],
    }
}

/// Immutable description of the Bitso v3 API
pub fn profile() -> ExchangeProfile {
    ExchangeProfile {
        id: "bitso",
        name: "Bitso",
        urls: ExchangeUrls {
            rest: RestUrls::single("https://api.bitso.com"),
            ws_public: None,
            ws_private: None,
        },
        endpoints: HashMap::from([
            ("fetchMarkets", Endpoint::public(HttpMethod::Get, "/v3/available_books")),
            ("fetchTicker", Endpoint::public(HttpMethod::Get, "/v3/ticker")),
            ("fetchTickers", Endpoint::public(HttpMethod::Get, "/v3/ticker")),
            ("fetchOrderBook", Endpoint::public(HttpMethod::Get, "/v3/order_book")),
            ("fetchTrades", Endpoint::public(HttpMethod::Get, "/v3/trades")),
            ("fetchOHLCV", Endpoint::public(HttpMethod::Get, "/v3/ohlc")),
            ("fetchBalance", Endpoint::private(HttpMethod::Get, "/v3/balance")),
            ("createOrder", Endpoint::private(HttpMethod::Post, "/v3/orders")),
            ("cancelOrder", Endpoint::private(HttpMethod::Delete, "/v3/orders/{oid}")),
            ("fetchOrder", Endpoint::private(HttpMethod::Get, "/v3/orders/{oid}")),
            ("fetchOpenOrders", Endpoint::private(HttpMethod::Get, "/v3/open_orders")),
            ("fetchOrders", Endpoint::private(HttpMethod::Get, "/v3/orders")),
            ("fetchClosedOrders", Endpoint::private(HttpMethod::Get, "/v3/orders")),
            ("fetchMyTrades", Endpoint::private(HttpMethod::Get, "/v3/user_trades")),
        ]),
        signing: SigningScheme {
            algorithm: Algorithm::Sha256,
            encoding: DigestEncoding::Hex,
            // nonce + method + path(?query) + JSON body
            message: vec![
                MessagePart::Nonce,
                MessagePart::Method,
                MessagePart::PathWithQuery,
                MessagePart::Body,
            ],
            placement: SignaturePlacement::Authorization { scheme: "Bitso" },
            body_encoding: BodyEncoding::Json,
        },
        errors: error_table(),
        nonce_clock: NonceClock::Milliseconds,
        rate_limit: Some(Duration::from_millis(1000)),
        timeframes: HashMap::from([
            ("1m", "60"),
            ("5m", "300"),
            ("15m", "900"),
            ("30m", "1800"),
            ("1h", "3600"),
            ("4h", "14400"),
            ("12h", "43200"),
            ("1d", "86400"),
            ("1w", "604800"),
        ]),
    }
}

/// Bitso v3 binding (spot, REST only)
#[derive(Debug, Clone)]
pub struct BitsoBinding {
    profile: ExchangeProfile,
}

impl Default for BitsoBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl BitsoBinding {
    pub fn new() -> Self {
        Self { profile: profile() }
    }

    pub fn with_rest_url(mut self, base_url: impl Into<String>) -> Self {
        self.profile.urls.rest = RestUrls::single(base_url);
        self
    }

    fn symbol_for(market: Option<&Market>, book: &str) -> String {
        market.map_or_else(|| book_symbol(book), |m| m.symbol.clone())
    }

    fn book_params(market: &Market) -> Params {
        Params::new().with("book", &market.id)
    }
}

impl ExchangeBinding for BitsoBinding {
    fn profile(&self) -> &ExchangeProfile {
        &self.profile
    }

    fn market_id(&self, symbol: &str) -> Result<String, ExchangeError> {
        Symbol::parse(symbol)
            .map(|s| s.joined_lowercase("_"))
            .map_err(|e| ExchangeError::InvalidParameters(e.to_string()))
    }

    fn parse_markets(&self, response: &Value) -> Result<Vec<Market>, ExchangeError> {
        let books: Vec<BitsoBook> = payload(response)?;
        Ok(books.iter().map(convert_market).collect())
    }

    fn parse_ticker(&self, response: &Value, market: &Market) -> Result<Ticker, ExchangeError> {
        let ticker: BitsoTicker = payload(response)?;
        Ok(convert_ticker(&ticker, &market.symbol))
    }

    fn parse_tickers(&self, response: &Value) -> Result<Vec<Ticker>, ExchangeError> {
        let tickers: Vec<BitsoTicker> = payload(response)?;
        Ok(tickers
            .iter()
            .map(|ticker| convert_ticker(ticker, &book_symbol(&ticker.book)))
            .collect())
    }

    fn parse_order_book(&self, response: &Value, market: &Market) -> Result<OrderBook, ExchangeError> {
        let book: BitsoOrderBook = payload(response)?;
        Ok(convert_order_book(&book, &market.symbol))
    }

    fn parse_trades(&self, response: &Value, market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        let trades: Vec<BitsoTrade> = payload(response)?;
        // newest first on the wire
        trades
            .iter()
            .rev()
            .map(|trade| convert_trade(trade, &market.symbol))
            .collect()
    }

    fn parse_ohlcv(
        &self,
        response: &Value,
        market: &Market,
        timeframe: &str,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let candles: Vec<BitsoCandle> = payload(response)?;
        let mut klines = candles
            .iter()
            .map(|candle| convert_candle(candle, &market.symbol, timeframe))
            .collect::<Result<Vec<_>, _>>()?;
        klines.sort_by_key(|kline| kline.open_time);
        Ok(klines)
    }

    fn parse_balance(&self, response: &Value) -> Result<Balances, ExchangeError> {
        let balances: BitsoBalances = payload(response)?;
        Ok(convert_balances(&balances))
    }

    fn parse_order(&self, response: &Value, market: Option<&Market>) -> Result<Order, ExchangeError> {
        let symbol = |book: &str| Self::symbol_for(market, book);
        match response.get("payload") {
            // create: {"oid": ...}
            Some(Value::Object(_)) if response.pointer("/payload/status").is_none() => {
                let created: BitsoOrderId = payload(response)?;
                Ok(bare_order(
                    created.oid,
                    &market.map(|m| m.symbol.clone()).unwrap_or_default(),
                    Some(OrderStatus::Open),
                ))
            }
            Some(Value::Object(_)) => {
                let order: BitsoOrder = payload(response)?;
                Ok(convert_order(&order, &symbol(&order.book)))
            }
            // cancel returns the cancelled ids, lookup returns full orders
            Some(Value::Array(items)) => match items.first() {
                Some(Value::String(_)) => {
                    let ids: Vec<String> = payload(response)?;
                    let id = ids.into_iter().next().unwrap_or_default();
                    Ok(bare_order(
                        id,
                        &market.map(|m| m.symbol.clone()).unwrap_or_default(),
                        Some(OrderStatus::Canceled),
                    ))
                }
                Some(_) => {
                    let orders: Vec<BitsoOrder> = payload(response)?;
                    orders
                        .first()
                        .map(|order| convert_order(order, &symbol(&order.book)))
                        .ok_or_else(|| ExchangeError::OrderNotFound("order not found".to_string()))
                }
                None => Err(ExchangeError::OrderNotFound("order not found".to_string())),
            },
            _ => Err(ExchangeError::DeserializationError(
                "Bitso response without payload".to_string(),
            )),
        }
    }

    fn parse_orders(
        &self,
        response: &Value,
        market: Option<&Market>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let orders: Vec<BitsoOrder> = payload(response)?;
        Ok(orders
            .iter()
            .map(|order| convert_order(order, &Self::symbol_for(market, &order.book)))
            .collect())
    }

    fn parse_my_trades(
        &self,
        response: &Value,
        market: Option<&Market>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let trades: Vec<BitsoTrade> = payload(response)?;
        trades
            .iter()
            .rev()
            .map(|trade| convert_trade(trade, &Self::symbol_for(market, &trade.book)))
            .collect()
    }

    fn ticker_params(&self, market: &Market) -> Params {
        Self::book_params(market)
    }

    fn order_book_params(&self, market: &Market, _limit: Option<u32>) -> Params {
        // v3 has no depth parameter; aggregated books are the default
        Self::book_params(market)
    }

    fn trades_params(&self, market: &Market, limit: Option<u32>) -> Params {
        let mut params = Self::book_params(market);
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn ohlcv_params(
        &self,
        market: &Market,
        interval: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        let mut params = Self::book_params(market).with("time_bucket", interval);
        if let Some(since) = since {
            params.insert("start", since);
        }
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn create_order_params(
        &self,
        request: &OrderRequest,
        market: &Market,
    ) -> Result<Params, ExchangeError> {
        let mut params = Self::book_params(market)
            .with(
                "side",
                match request.side {
                    OrderSide::Buy => "buy",
                    OrderSide::Sell => "sell",
                },
            )
            .with(
                "type",
                match request.order_type {
                    OrderType::Limit => "limit",
                    OrderType::Market => "market",
                },
            )
            .with("major", request.amount);

        match (request.order_type, request.price) {
            (OrderType::Limit, Some(price)) => params.insert("price", price),
            (OrderType::Limit, None) => {
                return Err(ExchangeError::InvalidOrder(
                    "limit orders require a price".to_string(),
                ))
            }
            (OrderType::Market, _) => {}
        }
        if let Some(time_in_force) = request.time_in_force {
            params.insert(
                "time_in_force",
                match time_in_force {
                    TimeInForce::GTC => "goodtillcancelled",
                    TimeInForce::IOC => "immediateorcancel",
                    TimeInForce::FOK => "fillorkill",
                    TimeInForce::PostOnly => "postonly",
                },
            );
        }
        if let Some(client_id) = &request.client_order_id {
            params.insert("client_id", client_id);
        }
        Ok(params)
    }

    fn cancel_order_params(&self, id: &str, _market: Option<&Market>) -> Result<Params, ExchangeError> {
        Ok(Params::new().with("oid", id))
    }

    fn fetch_order_params(&self, id: &str, _market: Option<&Market>) -> Result<Params, ExchangeError> {
        Ok(Params::new().with("oid", id))
    }

    fn open_orders_params(&self, market: Option<&Market>) -> Params {
        market.map_or_else(Params::new, Self::book_params)
    }

    fn history_params(
        &self,
        market: Option<&Market>,
        _since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        // pagination is by marker id, not time; `since` is applied to the parsed rows
        let mut params = market.map_or_else(Params::new, Self::book_params);
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn closed_orders_params(
        &self,
        market: Option<&Market>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        self.history_params(market, since, limit).with("status", "completed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::transport::HttpResponse;
    use serde_json::json;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn btc_mxn() -> Market {
        BitsoBinding::new()
            .parse_markets(&json!({
                "success": true,
                "payload": [{
                    "book": "btc_mxn",
                    "minimum_amount": "0.00000100",
                    "maximum_amount": "3000.00000000",
                    "minimum_price": "100.00",
                    "maximum_price": "10000000.00",
                    "minimum_value": "10.00",
                    "tick_size": "0.01"
                }]
            }))
            .unwrap()
            .remove(0)
    }

    #[test]
    fn test_market_from_book() {
        let market = btc_mxn();
        assert_eq!(market.id, "btc_mxn");
        assert_eq!(market.symbol, "BTC/MXN");
        assert_eq!(market.base, "BTC");
        assert_eq!(market.quote, "MXN");
        assert_eq!(market.price_precision, Some(2));
        assert_eq!(market.amount_precision, Some(6));
        assert_eq!(
            BitsoBinding::new().market_id("ETH/MXN").unwrap(),
            "eth_mxn"
        );
    }

    #[test]
    fn test_balance_parts() {
        let balances = BitsoBinding::new()
            .parse_balance(&json!({
                "success": true,
                "payload": {"balances": [
                    {"currency": "mxn", "total": "100.5", "locked": "20.5", "available": "80.0"},
                    {"currency": "btc", "total": "2.0", "locked": "0.5", "available": "1.5"}
                ]}
            }))
            .unwrap();
        let btc = balances.get("BTC").unwrap();
        assert_eq!(btc.free, dec("1.5"));
        assert_eq!(btc.used, dec("0.5"));
        assert_eq!(btc.total, dec("2.0"));
        assert_eq!(balances.get("MXN").unwrap().used, dec("20.5"));
    }

    #[test]
    fn test_trade_side_is_taker_side() {
        let trades = BitsoBinding::new()
            .parse_trades(
                &json!({
                    "success": true,
                    "payload": [
                        {"book": "btc_mxn", "created_at": "2024-01-01T00:00:02+00:00",
                         "amount": "0.2", "maker_side": "sell", "price": "800000", "tid": 2},
                        {"book": "btc_mxn", "created_at": "2024-01-01T00:00:01+00:00",
                         "amount": "0.1", "maker_side": "buy", "price": "799000", "tid": 1}
                    ]
                }),
                &btc_mxn(),
            )
            .unwrap();
        assert_eq!(trades[0].id, "1");
        assert_eq!(trades[0].side, Some(OrderSide::Sell));
        assert_eq!(trades[1].side, Some(OrderSide::Buy));
        assert_eq!(trades[1].timestamp, 1_704_067_202_000);
    }

    #[test]
    fn test_user_trades_and_bulk_tickers() {
        let binding = BitsoBinding::new();
        let fills = binding
            .parse_my_trades(
                &json!({
                    "success": true,
                    "payload": [
                        {"book": "eth_mxn", "major": "-0.5", "minor": "20000", "price": "40000",
                         "side": "sell", "tid": 9, "oid": "abc", "created_at": "2024-01-01T00:00:05+00:00"},
                        {"book": "btc_mxn", "major": "0.01", "minor": "-8000", "price": "800000",
                         "side": "buy", "tid": 8, "oid": "def", "created_at": "2024-01-01T00:00:04+00:00"}
                    ]
                }),
                None,
            )
            .unwrap();
        assert_eq!(fills[0].symbol, "BTC/MXN");
        assert_eq!(fills[1].symbol, "ETH/MXN");
        assert_eq!(fills[1].side, Some(OrderSide::Sell));
        assert_eq!(fills[1].amount.value(), dec("0.5"));
        assert_eq!(fills[1].order_id.as_deref(), Some("abc"));

        let tickers = binding
            .parse_tickers(&json!({
                "success": true,
                "payload": [
                    {"book": "btc_mxn", "last": "800000", "created_at": "2024-01-01T00:00:00+00:00"},
                    {"book": "eth_mxn", "last": "40000", "created_at": "2024-01-01T00:00:00+00:00"}
                ]
            }))
            .unwrap();
        let symbols: Vec<_> = tickers.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTC/MXN", "ETH/MXN"]);

        let params = binding.closed_orders_params(Some(&btc_mxn()), Some(1), Some(10));
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(pairs, vec![("book", "btc_mxn"), ("limit", "10"), ("status", "completed")]);
    }

    #[test]
    fn test_ticker() {
        let ticker = BitsoBinding::new()
            .parse_ticker(
                &json!({
                    "success": true,
                    "payload": {
                        "book": "btc_mxn", "volume": "22.31", "high": "110", "last": "100",
                        "low": "90", "vwap": "100", "ask": "101", "bid": "99",
                        "change_24": "-25", "created_at": "2024-01-01T00:00:00+00:00"
                    }
                }),
                &btc_mxn(),
            )
            .unwrap();
        assert_eq!(ticker.timestamp, 1_704_067_200_000);
        assert_eq!(ticker.open.unwrap().value(), dec("125"));
        assert_eq!(ticker.change_percent, Some(dec("-20")));
        assert_eq!(ticker.bid.unwrap().value(), dec("99"));
    }

    #[test]
    fn test_order_shapes() {
        let binding = BitsoBinding::new();
        let market = btc_mxn();

        let created = binding
            .parse_order(&json!({"success": true, "payload": {"oid": "qlbga6b600n3xta7"}}), Some(&market))
            .unwrap();
        assert_eq!(created.id, "qlbga6b600n3xta7");
        assert_eq!(created.status, Some(OrderStatus::Open));

        let cancelled = binding
            .parse_order(&json!({"success": true, "payload": ["qlbga6b600n3xta7"]}), None)
            .unwrap();
        assert_eq!(cancelled.status, Some(OrderStatus::Canceled));

        let fetched = binding
            .parse_order(
                &json!({"success": true, "payload": [{
                    "oid": "abc", "book": "btc_mxn", "side": "buy", "type": "limit",
                    "status": "partially filled", "price": "500000",
                    "original_amount": "0.5", "unfilled_amount": "0.2",
                    "created_at": "2024-01-01T00:00:00+00:00"
                }]}),
                None,
            )
            .unwrap();
        assert_eq!(fetched.symbol, "BTC/MXN");
        assert_eq!(fetched.status, Some(OrderStatus::Open));
        assert_eq!(fetched.filled.unwrap().value(), dec("0.3"));

        let missing = binding.parse_order(&json!({"success": true, "payload": []}), None);
        assert!(matches!(missing, Err(ExchangeError::OrderNotFound(_))));
    }

    #[test]
    fn test_create_order_params() {
        let request = OrderRequest {
            symbol: "BTC/MXN".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Limit,
            amount: Quantity::new(dec("0.01")),
            price: Some(Price::new(dec("900000"))),
            time_in_force: Some(TimeInForce::PostOnly),
            client_order_id: None,
        };
        let params = BitsoBinding::new()
            .create_order_params(&request, &btc_mxn())
            .unwrap();
        let keys: Vec<&str> = params.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["book", "side", "type", "major", "price", "time_in_force"]);
        assert_eq!(params.get("major"), Some("0.01"));
        assert_eq!(params.get("time_in_force"), Some("postonly"));
    }

    #[test]
    fn test_error_codes() {
        let errors = profile().errors;
        let response = HttpResponse::new(
            401,
            r#"{"success":false,"error":{"code":"0201","message":"Invalid Nonce or Invalid Credentials"}}"#,
        );
        assert!(matches!(errors.interpret(&response), Err(ExchangeError::AuthError(_))));

        let response = HttpResponse::new(
            400,
            r#"{"success":false,"error":{"code":"0379","message":"Insufficient balance"}}"#,
        );
        assert!(matches!(
            errors.interpret(&response),
            Err(ExchangeError::InsufficientFunds(_))
        ));

        let response = HttpResponse::new(200, r#"{"success":true,"payload":[]}"#);
        assert!(errors.interpret(&response).is_ok());
    }
}
