use crate::core::binding::{Endpoint, ErrorTable, ExchangeBinding, ExchangeProfile, ExchangeUrls};
use crate::core::errors::{ErrorKind, ExchangeError};
use crate::core::kernel::nonce::NonceClock;
use crate::core::kernel::signer::{
    Algorithm, BodyEncoding, DigestEncoding, HttpMethod, MessagePart, RestUrls,
    SignaturePlacement, SigningScheme,
};
use crate::core::types::{
    conversion, Balance, Balances, Kline, Market, Order, OrderBook, OrderBookEntry, OrderRequest,
    OrderSide, OrderStatus, OrderType, Params, Position, PositionSide, Price, Quantity, Ticker,
    TimeInForce, Trade, Volume,
};
use crate::exchanges::bybit::types::{
    BybitApiResponse, BybitCoinBalance, BybitExecution, BybitKlineRow, BybitList, BybitMarket,
    BybitOrder, BybitOrderBook, BybitOrderRequest, BybitPosition, BybitTicker, BybitTrade,
    BybitWallet, BybitWsKline, BybitWsTrade,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub const RECV_WINDOW: &str = "5000";

/// Bybit sends empty strings for absent numbers
pub(crate) fn decimal(value: &str) -> Option<Decimal> {
    if value.is_empty() {
        return None;
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

pub(crate) fn millis(value: &str) -> Option<i64> {
    value.parse().ok()
}

fn price(value: &str) -> Option<Price> {
    decimal(value).map(Price::new)
}

fn quantity(value: &str) -> Option<Quantity> {
    decimal(value).map(Quantity::new)
}

fn required_price(value: &str, field: &str) -> Result<Price, ExchangeError> {
    price(value).ok_or_else(|| invalid(field, value))
}

fn required_quantity(value: &str, field: &str) -> Result<Quantity, ExchangeError> {
    quantity(value).ok_or_else(|| invalid(field, value))
}

fn invalid(field: &str, value: &str) -> ExchangeError {
    ExchangeError::DeserializationError(format!("invalid {}: '{}'", field, value))
}

/// Decimal places implied by a step such as `0.001`
fn precision(step: &str) -> Option<u32> {
    decimal(step).map(|step| step.normalize().scale())
}

fn levels(raw: &[[String; 2]]) -> Vec<OrderBookEntry> {
    raw.iter()
        .filter_map(|[price, amount]| {
            Some(OrderBookEntry {
                price: Price::new(decimal(price)?),
                quantity: Quantity::new(decimal(amount)?),
            })
        })
        .collect()
}

/// Deserialize `result` out of the V5 envelope
pub(crate) fn result<T: DeserializeOwned>(response: &Value) -> Result<T, ExchangeError> {
    BybitApiResponse::<T>::deserialize(response)
        .map(|envelope| envelope.result)
        .map_err(|e| {
            ExchangeError::DeserializationError(format!("Failed to parse Bybit response: {}", e))
        })
}

pub(crate) fn payload<T: DeserializeOwned>(value: &Value) -> Result<T, ExchangeError> {
    T::deserialize(value).map_err(|e| {
        ExchangeError::DeserializationError(format!("Failed to parse Bybit payload: {}", e))
    })
}

pub fn convert_market(market: &BybitMarket) -> Market {
    let lot = &market.lot_size_filter;
    let amount_step = if lot.base_precision.is_empty() {
        &lot.qty_step
    } else {
        &lot.base_precision
    };
    Market {
        id: market.symbol.clone(),
        symbol: format!("{}/{}", market.base_coin, market.quote_coin),
        base: market.base_coin.clone(),
        quote: market.quote_coin.clone(),
        active: market.status == "Trading",
        price_precision: precision(&market.price_filter.tick_size),
        amount_precision: precision(amount_step),
        min_amount: quantity(&lot.min_order_qty),
        max_amount: quantity(&lot.max_order_qty),
        min_price: price(&market.price_filter.min_price),
        max_price: price(&market.price_filter.max_price),
    }
}

pub fn convert_ticker(ticker: &BybitTicker, symbol: &str, timestamp: i64) -> Ticker {
    Ticker {
        symbol: symbol.to_string(),
        timestamp,
        last: price(&ticker.last_price),
        bid: price(&ticker.bid_price),
        ask: price(&ticker.ask_price),
        high: price(&ticker.high_price_24h),
        low: price(&ticker.low_price_24h),
        open: price(&ticker.prev_price_24h),
        // price24hPcnt is a fraction, 0.0123 means 1.23%
        change_percent: decimal(&ticker.price_24h_pcnt).map(|pct| pct * Decimal::ONE_HUNDRED),
        base_volume: decimal(&ticker.volume_24h).map(Volume::new),
        quote_volume: decimal(&ticker.turnover_24h).map(Volume::new),
    }
}

pub fn convert_order_book(book: &BybitOrderBook, symbol: &str, timestamp: i64) -> OrderBook {
    OrderBook {
        symbol: symbol.to_string(),
        bids: levels(&book.bids),
        asks: levels(&book.asks),
        nonce: Some(book.update_id),
        timestamp: if book.ts > 0 { book.ts } else { timestamp },
    }
}

pub fn convert_trade(trade: &BybitTrade, symbol: &str) -> Result<Trade, ExchangeError> {
    Ok(Trade {
        id: trade.exec_id.clone(),
        symbol: symbol.to_string(),
        order_id: None,
        side: OrderSide::parse(&trade.side),
        price: required_price(&trade.price, "price")?,
        amount: required_quantity(&trade.size, "size")?,
        timestamp: millis(&trade.time).unwrap_or_default(),
    })
}

pub fn convert_ws_trade(trade: &BybitWsTrade, symbol: &str) -> Result<Trade, ExchangeError> {
    Ok(Trade {
        id: trade.trade_id.clone(),
        symbol: symbol.to_string(),
        order_id: None,
        side: OrderSide::parse(&trade.side),
        price: required_price(&trade.price, "p")?,
        amount: required_quantity(&trade.size, "v")?,
        timestamp: trade.timestamp,
    })
}

pub fn convert_execution(execution: &BybitExecution, symbol: &str) -> Result<Trade, ExchangeError> {
    Ok(Trade {
        id: execution.exec_id.clone(),
        symbol: symbol.to_string(),
        order_id: Some(execution.order_id.clone()),
        side: OrderSide::parse(&execution.side),
        price: required_price(&execution.exec_price, "execPrice")?,
        amount: required_quantity(&execution.exec_qty, "execQty")?,
        timestamp: millis(&execution.exec_time).unwrap_or_default(),
    })
}

pub fn convert_kline_row(
    row: &BybitKlineRow,
    symbol: &str,
    timeframe: &str,
) -> Result<Kline, ExchangeError> {
    let field = |index: usize, name: &str| -> Result<Decimal, ExchangeError> {
        row.get(index)
            .and_then(|value| decimal(value))
            .ok_or_else(|| ExchangeError::DeserializationError(format!("kline missing {}", name)))
    };
    let open_time = row
        .first()
        .and_then(|value| millis(value))
        .ok_or_else(|| ExchangeError::DeserializationError("kline missing start".to_string()))?;

    Ok(Kline {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        open_time,
        open_price: Price::new(field(1, "open")?),
        high_price: Price::new(field(2, "high")?),
        low_price: Price::new(field(3, "low")?),
        close_price: Price::new(field(4, "close")?),
        volume: Volume::new(field(5, "volume")?),
        final_bar: true,
    })
}

pub fn convert_ws_kline(
    kline: &BybitWsKline,
    symbol: &str,
    timeframe: &str,
) -> Result<Kline, ExchangeError> {
    Ok(Kline {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        open_time: kline.start,
        open_price: required_price(&kline.open, "open")?,
        high_price: required_price(&kline.high, "high")?,
        low_price: required_price(&kline.low, "low")?,
        close_price: required_price(&kline.close, "close")?,
        volume: decimal(&kline.volume)
            .map(Volume::new)
            .ok_or_else(|| invalid("volume", &kline.volume))?,
        final_bar: kline.confirm,
    })
}

pub fn convert_balance(balance: &BybitCoinBalance) -> Balance {
    Balance::from_parts(
        balance.coin.clone(),
        None,
        decimal(&balance.locked),
        decimal(&balance.wallet_balance),
    )
}

pub fn convert_wallets(wallets: &[BybitWallet], timestamp: Option<i64>) -> Balances {
    let mut balances: Balances = wallets
        .iter()
        .flat_map(|wallet| wallet.coin.iter().map(convert_balance))
        .collect();
    balances.timestamp = timestamp;
    balances
}

pub fn convert_order_status(status: &str) -> Option<OrderStatus> {
    match status {
        "New" | "PartiallyFilled" | "Untriggered" | "Created" => Some(OrderStatus::Open),
        "Filled" => Some(OrderStatus::Closed),
        "Cancelled" | "PartiallyFilledCanceled" | "Deactivated" => Some(OrderStatus::Canceled),
        "Rejected" => Some(OrderStatus::Rejected),
        _ => None,
    }
}

pub fn convert_order(order: &BybitOrder, symbol: &str) -> Order {
    let non_empty = |value: &str| (!value.is_empty()).then(|| value.to_string());
    Order {
        id: order.order_id.clone(),
        client_order_id: non_empty(&order.order_link_id),
        symbol: symbol.to_string(),
        side: OrderSide::parse(&order.side),
        order_type: OrderType::parse(&order.order_type),
        status: convert_order_status(&order.order_status),
        price: price(&order.price).filter(|p| !p.value().is_zero()),
        average: price(&order.avg_price).filter(|p| !p.value().is_zero()),
        amount: quantity(&order.qty),
        filled: quantity(&order.cum_exec_qty),
        remaining: quantity(&order.leaves_qty),
        timestamp: millis(&order.created_time),
    }
}

pub fn convert_position(position: &BybitPosition, symbol: &str) -> Result<Position, ExchangeError> {
    let side = match position.side.as_str() {
        "Buy" => Some(PositionSide::Long),
        "Sell" => Some(PositionSide::Short),
        _ => None,
    };
    Ok(Position {
        symbol: symbol.to_string(),
        side,
        contracts: required_quantity(&position.size, "size")?,
        entry_price: price(&position.entry_price),
        mark_price: price(&position.mark_price),
        liquidation_price: price(&position.liq_price).filter(|p| !p.value().is_zero()),
        unrealized_pnl: decimal(&position.unrealised_pnl),
        leverage: decimal(&position.leverage),
        timestamp: millis(&position.updated_time),
    })
}

impl From<BybitOrderRequest> for Params {
    fn from(request: BybitOrderRequest) -> Self {
        let mut params = Self::new()
            .with("category", request.category)
            .with("symbol", request.symbol)
            .with("side", request.side)
            .with("orderType", request.order_type)
            .with("qty", request.qty);
        if let Some(price) = request.price {
            params.insert("price", price);
        }
        if let Some(time_in_force) = request.time_in_force {
            params.insert("timeInForce", time_in_force);
        }
        if let Some(order_link_id) = request.order_link_id {
            params.insert("orderLinkId", order_link_id);
        }
        params
    }
}

fn error_table() -> ErrorTable {
    ErrorTable {
        code_pointer: Some("/retCode"),
        message_pointer: Some("/retMsg"),
        success_codes: vec!["0"],
        exact: HashMap::from([
            ("10001", ErrorKind::BadRequest),
            ("10002", ErrorKind::Authentication),
            ("10003", ErrorKind::Authentication),
            ("10004", ErrorKind::Authentication),
            ("10005", ErrorKind::PermissionDenied),
            ("10006", ErrorKind::RateLimitExceeded),
            ("10007", ErrorKind::Authentication),
            ("10010", ErrorKind::PermissionDenied),
            ("10016", ErrorKind::Exchange),
            ("10018", ErrorKind::RateLimitExceeded),
            ("110001", ErrorKind::OrderNotFound),
            ("110003", ErrorKind::InvalidOrder),
            ("110004", ErrorKind::InsufficientFunds),
            ("110007", ErrorKind::InsufficientFunds),
            ("110008", ErrorKind::InvalidOrder),
            ("110012", ErrorKind::InsufficientFunds),
            ("170121", ErrorKind::BadRequest),
            ("170131", ErrorKind::InsufficientFunds),
            ("170136", ErrorKind::InvalidOrder),
            ("170213", ErrorKind::OrderNotFound),
        ]),
        broad: vec![
            ("Too many visits", ErrorKind::RateLimitExceeded),
            ("Order does not exist", ErrorKind::OrderNotFound),
            ("api_key", ErrorKind::Authentication),
        ],
    }
}

/// Immutable description of the Bybit V5 API
pub fn profile(testnet: bool) -> ExchangeProfile {
    let (rest, stream) = if testnet {
        ("https://api-testnet.bybit.com", "wss://stream-testnet.bybit.com")
    } else {
        ("https://api.bybit.com", "wss://stream.bybit.com")
    };

    ExchangeProfile {
        id: "bybit",
        name: "Bybit",
        urls: ExchangeUrls {
            rest: RestUrls::single(rest),
            ws_public: Some(format!("{}/v5/public/spot", stream)),
            ws_private: Some(format!("{}/v5/private", stream)),
        },
        endpoints: HashMap::from([
            ("fetchMarkets", Endpoint::public(HttpMethod::Get, "/v5/market/instruments-info")),
            ("fetchTicker", Endpoint::public(HttpMethod::Get, "/v5/market/tickers")),
            ("fetchTickers", Endpoint::public(HttpMethod::Get, "/v5/market/tickers")),
            ("fetchOrderBook", Endpoint::public(HttpMethod::Get, "/v5/market/orderbook")),
            ("fetchTrades", Endpoint::public(HttpMethod::Get, "/v5/market/recent-trade")),
            ("fetchOHLCV", Endpoint::public(HttpMethod::Get, "/v5/market/kline")),
            ("fetchTime", Endpoint::public(HttpMethod::Get, "/v5/market/time")),
            ("fetchBalance", Endpoint::private(HttpMethod::Get, "/v5/account/wallet-balance")),
            ("createOrder", Endpoint::private(HttpMethod::Post, "/v5/order/create")),
            ("cancelOrder", Endpoint::private(HttpMethod::Post, "/v5/order/cancel")),
            ("fetchOrder", Endpoint::private(HttpMethod::Get, "/v5/order/realtime")),
            ("fetchOpenOrders", Endpoint::private(HttpMethod::Get, "/v5/order/realtime")),
            ("fetchOrders", Endpoint::private(HttpMethod::Get, "/v5/order/history")),
            ("fetchClosedOrders", Endpoint::private(HttpMethod::Get, "/v5/order/history")),
            ("fetchMyTrades", Endpoint::private(HttpMethod::Get, "/v5/execution/list")),
            ("fetchPositions", Endpoint::private(HttpMethod::Get, "/v5/position/list")),
        ]),
        signing: SigningScheme {
            algorithm: Algorithm::Sha256,
            encoding: DigestEncoding::Hex,
            // timestamp + api_key + recv_window + (query string | JSON body)
            message: vec![
                MessagePart::Nonce,
                MessagePart::ApiKey,
                MessagePart::Literal(RECV_WINDOW.to_string()),
                MessagePart::QueryOrBody,
            ],
            placement: SignaturePlacement::Headers {
                api_key: "X-BAPI-API-KEY",
                signature: "X-BAPI-SIGN",
                nonce: Some("X-BAPI-TIMESTAMP"),
                extra: vec![("X-BAPI-RECV-WINDOW", RECV_WINDOW.to_string())],
            },
            body_encoding: BodyEncoding::Json,
        },
        errors: error_table(),
        nonce_clock: NonceClock::Milliseconds,
        rate_limit: Some(Duration::from_millis(20)),
        timeframes: HashMap::from([
            ("1m", "1"),
            ("3m", "3"),
            ("5m", "5"),
            ("15m", "15"),
            ("30m", "30"),
            ("1h", "60"),
            ("2h", "120"),
            ("4h", "240"),
            ("6h", "360"),
            ("12h", "720"),
            ("1d", "D"),
            ("1w", "W"),
            ("1M", "M"),
        ]),
    }
}

/// Bybit V5 binding for one product category
#[derive(Debug, Clone)]
pub struct BybitBinding {
    profile: ExchangeProfile,
    category: &'static str,
}

impl BybitBinding {
    /// Spot markets
    pub fn new(testnet: bool) -> Self {
        Self {
            profile: profile(testnet),
            category: "spot",
        }
    }

    /// `spot`, `linear` or `inverse`
    pub fn with_category(mut self, category: &'static str) -> Self {
        self.category = category;
        self
    }

    /// Point REST calls somewhere else, e.g. a proxy
    pub fn with_rest_url(mut self, base_url: impl Into<String>) -> Self {
        self.profile.urls.rest = RestUrls::single(base_url);
        self
    }

    pub const fn category(&self) -> &'static str {
        self.category
    }

    fn base_params(&self) -> Params {
        Params::new().with("category", self.category)
    }

    fn symbol_for(market: Option<&Market>, market_id: &str) -> String {
        market.map_or_else(|| market_id.to_string(), |m| m.symbol.clone())
    }

    fn parse_order_list(
        &self,
        response: &Value,
        market: Option<&Market>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let orders: BybitList<BybitOrder> = result(response)?;
        Ok(orders
            .list
            .iter()
            .map(|order| convert_order(order, &Self::symbol_for(market, &order.symbol)))
            .collect())
    }
}

impl ExchangeBinding for BybitBinding {
    fn profile(&self) -> &ExchangeProfile {
        &self.profile
    }

    fn parse_markets(&self, response: &Value) -> Result<Vec<Market>, ExchangeError> {
        let markets: BybitList<BybitMarket> = result(response)?;
        Ok(markets.list.iter().map(convert_market).collect())
    }

    fn parse_ticker(&self, response: &Value, market: &Market) -> Result<Ticker, ExchangeError> {
        let tickers: BybitList<BybitTicker> = result(response)?;
        let ticker = tickers
            .list
            .first()
            .ok_or_else(|| ExchangeError::DeserializationError("empty ticker list".to_string()))?;
        let timestamp = conversion::integer(response, "time").unwrap_or_default();
        Ok(convert_ticker(ticker, &market.symbol, timestamp))
    }

    fn parse_tickers(&self, response: &Value) -> Result<Vec<Ticker>, ExchangeError> {
        let tickers: BybitList<BybitTicker> = result(response)?;
        let timestamp = conversion::integer(response, "time").unwrap_or_default();
        Ok(tickers
            .list
            .iter()
            .map(|ticker| convert_ticker(ticker, &ticker.symbol, timestamp))
            .collect())
    }

    fn parse_order_book(&self, response: &Value, market: &Market) -> Result<OrderBook, ExchangeError> {
        let book: BybitOrderBook = result(response)?;
        let timestamp = conversion::integer(response, "time").unwrap_or_default();
        Ok(convert_order_book(&book, &market.symbol, timestamp))
    }

    fn parse_trades(&self, response: &Value, market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        let trades: BybitList<BybitTrade> = result(response)?;
        trades
            .list
            .iter()
            .map(|trade| convert_trade(trade, &market.symbol))
            .collect()
    }

    fn parse_ohlcv(
        &self,
        response: &Value,
        market: &Market,
        timeframe: &str,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let rows: BybitList<BybitKlineRow> = result(response)?;
        // newest first on the wire
        rows.list
            .iter()
            .rev()
            .map(|row| convert_kline_row(row, &market.symbol, timeframe))
            .collect()
    }

    fn parse_balance(&self, response: &Value) -> Result<Balances, ExchangeError> {
        let wallets: BybitList<BybitWallet> = result(response)?;
        Ok(convert_wallets(
            &wallets.list,
            conversion::integer(response, "time"),
        ))
    }

    fn parse_order(&self, response: &Value, market: Option<&Market>) -> Result<Order, ExchangeError> {
        // realtime queries wrap orders in a list, create/cancel return the ids only
        if response.pointer("/result/list").is_some() {
            return self
                .parse_order_list(response, market)?
                .into_iter()
                .next()
                .ok_or_else(|| ExchangeError::OrderNotFound("order not found".to_string()));
        }
        let order: BybitOrder = result(response)?;
        Ok(convert_order(&order, &Self::symbol_for(market, &order.symbol)))
    }

    fn parse_orders(
        &self,
        response: &Value,
        market: Option<&Market>,
    ) -> Result<Vec<Order>, ExchangeError> {
        self.parse_order_list(response, market)
    }

    fn parse_my_trades(
        &self,
        response: &Value,
        market: Option<&Market>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let executions: BybitList<BybitExecution> = result(response)?;
        // newest first on the wire
        executions
            .list
            .iter()
            .rev()
            .map(|execution| convert_execution(execution, &Self::symbol_for(market, &execution.symbol)))
            .collect()
    }

    fn parse_positions(&self, response: &Value) -> Result<Vec<Position>, ExchangeError> {
        let positions: BybitList<BybitPosition> = result(response)?;
        positions
            .list
            .iter()
            .filter(|position| decimal(&position.size).is_some_and(|size| !size.is_zero()))
            .map(|position| convert_position(position, &position.symbol))
            .collect()
    }

    fn markets_params(&self) -> Params {
        self.base_params()
    }

    fn ticker_params(&self, market: &Market) -> Params {
        self.base_params().with("symbol", &market.id)
    }

    fn order_book_params(&self, market: &Market, limit: Option<u32>) -> Params {
        let mut params = self.ticker_params(market);
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn trades_params(&self, market: &Market, limit: Option<u32>) -> Params {
        self.order_book_params(market, limit)
    }

    fn tickers_params(&self) -> Params {
        self.base_params()
    }

    fn ohlcv_params(
        &self,
        market: &Market,
        interval: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        let mut params = self.ticker_params(market).with("interval", interval);
        if let Some(since) = since {
            params.insert("start", since);
        }
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn balance_params(&self) -> Params {
        Params::new().with("accountType", "UNIFIED")
    }

    fn create_order_params(
        &self,
        request: &OrderRequest,
        market: &Market,
    ) -> Result<Params, ExchangeError> {
        let price = match (request.order_type, request.price) {
            (OrderType::Limit, None) => {
                return Err(ExchangeError::InvalidOrder(
                    "limit orders require a price".to_string(),
                ))
            }
            (OrderType::Limit, Some(price)) => Some(price.to_string()),
            (OrderType::Market, _) => None,
        };
        let time_in_force = request.time_in_force.map(|tif| {
            match tif {
                TimeInForce::GTC => "GTC",
                TimeInForce::IOC => "IOC",
                TimeInForce::FOK => "FOK",
                TimeInForce::PostOnly => "PostOnly",
            }
            .to_string()
        });

        Ok(BybitOrderRequest {
            category: self.category.to_string(),
            symbol: market.id.clone(),
            side: match request.side {
                OrderSide::Buy => "Buy",
                OrderSide::Sell => "Sell",
            }
            .to_string(),
            order_type: match request.order_type {
                OrderType::Limit => "Limit",
                OrderType::Market => "Market",
            }
            .to_string(),
            qty: request.amount.to_string(),
            price,
            time_in_force,
            order_link_id: request.client_order_id.clone(),
        }
        .into())
    }

    fn cancel_order_params(&self, id: &str, market: Option<&Market>) -> Result<Params, ExchangeError> {
        let market = market.ok_or_else(|| {
            ExchangeError::InvalidParameters("bybit cancelOrder requires a symbol".to_string())
        })?;
        Ok(self
            .base_params()
            .with("symbol", &market.id)
            .with("orderId", id))
    }

    fn fetch_order_params(&self, id: &str, market: Option<&Market>) -> Result<Params, ExchangeError> {
        let mut params = self.base_params().with("orderId", id);
        if let Some(market) = market {
            params.insert("symbol", &market.id);
        }
        Ok(params)
    }

    fn open_orders_params(&self, market: Option<&Market>) -> Params {
        let mut params = self.base_params();
        if let Some(market) = market {
            params.insert("symbol", &market.id);
        }
        params.insert("openOnly", 0);
        params
    }

    fn history_params(
        &self,
        market: Option<&Market>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        let mut params = self.base_params();
        if let Some(market) = market {
            params.insert("symbol", &market.id);
        }
        if let Some(since) = since {
            params.insert("startTime", since);
        }
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
        self.history_params(market, since, limit).with("orderStatus", "Filled")
    }

    fn positions_params(&self) -> Params {
        let category = if self.category == "spot" {
            "linear"
        } else {
            self.category
        };
        Params::new()
            .with("category", category)
            .with("settleCoin", "USDT")
    }
}
