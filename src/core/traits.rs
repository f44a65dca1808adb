use crate::core::{
    errors::ExchangeError,
    types::{Balances, Kline, Market, Order, OrderBook, OrderRequest, Position, Ticker, Trade},
};
use async_trait::async_trait;

#[async_trait]
pub trait MarketDataSource {
    /// Get all available markets/trading pairs
    async fn fetch_markets(&self) -> Result<Vec<Market>, ExchangeError>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError>;

    /// Tickers for the given symbols, or for every market with `None`
    async fn fetch_tickers(&self, symbols: Option<&[&str]>) -> Result<Vec<Ticker>, ExchangeError>;

    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<OrderBook, ExchangeError>;

    /// Recent public trades
    async fn fetch_trades(&self, symbol: &str, limit: Option<u32>)
        -> Result<Vec<Trade>, ExchangeError>;

    /// Candles for a unified timeframe such as `1m` or `1h`
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Kline>, ExchangeError>;
}

#[async_trait]
pub trait OrderPlacer {
    /// Place a new order
    async fn create_order(&self, order: OrderRequest) -> Result<Order, ExchangeError>;

    async fn cancel_order(&self, id: &str, symbol: Option<&str>) -> Result<Order, ExchangeError>;

    async fn fetch_order(&self, id: &str, symbol: Option<&str>) -> Result<Order, ExchangeError>;

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError>;

    /// Order history in any state, oldest first
    async fn fetch_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, ExchangeError>;

    /// Fully filled orders only
    async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, ExchangeError>;

    /// Own fills, oldest first
    async fn fetch_my_trades(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Trade>, ExchangeError>;
}

#[async_trait]
pub trait AccountInfo {
    async fn fetch_balance(&self) -> Result<Balances, ExchangeError>;
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError>;
}

// Composite trait for callers that need everything
#[async_trait]
pub trait ExchangeConnector: MarketDataSource + OrderPlacer + AccountInfo {}

impl<T: MarketDataSource + OrderPlacer + AccountInfo> ExchangeConnector for T {}
