use crate::core::binding::ExchangeBinding;
use crate::core::errors::ExchangeError;
use crate::core::kernel::pending::PendingCall;
use crate::core::kernel::rest::Dispatcher;
use crate::core::kernel::transport::{HttpTransport, ReqwestTransport};
use crate::core::traits::{AccountInfo, MarketDataSource, OrderPlacer};
use crate::core::types::{
    Balances, Kline, Market, Order, OrderBook, OrderRequest, OrderStatus, Params, Position,
    Symbol, Ticker, Trade,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Markets indexed by unified symbol and by exchange id
#[derive(Debug, Clone, Default)]
pub struct MarketCache {
    by_symbol: HashMap<String, Market>,
    by_id: HashMap<String, String>,
}

impl MarketCache {
    pub fn new(markets: Vec<Market>) -> Self {
        let mut cache = Self::default();
        for market in markets {
            cache.by_id.insert(market.id.clone(), market.symbol.clone());
            cache.by_symbol.insert(market.symbol.clone(), market);
        }
        cache
    }

    pub fn get(&self, symbol: &str) -> Option<&Market> {
        self.by_symbol.get(symbol)
    }

    pub fn by_id(&self, market_id: &str) -> Option<&Market> {
        self.by_id
            .get(market_id)
            .and_then(|symbol| self.by_symbol.get(symbol))
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.by_symbol.values()
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

/// Async facade over one exchange binding.
///
/// Each typed operation resolves the market, builds params through the
/// binding, dispatches and parses the reply with the binding again. The
/// market list is fetched once and cached.
pub struct AsyncExchange<B: ExchangeBinding, T: HttpTransport = ReqwestTransport> {
    binding: Arc<B>,
    dispatcher: Dispatcher<T>,
    markets: RwLock<Option<Arc<MarketCache>>>,
}

impl<B: ExchangeBinding, T: HttpTransport> AsyncExchange<B, T> {
    pub fn new(binding: Arc<B>, dispatcher: Dispatcher<T>) -> Self {
        Self {
            binding,
            dispatcher,
            markets: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &'static str {
        self.binding.profile().id
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    pub const fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    /// Whether the binding maps `operation` to an endpoint
    pub fn has(&self, operation: &str) -> bool {
        self.binding.profile().has(operation)
    }

    /// Raw escape hatch: dispatch any operation of the endpoint table
    pub fn dispatch(&self, operation: &str, params: Params) -> PendingCall<Value> {
        self.dispatcher.dispatch(operation, params)
    }

    /// Fetch markets once and cache them; `reload` forces a refresh
    #[instrument(skip(self), fields(exchange = %self.id()))]
    pub async fn load_markets(&self, reload: bool) -> Result<Arc<MarketCache>, ExchangeError> {
        if !reload {
            if let Some(cache) = self.markets.read().await.as_ref() {
                return Ok(Arc::clone(cache));
            }
        }

        let mut slot = self.markets.write().await;
        if let (false, Some(cache)) = (reload, slot.as_ref()) {
            return Ok(Arc::clone(cache));
        }

        let response = self
            .dispatcher
            .dispatch("fetchMarkets", self.binding.markets_params())
            .await?;
        let cache = Arc::new(MarketCache::new(self.binding.parse_markets(&response)?));
        debug!(markets = cache.len(), "markets loaded");
        *slot = Some(Arc::clone(&cache));
        Ok(cache)
    }

    /// Market for a unified symbol.
    ///
    /// Without a market listing endpoint the market is derived from the
    /// symbol alone.
    pub async fn market(&self, symbol: &str) -> Result<Market, ExchangeError> {
        if !self.has("fetchMarkets") {
            return self.derived_market(symbol);
        }

        let cache = self.load_markets(false).await?;
        cache.get(symbol).cloned().ok_or_else(|| {
            ExchangeError::InvalidParameters(format!("{} has no market {}", self.id(), symbol))
        })
    }

    fn derived_market(&self, symbol: &str) -> Result<Market, ExchangeError> {
        let parsed =
            Symbol::parse(symbol).map_err(|e| ExchangeError::InvalidParameters(e.to_string()))?;
        Ok(Market {
            id: self.binding.market_id(symbol)?,
            symbol: symbol.to_string(),
            base: parsed.base,
            quote: parsed.quote,
            active: true,
            price_precision: None,
            amount_precision: None,
            min_amount: None,
            max_amount: None,
            min_price: None,
            max_price: None,
        })
    }

    async fn optional_market(&self, symbol: Option<&str>) -> Result<Option<Market>, ExchangeError> {
        match symbol {
            Some(symbol) => self.market(symbol).await.map(Some),
            None => Ok(None),
        }
    }

    /// Exchange id for a unified symbol
    pub async fn market_id(&self, symbol: &str) -> Result<String, ExchangeError> {
        self.market(symbol).await.map(|market| market.id)
    }

    /// Cached markets for mapping ids back to symbols, if the exchange lists them
    async fn symbol_index(&self) -> Result<Option<Arc<MarketCache>>, ExchangeError> {
        if self.has("fetchMarkets") {
            self.load_markets(false).await.map(Some)
        } else {
            Ok(None)
        }
    }

    async fn order_history(
        &self,
        operation: &str,
        params: Params,
        market: Option<&Market>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let response = self.dispatcher.dispatch(operation, params).await?;
        let mut orders = self.binding.parse_orders(&response, market)?;
        if market.is_none() {
            let index = self.symbol_index().await?;
            for order in &mut orders {
                unify_symbol(index.as_deref(), &mut order.symbol);
            }
        }
        Ok(orders)
    }
}

fn unify_symbol(index: Option<&MarketCache>, symbol: &mut String) {
    if let Some(market) = index.and_then(|index| index.by_id(symbol)) {
        *symbol = market.symbol.clone();
    }
}

/// Sort oldest first, drop rows before `since`, then cap at `limit`.
///
/// With `since` the earliest rows are kept, without it the most recent ones.
fn since_limit<T>(
    mut rows: Vec<T>,
    timestamp: impl Fn(&T) -> Option<i64>,
    since: Option<i64>,
    limit: Option<u32>,
) -> Vec<T> {
    rows.sort_by_key(|row| timestamp(row));
    if let Some(since) = since {
        rows.retain(|row| timestamp(row).map_or(true, |ts| ts >= since));
    }
    if let Some(limit) = limit.map(|limit| limit as usize) {
        if rows.len() > limit {
            if since.is_some() {
                rows.truncate(limit);
            } else {
                rows.drain(..rows.len() - limit);
            }
        }
    }
    rows
}

#[async_trait]
impl<B: ExchangeBinding, T: HttpTransport> MarketDataSource for AsyncExchange<B, T> {
    async fn fetch_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        let cache = self.load_markets(true).await?;
        Ok(cache.markets().cloned().collect())
    }

    #[instrument(skip(self), fields(exchange = %self.id()))]
    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let market = self.market(symbol).await?;
        let response = self
            .dispatcher
            .dispatch("fetchTicker", self.binding.ticker_params(&market))
            .await?;
        self.binding.parse_ticker(&response, &market)
    }

    #[instrument(skip(self), fields(exchange = %self.id()))]
    async fn fetch_tickers(&self, symbols: Option<&[&str]>) -> Result<Vec<Ticker>, ExchangeError> {
        let index = self.symbol_index().await?;
        let response = self
            .dispatcher
            .dispatch("fetchTickers", self.binding.tickers_params())
            .await?;
        let mut tickers = self.binding.parse_tickers(&response)?;
        for ticker in &mut tickers {
            unify_symbol(index.as_deref(), &mut ticker.symbol);
        }
        if let Some(symbols) = symbols {
            tickers.retain(|ticker| symbols.contains(&ticker.symbol.as_str()));
        }
        Ok(tickers)
    }

    #[instrument(skip(self), fields(exchange = %self.id()))]
    async fn fetch_order_book(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<OrderBook, ExchangeError> {
        let market = self.market(symbol).await?;
        let response = self
            .dispatcher
            .dispatch("fetchOrderBook", self.binding.order_book_params(&market, limit))
            .await?;
        self.binding.parse_order_book(&response, &market)
    }

    async fn fetch_trades(
        &self,
        symbol: &str,
        limit: Option<u32>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let market = self.market(symbol).await?;
        let response = self
            .dispatcher
            .dispatch("fetchTrades", self.binding.trades_params(&market, limit))
            .await?;
        self.binding.parse_trades(&response, &market)
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Kline>, ExchangeError> {
        let interval = self.binding.profile().timeframe(timeframe)?;
        let market = self.market(symbol).await?;
        let params = self.binding.ohlcv_params(&market, interval, since, limit);
        let response = self.dispatcher.dispatch("fetchOHLCV", params).await?;
        self.binding.parse_ohlcv(&response, &market, timeframe)
    }
}

#[async_trait]
impl<B: ExchangeBinding, T: HttpTransport> OrderPlacer for AsyncExchange<B, T> {
    #[instrument(skip(self, order), fields(exchange = %self.id(), symbol = %order.symbol))]
    async fn create_order(&self, order: OrderRequest) -> Result<Order, ExchangeError> {
        let market = self.market(&order.symbol).await?;
        let order = OrderRequest {
            amount: market.amount_to_precision(order.amount),
            price: order.price.map(|price| market.price_to_precision(price)),
            ..order
        };
        if order.amount.value().is_zero() {
            return Err(ExchangeError::InvalidOrder(format!(
                "amount rounds to zero for {}",
                market.symbol
            )));
        }
        let params = self.binding.create_order_params(&order, &market)?;
        let response = self.dispatcher.dispatch("createOrder", params).await?;
        self.binding.parse_order(&response, Some(&market))
    }

    #[instrument(skip(self), fields(exchange = %self.id()))]
    async fn cancel_order(&self, id: &str, symbol: Option<&str>) -> Result<Order, ExchangeError> {
        let market = self.optional_market(symbol).await?;
        let params = self.binding.cancel_order_params(id, market.as_ref())?;
        let response = self.dispatcher.dispatch("cancelOrder", params).await?;
        self.binding.parse_order(&response, market.as_ref())
    }

    async fn fetch_order(&self, id: &str, symbol: Option<&str>) -> Result<Order, ExchangeError> {
        let market = self.optional_market(symbol).await?;
        let params = self.binding.fetch_order_params(id, market.as_ref())?;
        let response = self.dispatcher.dispatch("fetchOrder", params).await?;
        self.binding.parse_order(&response, market.as_ref())
    }

    async fn fetch_open_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>, ExchangeError> {
        let market = self.optional_market(symbol).await?;
        let params = self.binding.open_orders_params(market.as_ref());
        let response = self.dispatcher.dispatch("fetchOpenOrders", params).await?;
        self.binding.parse_orders(&response, market.as_ref())
    }

    async fn fetch_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let market = self.optional_market(symbol).await?;
        let params = self.binding.orders_params(market.as_ref(), since, limit);
        let orders = self.order_history("fetchOrders", params, market.as_ref()).await?;
        Ok(since_limit(orders, |order| order.timestamp, since, limit))
    }

    async fn fetch_closed_orders(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, ExchangeError> {
        let market = self.optional_market(symbol).await?;
        let params = self.binding.closed_orders_params(market.as_ref(), since, limit);
        let mut orders = self
            .order_history("fetchClosedOrders", params, market.as_ref())
            .await?;
        orders.retain(|order| order.status == Some(OrderStatus::Closed));
        Ok(since_limit(orders, |order| order.timestamp, since, limit))
    }

    #[instrument(skip(self), fields(exchange = %self.id()))]
    async fn fetch_my_trades(
        &self,
        symbol: Option<&str>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let market = self.optional_market(symbol).await?;
        let params = self.binding.my_trades_params(market.as_ref(), since, limit);
        let response = self.dispatcher.dispatch("fetchMyTrades", params).await?;
        let mut trades = self.binding.parse_my_trades(&response, market.as_ref())?;
        if market.is_none() {
            let index = self.symbol_index().await?;
            for trade in &mut trades {
                unify_symbol(index.as_deref(), &mut trade.symbol);
            }
        }
        Ok(since_limit(trades, |trade| Some(trade.timestamp), since, limit))
    }
}

#[async_trait]
impl<B: ExchangeBinding, T: HttpTransport> AccountInfo for AsyncExchange<B, T> {
    #[instrument(skip(self), fields(exchange = %self.id()))]
    async fn fetch_balance(&self) -> Result<Balances, ExchangeError> {
        let response = self
            .dispatcher
            .dispatch("fetchBalance", self.binding.balance_params())
            .await?;
        self.binding.parse_balance(&response)
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, ExchangeError> {
        let response = self
            .dispatcher
            .dispatch("fetchPositions", self.binding.positions_params())
            .await?;
        self.binding.parse_positions(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_limit_window() {
        let rows = vec![Some(30), None, Some(10), Some(20), Some(40)];

        let recent = since_limit(rows.clone(), |row| *row, None, Some(2));
        assert_eq!(recent, vec![Some(30), Some(40)]);

        let from = since_limit(rows.clone(), |row| *row, Some(20), Some(2));
        assert_eq!(from, vec![None, Some(20)]);

        let all = since_limit(rows, |row| *row, Some(25), None);
        assert_eq!(all, vec![None, Some(30), Some(40)]);
    }
}
