use serde::Deserialize;

/// V5 envelope. Errors are rejected by the profile's error table before
/// payloads get here, so only `result` matters to the parsers.
#[derive(Debug, Deserialize)]
pub struct BybitApiResponse<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i32,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    pub result: T,
}

#[derive(Debug, Deserialize)]
pub struct BybitList<T> {
    #[serde(default)]
    pub category: String,
    pub list: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct BybitMarket {
    pub symbol: String,
    #[serde(rename = "baseCoin")]
    pub base_coin: String,
    #[serde(rename = "quoteCoin")]
    pub quote_coin: String,
    pub status: String,
    #[serde(rename = "lotSizeFilter", default)]
    pub lot_size_filter: BybitLotSizeFilter,
    #[serde(rename = "priceFilter", default)]
    pub price_filter: BybitPriceFilter,
}

#[derive(Debug, Default, Deserialize)]
pub struct BybitLotSizeFilter {
    #[serde(rename = "basePrecision", default)]
    pub base_precision: String,
    #[serde(rename = "qtyStep", default)]
    pub qty_step: String,
    #[serde(rename = "minOrderQty", default)]
    pub min_order_qty: String,
    #[serde(rename = "maxOrderQty", default)]
    pub max_order_qty: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BybitPriceFilter {
    #[serde(rename = "tickSize", default)]
    pub tick_size: String,
    #[serde(rename = "minPrice", default)]
    pub min_price: String,
    #[serde(rename = "maxPrice", default)]
    pub max_price: String,
}

/// REST `tickers` entry and WS `tickers.*` payload share this shape
#[derive(Debug, Deserialize)]
pub struct BybitTicker {
    pub symbol: String,
    #[serde(rename = "lastPrice", default)]
    pub last_price: String,
    #[serde(rename = "bid1Price", default)]
    pub bid_price: String,
    #[serde(rename = "ask1Price", default)]
    pub ask_price: String,
    #[serde(rename = "highPrice24h", default)]
    pub high_price_24h: String,
    #[serde(rename = "lowPrice24h", default)]
    pub low_price_24h: String,
    #[serde(rename = "prevPrice24h", default)]
    pub prev_price_24h: String,
    #[serde(rename = "price24hPcnt", default)]
    pub price_24h_pcnt: String,
    #[serde(rename = "volume24h", default)]
    pub volume_24h: String,
    #[serde(rename = "turnover24h", default)]
    pub turnover_24h: String,
}

/// REST `orderbook` result and WS `orderbook.*` data
#[derive(Debug, Deserialize)]
pub struct BybitOrderBook {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
    #[serde(rename = "u", default)]
    pub update_id: u64,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub ts: i64,
}

#[derive(Debug, Deserialize)]
pub struct BybitTrade {
    #[serde(rename = "execId")]
    pub exec_id: String,
    pub symbol: String,
    pub price: String,
    pub size: String,
    pub side: String,
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct BybitWsTrade {
    #[serde(rename = "i")]
    pub trade_id: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "v")]
    pub size: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "T")]
    pub timestamp: i64,
}

/// REST kline row: `[start, open, high, low, close, volume, turnover]`
pub type BybitKlineRow = Vec<String>;

#[derive(Debug, Deserialize)]
pub struct BybitWsKline {
    pub start: i64,
    pub end: i64,
    pub interval: String,
    pub open: String,
    pub close: String,
    pub high: String,
    pub low: String,
    pub volume: String,
    pub turnover: String,
    pub confirm: bool,
    pub timestamp: i64,
}

/// One account of `wallet-balance` (REST) or the `wallet` topic (WS)
#[derive(Debug, Deserialize)]
pub struct BybitWallet {
    #[serde(rename = "accountType", default)]
    pub account_type: String,
    pub coin: Vec<BybitCoinBalance>,
}

#[derive(Debug, Deserialize)]
pub struct BybitCoinBalance {
    pub coin: String,
    #[serde(rename = "walletBalance", default)]
    pub wallet_balance: String,
    #[serde(default)]
    pub locked: String,
    #[serde(rename = "totalOrderIM", default)]
    pub total_order_im: String,
    #[serde(rename = "totalPositionIM", default)]
    pub total_position_im: String,
}

/// `order/create` body, turned into ordered params before signing
#[derive(Debug)]
pub struct BybitOrderRequest {
    pub category: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    pub price: Option<String>,
    pub time_in_force: Option<String>,
    pub order_link_id: Option<String>,
}

/// Order as returned by `order/realtime` and the `order` topic.
/// `order/create` and `order/cancel` only fill the ids.
#[derive(Debug, Deserialize)]
pub struct BybitOrder {
    #[serde(rename = "orderId")]
    pub order_id: String,
    #[serde(rename = "orderLinkId", default)]
    pub order_link_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(rename = "orderType", default)]
    pub order_type: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub qty: String,
    #[serde(rename = "cumExecQty", default)]
    pub cum_exec_qty: String,
    #[serde(rename = "leavesQty", default)]
    pub leaves_qty: String,
    #[serde(rename = "avgPrice", default)]
    pub avg_price: String,
    #[serde(rename = "orderStatus", default)]
    pub order_status: String,
    #[serde(rename = "createdTime", default)]
    pub created_time: String,
    #[serde(rename = "updatedTime", default)]
    pub updated_time: String,
}

#[derive(Debug, Deserialize)]
pub struct BybitExecution {
    pub symbol: String,
    #[serde(rename = "execId")]
    pub exec_id: String,
    #[serde(rename = "orderId")]
    pub order_id: String,
    pub side: String,
    #[serde(rename = "execPrice")]
    pub exec_price: String,
    #[serde(rename = "execQty")]
    pub exec_qty: String,
    #[serde(rename = "execTime")]
    pub exec_time: String,
}

#[derive(Debug, Deserialize)]
pub struct BybitPosition {
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(rename = "entryPrice", alias = "avgPrice", default)]
    pub entry_price: String,
    #[serde(rename = "markPrice", default)]
    pub mark_price: String,
    #[serde(rename = "liqPrice", default)]
    pub liq_price: String,
    #[serde(rename = "unrealisedPnl", default)]
    pub unrealised_pnl: String,
    #[serde(default)]
    pub leverage: String,
    #[serde(rename = "updatedTime", default)]
    pub updated_time: String,
}
