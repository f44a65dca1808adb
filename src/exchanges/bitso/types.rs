use serde::Deserialize;

/// v3 envelope. Failed calls carry `error` instead of `payload` and are
/// rejected by the error table before parsing.
#[derive(Debug, Deserialize)]
pub struct BitsoResponse<T> {
    pub success: bool,
    pub payload: T,
}

#[derive(Debug, Deserialize)]
pub struct BitsoBook {
    pub book: String,
    #[serde(default)]
    pub minimum_amount: String,
    #[serde(default)]
    pub maximum_amount: String,
    #[serde(default)]
    pub minimum_price: String,
    #[serde(default)]
    pub maximum_price: String,
    #[serde(default)]
    pub minimum_value: String,
    #[serde(default)]
    pub tick_size: String,
}

#[derive(Debug, Deserialize)]
pub struct BitsoTicker {
    pub book: String,
    #[serde(default)]
    pub last: String,
    #[serde(default)]
    pub bid: String,
    #[serde(default)]
    pub ask: String,
    #[serde(default)]
    pub high: String,
    #[serde(default)]
    pub low: String,
    #[serde(default)]
    pub vwap: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub change_24: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct BitsoLevel {
    pub price: String,
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct BitsoOrderBook {
    #[serde(default)]
    pub bids: Vec<BitsoLevel>,
    #[serde(default)]
    pub asks: Vec<BitsoLevel>,
    #[serde(default)]
    pub updated_at: String,
    /// Sent as a string by v3
    #[serde(default)]
    pub sequence: String,
}

/// Public trade (`/v3/trades`) and own fill (`/v3/user_trades`)
#[derive(Debug, Deserialize)]
pub struct BitsoTrade {
    pub tid: u64,
    pub book: String,
    pub price: String,
    #[serde(alias = "major")]
    pub amount: String,
    /// Side of the resting order; the taker is on the other side
    #[serde(default)]
    pub maker_side: String,
    /// Own side, user trades only
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub oid: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct BitsoCandle {
    pub bucket_start_time: i64,
    #[serde(alias = "first_rate")]
    pub open: String,
    #[serde(alias = "max_rate")]
    pub high: String,
    #[serde(alias = "min_rate")]
    pub low: String,
    #[serde(alias = "last_rate")]
    pub close: String,
    pub volume: String,
}

#[derive(Debug, Deserialize)]
pub struct BitsoBalances {
    pub balances: Vec<BitsoBalance>,
}

#[derive(Debug, Deserialize)]
pub struct BitsoBalance {
    pub currency: String,
    #[serde(default)]
    pub available: String,
    #[serde(default)]
    pub locked: String,
    #[serde(default)]
    pub total: String,
}

#[derive(Debug, Deserialize)]
pub struct BitsoOrder {
    pub oid: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub book: String,
    #[serde(default)]
    pub side: String,
    #[serde(rename = "type", default)]
    pub order_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub original_amount: String,
    #[serde(default)]
    pub unfilled_amount: String,
    #[serde(default)]
    pub created_at: String,
}

/// `POST /v3/orders` only echoes the id
#[derive(Debug, Deserialize)]
pub struct BitsoOrderId {
    pub oid: String,
}
