use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{
    Channel, OrderBookUpdate, ParseContext, Subscription, WsCodec, WsInbound,
};
use crate::core::kernel::signer::{hmac, Algorithm, DigestEncoding};
use crate::core::types::{conversion, Balances, Kline, Order, Position, Symbol, Ticker, Trade};
use crate::exchanges::bybit::conversions::{
    self, convert_execution, convert_order, convert_order_book, convert_position, convert_ticker,
    convert_wallets, convert_ws_kline, convert_ws_trade,
};
use crate::exchanges::bybit::types::{
    BybitExecution, BybitOrder, BybitOrderBook, BybitPosition, BybitTicker, BybitWallet,
    BybitWsKline, BybitWsTrade,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_tungstenite::tungstenite::Message;

/// Login signatures stay valid this long after the nonce timestamp
const AUTH_EXPIRY_MS: u64 = 10_000;

/// Bybit subscription request structure
#[derive(Debug, Serialize)]
struct BybitSubscription<'a> {
    op: &'static str,
    args: &'a [String],
}

/// Spot order book depth, one of 1, 50 or 200
const ORDER_BOOK_DEPTH: u32 = 50;

/// Bybit V5 WebSocket codec, shared by the public and private endpoints
#[derive(Debug, Clone)]
pub struct BybitCodec {
    timeframes: HashMap<&'static str, &'static str>,
}

impl Default for BybitCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl BybitCodec {
    pub fn new() -> Self {
        Self {
            timeframes: conversions::profile(false).timeframes,
        }
    }

    fn encode_op(&self, op: &'static str, topics: &[String]) -> Result<Message, ExchangeError> {
        let json_str = serde_json::to_string(&BybitSubscription { op, args: topics }).map_err(|e| {
            ExchangeError::SerializationError(format!("Failed to encode {}: {}", op, e))
        })?;
        Ok(Message::Text(json_str))
    }
}

fn data<T: DeserializeOwned>(payload: &Value) -> Result<T, ExchangeError> {
    let data = payload.get("data").ok_or_else(|| {
        ExchangeError::DeserializationError("Bybit message without data".to_string())
    })?;
    conversions::payload(data)
}

fn timestamp(payload: &Value) -> i64 {
    conversion::integer(payload, "ts")
        .or_else(|| conversion::integer(payload, "creationTime"))
        .unwrap_or_default()
}

impl WsCodec for BybitCodec {
    fn name(&self) -> &str {
        "bybit"
    }

    fn market_id(&self, symbol: &str) -> Result<String, ExchangeError> {
        Symbol::parse(symbol)
            .map(|s| s.concatenated())
            .map_err(|e| ExchangeError::InvalidParameters(e.to_string()))
    }

    fn topic(&self, subscription: &Subscription) -> Result<String, ExchangeError> {
        let market_id = || {
            subscription
                .symbol
                .as_deref()
                .ok_or_else(|| {
                    ExchangeError::InvalidParameters(format!(
                        "{} subscription requires a symbol",
                        subscription.channel
                    ))
                })
                .and_then(|symbol| self.market_id(symbol))
        };

        Ok(match &subscription.channel {
            Channel::Ticker => format!("tickers.{}", market_id()?),
            Channel::OrderBook => format!("orderbook.{}.{}", ORDER_BOOK_DEPTH, market_id()?),
            Channel::Trades => format!("publicTrade.{}", market_id()?),
            Channel::Ohlcv { timeframe } => {
                let interval = self.timeframes.get(timeframe.as_str()).ok_or_else(|| {
                    ExchangeError::InvalidParameters(format!(
                        "bybit does not support timeframe {}",
                        timeframe
                    ))
                })?;
                format!("kline.{}.{}", interval, market_id()?)
            }
            // account topics are not per symbol
            Channel::Balance => "wallet".to_string(),
            Channel::Orders => "order".to_string(),
            Channel::MyTrades => "execution".to_string(),
            Channel::Positions => "position".to_string(),
        })
    }

    fn encode_subscription(&self, topics: &[String]) -> Result<Message, ExchangeError> {
        self.encode_op("subscribe", topics)
    }

    fn encode_unsubscription(&self, topics: &[String]) -> Result<Message, ExchangeError> {
        self.encode_op("unsubscribe", topics)
    }

    /// `{"op":"auth","args":[key, expires, hex(hmac_sha256(secret, "GET/realtime" + expires))]}`
    fn encode_auth(&self, credentials: &Credentials, nonce: u64) -> Result<Message, ExchangeError> {
        let expires = nonce + AUTH_EXPIRY_MS;
        let signature = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            credentials.secret().as_bytes(),
            format!("GET/realtime{}", expires).as_bytes(),
        )?;
        Ok(Message::Text(
            json!({
                "op": "auth",
                "args": [credentials.api_key(), expires, signature],
            })
            .to_string(),
        ))
    }

    fn encode_ping(&self) -> Option<Message> {
        Some(Message::Text(r#"{"op":"ping"}"#.to_string()))
    }

    fn decode_message(&self, message: &Message) -> Result<Option<WsInbound>, ExchangeError> {
        let Message::Text(text) = message else {
            // Bybit uses text messages only
            return Ok(None);
        };
        let value: Value = serde_json::from_str(text).map_err(|e| {
            ExchangeError::DeserializationError(format!("Invalid Bybit message: {}", e))
        })?;

        if let Some(topic) = value.get("topic").and_then(Value::as_str) {
            return Ok(Some(WsInbound::Data {
                topic: topic.to_string(),
                payload: value,
            }));
        }

        let op = value.get("op").and_then(Value::as_str).unwrap_or_default();
        let success = value.get("success").and_then(Value::as_bool);
        let ret_msg = conversion::string(&value, "ret_msg").unwrap_or_default();

        Ok(match (op, success) {
            ("auth", Some(true)) => Some(WsInbound::Authenticated),
            ("auth", _) => Some(WsInbound::AuthFailed(ret_msg)),
            ("pong", _) => Some(WsInbound::Pong),
            ("ping", _) if ret_msg == "pong" => Some(WsInbound::Pong),
            ("subscribe" | "unsubscribe", Some(true)) => Some(WsInbound::Ack),
            ("subscribe" | "unsubscribe", _) => Some(WsInbound::Rejected(ret_msg)),
            _ => None,
        })
    }

    fn parse_ticker(&self, payload: &Value, ctx: &ParseContext<'_>) -> Result<Vec<Ticker>, ExchangeError> {
        let ticker: BybitTicker = data(payload)?;
        let symbol = ctx.symbol_or(Some(&ticker.symbol));
        Ok(vec![convert_ticker(&ticker, &symbol, timestamp(payload))])
    }

    fn parse_order_book(
        &self,
        payload: &Value,
        ctx: &ParseContext<'_>,
    ) -> Result<OrderBookUpdate, ExchangeError> {
        let book: BybitOrderBook = data(payload)?;
        let symbol = ctx.symbol_or(Some(&book.symbol));
        let book = convert_order_book(&book, &symbol, timestamp(payload));
        Ok(match payload.get("type").and_then(Value::as_str) {
            Some("snapshot") => OrderBookUpdate::Snapshot(book),
            _ => OrderBookUpdate::Delta(book),
        })
    }

    fn parse_trades(&self, payload: &Value, ctx: &ParseContext<'_>) -> Result<Vec<Trade>, ExchangeError> {
        let trades: Vec<BybitWsTrade> = data(payload)?;
        trades
            .iter()
            .map(|trade| convert_ws_trade(trade, &ctx.symbol_or(Some(&trade.symbol))))
            .collect()
    }

    fn parse_ohlcv(&self, payload: &Value, ctx: &ParseContext<'_>) -> Result<Vec<Kline>, ExchangeError> {
        let klines: Vec<BybitWsKline> = data(payload)?;
        let symbol = ctx.symbol_or(None);
        klines
            .iter()
            .map(|kline| {
                let timeframe = match &ctx.subscription.channel {
                    Channel::Ohlcv { timeframe } => timeframe.as_str(),
                    _ => kline.interval.as_str(),
                };
                convert_ws_kline(kline, &symbol, timeframe)
            })
            .collect()
    }

    fn parse_balance(&self, payload: &Value, _ctx: &ParseContext<'_>) -> Result<Balances, ExchangeError> {
        let wallets: Vec<BybitWallet> = data(payload)?;
        Ok(convert_wallets(&wallets, Some(timestamp(payload))))
    }

    fn parse_orders(&self, payload: &Value, ctx: &ParseContext<'_>) -> Result<Vec<Order>, ExchangeError> {
        let orders: Vec<BybitOrder> = data(payload)?;
        Ok(orders
            .iter()
            .map(|order| convert_order(order, &ctx.markets.symbol(&order.symbol)))
            .collect())
    }

    fn parse_my_trades(
        &self,
        payload: &Value,
        ctx: &ParseContext<'_>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let executions: Vec<BybitExecution> = data(payload)?;
        executions
            .iter()
            .map(|execution| convert_execution(execution, &ctx.markets.symbol(&execution.symbol)))
            .collect()
    }

    fn parse_positions(
        &self,
        payload: &Value,
        ctx: &ParseContext<'_>,
    ) -> Result<Vec<Position>, ExchangeError> {
        let positions: Vec<BybitPosition> = data(payload)?;
        positions
            .iter()
            .map(|position| convert_position(position, &ctx.markets.symbol(&position.symbol)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::codec::MarketIndex;
    use crate::core::types::OrderStatus;

    fn text(message: &Message) -> &str {
        message.to_text().unwrap()
    }

    fn decode(raw: &str) -> Option<WsInbound> {
        BybitCodec::new()
            .decode_message(&Message::Text(raw.to_string()))
            .unwrap()
    }

    #[test]
    fn test_topics() {
        let codec = BybitCodec::new();
        let topic = |channel, symbol| codec.topic(&Subscription::new(channel, symbol)).unwrap();

        assert_eq!(topic(Channel::Ticker, Some("BTC/USDT")), "tickers.BTCUSDT");
        assert_eq!(topic(Channel::OrderBook, Some("BTC/USDT")), "orderbook.50.BTCUSDT");
        assert_eq!(topic(Channel::Trades, Some("ETH/USDT")), "publicTrade.ETHUSDT");
        assert_eq!(
            topic(Channel::Ohlcv { timeframe: "1h".into() }, Some("BTC/USDT")),
            "kline.60.BTCUSDT"
        );
        assert_eq!(topic(Channel::Orders, Some("BTC/USDT")), "order");
        assert_eq!(topic(Channel::Balance, None), "wallet");

        assert!(codec
            .topic(&Subscription::new(Channel::Ticker, None))
            .is_err());
        assert!(codec
            .topic(&Subscription::new(Channel::Ohlcv { timeframe: "7m".into() }, Some("BTC/USDT")))
            .is_err());
    }

    #[test]
    fn test_subscription_frame() {
        let frame = BybitCodec::new()
            .encode_subscription(&["tickers.BTCUSDT".to_string()])
            .unwrap();
        assert_eq!(text(&frame), r#"{"op":"subscribe","args":["tickers.BTCUSDT"]}"#);
    }

    #[test]
    fn test_auth_frame_signature() {
        let credentials = Credentials::new("key", "secret");
        let frame = BybitCodec::new()
            .encode_auth(&credentials, 1_700_000_000_000)
            .unwrap();
        let value: Value = serde_json::from_str(text(&frame)).unwrap();

        let expected = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            b"secret",
            b"GET/realtime1700000010000",
        )
        .unwrap();
        assert_eq!(value["op"], "auth");
        assert_eq!(value["args"][0], "key");
        assert_eq!(value["args"][1], 1_700_000_010_000_u64);
        assert_eq!(value["args"][2], expected.as_str());
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(
            decode(r#"{"success":true,"ret_msg":"","op":"auth","conn_id":"x"}"#),
            Some(WsInbound::Authenticated)
        );
        assert_eq!(
            decode(r#"{"success":false,"ret_msg":"Params Error","op":"auth","conn_id":"x"}"#),
            Some(WsInbound::AuthFailed("Params Error".to_string()))
        );
        assert_eq!(
            decode(r#"{"success":true,"ret_msg":"subscribe","conn_id":"x","op":"subscribe"}"#),
            Some(WsInbound::Ack)
        );
        assert_eq!(
            decode(r#"{"success":true,"ret_msg":"pong","conn_id":"x","op":"ping"}"#),
            Some(WsInbound::Pong)
        );
        assert_eq!(decode(r#"{"op":"pong","args":["1"]}"#), Some(WsInbound::Pong));
        assert_eq!(decode(r#"{"hello":"there"}"#), None);
        assert!(BybitCodec::new()
            .decode_message(&Message::Text("{oops".to_string()))
            .is_err());
    }

    #[test]
    fn test_order_book_snapshot_and_delta() {
        let codec = BybitCodec::new();
        let subscription = Subscription::new(Channel::OrderBook, Some("BTC/USDT"));
        let markets = MarketIndex::default();
        let ctx = ParseContext {
            subscription: &subscription,
            markets: &markets,
        };

        let snapshot: Value = serde_json::from_str(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"snapshot","ts":1672304484978,
                "data":{"s":"BTCUSDT","b":[["16493.50","0.006"]],"a":[["16611.00","0.029"]],"u":18521288,"seq":7961638724}}"#,
        )
        .unwrap();
        match codec.parse_order_book(&snapshot, &ctx).unwrap() {
            OrderBookUpdate::Snapshot(book) => {
                assert_eq!(book.symbol, "BTC/USDT");
                assert_eq!(book.nonce, Some(18_521_288));
                assert_eq!(book.timestamp, 1_672_304_484_978);
                assert_eq!(book.bids.len(), 1);
            }
            other => panic!("expected snapshot, got {:?}", other),
        }

        let delta: Value = serde_json::from_str(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1672304484979,
                "data":{"s":"BTCUSDT","b":[],"a":[["16611.00","0"]],"u":18521289,"seq":7961638725}}"#,
        )
        .unwrap();
        assert!(matches!(
            codec.parse_order_book(&delta, &ctx).unwrap(),
            OrderBookUpdate::Delta(_)
        ));
    }

    #[test]
    fn test_private_order_uses_market_index() {
        let subscription = Subscription::new(Channel::Orders, None);
        let mut markets = MarketIndex::default();
        markets.insert("BTCUSDT", "BTC/USDT");
        let ctx = ParseContext {
            subscription: &subscription,
            markets: &markets,
        };

        let payload: Value = serde_json::from_str(
            r#"{"id":"1","topic":"order","creationTime":1672364262474,"data":[{
                "symbol":"BTCUSDT","orderId":"5cf98598","side":"Buy","orderType":"Limit",
                "price":"16500","qty":"0.1","cumExecQty":"0.1","leavesQty":"0","avgPrice":"16500",
                "orderStatus":"Filled","orderLinkId":"","createdTime":"1672364262444"}]}"#,
        )
        .unwrap();
        let orders = BybitCodec::new().parse_orders(&payload, &ctx).unwrap();
        assert_eq!(orders[0].symbol, "BTC/USDT");
        assert_eq!(orders[0].status, Some(OrderStatus::Closed));
        assert_eq!(orders[0].client_order_id, None);
    }
}
