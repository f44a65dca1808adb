use crate::core::errors::{ErrorKind, ExchangeError};
use crate::core::kernel::nonce::NonceClock;
use crate::core::kernel::signer::{ApiSection, HttpMethod, RestUrls, SigningScheme};
use crate::core::kernel::transport::HttpResponse;
use crate::core::types::{
    Balances, Kline, Market, Order, OrderBook, OrderRequest, Params, Position, Symbol, Ticker,
    Trade,
};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// One logical operation of an exchange's REST API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub method: HttpMethod,
    /// Path template, `{name}` placeholders are filled from the call params
    pub path: &'static str,
    pub section: ApiSection,
}

impl Endpoint {
    pub const fn public(method: HttpMethod, path: &'static str) -> Self {
        Self {
            method,
            path,
            section: ApiSection::Public,
        }
    }

    pub const fn private(method: HttpMethod, path: &'static str) -> Self {
        Self {
            method,
            path,
            section: ApiSection::Private,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeUrls {
    pub rest: RestUrls,
    pub ws_public: Option<String>,
    pub ws_private: Option<String>,
}

/// Maps exchange error payloads and HTTP statuses onto [`ErrorKind`].
#[derive(Debug, Clone, Default)]
pub struct ErrorTable {
    /// JSON pointer to the error code, e.g. `/retCode`
    pub code_pointer: Option<&'static str>,
    /// JSON pointer to the human readable message
    pub message_pointer: Option<&'static str>,
    /// Codes that mean "no error" (`0` for most exchanges)
    pub success_codes: Vec<&'static str>,
    /// Exact code or message matches
    pub exact: HashMap<&'static str, ErrorKind>,
    /// Substring matches against the message, checked in order
    pub broad: Vec<(&'static str, ErrorKind)>,
}

impl ErrorTable {
    /// Kind implied by a bare HTTP status
    pub const fn kind_for_status(status: u16) -> Option<ErrorKind> {
        match status {
            200..=299 => None,
            401 | 511 => Some(ErrorKind::Authentication),
            403 => Some(ErrorKind::PermissionDenied),
            418 | 429 => Some(ErrorKind::RateLimitExceeded),
            408 | 504 => Some(ErrorKind::Timeout),
            400 => Some(ErrorKind::BadRequest),
            _ => Some(ErrorKind::Exchange),
        }
    }

    /// Parse a response body and reject it if it carries an exchange error.
    ///
    /// Error codes in the payload take precedence over the HTTP status, since
    /// many exchanges answer 200 with an error code or 4xx with a precise one.
    pub fn interpret(&self, response: &HttpResponse) -> Result<Value, ExchangeError> {
        let parsed = if response.body.trim().is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str::<Value>(&response.body)
        };

        let body = match parsed {
            Ok(body) => body,
            Err(e) => {
                return Err(match Self::kind_for_status(response.status) {
                    Some(kind) => kind.into_error(&response.status.to_string(), response.body.clone()),
                    None => ExchangeError::DeserializationError(format!(
                        "Failed to parse JSON response: {}",
                        e
                    )),
                });
            }
        };

        let code = self
            .code_pointer
            .and_then(|pointer| body.pointer(pointer))
            .and_then(code_text);
        let message = self
            .message_pointer
            .and_then(|pointer| body.pointer(pointer))
            .and_then(code_text)
            .unwrap_or_default();

        if let Some(code) = code.filter(|c| !self.success_codes.iter().any(|s| s == c)) {
            let kind = self
                .match_kind(Some(&code), &message)
                .or_else(|| Self::kind_for_status(response.status))
                .unwrap_or(ErrorKind::Exchange);
            let message = if message.is_empty() {
                response.body.clone()
            } else {
                message
            };
            return Err(kind.into_error(&code, message));
        }

        if let Some(status_kind) = Self::kind_for_status(response.status) {
            let kind = self.match_kind(None, &message).unwrap_or(status_kind);
            let message = if message.is_empty() {
                response.body.clone()
            } else {
                message
            };
            return Err(kind.into_error(&response.status.to_string(), message));
        }

        Ok(body)
    }

    fn match_kind(&self, code: Option<&str>, message: &str) -> Option<ErrorKind> {
        if let Some(kind) = code.and_then(|c| self.exact.get(c)) {
            return Some(*kind);
        }
        if let Some(kind) = self.exact.get(message) {
            return Some(*kind);
        }
        self.broad
            .iter()
            .find(|(needle, _)| message.contains(needle))
            .map(|(_, kind)| *kind)
    }
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Immutable, per-exchange configuration consumed by the generic core.
///
/// Built once by a binding and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ExchangeProfile {
    pub id: &'static str,
    pub name: &'static str,
    pub urls: ExchangeUrls,
    pub endpoints: HashMap<&'static str, Endpoint>,
    pub signing: SigningScheme,
    pub errors: ErrorTable,
    pub nonce_clock: NonceClock,
    /// Minimum spacing between REST requests
    pub rate_limit: Option<Duration>,
    /// Unified timeframe -> exchange interval
    pub timeframes: HashMap<&'static str, &'static str>,
}

impl ExchangeProfile {
    pub fn endpoint(&self, operation: &str) -> Result<&Endpoint, ExchangeError> {
        self.endpoints.get(operation).ok_or_else(|| {
            ExchangeError::NotSupported(format!("{} does not support {}", self.id, operation))
        })
    }

    pub fn has(&self, operation: &str) -> bool {
        self.endpoints.contains_key(operation)
    }

    pub fn timeframe(&self, timeframe: &str) -> Result<&'static str, ExchangeError> {
        self.timeframes.get(timeframe).copied().ok_or_else(|| {
            ExchangeError::InvalidParameters(format!(
                "{} does not support timeframe {}",
                self.id, timeframe
            ))
        })
    }
}

pub(crate) fn not_supported<T>(exchange: &str, what: &str) -> Result<T, ExchangeError> {
    Err(ExchangeError::NotSupported(format!(
        "{} does not support {}",
        exchange, what
    )))
}

/// Per-exchange data and parse functions.
///
/// Everything here is synchronous and free of I/O; the async side lives in
/// [`crate::core::exchange::AsyncExchange`], which holds a binding by `Arc`.
pub trait ExchangeBinding: Send + Sync + 'static {
    fn profile(&self) -> &ExchangeProfile;

    /// Exchange market id for a unified symbol when markets are not loaded
    fn market_id(&self, symbol: &str) -> Result<String, ExchangeError> {
        Symbol::parse(symbol)
            .map(|s| s.concatenated())
            .map_err(|e| ExchangeError::InvalidParameters(e.to_string()))
    }

    fn parse_markets(&self, _response: &Value) -> Result<Vec<Market>, ExchangeError> {
        not_supported(self.profile().id, "fetchMarkets")
    }

    fn parse_ticker(&self, _response: &Value, _market: &Market) -> Result<Ticker, ExchangeError> {
        not_supported(self.profile().id, "fetchTicker")
    }

    /// Every ticker of a bulk reply. Symbols may still be exchange ids;
    /// the caller maps them through the market cache.
    fn parse_tickers(&self, _response: &Value) -> Result<Vec<Ticker>, ExchangeError> {
        not_supported(self.profile().id, "fetchTickers")
    }

    fn parse_order_book(
        &self,
        _response: &Value,
        _market: &Market,
    ) -> Result<OrderBook, ExchangeError> {
        not_supported(self.profile().id, "fetchOrderBook")
    }

    fn parse_trades(&self, _response: &Value, _market: &Market) -> Result<Vec<Trade>, ExchangeError> {
        not_supported(self.profile().id, "fetchTrades")
    }

    fn parse_ohlcv(
        &self,
        _response: &Value,
        _market: &Market,
        _timeframe: &str,
    ) -> Result<Vec<Kline>, ExchangeError> {
        not_supported(self.profile().id, "fetchOHLCV")
    }

    fn parse_balance(&self, _response: &Value) -> Result<Balances, ExchangeError> {
        not_supported(self.profile().id, "fetchBalance")
    }

    fn parse_order(&self, _response: &Value, _market: Option<&Market>) -> Result<Order, ExchangeError> {
        not_supported(self.profile().id, "orders")
    }

    fn parse_orders(
        &self,
        _response: &Value,
        _market: Option<&Market>,
    ) -> Result<Vec<Order>, ExchangeError> {
        not_supported(self.profile().id, "fetchOpenOrders")
    }

    /// Own fills, oldest first
    fn parse_my_trades(
        &self,
        _response: &Value,
        _market: Option<&Market>,
    ) -> Result<Vec<Trade>, ExchangeError> {
        not_supported(self.profile().id, "fetchMyTrades")
    }

    fn parse_positions(&self, _response: &Value) -> Result<Vec<Position>, ExchangeError> {
        not_supported(self.profile().id, "fetchPositions")
    }

    fn markets_params(&self) -> Params {
        Params::new()
    }

    fn ticker_params(&self, market: &Market) -> Params {
        Params::new().with("symbol", &market.id)
    }

    fn tickers_params(&self) -> Params {
        Params::new()
    }

    fn order_book_params(&self, market: &Market, limit: Option<u32>) -> Params {
        let mut params = Params::new().with("symbol", &market.id);
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn trades_params(&self, market: &Market, limit: Option<u32>) -> Params {
        self.order_book_params(market, limit)
    }

    fn ohlcv_params(
        &self,
        market: &Market,
        interval: &str,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        let mut params = Params::new()
            .with("symbol", &market.id)
            .with("interval", interval);
        if let Some(since) = since {
            params.insert("start", since);
        }
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn balance_params(&self) -> Params {
        Params::new()
    }

    fn create_order_params(
        &self,
        _request: &OrderRequest,
        _market: &Market,
    ) -> Result<Params, ExchangeError> {
        not_supported(self.profile().id, "createOrder")
    }

    fn cancel_order_params(&self, id: &str, market: Option<&Market>) -> Result<Params, ExchangeError> {
        let mut params = Params::new().with("orderId", id);
        if let Some(market) = market {
            params.insert("symbol", &market.id);
        }
        Ok(params)
    }

    fn fetch_order_params(&self, id: &str, market: Option<&Market>) -> Result<Params, ExchangeError> {
        self.cancel_order_params(id, market)
    }

    fn open_orders_params(&self, market: Option<&Market>) -> Params {
        market.map_or_else(Params::new, |m| Params::new().with("symbol", &m.id))
    }

    /// Common filter for order and fill history queries
    fn history_params(
        &self,
        market: Option<&Market>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        let mut params = market.map_or_else(Params::new, |m| Params::new().with("symbol", &m.id));
        if let Some(since) = since {
            params.insert("startTime", since);
        }
        if let Some(limit) = limit {
            params.insert("limit", limit);
        }
        params
    }

    fn orders_params(&self, market: Option<&Market>, since: Option<i64>, limit: Option<u32>) -> Params {
        self.history_params(market, since, limit)
    }

    fn closed_orders_params(
        &self,
        market: Option<&Market>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        self.orders_params(market, since, limit)
    }

    fn my_trades_params(
        &self,
        market: Option<&Market>,
        since: Option<i64>,
        limit: Option<u32>,
    ) -> Params {
        self.history_params(market, since, limit)
    }

    fn positions_params(&self) -> Params {
        Params::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ErrorTable {
        ErrorTable {
            code_pointer: Some("/code"),
            message_pointer: Some("/message"),
            success_codes: vec!["0"],
            exact: HashMap::from([
                ("10003", ErrorKind::InsufficientFunds),
                ("Order does not exist", ErrorKind::OrderNotFound),
            ]),
            broad: vec![("invalid signature", ErrorKind::Authentication)],
        }
    }

    #[test]
    fn test_code_maps_to_kind() {
        let response = HttpResponse::new(200, r#"{"code": 10003, "message":"no balance"}"#);
        let err = table().interpret(&response).unwrap_err();
        assert_eq!(err, ExchangeError::InsufficientFunds("no balance".to_string()));
    }

    #[test]
    fn test_success_code_passes_body_through() {
        let response = HttpResponse::new(200, r#"{"code": 0, "result": {"x": 1}}"#);
        let body = table().interpret(&response).unwrap();
        assert_eq!(body["result"]["x"], 1);
    }

    #[test]
    fn test_message_matches_when_code_unknown() {
        let response = HttpResponse::new(200, r#"{"code": 1, "message": "Order does not exist"}"#);
        assert!(matches!(
            table().interpret(&response),
            Err(ExchangeError::OrderNotFound(_))
        ));

        let response = HttpResponse::new(401, r#"{"code": 2, "message": "invalid signature for request"}"#);
        assert!(matches!(
            table().interpret(&response),
            Err(ExchangeError::AuthError(_))
        ));
    }

    #[test]
    fn test_unmapped_code_is_catch_all() {
        let response = HttpResponse::new(200, r#"{"code": 99999, "message": "weird"}"#);
        assert_eq!(
            table().interpret(&response).unwrap_err(),
            ExchangeError::ApiError {
                code: "99999".to_string(),
                message: "weird".to_string()
            }
        );
    }

    #[test]
    fn test_status_fallback() {
        let cases = [
            (401, ErrorKind::Authentication),
            (403, ErrorKind::PermissionDenied),
            (429, ErrorKind::RateLimitExceeded),
            (504, ErrorKind::Timeout),
            (400, ErrorKind::BadRequest),
            (500, ErrorKind::Exchange),
        ];
        for (status, kind) in cases {
            let response = HttpResponse::new(status, "<html>nope</html>");
            assert_eq!(table().interpret(&response).unwrap_err().kind(), kind);
        }
    }

    #[test]
    fn test_malformed_success_body() {
        let response = HttpResponse::new(200, "not json");
        assert!(matches!(
            table().interpret(&response),
            Err(ExchangeError::DeserializationError(_))
        ));
        assert_eq!(
            table().interpret(&HttpResponse::new(204, "")).unwrap(),
            Value::Null
        );
    }
}
