use crate::core::binding::ExchangeBinding;
use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::exchange::AsyncExchange;
use crate::core::kernel::{
    Dispatcher, DispatcherBuilder, HttpTransport, MonotonicNonce, NonceProvider,
    ReqwestTransport, StreamingClient, TungsteniteWs, WsConfig,
};
use crate::exchanges::bybit::codec::BybitCodec;
use crate::exchanges::bybit::conversions::BybitBinding;
use std::sync::Arc;
use std::time::Duration;

pub type BybitExchange<T = ReqwestTransport> = AsyncExchange<BybitBinding, T>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn binding(config: &ExchangeConfig) -> BybitBinding {
    let binding = BybitBinding::new(config.testnet);
    match &config.base_url {
        Some(base_url) => binding.with_rest_url(base_url.clone()),
        None => binding,
    }
}

fn dispatcher_builder(config: &ExchangeConfig, binding: &BybitBinding) -> DispatcherBuilder {
    DispatcherBuilder::new(Arc::new(binding.profile().clone()))
        .with_credentials(config.credentials())
        .with_timeout(DEFAULT_TIMEOUT)
}

/// Create a Bybit dispatcher for raw operation calls
pub fn build_dispatcher(config: &ExchangeConfig) -> Result<Dispatcher<ReqwestTransport>, ExchangeError> {
    dispatcher_builder(config, &binding(config)).build_reqwest()
}

/// Create a Bybit spot client over reqwest
pub fn build_connector(config: &ExchangeConfig) -> Result<BybitExchange, ExchangeError> {
    let binding = binding(config);
    let dispatcher = dispatcher_builder(config, &binding).build_reqwest()?;
    Ok(AsyncExchange::new(Arc::new(binding), dispatcher))
}

/// Create a Bybit spot client over any transport
pub fn build_connector_with_transport<T: HttpTransport>(
    config: &ExchangeConfig,
    transport: T,
) -> BybitExchange<T> {
    let binding = binding(config);
    let dispatcher = dispatcher_builder(config, &binding).build(transport);
    AsyncExchange::new(Arc::new(binding), dispatcher)
}

fn stream_url(config: &ExchangeConfig, private: bool) -> Result<String, ExchangeError> {
    let urls = binding(config).profile().urls.clone();
    let url = if private { urls.ws_private } else { urls.ws_public };
    url.ok_or_else(|| ExchangeError::NotSupported("bybit stream endpoint missing".to_string()))
}

/// Spot market data stream (tickers, books, trades, candles)
pub fn public_stream(
    config: &ExchangeConfig,
    ws_config: &WsConfig,
) -> Result<StreamingClient<BybitCodec>, ExchangeError> {
    let session = TungsteniteWs::new(stream_url(config, false)?, "bybit".to_string())
        .with_config(ws_config.clone());
    Ok(StreamingClient::spawn(
        Arc::new(BybitCodec::new()),
        session,
        None,
        Arc::new(MonotonicNonce::milliseconds()),
        ws_config,
    ))
}

/// Account stream (wallet, orders, executions, positions); needs credentials.
///
/// Pass the REST client's `dispatcher().nonce_provider()` as `nonces` so
/// stream auth and signed requests for the same key draw from one sequence.
pub fn private_stream(
    config: &ExchangeConfig,
    ws_config: &WsConfig,
    nonces: Arc<dyn NonceProvider>,
) -> Result<StreamingClient<BybitCodec>, ExchangeError> {
    let credentials = config
        .credentials()
        .ok_or_else(|| ExchangeError::AuthError("bybit private stream needs API credentials".to_string()))?;
    let session = TungsteniteWs::new(stream_url(config, true)?, "bybit".to_string())
        .with_config(ws_config.clone());
    Ok(StreamingClient::spawn(
        Arc::new(BybitCodec::new()),
        session,
        Some(credentials),
        nonces,
        ws_config,
    ))
}
