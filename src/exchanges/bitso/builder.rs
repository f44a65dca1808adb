use crate::core::binding::ExchangeBinding;
use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::exchange::AsyncExchange;
use crate::core::kernel::{Dispatcher, DispatcherBuilder, HttpTransport, ReqwestTransport};
use crate::exchanges::bitso::conversions::BitsoBinding;
use std::sync::Arc;
use std::time::Duration;

pub type BitsoExchange<T = ReqwestTransport> = AsyncExchange<BitsoBinding, T>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

fn binding(config: &ExchangeConfig) -> BitsoBinding {
    // no sandbox host on v3, testnet is ignored
    match &config.base_url {
        Some(base_url) => BitsoBinding::new().with_rest_url(base_url.clone()),
        None => BitsoBinding::new(),
    }
}

fn dispatcher_builder(config: &ExchangeConfig, binding: &BitsoBinding) -> DispatcherBuilder {
    DispatcherBuilder::new(Arc::new(binding.profile().clone()))
        .with_credentials(config.credentials())
        .with_timeout(DEFAULT_TIMEOUT)
}

pub fn build_dispatcher(config: &ExchangeConfig) -> Result<Dispatcher<ReqwestTransport>, ExchangeError> {
    dispatcher_builder(config, &binding(config)).build_reqwest()
}

/// Create a Bitso client over reqwest
pub fn build_connector(config: &ExchangeConfig) -> Result<BitsoExchange, ExchangeError> {
    let binding = binding(config);
    let dispatcher = dispatcher_builder(config, &binding).build_reqwest()?;
    Ok(AsyncExchange::new(Arc::new(binding), dispatcher))
}

/// Create a Bitso client over any transport
pub fn build_connector_with_transport<T: HttpTransport>(
    config: &ExchangeConfig,
    transport: T,
) -> BitsoExchange<T> {
    let binding = binding(config);
    let dispatcher = dispatcher_builder(config, &binding).build(transport);
    AsyncExchange::new(Arc::new(binding), dispatcher)
}
