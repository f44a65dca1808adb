pub mod core;
pub mod exchanges;
pub mod utils;

pub use core::{
    config::{Credentials, ExchangeConfig},
    errors::{ErrorKind, ExchangeError},
    exchange::AsyncExchange,
    kernel::{Dispatcher, EventStream, StreamingClient, WsConfig},
    traits::{AccountInfo, ExchangeConnector, MarketDataSource, OrderPlacer},
    types::*,
};
pub use utils::{ExchangeFactory, ExchangeType};
