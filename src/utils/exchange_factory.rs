use crate::core::config::ExchangeConfig;
use crate::core::errors::ExchangeError;
use crate::core::traits::ExchangeConnector;
use crate::exchanges::{bitso, bybit};
use std::str::FromStr;

/// Supported exchange types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeType {
    Bybit,
    Bitso,
}

impl ExchangeType {
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Bybit => "bybit",
            Self::Bitso => "bitso",
        }
    }

    /// Prefix for `{PREFIX}_API_KEY` style environment variables
    pub const fn env_prefix(&self) -> &'static str {
        match self {
            Self::Bybit => "BYBIT",
            Self::Bitso => "BITSO",
        }
    }

    pub fn default_symbols(&self) -> Vec<String> {
        match self {
            Self::Bybit => vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            Self::Bitso => vec!["BTC/MXN".to_string(), "ETH/MXN".to_string()],
        }
    }
}

impl std::fmt::Display for ExchangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bybit => write!(f, "Bybit"),
            Self::Bitso => write!(f, "Bitso"),
        }
    }
}

impl FromStr for ExchangeType {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bybit" => Ok(Self::Bybit),
            "bitso" => Ok(Self::Bitso),
            other => Err(ExchangeError::NotSupported(format!("unknown exchange '{}'", other))),
        }
    }
}

/// Factory for creating exchange connectors
pub struct ExchangeFactory;

impl ExchangeFactory {
    /// Create a connector for the given exchange type.
    ///
    /// Without a config a read-only one is used, so only public market data works.
    pub fn create_connector(
        exchange_type: ExchangeType,
        config: Option<ExchangeConfig>,
        testnet: bool,
    ) -> Result<Box<dyn ExchangeConnector>, ExchangeError> {
        let config = config.unwrap_or_else(|| ExchangeConfig::read_only().testnet(testnet));
        match exchange_type {
            ExchangeType::Bybit => Ok(Box::new(bybit::build_connector(&config)?)),
            ExchangeType::Bitso => Ok(Box::new(bitso::build_connector(&config)?)),
        }
    }

    /// Connector configured from `{PREFIX}_*` environment variables
    pub fn create_from_env(
        exchange_type: ExchangeType,
    ) -> Result<Box<dyn ExchangeConnector>, ExchangeError> {
        let config = ExchangeConfig::from_env(exchange_type.env_prefix())?;
        Self::create_connector(exchange_type, Some(config), false)
    }

    pub fn get_available_exchanges() -> Vec<ExchangeType> {
        vec![ExchangeType::Bybit, ExchangeType::Bitso]
    }
}
