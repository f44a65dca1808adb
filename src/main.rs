use std::time::Duration;
use tracing::{info, warn};
use tradewire::core::config::ExchangeConfig;
use tradewire::core::kernel::WsConfig;
use tradewire::exchanges::bybit;
use tradewire::{ExchangeFactory, ExchangeType, MarketDataSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tradewire=debug".into()),
        )
        .init();

    // Public market data only, no credentials needed
    for exchange_type in ExchangeFactory::get_available_exchanges() {
        let connector = ExchangeFactory::create_connector(exchange_type, None, false)?;
        for symbol in exchange_type.default_symbols() {
            match connector.fetch_ticker(&symbol).await {
                Ok(ticker) => info!(
                    exchange = %exchange_type,
                    symbol = %ticker.symbol,
                    last = ?ticker.last.map(|p| p.to_string()),
                    "ticker"
                ),
                Err(e) => warn!(exchange = %exchange_type, %symbol, error = %e, "ticker failed"),
            }
        }
    }

    let stream = bybit::public_stream(&ExchangeConfig::read_only(), &WsConfig::default())?;
    stream.connect().await?;
    let mut trades = stream.watch_trades("BTC/USDT").await?;

    let collect = async {
        let mut seen = 0;
        while let Some(event) = trades.recv().await {
            match event {
                Ok(event) => info!(?event, "stream event"),
                Err(e) => warn!(error = %e, "stream error"),
            }
            seen += 1;
            if seen == 5 {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(30), collect).await.is_err() {
        warn!(exchange = %ExchangeType::Bybit, "no trades within 30s");
    }

    stream.close().await?;
    Ok(())
}
