/// Tradewire kernel - exchange-agnostic request and streaming machinery
///
/// Nothing in here knows about a particular exchange. Bindings describe
/// themselves through [`crate::core::binding::ExchangeProfile`] (REST) and
/// [`WsCodec`] (streaming); the kernel does the rest.
///
/// # Architecture
///
/// ## Request path
/// - `NonceProvider`: strictly increasing nonces shared by all calls
/// - `RequestSigner`: descriptor-driven HMAC signing
/// - `HttpTransport`: pluggable HTTP layer, `ReqwestTransport` by default
/// - `Dispatcher`: operation table lookup, signing, rate limiting, timeouts
/// - `PendingCall`: future for one call, completed at most once
///
/// ## Streaming path
/// - `WsSession`: raw socket, `TungsteniteWs` by default
/// - `WsCodec`: exchange-specific topics, control frames and payload parsing
/// - `StreamState`: connection/auth state machine and subscription table
/// - `StreamingClient`: task-owned connection driving the above
///
/// # Example
///
/// ```rust,no_run
/// use tradewire::core::config::ExchangeConfig;
/// use tradewire::core::kernel::*;
/// use tradewire::exchanges::bybit;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExchangeConfig::read_only();
/// let dispatcher = bybit::build_dispatcher(&config)?;
/// let ticker = dispatcher
///     .dispatch("fetchTicker", tradewire::core::types::Params::new()
///         .with("category", "spot")
///         .with("symbol", "BTCUSDT"))
///     .await?;
/// println!("{}", ticker);
///
/// let stream = bybit::public_stream(&config, &WsConfig::default())?;
/// stream.connect().await?;
/// let mut trades = stream.watch_trades("BTC/USDT").await?;
/// while let Some(event) = trades.recv().await {
///     println!("{:?}", event?);
/// }
/// # Ok(())
/// # }
/// ```
pub mod codec;
pub mod nonce;
pub mod pending;
pub mod rest;
pub mod signer;
pub mod stream;
pub mod streaming;
pub mod transport;
pub mod ws;

// Re-export key types for convenience
pub use codec::{Channel, ChannelKind, MarketIndex, OrderBookUpdate, ParseContext, Subscription, WsCodec, WsInbound};
pub use nonce::{FixedNonce, MonotonicNonce, NonceClock, NonceProvider};
pub use pending::{Completion, PendingCall};
pub use rest::{Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use signer::{
    HttpMethod, RequestSigner, RequestSpec, RestUrls, SignedRequest, Signer, SigningScheme,
};
pub use stream::{AuthState, BookCache, ConnectionState, StreamState, SubscriptionStatus};
pub use streaming::{EventStream, StreamingClient};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportConfig};
pub use ws::{TungsteniteWs, WsConfig, WsSession};
