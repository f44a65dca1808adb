use crate::core::binding::ExchangeProfile;
use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use crate::core::kernel::nonce::{MonotonicNonce, NonceProvider};
use crate::core::kernel::pending::PendingCall;
use crate::core::kernel::signer::{implode_path, RequestSigner, RequestSpec, Signer};
use crate::core::kernel::transport::{HttpTransport, ReqwestTransport, TransportConfig};
use crate::core::types::Params;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, debug_span, warn, Instrument};

/// Configuration for the dispatcher
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Exchange name for logging and tracing
    pub exchange_name: String,
    /// Fail a call with `Timeout` if no response arrives in time
    pub timeout: Option<Duration>,
    /// Minimum spacing between outgoing requests
    pub rate_limit: Option<Duration>,
}

impl DispatcherConfig {
    pub fn new(exchange_name: impl Into<String>) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            timeout: None,
            rate_limit: None,
        }
    }
}

/// Asynchronous request dispatcher
///
/// Turns logical operations into signed HTTP requests and hands back a
/// [`PendingCall`] per request. Calls are independent of each other; the
/// nonce source is the only state they share. Nothing is retried.
///
/// The timeout clock starts once a call has passed the rate limiter. A call
/// that times out is not aborted: the request may already be on the wire, so
/// its late outcome is still awaited, logged and counted in
/// [`Dispatcher::late_responses`].
pub struct Dispatcher<T: HttpTransport> {
    transport: Arc<T>,
    signer: Arc<dyn Signer>,
    nonces: Arc<dyn NonceProvider>,
    profile: Arc<ExchangeProfile>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    config: DispatcherConfig,
    next_id: AtomicU64,
    late: Arc<AtomicU64>,
}

impl<T: HttpTransport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("exchange", &self.profile.id)
            .field("rate_limited", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: HttpTransport> Dispatcher<T> {
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Nonce source shared by every request this dispatcher signs
    pub fn nonce_provider(&self) -> Arc<dyn NonceProvider> {
        Arc::clone(&self.nonces)
    }

    /// Responses that arrived after their call had already timed out
    pub fn late_responses(&self) -> u64 {
        self.late.load(Ordering::Relaxed)
    }

    /// Look up `operation` in the endpoint table and submit it.
    ///
    /// Unknown operations and unfilled path placeholders resolve immediately
    /// with an error; nothing is sent in that case.
    pub fn dispatch(&self, operation: &str, params: Params) -> PendingCall<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match self.prepare(operation, params) {
            Ok(spec) => self.submit(id, operation, spec),
            Err(e) => PendingCall::ready(id, Err(e)),
        }
    }

    fn prepare(&self, operation: &str, mut params: Params) -> Result<RequestSpec, ExchangeError> {
        let endpoint = *self.profile.endpoint(operation)?;
        let path = implode_path(endpoint.path, &mut params)?;
        Ok(RequestSpec::new(endpoint.method, path, endpoint.section).with_params(params))
    }

    fn submit(&self, id: u64, operation: &str, spec: RequestSpec) -> PendingCall<Value> {
        let (completion, mut call) = PendingCall::channel(id);
        let (admitted_tx, admitted) = oneshot::channel::<()>();

        let span = debug_span!(
            "dispatch",
            exchange = %self.config.exchange_name,
            call_id = id,
            operation = %operation,
            method = %spec.method,
            path = %spec.path,
        );

        let transport = Arc::clone(&self.transport);
        let signer = Arc::clone(&self.signer);
        let nonces = Arc::clone(&self.nonces);
        let profile = Arc::clone(&self.profile);
        let limiter = self.limiter.clone();
        let late = Arc::clone(&self.late);
        let request_completion = completion.clone();

        let request_task = tokio::spawn(
            async move {
                if let Some(limiter) = limiter {
                    limiter.until_ready().await;
                }
                let _ = admitted_tx.send(());

                let result = async {
                    let signed = signer.sign(&spec, nonces.as_ref())?;
                    let response = transport.execute(signed).await?;
                    debug!(status = response.status, "response received");
                    profile.errors.interpret(&response)
                }
                .await;

                if !request_completion.resolve(result) {
                    late.fetch_add(1, Ordering::Relaxed);
                    warn!("response arrived after the call was already resolved");
                }
            }
            .instrument(span),
        );
        call.attach_until_resolved(request_task.abort_handle());

        if let Some(timeout) = self.config.timeout {
            let exchange = self.config.exchange_name.clone();
            let timer = tokio::spawn(async move {
                if admitted.await.is_err() {
                    return;
                }
                tokio::time::sleep(timeout).await;
                if completion.resolve(Err(ExchangeError::Timeout(format!(
                    "{} call {} exceeded {:?}",
                    exchange, id, timeout
                )))) {
                    debug!(call_id = id, "call timed out");
                }
            });
            call.attach(timer.abort_handle());
        }

        call
    }
}

/// Builder for creating dispatcher instances
pub struct DispatcherBuilder {
    profile: Arc<ExchangeProfile>,
    config: DispatcherConfig,
    credentials: Option<Credentials>,
    signer: Option<Arc<dyn Signer>>,
    nonces: Option<Arc<dyn NonceProvider>>,
    transport_config: Option<TransportConfig>,
}

impl DispatcherBuilder {
    pub fn new(profile: Arc<ExchangeProfile>) -> Self {
        let mut config = DispatcherConfig::new(profile.id);
        config.rate_limit = profile.rate_limit;
        Self {
            profile,
            config,
            credentials: None,
            signer: None,
            nonces: None,
            transport_config: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Override (or with `None`, disable) the profile's rate limit
    pub fn with_rate_limit(mut self, period: Option<Duration>) -> Self {
        self.config.rate_limit = period;
        self
    }

    /// Replace the descriptor-driven signer
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_nonce_provider(mut self, nonces: Arc<dyn NonceProvider>) -> Self {
        self.nonces = Some(nonces);
        self
    }

    pub fn with_transport_config(mut self, transport_config: TransportConfig) -> Self {
        self.transport_config = Some(transport_config);
        self
    }

    /// Build over a caller-supplied transport
    pub fn build<T: HttpTransport>(self, transport: T) -> Dispatcher<T> {
        let signer = self.signer.unwrap_or_else(|| {
            Arc::new(RequestSigner::new(
                self.profile.urls.rest.clone(),
                self.profile.signing.clone(),
                self.credentials,
            ))
        });
        let nonces = self
            .nonces
            .unwrap_or_else(|| Arc::new(MonotonicNonce::new(self.profile.nonce_clock)));
        let limiter = self
            .config
            .rate_limit
            .and_then(Quota::with_period)
            .map(|quota| Arc::new(RateLimiter::direct(quota)));

        Dispatcher {
            transport: Arc::new(transport),
            signer,
            nonces,
            profile: self.profile,
            limiter,
            config: self.config,
            next_id: AtomicU64::new(1),
            late: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build over the reqwest transport
    pub fn build_reqwest(mut self) -> Result<Dispatcher<ReqwestTransport>, ExchangeError> {
        let transport_config = self
            .transport_config
            .take()
            .unwrap_or_else(|| TransportConfig::new(self.profile.id));
        let transport = ReqwestTransport::new(transport_config)?;
        Ok(self.build(transport))
    }
}
