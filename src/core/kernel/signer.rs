use crate::core::config::Credentials;
use crate::core::errors::ExchangeError;
use crate::core::kernel::nonce::NonceProvider;
use crate::core::types::Params;
use base64::engine::general_purpose;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Whether parameters travel in the query string rather than the body
    pub const fn params_in_query(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiSection {
    Public,
    Private,
}

/// A request before signing: path already imploded, parameters split by location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub section: ApiSection,
    pub query: Params,
    pub body: Params,
}

impl RequestSpec {
    pub fn new(method: HttpMethod, path: impl Into<String>, section: ApiSection) -> Self {
        Self {
            method,
            path: path.into(),
            section,
            query: Params::new(),
            body: Params::new(),
        }
    }

    /// Route parameters to the query string or the body according to the method
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        if self.method.params_in_query() {
            self.query.extend(params);
        } else {
            self.body.extend(params);
        }
        self
    }
}

/// Fully prepared HTTP request, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestEncoding {
    Hex,
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Form,
}

/// One piece of the string that gets signed, concatenated in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePart {
    Nonce,
    Method,
    Path,
    /// Path followed by `?query` when the query is non-empty
    PathWithQuery,
    Query,
    Body,
    /// Body when present, otherwise the query string
    QueryOrBody,
    ApiKey,
    Literal(String),
}

/// Where the key, nonce and signature end up on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignaturePlacement {
    Headers {
        api_key: &'static str,
        signature: &'static str,
        nonce: Option<&'static str>,
        extra: Vec<(&'static str, String)>,
    },
    /// Nonce (and optionally key) are appended to the query before signing,
    /// the signature after.
    Query {
        api_key: Option<&'static str>,
        nonce: &'static str,
        signature: &'static str,
    },
    /// `Authorization: <scheme> <key>:<nonce>:<signature>`
    Authorization { scheme: &'static str },
}

/// Per-exchange signing recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningScheme {
    pub algorithm: Algorithm,
    pub encoding: DigestEncoding,
    pub message: Vec<MessagePart>,
    pub placement: SignaturePlacement,
    pub body_encoding: BodyEncoding,
}

/// Signer trait for request authentication
///
/// The dispatcher only talks to this seam, so a binding with an unusual
/// signing flow can plug in its own implementation.
pub trait Signer: Send + Sync {
    /// Turn a request spec into a wire request, drawing a nonce only when needed
    fn sign(
        &self,
        request: &RequestSpec,
        nonces: &dyn NonceProvider,
    ) -> Result<SignedRequest, ExchangeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestUrls {
    pub public: String,
    pub private: String,
}

impl RestUrls {
    pub fn single(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            public: base_url.clone(),
            private: base_url,
        }
    }

    pub fn for_section(&self, section: ApiSection) -> &str {
        match section {
            ApiSection::Public => &self.public,
            ApiSection::Private => &self.private,
        }
    }
}

/// Descriptor-driven HMAC signer.
///
/// Public requests are passed through untouched. Private requests require
/// complete credentials and fail with [`ExchangeError::AuthError`] otherwise.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    urls: RestUrls,
    scheme: SigningScheme,
    credentials: Option<Credentials>,
}

impl RequestSigner {
    pub fn new(urls: RestUrls, scheme: SigningScheme, credentials: Option<Credentials>) -> Self {
        Self {
            urls,
            scheme,
            credentials,
        }
    }

    pub const fn scheme(&self) -> &SigningScheme {
        &self.scheme
    }

    pub const fn urls(&self) -> &RestUrls {
        &self.urls
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(Credentials::is_complete)
    }

    fn require_credentials(&self) -> Result<&Credentials, ExchangeError> {
        match &self.credentials {
            Some(credentials) if !credentials.api_key().is_empty() => {
                if credentials.secret().is_empty() {
                    Err(ExchangeError::AuthError("secret required".to_string()))
                } else {
                    Ok(credentials)
                }
            }
            _ => Err(ExchangeError::AuthError("apiKey required".to_string())),
        }
    }

    /// Deterministic signing with an explicit nonce
    pub fn sign_with_nonce(
        &self,
        request: &RequestSpec,
        nonce: u64,
    ) -> Result<SignedRequest, ExchangeError> {
        let base_url = self.urls.for_section(request.section);
        let mut headers = BTreeMap::new();

        let body = self.encode_body(&request.body)?;
        if body.is_some() {
            headers.insert(
                "Content-Type".to_string(),
                match self.scheme.body_encoding {
                    BodyEncoding::Json => "application/json",
                    BodyEncoding::Form => "application/x-www-form-urlencoded",
                }
                .to_string(),
            );
        }

        if request.section == ApiSection::Public {
            let query = urlencode(&request.query);
            return Ok(SignedRequest {
                method: request.method,
                url: compose_url(base_url, &request.path, &query),
                headers,
                body,
            });
        }

        let credentials = self.require_credentials()?;
        let nonce = nonce.to_string();

        let mut query_params = request.query.clone();
        if let SignaturePlacement::Query {
            api_key,
            nonce: nonce_key,
            ..
        } = &self.scheme.placement
        {
            if let Some(key_param) = api_key {
                query_params.insert(*key_param, credentials.api_key());
            }
            query_params.insert(*nonce_key, &nonce);
        }
        let mut query = urlencode(&query_params);

        let message = self.render_message(request, &query, body.as_deref(), &nonce, credentials);
        let signature = hmac(
            self.scheme.algorithm,
            self.scheme.encoding,
            credentials.secret().as_bytes(),
            message.as_bytes(),
        )?;

        match &self.scheme.placement {
            SignaturePlacement::Headers {
                api_key,
                signature: signature_header,
                nonce: nonce_header,
                extra,
            } => {
                headers.insert((*api_key).to_string(), credentials.api_key().to_string());
                headers.insert((*signature_header).to_string(), signature);
                if let Some(nonce_header) = nonce_header {
                    headers.insert((*nonce_header).to_string(), nonce);
                }
                for (name, value) in extra {
                    headers.insert((*name).to_string(), value.clone());
                }
            }
            SignaturePlacement::Query {
                signature: signature_key,
                ..
            } => {
                let signature_param = urlencode(&Params::new().with(*signature_key, signature));
                if query.is_empty() {
                    query = signature_param;
                } else {
                    query = format!("{}&{}", query, signature_param);
                }
            }
            SignaturePlacement::Authorization { scheme } => {
                headers.insert(
                    "Authorization".to_string(),
                    format!("{} {}:{}:{}", scheme, credentials.api_key(), nonce, signature),
                );
            }
        }

        Ok(SignedRequest {
            method: request.method,
            url: compose_url(base_url, &request.path, &query),
            headers,
            body,
        })
    }

    fn encode_body(&self, body: &Params) -> Result<Option<String>, ExchangeError> {
        if body.is_empty() {
            return Ok(None);
        }
        let encoded = match self.scheme.body_encoding {
            BodyEncoding::Json => serde_json::to_string(body)
                .map_err(|e| ExchangeError::SerializationError(e.to_string()))?,
            BodyEncoding::Form => urlencode(body),
        };
        Ok(Some(encoded))
    }

    fn render_message(
        &self,
        request: &RequestSpec,
        query: &str,
        body: Option<&str>,
        nonce: &str,
        credentials: &Credentials,
    ) -> String {
        let mut message = String::new();
        for part in &self.scheme.message {
            match part {
                MessagePart::Nonce => message.push_str(nonce),
                MessagePart::Method => message.push_str(request.method.as_str()),
                MessagePart::Path => message.push_str(&request.path),
                MessagePart::PathWithQuery => {
                    message.push_str(&request.path);
                    if !query.is_empty() {
                        message.push('?');
                        message.push_str(query);
                    }
                }
                MessagePart::Query => message.push_str(query),
                MessagePart::Body => message.push_str(body.unwrap_or_default()),
                MessagePart::QueryOrBody => message.push_str(body.unwrap_or(query)),
                MessagePart::ApiKey => message.push_str(credentials.api_key()),
                MessagePart::Literal(text) => message.push_str(text),
            }
        }
        message
    }
}

impl Signer for RequestSigner {
    fn sign(
        &self,
        request: &RequestSpec,
        nonces: &dyn NonceProvider,
    ) -> Result<SignedRequest, ExchangeError> {
        let nonce = match request.section {
            ApiSection::Public => 0,
            ApiSection::Private => nonces.next_nonce(),
        };
        self.sign_with_nonce(request, nonce)
    }
}

/// Keyed digest of `message`, encoded as requested
pub fn hmac(
    algorithm: Algorithm,
    encoding: DigestEncoding,
    secret: &[u8],
    message: &[u8],
) -> Result<String, ExchangeError> {
    macro_rules! digest {
        ($hash:ty) => {{
            let mut mac = Hmac::<$hash>::new_from_slice(secret)
                .map_err(|e| ExchangeError::AuthError(format!("Invalid secret key: {}", e)))?;
            mac.update(message);
            mac.finalize().into_bytes().to_vec()
        }};
    }

    let bytes = match algorithm {
        Algorithm::Sha256 => digest!(Sha256),
        Algorithm::Sha384 => digest!(Sha384),
        Algorithm::Sha512 => digest!(Sha512),
    };

    Ok(match encoding {
        DigestEncoding::Hex => hex::encode(bytes),
        DigestEncoding::Base64 => general_purpose::STANDARD.encode(bytes),
    })
}

/// `application/x-www-form-urlencoded` rendering, parameter order preserved
pub fn urlencode(params: &Params) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// Substitute `{name}` placeholders in a path template.
///
/// Values are percent-encoded as a single path segment. Consumed parameters
/// are removed from `params`; a placeholder with no matching parameter is an
/// [`ExchangeError::InvalidParameters`].
pub fn implode_path(template: &str, params: &mut Params) -> Result<String, ExchangeError> {
    let mut path = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        path.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            ExchangeError::InvalidParameters(format!("unterminated placeholder in '{}'", template))
        })?;
        let name = &after[..end];
        let value = params.remove(name).ok_or_else(|| {
            ExchangeError::InvalidParameters(format!("missing path parameter '{}'", name))
        })?;
        path.push_str(&encode_segment(&value));
        rest = &after[end + 1..];
    }
    path.push_str(rest);

    Ok(path)
}

fn encode_segment(value: &str) -> String {
    // form encoding turns spaces into '+', paths need %20
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn compose_url(base_url: &str, path: &str, query: &str) -> String {
    let mut url = String::with_capacity(base_url.len() + path.len() + query.len() + 1);
    url.push_str(base_url.trim_end_matches('/'));
    if !path.is_empty() && !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_scheme() -> SigningScheme {
        SigningScheme {
            algorithm: Algorithm::Sha256,
            encoding: DigestEncoding::Hex,
            message: vec![
                MessagePart::Nonce,
                MessagePart::ApiKey,
                MessagePart::Literal("5000".to_string()),
                MessagePart::QueryOrBody,
            ],
            placement: SignaturePlacement::Headers {
                api_key: "X-API-KEY",
                signature: "X-SIGN",
                nonce: Some("X-TS"),
                extra: vec![("X-RECV-WINDOW", "5000".to_string())],
            },
            body_encoding: BodyEncoding::Json,
        }
    }

    fn signer(credentials: Option<Credentials>) -> RequestSigner {
        RequestSigner::new(
            RestUrls::single("https://api.example.com"),
            header_scheme(),
            credentials,
        )
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let digest = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            b"Jefe",
            b"what do ya want for nothing?",
        )
        .unwrap();
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_encodings_differ_only_in_rendering() {
        let hex_digest =
            hmac(Algorithm::Sha512, DigestEncoding::Hex, b"key", b"message").unwrap();
        let b64_digest =
            hmac(Algorithm::Sha512, DigestEncoding::Base64, b"key", b"message").unwrap();
        let decoded = general_purpose::STANDARD.decode(b64_digest).unwrap();
        assert_eq!(hex::encode(decoded), hex_digest);
        assert_eq!(hex_digest.len(), 128);
    }

    #[test]
    fn test_signing_is_deterministic_for_fixed_nonce() {
        let signer = signer(Some(Credentials::new("key", "secret")));
        let spec = RequestSpec::new(HttpMethod::Get, "/v5/account/wallet-balance", ApiSection::Private)
            .with_params(Params::new().with("accountType", "UNIFIED"));

        let first = signer.sign_with_nonce(&spec, 1_700_000_000_000).unwrap();
        let second = signer.sign_with_nonce(&spec, 1_700_000_000_000).unwrap();
        assert_eq!(first, second);

        let expected = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            b"secret",
            b"1700000000000key5000accountType=UNIFIED",
        )
        .unwrap();
        assert_eq!(first.headers.get("X-SIGN"), Some(&expected));
        assert_eq!(first.headers.get("X-TS").map(String::as_str), Some("1700000000000"));
        assert_eq!(first.headers.get("X-RECV-WINDOW").map(String::as_str), Some("5000"));
        assert_eq!(
            first.url,
            "https://api.example.com/v5/account/wallet-balance?accountType=UNIFIED"
        );
        assert!(first.body.is_none());
    }

    #[test]
    fn test_post_body_is_json_and_signed() {
        let signer = signer(Some(Credentials::new("key", "secret")));
        let spec = RequestSpec::new(HttpMethod::Post, "/v5/order/create", ApiSection::Private)
            .with_params(Params::new().with("symbol", "BTCUSDT").with("qty", "0.1"));

        let signed = signer.sign_with_nonce(&spec, 42).unwrap();
        let body = signed.body.clone().unwrap();
        assert_eq!(body, r#"{"symbol":"BTCUSDT","qty":"0.1"}"#);
        assert_eq!(
            signed.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );

        let expected = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            b"secret",
            format!("42key5000{}", body).as_bytes(),
        )
        .unwrap();
        assert_eq!(signed.headers.get("X-SIGN"), Some(&expected));
    }

    #[test]
    fn test_public_request_needs_no_credentials() {
        let signer = signer(None);
        let spec = RequestSpec::new(HttpMethod::Get, "/v5/market/tickers", ApiSection::Public)
            .with_params(Params::new().with("category", "spot"));
        let signed = signer.sign_with_nonce(&spec, 0).unwrap();
        assert_eq!(
            signed.url,
            "https://api.example.com/v5/market/tickers?category=spot"
        );
        assert!(signed.headers.is_empty());
    }

    #[test]
    fn test_private_request_without_credentials_fails() {
        let spec = RequestSpec::new(HttpMethod::Get, "/private", ApiSection::Private);

        let err = signer(None).sign_with_nonce(&spec, 1).unwrap_err();
        assert_eq!(err, ExchangeError::AuthError("apiKey required".to_string()));

        let err = signer(Some(Credentials::new("key", "")))
            .sign_with_nonce(&spec, 1)
            .unwrap_err();
        assert_eq!(err, ExchangeError::AuthError("secret required".to_string()));
    }

    #[test]
    fn test_query_placement_appends_nonce_then_signature() {
        let scheme = SigningScheme {
            algorithm: Algorithm::Sha256,
            encoding: DigestEncoding::Hex,
            message: vec![MessagePart::Query],
            placement: SignaturePlacement::Query {
                api_key: Some("apiKey"),
                nonce: "timestamp",
                signature: "signature",
            },
            body_encoding: BodyEncoding::Form,
        };
        let signer = RequestSigner::new(
            RestUrls::single("https://api.example.com/"),
            scheme,
            Some(Credentials::new("key", "secret")),
        );
        let spec = RequestSpec::new(HttpMethod::Get, "/account", ApiSection::Private)
            .with_params(Params::new().with("asset", "BTC"));

        let signed = signer.sign_with_nonce(&spec, 7).unwrap();
        let expected = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            b"secret",
            b"asset=BTC&apiKey=key&timestamp=7",
        )
        .unwrap();
        assert_eq!(
            signed.url,
            format!(
                "https://api.example.com/account?asset=BTC&apiKey=key&timestamp=7&signature={}",
                expected
            )
        );
    }

    #[test]
    fn test_authorization_placement() {
        let scheme = SigningScheme {
            algorithm: Algorithm::Sha256,
            encoding: DigestEncoding::Hex,
            message: vec![
                MessagePart::Nonce,
                MessagePart::Method,
                MessagePart::PathWithQuery,
                MessagePart::Body,
            ],
            placement: SignaturePlacement::Authorization { scheme: "Bitso" },
            body_encoding: BodyEncoding::Json,
        };
        let signer = RequestSigner::new(
            RestUrls::single("https://api.bitso.com"),
            scheme,
            Some(Credentials::new("key", "secret")),
        );
        let spec = RequestSpec::new(HttpMethod::Get, "/v3/open_orders", ApiSection::Private)
            .with_params(Params::new().with("book", "btc_mxn"));

        let signed = signer.sign_with_nonce(&spec, 99).unwrap();
        let expected = hmac(
            Algorithm::Sha256,
            DigestEncoding::Hex,
            b"secret",
            b"99GET/v3/open_orders?book=btc_mxn",
        )
        .unwrap();
        assert_eq!(
            signed.headers.get("Authorization"),
            Some(&format!("Bitso key:99:{}", expected))
        );
    }

    #[test]
    fn test_implode_path_consumes_params() {
        let mut params = Params::new().with("oid", "123").with("book", "btc_mxn");
        let path = implode_path("/v3/orders/{oid}/", &mut params).unwrap();
        assert_eq!(path, "/v3/orders/123/");
        assert_eq!(params.get("oid"), None);
        assert_eq!(params.get("book"), Some("btc_mxn"));

        let mut empty = Params::new();
        assert!(implode_path("/v3/orders/{oid}/", &mut empty).is_err());
    }

    #[test]
    fn test_implode_path_encodes_values() {
        let mut params = Params::new().with("oid", "a/b?c=1#d e+f");
        let path = implode_path("/v3/orders/{oid}/", &mut params).unwrap();
        assert_eq!(path, "/v3/orders/a%2Fb%3Fc%3D1%23d%20e%2Bf/");

        let mut plain = Params::new().with("oid", "Ab-1_2.3*");
        assert_eq!(implode_path("/v3/orders/{oid}", &mut plain).unwrap(), "/v3/orders/Ab-1_2.3*");
    }

    #[test]
    fn test_urlencode_escapes() {
        let params = Params::new().with("a", "b c").with("d", "e&f");
        assert_eq!(urlencode(&params), "a=b+c&d=e%26f");
    }
}
