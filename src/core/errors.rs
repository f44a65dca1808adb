use std::fmt;
use thiserror::Error;

/// Every failure surfaced by the dispatcher, the streaming client or a binding.
///
/// Variants carry owned strings only so a single error can be fanned out to
/// several stream listeners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error: {code} - {message}")]
    ApiError { code: String, message: String },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::core::config::ConfigError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Fieldless error taxonomy used by binding tables and for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    PermissionDenied,
    InvalidOrder,
    OrderNotFound,
    InsufficientFunds,
    RateLimitExceeded,
    BadRequest,
    Transport,
    Timeout,
    Exchange,
    NotSupported,
    InvalidParameters,
    BadResponse,
    Configuration,
    Other,
}

impl ErrorKind {
    /// Build the concrete error for this kind.
    ///
    /// `code` is only kept by the catch-all [`ErrorKind::Exchange`] kind.
    pub fn into_error(self, code: &str, message: impl Into<String>) -> ExchangeError {
        let message = message.into();
        match self {
            Self::Authentication => ExchangeError::AuthError(message),
            Self::PermissionDenied => ExchangeError::PermissionDenied(message),
            Self::InvalidOrder => ExchangeError::InvalidOrder(message),
            Self::OrderNotFound => ExchangeError::OrderNotFound(message),
            Self::InsufficientFunds => ExchangeError::InsufficientFunds(message),
            Self::RateLimitExceeded => ExchangeError::RateLimitExceeded(message),
            Self::BadRequest => ExchangeError::BadRequest(message),
            Self::Transport => ExchangeError::NetworkError(message),
            Self::Timeout => ExchangeError::Timeout(message),
            Self::Exchange => ExchangeError::ApiError {
                code: code.to_string(),
                message,
            },
            Self::NotSupported => ExchangeError::NotSupported(message),
            Self::InvalidParameters => ExchangeError::InvalidParameters(message),
            Self::BadResponse => ExchangeError::DeserializationError(message),
            Self::Configuration => ExchangeError::Other(message),
            Self::Other => ExchangeError::Other(message),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl ExchangeError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthError(_) => ErrorKind::Authentication,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::InvalidOrder(_) => ErrorKind::InvalidOrder,
            Self::OrderNotFound(_) => ErrorKind::OrderNotFound,
            Self::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Self::RateLimitExceeded(_) => ErrorKind::RateLimitExceeded,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::NetworkError(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ApiError { .. } => ErrorKind::Exchange,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::InvalidParameters(_) => ErrorKind::InvalidParameters,
            Self::SerializationError(_) | Self::Other(_) => ErrorKind::Other,
            Self::DeserializationError(_) => ErrorKind::BadResponse,
            Self::ConfigError(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the failure happened below the exchange API (socket, TLS, DNS, timeout).
    pub const fn is_transport(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_into_error() {
        let kinds = [
            ErrorKind::Authentication,
            ErrorKind::PermissionDenied,
            ErrorKind::InvalidOrder,
            ErrorKind::OrderNotFound,
            ErrorKind::InsufficientFunds,
            ErrorKind::RateLimitExceeded,
            ErrorKind::BadRequest,
            ErrorKind::Transport,
            ErrorKind::Timeout,
            ErrorKind::Exchange,
            ErrorKind::NotSupported,
        ];

        for kind in kinds {
            assert_eq!(kind.into_error("1", "boom").kind(), kind);
        }
    }

    #[test]
    fn test_exchange_kind_keeps_code() {
        let err = ErrorKind::Exchange.into_error("10001", "params error");
        assert_eq!(
            err,
            ExchangeError::ApiError {
                code: "10001".to_string(),
                message: "params error".to_string()
            }
        );
        assert_eq!(err.to_string(), "API error: 10001 - params error");
    }

    #[test]
    fn test_transport_classification() {
        assert!(ExchangeError::NetworkError("refused".into()).is_transport());
        assert!(ExchangeError::Timeout("30s".into()).is_transport());
        assert!(!ExchangeError::AuthError("bad key".into()).is_transport());
    }
}
