//! Errors an adapter can raise, tagged with the reason class the fallback
//! executor uses to decide whether to advance the chain.

use gateway_core::error::ReasonClass;
use std::fmt;

/// Failure raised by a [`crate::Provider`] adapter.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// The backend itself returned a rate-limit response.
    RateLimit { retry_after: Option<std::time::Duration> },
    /// The tenant's quota on the backend account is exhausted.
    QuotaExceeded,
    /// API key rejected or expired.
    Authentication { detail: String },
    /// The requested model is not served by this adapter.
    ModelNotFound { model: String },
    /// The response was withheld by the backend's content filter.
    ContentFilter,
    /// The call did not complete before its deadline.
    Timeout,
    /// Any other backend failure (5xx, connection reset, malformed response).
    Other { detail: String },
}

impl ProviderError {
    /// Whether the fallback executor should treat this as retryable,
    /// mirroring the reason class's own policy.
    pub fn is_retryable(&self) -> bool {
        self.classify().is_retryable()
    }

    pub fn classify(&self) -> ReasonClass {
        match self {
            ProviderError::RateLimit { .. } => ReasonClass::RateLimit,
            ProviderError::QuotaExceeded => ReasonClass::QuotaExceeded,
            ProviderError::Authentication { .. } => ReasonClass::ProviderError,
            ProviderError::ModelNotFound { .. } => ReasonClass::ModelUnavailable,
            ProviderError::ContentFilter => ReasonClass::Quality,
            ProviderError::Timeout => ReasonClass::Timeout,
            ProviderError::Other { .. } => ReasonClass::ProviderError,
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimit { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited, retry after {:?}", d),
                None => write!(f, "rate limited"),
            },
            ProviderError::QuotaExceeded => write!(f, "quota exceeded"),
            ProviderError::Authentication { detail } => write!(f, "authentication failed: {detail}"),
            ProviderError::ModelNotFound { model } => write!(f, "model not found: {model}"),
            ProviderError::ContentFilter => write!(f, "content filtered"),
            ProviderError::Timeout => write!(f, "request timeout"),
            ProviderError::Other { detail } => write!(f, "request failed: {detail}"),
        }
    }
}

impl std::error::Error for ProviderError {}
