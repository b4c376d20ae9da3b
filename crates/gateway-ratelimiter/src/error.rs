use std::fmt;
use gateway_core::GatewayError;

/// Errors that can occur when using the rate limiter.
#[derive(Debug, Clone)]
pub enum RateLimiterError {
    /// The rate limit was exceeded and no permit could be acquired within the timeout.
    RateLimitExceeded,
}

impl fmt::Display for RateLimiterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimiterError::RateLimitExceeded => write!(f, "rate limit exceeded"),
        }
    }
}

impl std::error::Error for RateLimiterError {}

// Conversion to GatewayError for zero-boilerplate error handling
impl<E> From<RateLimiterError> for GatewayError<E> {
    fn from(_err: RateLimiterError) -> Self {
        GatewayError::RateLimited { retry_after: None }
    }
}
