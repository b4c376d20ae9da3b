//! Common error taxonomy for the gateway request path.
//!
//! This module provides [`GatewayError`], a unified error type that eliminates
//! the need for manual `From` trait implementations when composing the
//! pipeline's layers (rate limiter, cache, router, fallback executor,
//! streaming).
//!
//! # The Problem
//!
//! Composing several layers (rate limiter, circuit breaker, cache,
//! fallback executor, ...) typically means writing repetitive `From`
//! implementations to thread each layer's error type up to one application
//! error.
//!
//! # The Solution
//!
//! Use [`GatewayError<E>`] as the error type returned by the pipeline
//! coordinator: each layer's failure mode maps onto one of its variants, and
//! `E` carries whatever the innermost provider call returns.
//!
//! ```rust
//! use gateway_core::GatewayError;
//!
//! #[derive(Debug, Clone)]
//! enum ProviderError {
//!     ConnectionReset,
//! }
//!
//! impl std::fmt::Display for ProviderError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "connection reset")
//!     }
//! }
//!
//! impl std::error::Error for ProviderError {}
//!
//! type PipelineError = GatewayError<ProviderError>;
//! ```
//!
//! # Helper Methods
//!
//! ```rust
//! use gateway_core::GatewayError;
//!
//! # #[derive(Debug)]
//! # struct AppError;
//! # impl std::fmt::Display for AppError {
//! #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { Ok(()) }
//! # }
//! # impl std::error::Error for AppError {}
//! # let error: GatewayError<AppError> = GatewayError::RateLimited { retry_after: None };
//! if error.is_retryable() {
//!     // safe to advance the fallback chain
//! } else if error.is_application() {
//!     let app_err = error.application_error().unwrap();
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// The reason a backend call was classified as it was, per §4.3 of the
/// design: used by the fallback executor to decide retryable vs. fatal and
/// to choose the next delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasonClass {
    /// The call exceeded its deadline.
    Timeout,
    /// The backend itself returned a rate-limit response.
    RateLimit,
    /// The tenant's quota on the backend account is exhausted.
    QuotaExceeded,
    /// No healthy instance of the requested model was available.
    ModelUnavailable,
    /// The response failed a quality gate (reserved for future use by callers).
    Quality,
    /// The estimated cost exceeded the caller's stated maximum.
    CostLimit,
    /// An otherwise-unclassified provider error (5xx, connection reset, ...).
    ProviderError,
}

impl ReasonClass {
    /// Whether the fallback executor should advance the chain on this reason,
    /// per the propagation policy in the design.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ReasonClass::Timeout
                | ReasonClass::RateLimit
                | ReasonClass::ModelUnavailable
                | ReasonClass::ProviderError
        )
    }
}

impl fmt::Display for ReasonClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonClass::Timeout => "timeout",
            ReasonClass::RateLimit => "rate_limit",
            ReasonClass::QuotaExceeded => "quota_exceeded",
            ReasonClass::ModelUnavailable => "model_unavailable",
            ReasonClass::Quality => "quality",
            ReasonClass::CostLimit => "cost_limit",
            ReasonClass::ProviderError => "provider_error",
        };
        f.write_str(s)
    }
}

/// A unified error type spanning the whole gateway request path.
///
/// Each variant corresponds to one kind in the error taxonomy (§7 of the
/// design). `E` is the application/provider error type carried by the
/// innermost call.
#[derive(Debug, Clone)]
pub enum GatewayError<E> {
    /// Admission was denied by the rate limiter.
    RateLimited {
        /// How long the caller should wait before retrying, if known.
        retry_after: Option<Duration>,
    },

    /// The tenant's billing/usage quota is exhausted. Not retryable.
    QuotaExceeded,

    /// The tenant or user is not permitted to perform this request (tier
    /// mismatch, disabled feature, model not in tier's allow-list).
    Unauthorized {
        /// Human-readable detail, e.g. which model/feature was denied.
        reason: String,
    },

    /// The request failed validation before admission.
    BadRequest {
        /// Human-readable detail.
        reason: String,
    },

    /// A deadline (global or per-attempt) elapsed.
    DeadlineExceeded {
        /// Which layer observed the expiry (e.g. "per_attempt", "pipeline").
        layer: &'static str,
    },

    /// Every entry in the fallback chain was exhausted.
    UpstreamUnavailable {
        /// The reason classification of the last attempt.
        last_reason: ReasonClass,
        /// Number of attempts made.
        attempts: usize,
    },

    /// A retryable backend error that was *not* recovered by the executor
    /// (e.g. the executor itself is being used directly, without the
    /// fallback chain wrapping it).
    UpstreamTransient {
        /// The reason classification.
        reason: ReasonClass,
    },

    /// An invariant violation or otherwise-unexpected fault.
    Internal {
        /// Human-readable detail.
        reason: String,
    },

    /// The underlying application/provider call returned an error.
    Application(E),
}

impl<E> fmt::Display for GatewayError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::RateLimited { retry_after } => match retry_after {
                Some(d) => write!(f, "rate limited, retry after {:?}", d),
                None => write!(f, "rate limited"),
            },
            GatewayError::QuotaExceeded => write!(f, "quota exceeded"),
            GatewayError::Unauthorized { reason } => write!(f, "unauthorized: {}", reason),
            GatewayError::BadRequest { reason } => write!(f, "bad request: {}", reason),
            GatewayError::DeadlineExceeded { layer } => {
                write!(f, "deadline exceeded in {}", layer)
            }
            GatewayError::UpstreamUnavailable {
                last_reason,
                attempts,
            } => write!(
                f,
                "upstream unavailable after {} attempts, last reason: {}",
                attempts, last_reason
            ),
            GatewayError::UpstreamTransient { reason } => {
                write!(f, "upstream transient error: {}", reason)
            }
            GatewayError::Internal { reason } => write!(f, "internal error: {}", reason),
            GatewayError::Application(e) => write!(f, "application error: {}", e),
        }
    }
}

impl<E> std::error::Error for GatewayError<E> where E: std::error::Error {}

impl<E> GatewayError<E> {
    /// Returns `true` if the fallback executor may recover from this error
    /// by advancing the chain, per the propagation policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamTransient { reason } => reason.is_retryable(),
            GatewayError::RateLimited { .. } | GatewayError::DeadlineExceeded { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a `RateLimited` error.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GatewayError::RateLimited { .. })
    }

    /// Returns `true` if this is a `DeadlineExceeded` error.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, GatewayError::DeadlineExceeded { .. })
    }

    /// Returns `true` if this is an `UpstreamUnavailable` error.
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, GatewayError::UpstreamUnavailable { .. })
    }

    /// Returns the `retry_after` duration, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Returns the reason classification, if this error carries one.
    pub fn reason_class(&self) -> Option<ReasonClass> {
        match self {
            GatewayError::UpstreamUnavailable { last_reason, .. } => Some(*last_reason),
            GatewayError::UpstreamTransient { reason } => Some(*reason),
            _ => None,
        }
    }

    /// Returns `true` if this is an `Application` variant.
    pub fn is_application(&self) -> bool {
        matches!(self, GatewayError::Application(_))
    }

    /// Extracts the application error, if this is an `Application` variant.
    pub fn application_error(self) -> Option<E> {
        match self {
            GatewayError::Application(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the application error using a function.
    ///
    /// ```rust
    /// use gateway_core::GatewayError;
    ///
    /// let err: GatewayError<String> = GatewayError::Application("oops".to_string());
    /// let mapped: GatewayError<usize> = err.map_application(|s| s.len());
    /// assert_eq!(mapped.application_error(), Some(4));
    /// ```
    pub fn map_application<F, T>(self, f: F) -> GatewayError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            GatewayError::RateLimited { retry_after } => GatewayError::RateLimited { retry_after },
            GatewayError::QuotaExceeded => GatewayError::QuotaExceeded,
            GatewayError::Unauthorized { reason } => GatewayError::Unauthorized { reason },
            GatewayError::BadRequest { reason } => GatewayError::BadRequest { reason },
            GatewayError::DeadlineExceeded { layer } => GatewayError::DeadlineExceeded { layer },
            GatewayError::UpstreamUnavailable {
                last_reason,
                attempts,
            } => GatewayError::UpstreamUnavailable {
                last_reason,
                attempts,
            },
            GatewayError::UpstreamTransient { reason } => {
                GatewayError::UpstreamTransient { reason }
            }
            GatewayError::Internal { reason } => GatewayError::Internal { reason },
            GatewayError::Application(e) => GatewayError::Application(f(e)),
        }
    }
}
