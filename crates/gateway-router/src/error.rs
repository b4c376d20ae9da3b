//! Failure modes of routing itself (not of the backends it points to).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// No model profile satisfied the context's tier, capability, exclusion
    /// or cost constraints.
    NoEligibleModels,
    /// At least one model cleared every other constraint, but the request's
    /// token count exceeds every such model's context window. Distinguished
    /// from `NoEligibleModels` because it reflects a bad request, not a
    /// denied tenant.
    ContextWindowExceeded,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::NoEligibleModels => write!(f, "no eligible models for routing context"),
            RouterError::ContextWindowExceeded => {
                write!(f, "request token count exceeds every eligible model's context window")
            }
        }
    }
}

impl std::error::Error for RouterError {}
