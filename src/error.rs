//! Error taxonomy at the registry and balancer boundaries.
//!
//! One small `thiserror` enum per component rather than a single
//! crate-wide error type.

use crate::provider::ProviderId;
use thiserror::Error;

/// Errors returned by [`crate::registry::ProviderRegistry::register`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("provider {0} is already registered")]
    AlreadyRegistered(ProviderId),

    #[error("registry is at capacity ({0} providers)")]
    OutOfLimit(usize),
}

/// Errors returned by [`crate::balancer::Balancer::get`].
#[derive(Debug, Error, Clone)]
pub enum BalancerError {
    #[error("no providers are currently eligible")]
    NoProvidersAvailable,

    #[error("selected provider is over capacity, retry after backoff")]
    CapacityLimit,

    #[error("provider call failed: {0}")]
    ProviderFailure(String),
}
